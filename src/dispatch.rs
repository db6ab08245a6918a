//! Server-side message dispatch
//!
//! [`Dispatcher::handle_message`] takes one raw inbound frame from a peer and
//! produces at most one outbound frame. Requests are resolved against the
//! router and answered with the same id; responses are handed to the
//! [`Network`] for correlation; pings are answered with pongs. Failures are
//! reported through the network's error hook and never escape.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{ErrorCode, RpcError};
use crate::host::{ErrorReport, PeerTransport};
use crate::network::Network;
use crate::procedure::Procedure;
use crate::protocol::{Message, Request, Response, UNKNOWN_ID};
use crate::router::Router;
use crate::session::Session;

/// Produces the session context for an inbound request
pub type ContextHook =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Find the procedure for a request and check its call type
///
/// # Errors
///
/// Returns `PROCEDURE_NOT_FOUND` or `PROCEDURE_TYPE_MISMATCH`
pub fn prepare(router: &Router, request: &Request) -> Result<Arc<Procedure>, RpcError> {
    let procedure = router.resolve(&request.path)?;
    if procedure.call_type() != request.call_type {
        return Err(RpcError::new(
            ErrorCode::ProcedureTypeMismatch,
            format!(
                "procedure '{}' is a {}, not a {}",
                request.path,
                procedure.call_type(),
                request.call_type
            ),
        ));
    }
    Ok(procedure)
}

/// Run a prepared procedure, turning a resolver panic into `INTERNAL_ERROR`
///
/// # Errors
///
/// Returns whatever the procedure rejects with
pub async fn invoke(
    procedure: &Procedure,
    request: &Request,
    session: Session,
) -> Result<Value, RpcError> {
    match AssertUnwindSafe(procedure.call(request.input.clone(), session))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::error!(path = %request.path, reason = %reason, "procedure panicked");
            Err(RpcError::internal(format!(
                "procedure '{}' panicked: {reason}",
                request.path
            )))
        }
    }
}

/// Resolve and run a request against a router
///
/// # Errors
///
/// Returns the lookup, validation or resolver error
pub async fn execute(router: &Router, request: &Request, session: Session) -> Result<Value, RpcError> {
    let procedure = prepare(router, request)?;
    invoke(&procedure, request, session).await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Turns inbound frames from a room's peers into calls and replies
#[derive(Clone)]
pub struct Dispatcher {
    router: Router,
    network: Network,
    context: Option<ContextHook>,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(router: Router, network: Network) -> Self {
        Self {
            router,
            network,
            context: None,
        }
    }

    /// Run a hook before every request to build its session context
    #[must_use]
    pub fn with_context(mut self, hook: ContextHook) -> Self {
        self.context = Some(hook);
        self
    }

    #[must_use]
    pub const fn network(&self) -> &Network {
        &self.network
    }

    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Handle one raw frame received on `transport`
    pub async fn handle_message(&self, transport: &Arc<dyn PeerTransport>, raw: &str) {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(error) => {
                let report = ErrorReport::new(error.clone())
                    .with_peer(self.peer_of(transport))
                    .with_transport(transport.id());
                self.network.report(&report);
                self.reply(transport, &Message::error(UNKNOWN_ID, error))
                    .await;
                return;
            }
        };

        match message {
            Message::Request(request) => self.handle_request(transport, request).await,
            Message::Response(response) => {
                let Some(peer_id) = self.peer_of(transport) else {
                    tracing::warn!(
                        transport_id = %transport.id(),
                        request_id = %response.id,
                        "dropping response from unidentified transport"
                    );
                    return;
                };
                self.network.handle_response(&peer_id, response);
            }
            Message::Ping => self.reply(transport, &Message::Pong).await,
            Message::Pong => {}
        }
    }

    async fn handle_request(&self, transport: &Arc<dyn PeerTransport>, request: Request) {
        let peer_id = self.peer_of(transport);
        tracing::debug!(
            peer_id = ?peer_id,
            request_id = %request.id,
            path = %request.path,
            call_type = %request.call_type,
            "handling request"
        );

        let result = self.run(&request, peer_id.as_deref()).await;
        if let Err(error) = &result {
            let report = ErrorReport::new(error.clone())
                .with_request(&request)
                .with_peer(peer_id)
                .with_transport(transport.id());
            self.network.report(&report);
        }

        let id = request.id.clone();
        self.reply(transport, &Message::Response(Response::new(id, result)))
            .await;
    }

    async fn run(&self, request: &Request, peer_id: Option<&str>) -> Result<Value, RpcError> {
        let procedure = prepare(&self.router, request)?;

        let context = match &self.context {
            Some(hook) => hook(request.clone()).await?,
            None => Value::Null,
        };

        let session = Session::new_server(
            self.network.clone(),
            self.network.session_id().unwrap_or_default(),
            peer_id.unwrap_or(UNKNOWN_ID),
            context,
        );
        invoke(&procedure, request, session).await
    }

    async fn reply(&self, transport: &Arc<dyn PeerTransport>, message: &Message) {
        let result = match message.to_json() {
            Ok(frame) => transport
                .send(frame)
                .await
                .map_err(|e| RpcError::internal(format!("failed to send reply: {e}"))),
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            let report = ErrorReport::new(error)
                .with_peer(self.peer_of(transport))
                .with_transport(transport.id());
            self.network.report(&report);
        }
    }

    fn peer_of(&self, transport: &Arc<dyn PeerTransport>) -> Option<String> {
        self.network
            .transports()
            .peer_id_by_transport(transport.id())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .field("network", &self.network)
            .field("context", &self.context.is_some())
            .finish()
    }
}
