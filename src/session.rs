//! Per-invocation call proxies
//!
//! A fresh [`Session`] is built for every dispatched request. It knows who
//! called, carries the context produced by the context hook, and lets the
//! resolver call back across the connection in the one direction its side is
//! allowed to:
//!
//! - a server session calls peers with [`Session::to_peer`] or
//!   [`Session::broadcast`]
//! - a client session calls the server with [`Session::server`]

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::client::Client;
use crate::error::RpcError;
use crate::network::{BroadcastResult, Network, PeerRecord};
use crate::protocol::{CallType, Request};

/// Which side of the connection a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

#[derive(Clone)]
enum Link {
    Server(Network),
    Client(Client),
}

struct SessionInner {
    session_id: String,
    caller_id: String,
    context: Value,
    link: Link,
}

/// Context handed to a resolver
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Session for a request a peer sent to the server
    #[must_use]
    pub fn new_server(
        network: Network,
        session_id: impl Into<String>,
        caller_id: impl Into<String>,
        context: Value,
    ) -> Self {
        Self::build(Link::Server(network), session_id, caller_id, context)
    }

    /// Session for a request the server sent to this client
    #[must_use]
    pub fn new_client(
        client: Client,
        session_id: impl Into<String>,
        self_id: impl Into<String>,
        context: Value,
    ) -> Self {
        Self::build(Link::Client(client), session_id, self_id, context)
    }

    fn build(
        link: Link,
        session_id: impl Into<String>,
        caller_id: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session_id: session_id.into(),
                caller_id: caller_id.into(),
                context,
                link,
            }),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Peer that sent the request; on a client this is the client's own id
    #[must_use]
    pub fn caller_id(&self) -> &str {
        &self.inner.caller_id
    }

    #[must_use]
    pub fn context(&self) -> &Value {
        &self.inner.context
    }

    #[must_use]
    pub fn role(&self) -> Role {
        match self.inner.link {
            Link::Server(_) => Role::Server,
            Link::Client(_) => Role::Client,
        }
    }

    /// Call procedures on one peer
    ///
    /// # Errors
    ///
    /// Returns `INVALID_DIRECTION` on a client session
    pub fn to_peer(&self, peer_id: impl Into<String>) -> Result<PathBuilder, RpcError> {
        let network = self.network("call a peer")?;
        Ok(PathBuilder::new(Target::Peer {
            network: network.clone(),
            peer_id: peer_id.into(),
        }))
    }

    /// Call procedures on every connected peer
    ///
    /// # Errors
    ///
    /// Returns `INVALID_DIRECTION` on a client session
    pub fn broadcast(&self) -> Result<BroadcastBuilder, RpcError> {
        let network = self.network("broadcast")?;
        Ok(BroadcastBuilder {
            network: network.clone(),
            segments: Vec::new(),
        })
    }

    /// Call procedures on the server
    ///
    /// # Errors
    ///
    /// Returns `INVALID_DIRECTION` on a server session
    pub fn server(&self) -> Result<PathBuilder, RpcError> {
        match &self.inner.link {
            Link::Client(client) => Ok(PathBuilder::new(Target::Server(client.clone()))),
            Link::Server(_) => Err(RpcError::invalid_direction(
                "a server session cannot call the server",
            )),
        }
    }

    /// Peers currently connected to the room
    ///
    /// # Errors
    ///
    /// Returns `INVALID_DIRECTION` on a client session
    pub fn connected_peers(&self) -> Result<Vec<PeerRecord>, RpcError> {
        Ok(self.network("list peers")?.connected_clients())
    }

    fn network(&self, action: &str) -> Result<&Network, RpcError> {
        match &self.inner.link {
            Link::Server(network) => Ok(network),
            Link::Client(_) => Err(RpcError::invalid_direction(format!(
                "a client session cannot {action}"
            ))),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.inner.session_id)
            .field("caller_id", &self.inner.caller_id)
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Target {
    Peer { network: Network, peer_id: String },
    Server(Client),
}

/// Accumulates a dotted path, then calls it on a single target
#[derive(Debug, Clone)]
pub struct PathBuilder {
    target: Target,
    segments: Vec<String>,
}

impl PathBuilder {
    const fn new(target: Target) -> Self {
        Self {
            target,
            segments: Vec::new(),
        }
    }

    /// Descend one segment
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(name.to_string());
        next
    }

    /// Descend along a dotted path
    #[must_use]
    pub fn at(&self, path: &str) -> Self {
        let mut next = self.clone();
        next.segments
            .extend(path.split('.').filter(|s| !s.is_empty()).map(String::from));
        next
    }

    #[must_use]
    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    /// # Errors
    ///
    /// Returns the remote error or a transport failure
    pub async fn query(&self, input: impl Serialize) -> Result<Value, RpcError> {
        self.call(CallType::Query, input).await
    }

    /// # Errors
    ///
    /// Returns the remote error or a transport failure
    pub async fn mutation(&self, input: impl Serialize) -> Result<Value, RpcError> {
        self.call(CallType::Mutation, input).await
    }

    async fn call(&self, call_type: CallType, input: impl Serialize) -> Result<Value, RpcError> {
        let input = to_input(input)?;
        let path = self.path();
        match &self.target {
            Target::Peer { network, peer_id } => {
                network
                    .send_to_client(peer_id, Request::new(call_type, path, input))
                    .await
            }
            Target::Server(client) => client.call(call_type, &path, input).await,
        }
    }
}

/// Accumulates a dotted path, then calls it on every connected peer
#[derive(Debug, Clone)]
pub struct BroadcastBuilder {
    network: Network,
    segments: Vec<String>,
}

impl BroadcastBuilder {
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(name.to_string());
        next
    }

    #[must_use]
    pub fn at(&self, path: &str) -> Self {
        let mut next = self.clone();
        next.segments
            .extend(path.split('.').filter(|s| !s.is_empty()).map(String::from));
        next
    }

    #[must_use]
    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    /// # Errors
    ///
    /// Returns an internal error if the input cannot be serialized
    pub async fn query(&self, input: impl Serialize) -> Result<Vec<BroadcastResult>, RpcError> {
        self.call(CallType::Query, input).await
    }

    /// # Errors
    ///
    /// Returns an internal error if the input cannot be serialized
    pub async fn mutation(
        &self,
        input: impl Serialize,
    ) -> Result<Vec<BroadcastResult>, RpcError> {
        self.call(CallType::Mutation, input).await
    }

    async fn call(
        &self,
        call_type: CallType,
        input: impl Serialize,
    ) -> Result<Vec<BroadcastResult>, RpcError> {
        let request = Request::new(call_type, self.path(), to_input(input)?);
        Ok(self.network.broadcast(request).await)
    }
}

fn to_input(input: impl Serialize) -> Result<Value, RpcError> {
    serde_json::to_value(input)
        .map_err(|e| RpcError::internal(format!("failed to serialize input: {e}")))
}
