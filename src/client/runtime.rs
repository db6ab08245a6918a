//! Client runtime: connection driver, outbound calls and inbound dispatch

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};

use super::options::ClientOptions;
use super::state::ConnectionState;
use super::transport::{
    ABNORMAL_CLOSE, ClientConnection, Connector, NORMAL_CLOSE, TransportEvent, WsConnector,
};
use crate::dispatch;
use crate::error::RpcError;
use crate::host::{ErrorReport, Outbound};
use crate::pending::{PendingRequests, lock};
use crate::protocol::{CallType, Message, Request, Response, UNKNOWN_ID};
use crate::router::Router;
use crate::session::Session;

/// Request frame held until the next open connection
struct Queued {
    id: String,
    frame: String,
}

#[derive(Default)]
struct Link {
    /// Writer of the open connection, if any
    outbound: Option<mpsc::Sender<Outbound>>,
    /// Requests waiting for the next open connection
    queue: Vec<Queued>,
    /// Reconnect attempts scheduled since the last successful open
    attempts: u32,
    driver: Option<JoinHandle<()>>,
    /// Bumped whenever a driver is started or stopped; a driver acting on an
    /// older generation is stale and must not touch shared state
    generation: u64,
}

struct ClientInner {
    router: Router,
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
    pending: PendingRequests<String>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let link = self.link.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(driver) = link.driver.take() {
            driver.abort();
        }
    }
}

/// One side of a duplex RPC connection to a server
///
/// Cloning is cheap and every clone drives the same connection. The client
/// connects lazily on the first call, queues calls made while it is not
/// connected, and reconnects with exponential backoff after an unexpected
/// close. Requests the server sends are dispatched against the client's own
/// router.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    #[must_use]
    pub fn new(router: Router, options: ClientOptions) -> Self {
        let connector = options
            .connector
            .clone()
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);
        let (state, _) = watch::channel(ConnectionState::Offline);
        let pending = PendingRequests::new(options.request_timeout);

        Self {
            inner: Arc::new(ClientInner {
                router,
                options,
                connector,
                state,
                link: Mutex::new(Link::default()),
                pending,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.inner.options.peer_id
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.options.session_id
    }

    /// Number of calls waiting for a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of frames queued until the next connection opens
    #[must_use]
    pub fn queued_count(&self) -> usize {
        lock(&self.inner.link).queue.len()
    }

    /// Start connecting unless a connection is already up or in progress
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut link = lock(&self.inner.link);
        if link.driver.as_ref().is_some_and(|d| !d.is_finished()) {
            return;
        }

        link.generation += 1;
        link.attempts = 0;
        let generation = link.generation;
        let handle = Arc::downgrade(&self.inner);
        link.driver = Some(tokio::spawn(Self::drive(handle, generation)));
    }

    /// # Errors
    ///
    /// Returns the server's error, `REQUEST_TIMEOUT`, or `PEER_DISCONNECTED`
    pub async fn query(&self, path: &str, input: impl Serialize) -> Result<Value, RpcError> {
        let input = serde_json::to_value(input)
            .map_err(|e| RpcError::internal(format!("failed to serialize input: {e}")))?;
        self.call(CallType::Query, path, input).await
    }

    /// # Errors
    ///
    /// Returns the server's error, `REQUEST_TIMEOUT`, or `PEER_DISCONNECTED`
    pub async fn mutation(&self, path: &str, input: impl Serialize) -> Result<Value, RpcError> {
        let input = serde_json::to_value(input)
            .map_err(|e| RpcError::internal(format!("failed to serialize input: {e}")))?;
        self.call(CallType::Mutation, path, input).await
    }

    /// Call a procedure on the server
    ///
    /// # Errors
    ///
    /// Returns the server's error, `REQUEST_TIMEOUT`, or `PEER_DISCONNECTED`
    pub async fn call(
        &self,
        call_type: CallType,
        path: &str,
        input: Value,
    ) -> Result<Value, RpcError> {
        let request = Request::new(call_type, path, input);
        let frame = Message::Request(request.clone()).to_json()?;
        let rx = self.inner.pending.register(request.id.clone())?;

        self.send_or_queue(&request.id, frame).await;
        self.connect();

        tracing::debug!(request_id = %request.id, path = %path, call_type = %call_type, "call sent");
        let result = PendingRequests::<String>::wait(rx).await;
        if result.is_err() {
            // Failed calls leave the queue
            lock(&self.inner.link).queue.retain(|q| q.id != request.id);
        }
        result
    }

    /// Close the connection and stop reconnecting
    pub async fn disconnect(&self) {
        let (outbound, driver, changed) = {
            let mut link = lock(&self.inner.link);
            link.generation += 1;
            link.attempts = 0;
            link.queue.clear();
            let previous = self.inner.state.send_replace(ConnectionState::Offline);
            (
                link.outbound.take(),
                link.driver.take(),
                previous != ConnectionState::Offline,
            )
        };

        if let Some(driver) = driver {
            driver.abort();
        }

        let rejected = self
            .inner
            .pending
            .reject_all(&RpcError::peer_disconnected("connection closed"));

        if changed {
            self.notify_state(ConnectionState::Offline);
        }

        if let Some(outbound) = outbound {
            let close = Outbound::Close {
                code: NORMAL_CLOSE,
                reason: "client disconnect".to_string(),
            };
            let _ = outbound.send(close).await;
            self.notify_closed(NORMAL_CLOSE, "client disconnect");
        }

        tracing::info!(peer_id = %self.peer_id(), rejected, "client disconnected");
    }

    fn upgrade(handle: &Weak<ClientInner>) -> Option<Self> {
        handle.upgrade().map(|inner| Self { inner })
    }

    /// Connection loop; ends once every handle to the client is dropped
    async fn drive(handle: Weak<ClientInner>, generation: u64) {
        loop {
            let Some(client) = Self::upgrade(&handle) else {
                return;
            };
            if !client.transition(generation, ConnectionState::Connecting) {
                return;
            }

            let connected = client.inner.connector.connect(&client.inner.options).await;
            let client = match connected {
                Ok(ClientConnection { outbound, inbound }) => {
                    if !client.open(generation, &outbound).await {
                        return;
                    }
                    let ping_interval = client.inner.options.ping_interval;
                    drop(client);

                    let Some((client, code, reason)) =
                        Self::pump(&handle, generation, outbound, inbound, ping_interval).await
                    else {
                        return;
                    };
                    if !client.is_current(generation) {
                        return;
                    }

                    client.notify_closed(code, &reason);
                    if code == NORMAL_CLOSE {
                        tracing::info!(reason = %reason, "server closed the connection");
                        client.finish(generation, ConnectionState::Offline, "connection closed by server");
                        return;
                    }
                    tracing::warn!(code, reason = %reason, "connection lost");
                    client
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connect attempt failed");
                    client.report(&ErrorReport::new(RpcError::peer_disconnected(format!(
                        "connect failed: {e}"
                    ))));
                    client
                }
            };

            let Some(delay) = client.schedule_reconnect(generation) else {
                return;
            };
            drop(client);
            tracing::debug!(delay_ms = delay.as_millis(), "reconnect scheduled");
            tokio::time::sleep(delay).await;
        }
    }

    /// Move to `Reconnecting`, or to `Error` once attempts run out
    ///
    /// Returns the delay before the next attempt, or `None` if the driver
    /// should stop
    fn schedule_reconnect(&self, generation: u64) -> Option<Duration> {
        let Some(delay) = self.next_backoff(generation) else {
            self.finish(
                generation,
                ConnectionState::Error,
                "reconnect attempts exhausted",
            );
            return None;
        };
        self.transition(generation, ConnectionState::Reconnecting)
            .then_some(delay)
    }

    /// Attach a freshly opened connection and flush queued requests
    ///
    /// Returns false if the connection was superseded before it opened
    async fn open(&self, generation: u64, outbound: &mpsc::Sender<Outbound>) -> bool {
        let queued = {
            let mut link = lock(&self.inner.link);
            if link.generation != generation {
                drop(link);
                let _ = outbound.try_send(Outbound::Close {
                    code: NORMAL_CLOSE,
                    reason: "superseded".to_string(),
                });
                return false;
            }
            link.outbound = Some(outbound.clone());
            link.attempts = 0;
            std::mem::take(&mut link.queue)
        };

        self.transition(generation, ConnectionState::Connected);
        if let Some(hook) = &self.inner.options.hooks.on_open {
            hook();
        }
        tracing::info!(peer_id = %self.peer_id(), queued = queued.len(), "client connected");
        self.flush(generation, outbound, queued).await;
        true
    }

    /// Pump one open connection until it closes
    ///
    /// Holds no handle to the client while idle. Returns `None` if the client
    /// was dropped in the meantime.
    async fn pump(
        handle: &Weak<ClientInner>,
        generation: u64,
        outbound: mpsc::Sender<Outbound>,
        mut inbound: mpsc::Receiver<TransportEvent>,
        ping_interval: Option<Duration>,
    ) -> Option<(Self, u16, String)> {
        let mut keepalive =
            ping_interval.map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                event = inbound.recv() => {
                    let client = Self::upgrade(handle)?;
                    let (code, reason) = match event {
                        Some(TransportEvent::Message(text)) => {
                            let outbound = outbound.clone();
                            tokio::spawn(async move { client.handle_inbound(&outbound, &text).await });
                            continue;
                        }
                        Some(TransportEvent::Closed { code, reason }) => (code, reason),
                        None => (ABNORMAL_CLOSE, "transport dropped".to_string()),
                    };
                    client.detach_outbound(generation, &outbound);
                    return Some((client, code, reason));
                }
                () = tick(keepalive.as_mut()) => {
                    let client = Self::upgrade(handle)?;
                    let sent = match Message::Ping.to_json() {
                        Ok(frame) => outbound.send(Outbound::Text(frame)).await.is_ok(),
                        Err(error) => {
                            client.report(&ErrorReport::new(error));
                            false
                        }
                    };
                    if !sent {
                        tracing::debug!("keepalive ping failed");
                    }
                }
            }
        }
    }

    async fn flush(&self, generation: u64, outbound: &mpsc::Sender<Outbound>, queued: Vec<Queued>) {
        let mut frames: VecDeque<Queued> = queued.into();
        while let Some(queued) = frames.pop_front() {
            // Calls that timed out or were rejected while waiting stay unsent
            if !self.inner.pending.contains(&queued.id) {
                tracing::debug!(request_id = %queued.id, "dropping queued request that already failed");
                continue;
            }

            let Queued { id, frame } = queued;
            if let Err(mpsc::error::SendError(Outbound::Text(frame))) =
                outbound.send(Outbound::Text(frame)).await
            {
                // Writer is gone; put the rest back for the next connection
                frames.push_front(Queued { id, frame });
                let mut link = lock(&self.inner.link);
                if link.generation == generation {
                    let later = std::mem::take(&mut link.queue);
                    link.queue = frames.into_iter().chain(later).collect();
                }
                return;
            }
        }
    }

    async fn send_or_queue(&self, id: &str, mut frame: String) {
        loop {
            let sender = {
                let mut link = lock(&self.inner.link);
                let Some(sender) = link.outbound.clone() else {
                    link.queue.push(Queued {
                        id: id.to_string(),
                        frame,
                    });
                    return;
                };
                sender
            };

            match sender.send(Outbound::Text(frame)).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(rejected)) => {
                    let Outbound::Text(text) = rejected else {
                        return;
                    };
                    {
                        let mut link = lock(&self.inner.link);
                        if link
                            .outbound
                            .as_ref()
                            .is_some_and(|current| current.same_channel(&sender))
                        {
                            link.outbound = None;
                        }
                    }
                    frame = text;
                }
            }
        }
    }

    async fn handle_inbound(&self, outbound: &mpsc::Sender<Outbound>, raw: &str) {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(error) => {
                self.report(&ErrorReport::new(error.clone()));
                self.reply(outbound, &Message::error(UNKNOWN_ID, error)).await;
                return;
            }
        };

        match message {
            Message::Response(response) => {
                let id = response.id.clone();
                if !self
                    .inner
                    .pending
                    .resolve(&id, response.result.into_result())
                {
                    tracing::debug!(request_id = %id, "dropping response for unknown request");
                }
            }
            Message::Request(request) => {
                let result = self.dispatch(&request).await;
                if let Err(error) = &result {
                    self.report(&ErrorReport::new(error.clone()).with_request(&request));
                }
                let id = request.id.clone();
                self.reply(outbound, &Message::Response(Response::new(id, result)))
                    .await;
            }
            Message::Ping => self.reply(outbound, &Message::Pong).await,
            Message::Pong => {}
        }
    }

    async fn dispatch(&self, request: &Request) -> Result<Value, RpcError> {
        let context = match &self.inner.options.hooks.on_context {
            Some(hook) => hook(request.clone()).await.map_err(|e| {
                RpcError::internal(format!("context hook failed: {}", e.message))
            })?,
            None => Value::Null,
        };

        let session = Session::new_client(
            self.clone(),
            self.session_id(),
            self.peer_id(),
            context,
        );
        dispatch::execute(&self.inner.router, request, session).await
    }

    async fn reply(&self, outbound: &mpsc::Sender<Outbound>, message: &Message) {
        let result = match message.to_json() {
            Ok(frame) => outbound
                .send(Outbound::Text(frame))
                .await
                .map_err(|_| RpcError::internal("failed to send reply: connection closed")),
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            self.report(&ErrorReport::new(error));
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.inner.link).generation == generation
    }

    /// Move to `state` if this driver is still current
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let previous = {
            let link = lock(&self.inner.link);
            if link.generation != generation {
                return false;
            }
            self.inner.state.send_replace(state)
        };

        if previous != state {
            tracing::debug!(from = %previous, to = %state, "client state changed");
            self.notify_state(state);
        }
        true
    }

    fn next_backoff(&self, generation: u64) -> Option<Duration> {
        let mut link = lock(&self.inner.link);
        if link.generation != generation {
            return None;
        }
        let delay = self.inner.options.reconnect.next_delay(link.attempts)?;
        link.attempts += 1;
        Some(delay)
    }

    /// Stop driving and fail everything in flight
    fn finish(&self, generation: u64, state: ConnectionState, reason: &str) {
        let previous = {
            let mut link = lock(&self.inner.link);
            if link.generation != generation {
                return;
            }
            link.queue.clear();
            link.outbound = None;
            link.driver = None;
            self.inner.state.send_replace(state)
        };

        let rejected = self
            .inner
            .pending
            .reject_all(&RpcError::peer_disconnected(reason));
        tracing::info!(state = %state, rejected, reason, "client stopped");

        if previous != state {
            self.notify_state(state);
        }
    }

    fn detach_outbound(&self, generation: u64, outbound: &mpsc::Sender<Outbound>) {
        let mut link = lock(&self.inner.link);
        if link.generation == generation
            && link
                .outbound
                .as_ref()
                .is_some_and(|current| current.same_channel(outbound))
        {
            link.outbound = None;
        }
    }

    fn notify_state(&self, state: ConnectionState) {
        if let Some(hook) = &self.inner.options.hooks.on_state_change {
            hook(state);
        }
    }

    fn notify_closed(&self, code: u16, reason: &str) {
        if let Some(hook) = &self.inner.options.hooks.on_closed {
            hook(code, reason);
        }
    }

    fn report(&self, report: &ErrorReport) {
        tracing::warn!(code = %report.error.code, error = %report.error.message, "client rpc error");
        if let Some(hook) = &self.inner.options.hooks.on_error {
            hook(report);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer_id", &self.peer_id())
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
