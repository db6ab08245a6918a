//! Client options and lifecycle hooks

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use super::backoff::ReconnectPolicy;
use super::state::ConnectionState;
use super::transport::Connector;
use crate::config::Config;
use crate::dispatch::ContextHook;
use crate::error::RpcError;
use crate::host::{ErrorHook, ErrorReport};
use crate::network::{Handshake, JoinAction};
use crate::pending::DEFAULT_REQUEST_TIMEOUT;
use crate::protocol::Request;

pub type OpenHook = Arc<dyn Fn() + Send + Sync>;
pub type ClosedHook = Arc<dyn Fn(u16, &str) + Send + Sync>;
pub type StateHook = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Optional callbacks fired by the client runtime
#[derive(Clone, Default)]
pub struct ClientHooks {
    pub on_open: Option<OpenHook>,
    pub on_closed: Option<ClosedHook>,
    pub on_state_change: Option<StateHook>,
    /// Builds the session context for requests the server sends
    pub on_context: Option<ContextHook>,
    pub on_error: Option<ErrorHook>,
}

impl fmt::Debug for ClientHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_context", &self.on_context.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Everything a [`Client`](super::Client) needs to connect
#[derive(Clone)]
pub struct ClientOptions {
    /// Server base URL, e.g. `ws://localhost:18791`
    pub url: String,
    /// Room to join
    pub session_id: String,
    pub peer_id: String,
    pub device_id: Option<String>,
    pub device_name: String,
    pub action: JoinAction,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub ping_interval: Option<Duration>,
    pub hooks: ClientHooks,
    /// Transport factory; tokio-tungstenite when unset
    pub connector: Option<Arc<dyn Connector>>,
}

impl ClientOptions {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        session_id: impl Into<String>,
        peer_id: impl Into<String>,
    ) -> Self {
        let peer_id = peer_id.into();
        Self {
            url: url.into(),
            session_id: session_id.into(),
            device_name: peer_id.clone(),
            peer_id,
            device_id: None,
            action: JoinAction::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            ping_interval: None,
            hooks: ClientHooks::default(),
            connector: None,
        }
    }

    /// Options with timeouts, backoff and keepalive taken from config
    #[must_use]
    pub fn from_config(
        config: &Config,
        url: impl Into<String>,
        session_id: impl Into<String>,
        peer_id: impl Into<String>,
    ) -> Self {
        let mut options = Self::new(url, session_id, peer_id);
        options.request_timeout = config.request_timeout;
        options.reconnect = config.reconnect;
        options.ping_interval = config.ping_interval;
        options
    }

    /// Handshake this client presents to the server
    #[must_use]
    pub fn handshake(&self) -> Handshake {
        Handshake {
            session_id: self.session_id.clone(),
            peer_id: self.peer_id.clone(),
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            action: self.action,
        }
    }

    #[must_use]
    pub fn device(mut self, device_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self.device_name = device_name.into();
        self
    }

    #[must_use]
    pub const fn action(mut self, action: JoinAction) -> Self {
        self.action = action;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub const fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn on_open(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_open = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_closed(mut self, hook: impl Fn(u16, &str) + Send + Sync + 'static) -> Self {
        self.hooks.on_closed = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_state_change(
        mut self,
        hook: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_state_change = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_context<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.hooks.on_context = Some(Arc::new(
            move |request: Request| -> BoxFuture<'static, Result<Value, RpcError>> {
                Box::pin(hook(request))
            },
        ));
        self
    }

    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&ErrorReport) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("session_id", &self.session_id)
            .field("peer_id", &self.peer_id)
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("action", &self.action)
            .field("request_timeout", &self.request_timeout)
            .field("reconnect", &self.reconnect)
            .field("ping_interval", &self.ping_interval)
            .field("hooks", &self.hooks)
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_defaults_to_peer() {
        let options = ClientOptions::new("ws://localhost:1", "room", "alice");
        let handshake = options.handshake();
        assert_eq!(handshake.device_name, "alice");
        assert!(handshake.device_id.is_none());
        assert_eq!(handshake.action, JoinAction::Join);
    }

    #[test]
    fn from_config_copies_runtime_settings() {
        let config = Config {
            request_timeout: Duration::from_millis(500),
            ping_interval: Some(Duration::from_secs(15)),
            ..Config::default()
        };
        let options = ClientOptions::from_config(&config, "ws://h", "room", "bob")
            .device("tablet", "Bob's tablet")
            .action(JoinAction::Create);

        assert_eq!(options.request_timeout, Duration::from_millis(500));
        assert_eq!(options.ping_interval, Some(Duration::from_secs(15)));
        assert_eq!(options.handshake().device_id.as_deref(), Some("tablet"));
        assert_eq!(options.handshake().action, JoinAction::Create);
    }
}
