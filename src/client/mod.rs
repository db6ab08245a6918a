//! Client side of a duplex connection
//!
//! A [`Client`] calls procedures on the server and serves the server's calls
//! from its own [`Router`](crate::router::Router).

mod backoff;
mod manager;
mod options;
mod runtime;
mod state;
mod transport;

pub use backoff::ReconnectPolicy;
pub use manager::ClientManager;
pub use options::{ClientHooks, ClientOptions, ClosedHook, OpenHook, StateHook};
pub use runtime::Client;
pub use state::ConnectionState;
pub use transport::{
    ABNORMAL_CLOSE, ClientConnection, Connector, NORMAL_CLOSE, TransportEvent, WsConnector,
};
