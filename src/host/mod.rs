//! Hooks into the hosting runtime
//!
//! The connection registry never touches sockets or disks directly. It reaches
//! the outside world through three narrow seams:
//!
//! - [`RosterStore`] loads, saves and destroys the persisted roster
//! - [`TransportLookup`] maps peer ids to live transports and back
//! - [`ErrorHook`] receives every failure the runtime swallows

mod store;
mod transport;

use std::sync::Arc;

pub use store::{FileStore, MemoryStore, RosterStore};
pub use transport::{
    ChannelTransport, Outbound, PeerTransport, TransportId, TransportLookup, TransportTable,
};

use crate::error::RpcError;
use crate::protocol::Request;

/// A failure observed while handling traffic
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub error: RpcError,
    /// Request being handled, when the failure is tied to one
    pub request: Option<Request>,
    pub peer_id: Option<String>,
    pub transport_id: Option<TransportId>,
}

impl ErrorReport {
    #[must_use]
    pub const fn new(error: RpcError) -> Self {
        Self {
            error,
            request: None,
            peer_id: None,
            transport_id: None,
        }
    }

    #[must_use]
    pub fn with_request(mut self, request: &Request) -> Self {
        self.request = Some(request.clone());
        self
    }

    #[must_use]
    pub fn with_peer(mut self, peer_id: Option<String>) -> Self {
        self.peer_id = peer_id;
        self
    }

    #[must_use]
    pub const fn with_transport(mut self, transport_id: TransportId) -> Self {
        self.transport_id = Some(transport_id);
        self
    }
}

/// Callback invoked for every reported failure
pub type ErrorHook = Arc<dyn Fn(&ErrorReport) + Send + Sync>;
