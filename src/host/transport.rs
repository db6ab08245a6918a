//! Peer transports and the peer-to-transport table

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Error, Result};

/// Identity of one physical connection
pub type TransportId = Uuid;

/// Frame queued for a socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// One live connection to a peer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Stable id of this connection
    fn id(&self) -> TransportId;

    /// Send a text frame
    async fn send(&self, text: String) -> Result<()>;

    /// Close the connection with a close code
    async fn close(&self, code: u16, reason: &str);
}

/// Host-side table answering "which transport belongs to which peer"
///
/// A peer is considered live exactly when `get_transport` returns a transport.
pub trait TransportLookup: Send + Sync {
    /// Bind a transport to a peer, replacing any previous one
    fn attach(&self, peer_id: &str, transport: Arc<dyn PeerTransport>);

    /// Unbind and return the peer's transport
    fn detach(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>>;

    /// Unbind the peer only if `transport_id` is still its transport
    ///
    /// The check and the unbind must happen atomically. Returns true if the
    /// transport was detached.
    fn detach_if(&self, peer_id: &str, transport_id: TransportId) -> bool;

    fn get_transport(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>>;

    fn peer_id_by_transport(&self, transport_id: TransportId) -> Option<String>;
}

#[derive(Default)]
struct Table {
    by_peer: HashMap<String, Arc<dyn PeerTransport>>,
    by_transport: HashMap<TransportId, String>,
}

/// In-process [`TransportLookup`]
#[derive(Default)]
pub struct TransportTable {
    inner: RwLock<Table>,
}

impl TransportTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_peer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransportLookup for TransportTable {
    fn attach(&self, peer_id: &str, transport: Arc<dyn PeerTransport>) {
        let mut table = self.write();
        let transport_id = transport.id();
        if let Some(previous) = table.by_peer.insert(peer_id.to_string(), transport) {
            table.by_transport.remove(&previous.id());
        }
        table.by_transport.insert(transport_id, peer_id.to_string());
    }

    fn detach(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        let mut table = self.write();
        let transport = table.by_peer.remove(peer_id)?;
        table.by_transport.remove(&transport.id());
        Some(transport)
    }

    fn detach_if(&self, peer_id: &str, transport_id: TransportId) -> bool {
        let mut table = self.write();
        if !table
            .by_peer
            .get(peer_id)
            .is_some_and(|t| t.id() == transport_id)
        {
            return false;
        }
        table.by_peer.remove(peer_id);
        table.by_transport.remove(&transport_id);
        true
    }

    fn get_transport(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        self.read().by_peer.get(peer_id).cloned()
    }

    fn peer_id_by_transport(&self, transport_id: TransportId) -> Option<String> {
        self.read().by_transport.get(&transport_id).cloned()
    }
}

/// Transport backed by an mpsc channel drained by a socket writer task
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    id: TransportId,
    tx: mpsc::Sender<Outbound>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    async fn send(&self, text: String) -> Result<()> {
        self.tx
            .send(Outbound::Text(text))
            .await
            .map_err(|_| Error::Transport(format!("transport {} is closed", self.id)))
    }

    async fn close(&self, code: u16, reason: &str) {
        let frame = Outbound::Close {
            code,
            reason: reason.to_string(),
        };
        if self.tx.send(frame).await.is_err() {
            tracing::debug!(transport_id = %self.id, "close on already closed transport");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (Arc<dyn PeerTransport>, mpsc::Receiver<Outbound>) {
        let (transport, rx) = ChannelTransport::new(8);
        (Arc::new(transport), rx)
    }

    #[test]
    fn attach_and_lookup_both_ways() {
        let table = TransportTable::new();
        let (t, _rx) = transport();
        table.attach("alice", Arc::clone(&t));

        assert_eq!(table.get_transport("alice").unwrap().id(), t.id());
        assert_eq!(table.peer_id_by_transport(t.id()).as_deref(), Some("alice"));
    }

    #[test]
    fn reattach_forgets_previous_transport() {
        let table = TransportTable::new();
        let (old, _rx1) = transport();
        let (new, _rx2) = transport();
        table.attach("alice", Arc::clone(&old));
        table.attach("alice", Arc::clone(&new));

        assert!(table.peer_id_by_transport(old.id()).is_none());
        assert_eq!(table.get_transport("alice").unwrap().id(), new.id());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn detach_clears_reverse_entry() {
        let table = TransportTable::new();
        let (t, _rx) = transport();
        table.attach("bob", Arc::clone(&t));

        assert!(table.detach("bob").is_some());
        assert!(table.peer_id_by_transport(t.id()).is_none());
        assert!(table.detach("bob").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn detach_if_ignores_replaced_transport() {
        let table = TransportTable::new();
        let (old, _rx1) = transport();
        let (new, _rx2) = transport();
        table.attach("alice", Arc::clone(&old));
        table.attach("alice", Arc::clone(&new));

        assert!(!table.detach_if("alice", old.id()));
        assert_eq!(table.get_transport("alice").unwrap().id(), new.id());

        assert!(table.detach_if("alice", new.id()));
        assert!(table.is_empty());
        assert!(table.peer_id_by_transport(new.id()).is_none());
    }

    #[tokio::test]
    async fn channel_transport_forwards_frames() {
        let (t, mut rx) = transport();
        t.send("hello".to_string()).await.unwrap();
        t.close(4000, "kicked").await;

        assert_eq!(rx.recv().await, Some(Outbound::Text("hello".to_string())));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: 4000,
                reason: "kicked".to_string()
            })
        );
    }

    #[tokio::test]
    async fn send_fails_once_writer_is_gone() {
        let (t, rx) = transport();
        drop(rx);
        assert!(t.send("lost".to_string()).await.is_err());
    }
}
