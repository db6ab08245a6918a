//! Connection registry for one room
//!
//! A [`Network`] owns the roster of peers in a room, the correlation table for
//! requests the server sends to them, and the link to the host's persistence
//! and transport hooks. Roster mutations update memory first and are then
//! written through the [`RosterStore`]; saves are serialized so the last save
//! to complete always carries the latest roster.

mod types;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::Value;

pub use types::{
    BroadcastResult, Handshake, JoinAction, KICK_CLOSE_CODE, KICK_REASON, NetworkOptions,
    PeerRecord, PendingKey, PersistedState,
};

use crate::error::{ErrorCode, RpcError};
use crate::host::{ErrorHook, ErrorReport, PeerTransport, RosterStore, TransportId, TransportLookup};
use crate::pending::PendingRequests;
use crate::protocol::{Message, Request, Response};

#[derive(Debug, Default)]
struct Roster {
    session_id: Option<String>,
    peers: Vec<PeerRecord>,
}

impl Roster {
    fn snapshot(&self) -> PersistedState {
        PersistedState {
            session_id: self.session_id.clone(),
            peers: self.peers.clone(),
        }
    }

    fn upsert(&mut self, record: PeerRecord) {
        match self.peers.iter_mut().find(|p| p.peer_id == record.peer_id) {
            Some(existing) => *existing = record,
            None => self.peers.push(record),
        }
    }

    fn remove(&mut self, peer_id: &str) -> Option<PeerRecord> {
        let index = self.peers.iter().position(|p| p.peer_id == peer_id)?;
        Some(self.peers.remove(index))
    }
}

struct NetworkInner {
    roster: RwLock<Roster>,
    store: Arc<dyn RosterStore>,
    transports: Arc<dyn TransportLookup>,
    pending: PendingRequests<PendingKey>,
    save_lock: tokio::sync::Mutex<()>,
    error_hook: RwLock<Option<ErrorHook>>,
}

/// Roster, liveness and outbound calls for the peers of one room
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

impl Network {
    /// Create an empty registry
    #[must_use]
    pub fn new(
        store: Arc<dyn RosterStore>,
        transports: Arc<dyn TransportLookup>,
        options: &NetworkOptions,
    ) -> Self {
        Self::from_state(store, transports, options, PersistedState::default())
    }

    /// Create a registry seeded with previously persisted state
    #[must_use]
    pub fn from_state(
        store: Arc<dyn RosterStore>,
        transports: Arc<dyn TransportLookup>,
        options: &NetworkOptions,
        state: PersistedState,
    ) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                roster: RwLock::new(Roster {
                    session_id: state.session_id,
                    peers: state.peers,
                }),
                store,
                transports,
                pending: PendingRequests::new(options.request_timeout),
                save_lock: tokio::sync::Mutex::new(()),
                error_hook: RwLock::new(None),
            }),
        }
    }

    /// Recreate a registry from whatever the store holds
    ///
    /// # Errors
    ///
    /// Returns error if the store fails to load
    pub async fn restore(
        store: Arc<dyn RosterStore>,
        transports: Arc<dyn TransportLookup>,
        options: &NetworkOptions,
    ) -> crate::Result<Self> {
        let state = store.load().await?.unwrap_or_default();
        tracing::debug!(
            session_id = ?state.session_id,
            peers = state.peers.len(),
            "network restored"
        );
        Ok(Self::from_state(store, transports, options, state))
    }

    /// Install the callback receiving every reported failure
    pub fn set_error_hook(&self, hook: ErrorHook) {
        *self
            .inner
            .error_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Room id this registry is bound to, once the first peer connected
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.read_roster().session_id.clone()
    }

    #[must_use]
    pub fn transports(&self) -> &Arc<dyn TransportLookup> {
        &self.inner.transports
    }

    /// Register a newly connected peer
    ///
    /// # Errors
    ///
    /// Returns `SESSION_MISMATCH` if the registry is bound to another room
    pub async fn add_connection(
        &self,
        transport: Arc<dyn PeerTransport>,
        handshake: Handshake,
    ) -> Result<PeerRecord, RpcError> {
        let record = {
            let mut roster = self.write_roster();
            match &roster.session_id {
                Some(bound) if *bound != handshake.session_id => {
                    return Err(RpcError::new(
                        ErrorCode::SessionMismatch,
                        format!(
                            "registry is bound to session '{bound}', not '{}'",
                            handshake.session_id
                        ),
                    ));
                }
                Some(_) => {}
                None => roster.session_id = Some(handshake.session_id.clone()),
            }

            let record = PeerRecord {
                device_id: handshake
                    .device_id
                    .unwrap_or_else(|| handshake.peer_id.clone()),
                peer_id: handshake.peer_id,
                device_name: handshake.device_name,
                connected_at: Utc::now(),
            };
            roster.upsert(record.clone());
            self.inner.transports.attach(&record.peer_id, transport);
            record
        };

        self.persist().await;

        tracing::info!(
            peer_id = %record.peer_id,
            device_id = %record.device_id,
            action = %handshake.action,
            "peer connected"
        );
        Ok(record)
    }

    /// Evict a peer and fail everything still waiting on it
    ///
    /// Returns true if the peer was in the roster
    pub async fn remove_connection(&self, peer_id: &str) -> bool {
        let removed = {
            let mut roster = self.write_roster();
            self.inner.transports.detach(peer_id);
            roster.remove(peer_id).is_some()
        };

        self.evicted(peer_id, removed).await;
        removed
    }

    async fn evicted(&self, peer_id: &str, removed: bool) {
        if removed {
            self.persist().await;
        }

        let rejected = self.inner.pending.reject_where(
            |key| key.peer_id == peer_id,
            &RpcError::peer_disconnected(format!("peer '{peer_id}' disconnected")),
        );

        tracing::info!(peer_id = %peer_id, rejected, "peer removed");
    }

    /// Handle a socket closing
    ///
    /// The peer is removed only if the closed transport is still its live one,
    /// so an old socket closing after a reconnect leaves the new one alone.
    pub async fn handle_transport_closed(&self, transport_id: TransportId) -> Option<String> {
        let peer_id = self.inner.transports.peer_id_by_transport(transport_id)?;

        // Attach happens under the roster lock too, so a reconnect either
        // lands before this check or after the eviction
        let removed = {
            let mut roster = self.write_roster();
            if !self.inner.transports.detach_if(&peer_id, transport_id) {
                drop(roster);
                tracing::debug!(peer_id = %peer_id, "stale transport closed");
                return None;
            }
            roster.remove(&peer_id).is_some()
        };

        self.evicted(&peer_id, removed).await;
        Some(peer_id)
    }

    /// Every roster entry, live or not
    #[must_use]
    pub fn roster(&self) -> Vec<PeerRecord> {
        self.read_roster().peers.clone()
    }

    /// Roster entries with a live transport
    #[must_use]
    pub fn connected_clients(&self) -> Vec<PeerRecord> {
        self.read_roster()
            .peers
            .iter()
            .filter(|p| self.inner.transports.get_transport(&p.peer_id).is_some())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_client_connected(&self, peer_id: &str) -> bool {
        self.live_transport(peer_id).is_some()
    }

    /// Send a request to one peer and wait for its response
    ///
    /// # Errors
    ///
    /// Returns `PEER_NOT_CONNECTED`, `INTERNAL_ERROR` on send failure,
    /// `REQUEST_TIMEOUT`, `PEER_DISCONNECTED`, or the peer's own error
    pub async fn send_to_client(&self, peer_id: &str, request: Request) -> Result<Value, RpcError> {
        let Some(transport) = self.live_transport(peer_id) else {
            return Err(RpcError::peer_not_connected(peer_id));
        };

        let key = PendingKey::new(peer_id, &request.id);
        let path = request.path.clone();
        let frame = Message::Request(request).to_json()?;
        let rx = self.inner.pending.register(key.clone())?;

        if let Err(e) = transport.send(frame).await {
            self.inner.pending.remove(&key);
            tracing::warn!(peer_id = %peer_id, path = %path, error = %e, "failed to send request");
            return Err(RpcError::internal(format!(
                "failed to send to peer '{peer_id}': {e}"
            )));
        }

        tracing::debug!(peer_id = %peer_id, request_id = %key.request_id, path = %path, "request sent");
        PendingRequests::<PendingKey>::wait(rx).await
    }

    /// Send a request to every connected peer
    ///
    /// Each peer's outcome is tracked independently; the call completes once
    /// every peer has answered, failed or timed out.
    pub async fn broadcast(&self, request: Request) -> Vec<BroadcastResult> {
        let peers = self.connected_clients();
        tracing::debug!(path = %request.path, peers = peers.len(), "broadcasting");

        let calls = peers.into_iter().map(|peer| {
            let request = request.clone();
            async move {
                let result = self.send_to_client(&peer.peer_id, request).await;
                BroadcastResult {
                    peer_id: peer.peer_id,
                    result: result.into(),
                }
            }
        });

        futures::future::join_all(calls).await
    }

    /// Route a response to the request waiting for it
    ///
    /// Returns false if no request was waiting
    pub fn handle_response(&self, peer_id: &str, response: Response) -> bool {
        let key = PendingKey::new(peer_id, &response.id);
        let found = self
            .inner
            .pending
            .resolve(&key, response.result.into_result());

        if !found {
            tracing::debug!(peer_id = %peer_id, request_id = %response.id, "dropping response for unknown request");
        }
        found
    }

    /// Force a peer out of the room
    pub async fn kick_client(&self, peer_id: &str) -> bool {
        if let Some(transport) = self.inner.transports.get_transport(peer_id) {
            transport.close(KICK_CLOSE_CODE, KICK_REASON).await;
        }
        tracing::info!(peer_id = %peer_id, "kicking peer");
        self.remove_connection(peer_id).await
    }

    /// Tear the room down and erase its persisted state
    ///
    /// # Errors
    ///
    /// Returns error if the store fails to destroy its data
    pub async fn destroy(&self) -> crate::Result<()> {
        self.inner
            .pending
            .reject_all(&RpcError::peer_disconnected("network destroyed"));

        let peers = {
            let mut roster = self.write_roster();
            roster.session_id = None;
            std::mem::take(&mut roster.peers)
        };
        for peer in &peers {
            self.inner.transports.detach(&peer.peer_id);
        }

        let _guard = self.inner.save_lock.lock().await;
        self.inner.store.destroy().await?;

        tracing::info!(peers = peers.len(), "network destroyed");
        Ok(())
    }

    /// Number of requests waiting for a peer's response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Forward a failure to the error hook
    pub fn report(&self, report: &ErrorReport) {
        tracing::warn!(
            code = %report.error.code,
            error = %report.error.message,
            peer_id = ?report.peer_id,
            path = ?report.request.as_ref().map(|r| r.path.as_str()),
            "rpc error"
        );

        let hook = self
            .inner
            .error_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(report);
        }
    }

    fn live_transport(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        let in_roster = self.read_roster().peers.iter().any(|p| p.peer_id == peer_id);
        if !in_roster {
            return None;
        }
        self.inner.transports.get_transport(peer_id)
    }

    async fn persist(&self) {
        let _guard = self.inner.save_lock.lock().await;
        // Snapshot under the save lock so the last save wins with fresh data
        let snapshot = self.read_roster().snapshot();
        if let Err(e) = self.inner.store.save(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist roster");
        }
    }

    fn read_roster(&self) -> RwLockReadGuard<'_, Roster> {
        self.inner
            .roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_roster(&self) -> RwLockWriteGuard<'_, Roster> {
        self.inner
            .roster
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roster = self.read_roster();
        f.debug_struct("Network")
            .field("session_id", &roster.session_id)
            .field("peers", &roster.peers.len())
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::host::{ChannelTransport, MemoryStore, Outbound, TransportTable};
    use crate::protocol::CallType;

    fn network() -> (Network, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let network = Network::new(
            store.clone(),
            Arc::new(TransportTable::new()),
            &NetworkOptions {
                request_timeout: Duration::from_secs(30),
            },
        );
        (network, store)
    }

    async fn connect(
        network: &Network,
        peer_id: &str,
    ) -> (Arc<dyn PeerTransport>, tokio::sync::mpsc::Receiver<Outbound>) {
        let (transport, rx) = ChannelTransport::new(16);
        let transport: Arc<dyn PeerTransport> = Arc::new(transport);
        network
            .add_connection(Arc::clone(&transport), Handshake::new("room", peer_id))
            .await
            .unwrap();
        (transport, rx)
    }

    #[tokio::test]
    async fn repeated_connects_keep_one_entry() {
        let (network, store) = network();
        for name in ["first", "second", "third"] {
            let (transport, _rx) = ChannelTransport::new(4);
            network
                .add_connection(
                    Arc::new(transport),
                    Handshake::new("room", "alice").device("phone", name),
                )
                .await
                .unwrap();
        }

        let roster = network.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].device_name, "third");
        assert_eq!(store.snapshot().unwrap().peers[0].device_name, "third");
    }

    #[tokio::test]
    async fn device_id_defaults_to_peer_id() {
        let (network, _store) = network();
        let (_t, _rx) = connect(&network, "bob").await;
        assert_eq!(network.roster()[0].device_id, "bob");
    }

    #[tokio::test]
    async fn mismatched_session_is_rejected() {
        let (network, _store) = network();
        let (_t, _rx) = connect(&network, "alice").await;

        let (other, _rx2) = ChannelTransport::new(4);
        let err = network
            .add_connection(Arc::new(other), Handshake::new("elsewhere", "mallory"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionMismatch);
        assert_eq!(network.session_id().as_deref(), Some("room"));
    }

    #[tokio::test]
    async fn unknown_peer_fails_fast() {
        let (network, _store) = network();
        let err = network
            .send_to_client("ghost", Request::new(CallType::Query, "a", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PeerNotConnected);
        assert_eq!(network.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_resolves_request() {
        let (network, _store) = network();
        let (_t, mut rx) = connect(&network, "alice").await;

        let caller = network.clone();
        let call = tokio::spawn(async move {
            caller
                .send_to_client("alice", Request::new(CallType::Query, "echo", json!(1)))
                .await
        });

        let Some(Outbound::Text(frame)) = rx.recv().await else {
            panic!("expected request frame");
        };
        let Message::Request(request) = Message::parse(&frame).unwrap() else {
            panic!("expected request");
        };
        assert!(network.handle_response("alice", Response::new(request.id, Ok(json!(2)))));

        assert_eq!(call.await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn stale_transport_close_keeps_new_connection() {
        let (network, _store) = network();
        let (old, _rx1) = connect(&network, "alice").await;
        let (_new, _rx2) = connect(&network, "alice").await;

        assert!(network.handle_transport_closed(old.id()).await.is_none());
        assert!(network.is_client_connected("alice"));
    }

    #[tokio::test]
    async fn kick_closes_transport_and_evicts() {
        let (network, store) = network();
        let (_t, mut rx) = connect(&network, "alice").await;

        assert!(network.kick_client("alice").await);
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: KICK_CLOSE_CODE,
                reason: KICK_REASON.to_string()
            })
        );
        assert!(network.roster().is_empty());
        assert!(store.snapshot().unwrap().peers.is_empty());
    }

    #[tokio::test]
    async fn kick_without_transport_still_evicts() {
        let store = Arc::new(MemoryStore::new());
        let network = Network::from_state(
            store,
            Arc::new(TransportTable::new()),
            &NetworkOptions::default(),
            PersistedState {
                session_id: Some("room".to_string()),
                peers: vec![PeerRecord {
                    peer_id: "sleepy".to_string(),
                    device_id: "sleepy".to_string(),
                    device_name: "sleepy".to_string(),
                    connected_at: Utc::now(),
                }],
            },
        );

        assert!(!network.is_client_connected("sleepy"));
        assert!(network.kick_client("sleepy").await);
        assert!(network.roster().is_empty());
    }

    #[tokio::test]
    async fn destroy_clears_everything() {
        let (network, store) = network();
        let (_t, _rx) = connect(&network, "alice").await;

        network.destroy().await.unwrap();
        assert!(network.roster().is_empty());
        assert!(network.session_id().is_none());
        assert!(store.snapshot().is_none());
        assert!(network.transports().get_transport("alice").is_none());
    }
}
