//! Connection registry integration tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use duet_rpc::host::{
    FileStore, MemoryStore, PeerTransport, TransportId, TransportLookup, TransportTable,
};
use duet_rpc::network::{Handshake, NetworkOptions};
use duet_rpc::protocol::{CallType, ResponseResult};
use duet_rpc::{ErrorCode, Network, Request, Response};
use serde_json::json;

mod common;
use common::{RecordingTransport, join, parse_frame, respond_with, test_network};

#[tokio::test]
async fn broadcast_isolates_failing_peer() {
    let network = test_network(Duration::from_secs(30));

    let (_t1, frames1) = join(&network, "peer-1").await;
    network
        .add_connection(RecordingTransport::failing(), Handshake::new("room", "peer-2"))
        .await
        .unwrap();
    let (_t3, frames3) = join(&network, "peer-3").await;

    respond_with(&network, "peer-1", frames1, |_| Ok(json!("one")));
    respond_with(&network, "peer-3", frames3, |_| Ok(json!("three")));

    let results = network
        .broadcast(Request::new(CallType::Query, "status", json!(null)))
        .await;
    assert_eq!(results.len(), 3);

    let data: Vec<_> = results.iter().filter(|r| r.result.is_data()).collect();
    let errors: Vec<_> = results.iter().filter(|r| !r.result.is_data()).collect();
    assert_eq!(data.len(), 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].peer_id, "peer-2");

    match &errors[0].result {
        ResponseResult::Error { error } => {
            assert_eq!(error.code, Some(ErrorCode::InternalError));
        }
        ResponseResult::Data { .. } => unreachable!(),
    }
    assert_eq!(network.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let network = test_network(Duration::from_secs(30));
    let (_transport, mut frames) = join(&network, "bob").await;

    let call = {
        let network = network.clone();
        tokio::spawn(async move {
            network
                .send_to_client("bob", Request::new(CallType::Query, "slow", json!({})))
                .await
        })
    };

    let Some(frame) = frames.recv().await else {
        panic!("request was not sent");
    };
    let duet_rpc::Message::Request(request) = parse_frame(&frame) else {
        panic!("expected a request frame");
    };

    let started = tokio::time::Instant::now();
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.code, ErrorCode::RequestTimeout);
    assert_eq!(started.elapsed(), Duration::from_secs(30));

    // A late response finds nothing waiting
    let late = Response::new(request.id, Ok(json!("too late")));
    assert!(!network.handle_response("bob", late));
}

#[tokio::test]
async fn removing_peer_rejects_its_requests() {
    let network = test_network(Duration::from_secs(30));
    let (_transport, mut frames) = join(&network, "carol").await;

    let call = {
        let network = network.clone();
        tokio::spawn(async move {
            network
                .send_to_client("carol", Request::new(CallType::Mutation, "save", json!(1)))
                .await
        })
    };

    // Wait until the request is on the wire
    frames.recv().await.unwrap();
    assert_eq!(network.pending_count(), 1);

    assert!(network.remove_connection("carol").await);
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.code, ErrorCode::PeerDisconnected);
    assert!(!network.is_client_connected("carol"));
    assert!(network.roster().is_empty());
}

#[tokio::test]
async fn roster_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rooms").join("room.json");
    let options = NetworkOptions::default();

    let network = Network::new(
        Arc::new(FileStore::new(&path)),
        Arc::new(TransportTable::new()),
        &options,
    );
    let (transport, _frames) = RecordingTransport::new();
    network
        .add_connection(transport, Handshake::new("room", "dave").device("d1", "Dave's desk"))
        .await
        .unwrap();

    let restored = Network::restore(
        Arc::new(FileStore::new(&path)),
        Arc::new(TransportTable::new()),
        &options,
    )
    .await
    .unwrap();

    assert_eq!(restored.session_id().as_deref(), Some("room"));
    let roster = restored.roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].device_name, "Dave's desk");
    // Restored entries have no live transport until the peer reconnects
    assert!(restored.connected_clients().is_empty());
}

/// Transport table where a reconnect lands right after a closing socket is
/// identified
#[derive(Default)]
struct ReconnectDuringClose {
    table: TransportTable,
    reconnect: Mutex<Option<(String, Arc<dyn PeerTransport>)>>,
}

impl TransportLookup for ReconnectDuringClose {
    fn attach(&self, peer_id: &str, transport: Arc<dyn PeerTransport>) {
        self.table.attach(peer_id, transport);
    }

    fn detach(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        self.table.detach(peer_id)
    }

    fn detach_if(&self, peer_id: &str, transport_id: TransportId) -> bool {
        self.table.detach_if(peer_id, transport_id)
    }

    fn get_transport(&self, peer_id: &str) -> Option<Arc<dyn PeerTransport>> {
        self.table.get_transport(peer_id)
    }

    fn peer_id_by_transport(&self, transport_id: TransportId) -> Option<String> {
        let peer_id = self.table.peer_id_by_transport(transport_id);
        if let Some((peer, transport)) = self.reconnect.lock().unwrap().take() {
            self.table.attach(&peer, transport);
        }
        peer_id
    }
}

#[tokio::test]
async fn stale_close_racing_reconnect_keeps_new_transport() {
    let lookup = Arc::new(ReconnectDuringClose::default());
    let network = Network::new(
        Arc::new(MemoryStore::new()),
        lookup.clone(),
        &NetworkOptions::default(),
    );

    let (old, _old_frames) = RecordingTransport::new();
    network
        .add_connection(old.clone(), Handshake::new("room", "alice"))
        .await
        .unwrap();

    let (fresh, _fresh_frames) = RecordingTransport::new();
    let fresh_id = fresh.id();
    let fresh: Arc<dyn PeerTransport> = fresh;
    *lookup.reconnect.lock().unwrap() = Some(("alice".to_string(), fresh));

    assert_eq!(network.handle_transport_closed(old.id()).await, None);
    assert!(network.is_client_connected("alice"));
    assert_eq!(network.roster().len(), 1);
    assert_eq!(
        lookup.get_transport("alice").map(|t| t.id()),
        Some(fresh_id)
    );
}

#[tokio::test]
async fn closing_live_transport_evicts_peer() {
    let network = test_network(Duration::from_secs(30));
    let (transport, _frames) = join(&network, "erin").await;

    assert_eq!(
        network.handle_transport_closed(transport.id()).await.as_deref(),
        Some("erin")
    );
    assert!(!network.is_client_connected("erin"));
    assert!(network.roster().is_empty());
}
