//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duet_rpc::client::{ClientConnection, ClientOptions, Connector, TransportEvent};
use duet_rpc::host::{MemoryStore, Outbound, PeerTransport, TransportId, TransportTable};
use duet_rpc::network::{Handshake, NetworkOptions};
use duet_rpc::{Error, Message, Network, Request, Response, RpcError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Network backed by an in-memory store and transport table
pub fn test_network(request_timeout: Duration) -> Network {
    Network::new(
        Arc::new(MemoryStore::new()),
        Arc::new(TransportTable::new()),
        &NetworkOptions { request_timeout },
    )
}

/// Server-side transport that hands every frame to the test
pub struct RecordingTransport {
    id: TransportId,
    frames: mpsc::UnboundedSender<Outbound>,
    fail_sends: bool,
}

impl RecordingTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            id: Uuid::new_v4(),
            frames: tx,
            fail_sends: false,
        };
        (Arc::new(transport), rx)
    }

    /// Transport whose sends always fail
    pub fn failing() -> Arc<Self> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: Uuid::new_v4(),
            frames: tx,
            fail_sends: true,
        })
    }
}

#[async_trait]
impl PeerTransport for RecordingTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    async fn send(&self, text: String) -> duet_rpc::Result<()> {
        if self.fail_sends {
            return Err(Error::Transport("socket write failed".into()));
        }
        self.frames
            .send(Outbound::Text(text))
            .map_err(|_| Error::Transport("receiver dropped".into()))
    }

    async fn close(&self, code: u16, reason: &str) {
        let _ = self.frames.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Join `peer_id` to the network over a recording transport
pub async fn join(
    network: &Network,
    peer_id: &str,
) -> (Arc<RecordingTransport>, mpsc::UnboundedReceiver<Outbound>) {
    let (transport, rx) = RecordingTransport::new();
    network
        .add_connection(transport.clone(), Handshake::new("room", peer_id))
        .await
        .unwrap();
    (transport, rx)
}

/// Answer every request a peer receives with `answer(request)`
pub fn respond_with<F>(
    network: &Network,
    peer_id: &str,
    mut frames: mpsc::UnboundedReceiver<Outbound>,
    answer: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(&Request) -> Result<Value, RpcError> + Send + 'static,
{
    let network = network.clone();
    let peer_id = peer_id.to_string();
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let Outbound::Text(text) = frame else { break };
            if let Ok(Message::Request(request)) = Message::parse(&text) {
                let response = Response::new(request.id.clone(), answer(&request));
                network.handle_response(&peer_id, response);
            }
        }
    })
}

/// Parse an outbound frame as a protocol message
pub fn parse_frame(frame: &Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::parse(text).unwrap(),
        Outbound::Close { code, .. } => panic!("expected text frame, got close {code}"),
    }
}

/// Server end of one mock client connection
pub struct ServerEnd {
    pub from_client: mpsc::Receiver<Outbound>,
    pub to_client: mpsc::Sender<TransportEvent>,
}

impl ServerEnd {
    /// Next message the client sent, skipping keepalive pings
    pub async fn recv(&mut self) -> Message {
        loop {
            let frame = self.from_client.recv().await.expect("client hung up");
            match parse_frame(&frame) {
                Message::Ping => {}
                message => return message,
            }
        }
    }

    pub async fn recv_request(&mut self) -> Request {
        match self.recv().await {
            Message::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    pub async fn recv_response(&mut self) -> Response {
        match self.recv().await {
            Message::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    pub async fn send(&self, message: &Message) {
        let text = message.to_json().unwrap();
        self.to_client
            .send(TransportEvent::Message(text))
            .await
            .unwrap();
    }

    pub async fn respond(&self, id: &str, result: Result<Value, RpcError>) {
        self.send(&Message::Response(Response::new(id, result))).await;
    }

    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }
}

/// Connector that records attempts and hands accepted connections to the test
pub struct MockConnector {
    refusals: Mutex<VecDeque<bool>>,
    refuse_all: bool,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MockConnector {
    /// Accept every connection
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(false, [])
    }

    /// Refuse every connection
    pub fn refusing() -> Arc<Self> {
        Self::build(true, []).0
    }

    /// Refuse the first `n` connections, then accept
    pub fn refusing_first(n: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(false, std::iter::repeat_n(true, n))
    }

    fn build(
        refuse_all: bool,
        plan: impl IntoIterator<Item = bool>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            refusals: Mutex::new(plan.into_iter().collect()),
            refuse_all,
            attempts: Mutex::new(Vec::new()),
            accepted: tx,
        };
        (Arc::new(connector), rx)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Milliseconds between consecutive attempts
    pub fn gaps_ms(&self) -> Vec<u128> {
        self.attempts()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _options: &ClientOptions) -> duet_rpc::Result<ClientConnection> {
        self.attempts.lock().unwrap().push(Instant::now());

        let refuse = self.refuse_all || self.refusals.lock().unwrap().pop_front().unwrap_or(false);
        if refuse {
            return Err(Error::Transport("connection refused".into()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let _ = self.accepted.send(ServerEnd {
            from_client: outbound_rx,
            to_client: inbound_tx,
        });

        Ok(ClientConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Client options wired to a mock connector
pub fn mock_options(connector: Arc<MockConnector>) -> ClientOptions {
    ClientOptions::new("ws://mock.invalid", "room", "alice").connector(connector)
}
