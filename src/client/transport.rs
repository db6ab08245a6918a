//! Client transports
//!
//! A [`Connector`] opens one connection and hands back a pair of channels:
//! frames pushed into `outbound` are written to the socket, and everything the
//! socket produces arrives on `inbound`, ending with a single
//! [`TransportEvent::Closed`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::options::ClientOptions;
use crate::host::Outbound;
use crate::{Error, Result};

/// Close code for an orderly shutdown
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code reported when the socket went away without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

const CHANNEL_CAPACITY: usize = 64;

/// Something a connection produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed { code: u16, reason: String },
}

/// Channels of one open connection
#[derive(Debug)]
pub struct ClientConnection {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to the server
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(&self, options: &ClientOptions) -> Result<ClientConnection>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Build `{url}/rooms/{session}/ws?peerId=…&deviceId=…&deviceName=…&action=…`
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or cannot carry a path
    pub fn handshake_url(options: &ClientOptions) -> Result<Url> {
        let mut url = Url::parse(&options.url)?;

        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|()| Error::Config(format!("cannot use scheme {scheme}")))?;
        }

        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("'{}' cannot be a base url", options.url)))?
            .pop_if_empty()
            .extend(["rooms", options.session_id.as_str(), "ws"]);

        let handshake = options.handshake();
        url.query_pairs_mut()
            .append_pair("peerId", &handshake.peer_id)
            .append_pair(
                "deviceId",
                handshake.device_id.as_deref().unwrap_or(&handshake.peer_id),
            )
            .append_pair("deviceName", &handshake.device_name)
            .append_pair("action", handshake.action.as_str());

        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, options: &ClientOptions) -> Result<ClientConnection> {
        let url = Self::handshake_url(options)?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("failed to connect to {url}: {e}")))?;

        tracing::debug!(url = %url, "websocket connected");

        let (mut sink, mut stream) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match frame {
                    Outbound::Text(text) => WsMessage::Text(text.into()),
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut closed = (ABNORMAL_CLOSE, String::new());
            while let Some(message) = stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        let event = TransportEvent::Message(text.as_str().to_owned());
                        if inbound_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        if let Some(frame) = frame {
                            closed = (u16::from(frame.code), frame.reason.as_str().to_owned());
                        } else {
                            closed = (NORMAL_CLOSE, String::new());
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }

            let (code, reason) = closed;
            let _ = inbound_tx.send(TransportEvent::Closed { code, reason }).await;
        });

        Ok(ClientConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::JoinAction;

    #[test]
    fn handshake_url_carries_identity() {
        let options = ClientOptions::new("http://localhost:18791/", "room-7", "alice")
            .device("laptop", "Alice Laptop")
            .action(JoinAction::Create);

        let url = WsConnector::handshake_url(&options).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/rooms/room-7/ws");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("peerId".into(), "alice".into())));
        assert!(pairs.contains(&("deviceId".into(), "laptop".into())));
        assert!(pairs.contains(&("deviceName".into(), "Alice Laptop".into())));
        assert!(pairs.contains(&("action".into(), "create".into())));
    }

    #[test]
    fn device_id_falls_back_to_peer() {
        let options = ClientOptions::new("ws://example.com/base", "r", "bob");
        let url = WsConnector::handshake_url(&options).unwrap();
        assert_eq!(url.path(), "/base/rooms/r/ws");
        assert!(url.query().unwrap().contains("deviceId=bob"));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let options = ClientOptions::new("not a url", "r", "bob");
        assert!(WsConnector::handshake_url(&options).is_err());
    }
}
