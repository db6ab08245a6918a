//! Connection registry types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pending::DEFAULT_REQUEST_TIMEOUT;
use crate::protocol::ResponseResult;

/// Close code sent to a kicked peer
pub const KICK_CLOSE_CODE: u16 = 4000;

/// Close reason sent to a kicked peer
pub const KICK_REASON: &str = "kicked";

/// A peer in the room roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub peer_id: String,
    pub device_id: String,
    pub device_name: String,
    pub connected_at: DateTime<Utc>,
}

/// Roster snapshot written through the [`RosterStore`](crate::host::RosterStore)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerRecord>,
}

/// What the connecting peer intends to do with the room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinAction {
    /// Open the room if it does not exist yet
    Create,
    /// Enter an existing room
    #[default]
    Join,
    /// Come back to a room after a dropped connection
    Rejoin,
}

impl JoinAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Join => "join",
            Self::Rejoin => "rejoin",
        }
    }
}

impl fmt::Display for JoinAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity a peer presents when it connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub session_id: String,
    pub peer_id: String,
    /// Defaults to the peer id when absent
    #[serde(default)]
    pub device_id: Option<String>,
    pub device_name: String,
    #[serde(default)]
    pub action: JoinAction,
}

impl Handshake {
    #[must_use]
    pub fn new(session_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        let peer_id = peer_id.into();
        Self {
            session_id: session_id.into(),
            device_name: peer_id.clone(),
            peer_id,
            device_id: None,
            action: JoinAction::default(),
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
}

/// Correlation key for a request sent to one peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub peer_id: String,
    pub request_id: String,
}

impl PendingKey {
    #[must_use]
    pub fn new(peer_id: &str, request_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            request_id: request_id.to_string(),
        }
    }
}

/// Outcome of a broadcast for one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResult {
    pub peer_id: String,
    pub result: ResponseResult,
}

/// Tunables for a [`Network`](super::Network)
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    /// How long a request to a peer waits for its response
    pub request_timeout: Duration,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
