//! Built-in `system` procedures served by every `duet` room

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::procedure::procedure;
use crate::router::Router;
use crate::session::Role;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub pong: bool,
    pub time: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmI {
    pub session_id: String,
    pub peer_id: String,
    pub role: Role,
}

/// `system.ping`, `system.peers` and `system.whoami`
#[must_use]
pub fn router() -> Router {
    let base = procedure();

    let system = Router::new()
        .procedure(
            "ping",
            base.query(|_: Value, _session| async move {
                Ok(Pong {
                    pong: true,
                    time: Utc::now(),
                })
            }),
        )
        .procedure(
            "peers",
            base.query(|_: Value, session| async move { session.connected_peers() }),
        )
        .procedure(
            "whoami",
            base.query(|_: Value, session| async move {
                Ok(WhoAmI {
                    session_id: session.session_id().to_string(),
                    peer_id: session.caller_id().to_string(),
                    role: session.role(),
                })
            }),
        );

    Router::new().nest("system", system)
}
