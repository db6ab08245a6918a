//! Health and room status endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Serialize;

use super::ApiState;
use crate::network::PeerRecord;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Connected peers of one room
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: String,
    pub peers: Vec<PeerRecord>,
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn room(
    State(state): State<Arc<ApiState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, StatusCode> {
    let room = state.rooms.get(&room_id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(RoomResponse {
        room_id,
        peers: room.network.connected_clients(),
    }))
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build room status router
pub fn rooms_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/rooms/{room_id}", get(room))
        .with_state(state)
}
