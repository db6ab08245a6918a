//! HTTP and WebSocket server hosting rooms

pub mod health;
pub mod rooms;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use rooms::{Persistence, Room, Rooms};

use crate::config::Config;
use crate::Result;

/// Shared state for API handlers
#[derive(Debug)]
pub struct ApiState {
    pub rooms: Rooms,
}

/// API server
#[derive(Debug, Clone)]
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(rooms: Rooms, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { rooms }),
            port,
        }
    }

    /// Server for `router` with persistence, port and timeouts from config
    #[must_use]
    pub fn from_config(config: &Config, router: crate::router::Router) -> Self {
        let rooms = Rooms::new(
            router,
            Persistence::from_config(config),
            config.network_options(),
        );
        Self::new(rooms, config.port)
    }

    #[must_use]
    pub fn rooms(&self) -> &Rooms {
        &self.state.rooms
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(websocket::router(self.state.clone()))
            .merge(health::rooms_router(self.state.clone()))
            .merge(health::router());

        // CORS layer for cross-origin requests from browser peers
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");
        self.serve(listener).await
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
