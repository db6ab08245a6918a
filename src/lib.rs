//! Duet - bidirectional RPC over persistent WebSocket connections
//!
//! Both ends of a connection expose a [`Router`] of typed procedures and can
//! call each other: the server calls one peer or broadcasts to every peer of a
//! room, and each client calls the server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────────┐
//! │          Client          │  JSON    │       Server (api)       │
//! │  Router ◄─ dispatch      │  frames  │  Rooms ─► Network        │
//! │  pending ─► transport ───┼─────────►│  Dispatcher ◄─ Router    │
//! │  reconnect / backoff     │◄─────────┼─ send_to_client/broadcast│
//! └──────────────────────────┘          └──────────────────────────┘
//! ```
//!
//! Procedures are declared with [`procedure()`] and grouped with [`router()`].
//! Resolvers receive a [`Session`] through which they can call back across the
//! connection.

pub mod api;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod network;
pub mod pending;
pub mod procedure;
pub mod protocol;
pub mod router;
pub mod session;
pub mod system;

pub use client::{Client, ClientManager, ClientOptions, ConnectionState};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{Error, ErrorCode, Result, RpcError};
pub use network::Network;
pub use procedure::{Procedure, ProcedureBuilder, procedure};
pub use protocol::{CallType, Message, Request, Response};
pub use router::{Router, merge_routers, router};
pub use session::Session;
