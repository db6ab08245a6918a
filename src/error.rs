//! Error types for duet RPC
//!
//! Two layers: [`Error`] covers infrastructure failures (config, io, stores,
//! transports) and [`RpcError`] is the wire-level failure every call rejects
//! with. An [`RpcError`] always carries a machine-readable [`ErrorCode`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for duet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur outside of a single RPC call
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection handshake rejected
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Room not found
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Roster store error
    #[error("store error: {0}")]
    Store(String),

    /// RPC error surfaced outside of a call
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

/// Machine-readable error code carried in error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Inbound payload was not a valid message
    ParseError,
    /// No procedure at the requested path
    ProcedureNotFound,
    /// Request call type differs from the procedure's declared type
    ProcedureTypeMismatch,
    /// An input validator rejected the input
    InputValidationError,
    /// The output validator rejected the resolver's result
    OutputValidationError,
    /// Resolver failed or panicked
    InternalError,
    /// Target peer is not in the roster or has no live transport
    PeerNotConnected,
    /// No response arrived before the request timeout
    RequestTimeout,
    /// Connection to the peer went away while the request was pending
    PeerDisconnected,
    /// Session used in a direction it cannot call
    InvalidDirection,
    /// Connection attempted with a room id other than the bound one
    SessionMismatch,
    /// Code sent by a peer that this version does not know
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Wire representation of the code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::ProcedureNotFound => "PROCEDURE_NOT_FOUND",
            Self::ProcedureTypeMismatch => "PROCEDURE_TYPE_MISMATCH",
            Self::InputValidationError => "INPUT_VALIDATION_ERROR",
            Self::OutputValidationError => "OUTPUT_VALIDATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::PeerNotConnected => "PEER_NOT_CONNECTED",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::PeerDisconnected => "PEER_DISCONNECTED",
            Self::InvalidDirection => "INVALID_DIRECTION",
            Self::SessionMismatch => "SESSION_MISMATCH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call: human-readable message plus machine code
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    /// Create an error with an explicit code
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    #[must_use]
    pub fn procedure_not_found(path: &str) -> Self {
        Self::new(
            ErrorCode::ProcedureNotFound,
            format!("no procedure found at path '{path}'"),
        )
    }

    #[must_use]
    pub fn input_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InputValidationError, message)
    }

    #[must_use]
    pub fn output_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OutputValidationError, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn peer_not_connected(peer_id: &str) -> Self {
        Self::new(
            ErrorCode::PeerNotConnected,
            format!("peer '{peer_id}' is not connected"),
        )
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorCode::RequestTimeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }

    #[must_use]
    pub fn peer_disconnected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PeerDisconnected, message)
    }

    #[must_use]
    pub fn invalid_direction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDirection, message)
    }

    /// Whether this error carries the given code
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl From<anyhow::Error> for RpcError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        match err {
            Error::Rpc(rpc) => rpc,
            other => Self::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::ProcedureTypeMismatch).unwrap();
        assert_eq!(json, "\"PROCEDURE_TYPE_MISMATCH\"");
        assert_eq!(ErrorCode::RequestTimeout.to_string(), "REQUEST_TIMEOUT");
    }

    #[test]
    fn unrecognized_code_parses_as_unknown() {
        let code: ErrorCode = serde_json::from_str("\"TEAPOT\"").unwrap();
        assert_eq!(code, ErrorCode::Unknown);
    }

    #[test]
    fn anyhow_errors_become_internal() {
        let err: RpcError = anyhow::anyhow!("disk on fire").into();
        assert!(err.is(ErrorCode::InternalError));
        assert!(err.message.contains("disk on fire"));
    }

    #[test]
    fn crate_error_unwraps_rpc_errors() {
        let rpc = RpcError::peer_not_connected("p1");
        let back: RpcError = Error::Rpc(rpc.clone()).into();
        assert_eq!(back, rpc);

        let other: RpcError = Error::Store("locked".to_string()).into();
        assert!(other.is(ErrorCode::InternalError));
    }
}
