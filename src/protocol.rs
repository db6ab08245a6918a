//! Wire protocol: request, response, ping and pong frames
//!
//! Every frame is a JSON object discriminated by a `kind` field:
//!
//! ```text
//! {"kind":"request","id":"…","type":"query","path":"rooms.list","input":{…}}
//! {"kind":"response","id":"…","result":{"type":"data","data":…}}
//! {"kind":"response","id":"…","result":{"type":"error","error":{"message":"…","code":"…"}}}
//! {"kind":"ping"}
//! {"kind":"pong"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorCode, RpcError};

/// Id used when answering a frame whose own id could not be read
pub const UNKNOWN_ID: &str = "unknown";

/// Declared kind of a procedure call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Query,
    Mutation,
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => f.write_str("query"),
            Self::Mutation => f.write_str("mutation"),
        }
    }
}

/// Invocation of a procedure on the other side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub path: String,
    #[serde(default)]
    pub input: Value,
}

impl Request {
    /// Create a request with a fresh id
    #[must_use]
    pub fn new(call_type: CallType, path: impl Into<String>, input: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            call_type,
            path: path.into(),
            input,
        }
    }
}

/// Error body of a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl From<RpcError> for ErrorPayload {
    fn from(err: RpcError) -> Self {
        Self {
            message: err.message,
            code: Some(err.code),
        }
    }
}

impl From<ErrorPayload> for RpcError {
    fn from(payload: ErrorPayload) -> Self {
        Self::new(payload.code.unwrap_or(ErrorCode::Unknown), payload.message)
    }
}

/// Outcome carried by a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseResult {
    Data { data: Value },
    Error { error: ErrorPayload },
}

impl ResponseResult {
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Convert into the call outcome it represents
    ///
    /// # Errors
    ///
    /// Returns the carried error for error-shaped results
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self {
            Self::Data { data } => Ok(data),
            Self::Error { error } => Err(error.into()),
        }
    }
}

impl From<Result<Value, RpcError>> for ResponseResult {
    fn from(result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(data) => Self::Data { data },
            Err(err) => Self::Error { error: err.into() },
        }
    }
}

/// Answer to a request, correlated by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub result: ResponseResult,
}

impl Response {
    #[must_use]
    pub fn new(id: impl Into<String>, result: Result<Value, RpcError>) -> Self {
        Self {
            id: id.into(),
            result: result.into(),
        }
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
    Ping,
    Pong,
}

impl Message {
    /// Parse and validate a raw text frame
    ///
    /// # Errors
    ///
    /// Returns a `PARSE_ERROR` if the payload is not a well-formed message
    pub fn parse(raw: &str) -> Result<Self, RpcError> {
        let message: Self = serde_json::from_str(raw)
            .map_err(|e| RpcError::parse(format!("invalid message: {e}")))?;

        match &message {
            Self::Request(req) if req.id.is_empty() => {
                Err(RpcError::parse("request id must not be empty"))
            }
            Self::Response(res) if res.id.is_empty() => {
                Err(RpcError::parse("response id must not be empty"))
            }
            _ => Ok(message),
        }
    }

    /// Request frame with a fresh id
    #[must_use]
    pub fn request(call_type: CallType, path: impl Into<String>, input: Value) -> Self {
        Self::Request(Request::new(call_type, path, input))
    }

    /// Response frame carrying data
    #[must_use]
    pub fn data(id: impl Into<String>, data: Value) -> Self {
        Self::Response(Response::new(id, Ok(data)))
    }

    /// Response frame carrying an error
    #[must_use]
    pub fn error(id: impl Into<String>, error: RpcError) -> Self {
        Self::Response(Response::new(id, Err(error)))
    }

    /// Serialize to a text frame
    ///
    /// # Errors
    ///
    /// Returns an internal error if serialization fails
    pub fn to_json(&self) -> Result<String, RpcError> {
        serde_json::to_string(self)
            .map_err(|e| RpcError::internal(format!("failed to serialize message: {e}")))
    }
}
