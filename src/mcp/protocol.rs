//! JSON-RPC 2.0 message types and codec for the MCP protocol.
//!
//! This module defines the wire envelope used on the request/response
//! endpoint and the closed error taxonomy the server may emit.
//!
//! # Message Types
//!
//! - **Request**: a method call expecting exactly one response (has `id`)
//! - **Response**: success (`result`) or error (`error`), never both
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - The response `id` always echoes the request `id` verbatim; when the
//!   request `id` is unrecoverable, the error envelope carries a `null`
//!   sentinel instead

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The MCP protocol version this implementation supports.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name for capability negotiation.
pub const SERVER_NAME: &str = "imagery-mcp";

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier, echoed verbatim in the response.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A failure to decode raw text into a request.
///
/// The two variants are deliberately distinct: a body that is not JSON at
/// all is a transport-level client error and never enters the JSON-RPC
/// error taxonomy, while a well-formed JSON value with a broken envelope
/// maps to [`ErrorCode::ParseError`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not well-formed JSON.
    #[error("invalid JSON body: {detail}")]
    Malformed {
        /// Description of the syntax failure.
        detail: String,
    },

    /// Well-formed JSON, but the generic envelope shape is invalid.
    #[error("invalid request envelope: {detail}")]
    Envelope {
        /// The violated envelope constraint.
        detail: String,
    },
}

/// Parses raw text into a JSON-RPC request.
///
/// Checks the generic envelope only: `jsonrpc` must be the literal `"2.0"`,
/// `id` must be a string or number, `method` must be a non-empty string.
/// `params` passes through unvalidated; method-specific validation happens
/// later against a [`crate::mcp::schema::MethodSchema`].
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if `raw` is not well-formed JSON, or
/// [`DecodeError::Envelope`] if the envelope fields are absent or mistyped.
pub fn parse(raw: &str) -> Result<JsonRpcRequest, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError::Malformed {
        detail: e.to_string(),
    })?;
    parse_value(value)
}

/// Parses an already-deserialised JSON value into a request.
///
/// Used by transports that parse the body themselves for best-effort `id`
/// recovery before envelope validation.
///
/// # Errors
///
/// Returns [`DecodeError::Envelope`] if the envelope fields are absent or
/// mistyped.
pub fn parse_value(value: Value) -> Result<JsonRpcRequest, DecodeError> {
    let envelope = |detail: &str| DecodeError::Envelope {
        detail: detail.to_string(),
    };

    let obj = value
        .as_object()
        .ok_or_else(|| envelope("not a JSON object"))?;

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        Some(_) => return Err(envelope("jsonrpc field must be \"2.0\"")),
        None => return Err(envelope("missing jsonrpc field")),
    }

    match obj.get("id") {
        Some(id) if id.is_string() || id.is_i64() => {}
        Some(_) => return Err(envelope("id field must be a string or number")),
        None => return Err(envelope("missing id field")),
    }

    match obj.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => {}
        Some(_) => return Err(envelope("method field cannot be empty")),
        None => return Err(envelope("missing or non-string method field")),
    }

    serde_json::from_value(value).map_err(|e| envelope(&e.to_string()))
}

/// Recovers the request `id` from a raw JSON value on a best-effort basis.
///
/// Only structurally plausible ids (string or number) are accepted; anything
/// else yields `None`, which serialises as the `null` sentinel. This never
/// fails: producing an error response must not depend on id recovery.
#[must_use]
pub fn recover_id(value: &Value) -> Option<RequestId> {
    match value.get("id") {
        Some(Value::String(s)) => Some(RequestId::String(s.clone())),
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number),
        _ => None,
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
///
/// This is the closed set of codes the server may emit on the
/// request/response endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid envelope shape (well-formed JSON, broken request object).
    ParseError,
    /// Valid envelope, but params validation failed or the server is not
    /// initialised.
    InvalidRequest,
    /// The method or named tool does not exist.
    MethodNotFound,
    /// Invalid method parameters (reserved for capability-level argument
    /// errors).
    InvalidParams,
    /// Any unanticipated failure during dispatch or capability execution.
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

/// A tagged protocol failure: error kind, message, optional payload.
///
/// Dispatch and validation return this instead of throwing; the transport
/// turns it into an error envelope. Constructed fresh per failure and never
/// mutated afterwards. Diagnostic detail belongs in `data`, never in
/// `message`.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    /// The error kind.
    pub code: ErrorCode,
    /// A short description of the error.
    pub message: String,
    /// Additional information about the error.
    pub data: Option<Value>,
}

impl ProtocolError {
    /// Creates a new protocol error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a protocol error with the code's default message.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Attaches additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Creates a method-not-found error for an unrecognised method string.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Creates the not-initialised precondition error.
    #[must_use]
    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::InvalidRequest, "Server not initialized")
    }

    /// Creates an internal error with a custom message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code.code())
    }
}

impl std::error::Error for ProtocolError {}

/// The `error` member of an error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// The numeric error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<ProtocolError> for JsonRpcErrorData {
    fn from(err: ProtocolError) -> Self {
        Self {
            code: err.code.code(),
            message: err.message,
            data: err.data,
        }
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this error corresponds to; `null` when the incoming
    /// id could not be recovered.
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: ProtocolError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error: error.into(),
        }
    }
}
