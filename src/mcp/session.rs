//! Protocol session: the initialize-then-operate state machine.
//!
//! One [`Session`] instance exists per server process and is injected into
//! the transport at construction. It tracks the initialisation handshake,
//! dispatches requests through a fixed method table, and maps capability
//! failures into the protocol error taxonomy.
//!
//! # Dispatch order
//!
//! Table lookup, then the initialisation precondition, then schema
//! validation, then execution. The precondition check comes strictly
//! before schema validation: an uninitialised `tools/list` with malformed
//! params still reports "not initialized", not a shape error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::protocol::{
    JsonRpcRequest, ProtocolError, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::schema::{self, MethodSchema};
use crate::tools::{ToolError, ToolRegistry};

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client. Recorded for logging
    /// only; the server answers with its own supported version.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// One entry of the fixed dispatch table.
struct MethodSpec {
    /// The method string.
    name: &'static str,
    /// Whether the session must be initialised first.
    requires_init: bool,
    /// Params schema, if the method takes params.
    schema: Option<&'static MethodSchema>,
}

/// The closed set of recognised methods, built once.
const METHOD_TABLE: &[MethodSpec] = &[
    MethodSpec {
        name: "initialize",
        requires_init: false,
        schema: Some(&schema::INITIALIZE),
    },
    MethodSpec {
        name: "ping",
        requires_init: false,
        schema: None,
    },
    MethodSpec {
        name: "tools/list",
        requires_init: true,
        schema: Some(&schema::TOOLS_LIST),
    },
    MethodSpec {
        name: "tools/call",
        requires_init: true,
        schema: Some(&schema::TOOLS_CALL),
    },
];

/// The protocol session state machine.
///
/// Holds the single monotonic `initialized` flag: it starts false, a
/// successful `initialize` sets it true, and nothing short of process
/// restart resets it. Atomic release/acquire makes a completed
/// initialisation visible to all subsequently dispatched requests.
pub struct Session {
    initialized: AtomicBool,
    registry: Arc<dyn ToolRegistry>,
    server_info: ServerInfo,
}

impl Session {
    /// Creates a new uninitialised session over a capability registry.
    #[must_use]
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            registry,
            server_info: ServerInfo::default(),
        }
    }

    /// Creates a session reporting custom server info.
    #[must_use]
    pub fn with_server_info(registry: Arc<dyn ToolRegistry>, server_info: ServerInfo) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            registry,
            server_info,
        }
    }

    /// Whether the initialisation handshake has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The server info this session advertises.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Dispatches one request through the method table.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] carrying one of the closed set of
    /// wire-visible error codes.
    pub async fn dispatch(&self, req: &JsonRpcRequest) -> Result<Value, ProtocolError> {
        let spec = METHOD_TABLE
            .iter()
            .find(|spec| spec.name == req.method)
            .ok_or_else(|| ProtocolError::method_not_found(&req.method))?;

        // Precondition strictly before schema validation.
        if spec.requires_init && !self.is_initialized() {
            return Err(ProtocolError::not_initialized());
        }

        if let Some(method_schema) = spec.schema {
            schema::validate(req, method_schema)?;
        }

        match spec.name {
            "initialize" => self.handle_initialize(req),
            "ping" => Ok(Self::handle_ping()),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(req).await,
            // The table and this match cover the same closed set.
            _ => Err(ProtocolError::method_not_found(&req.method)),
        }
    }

    /// Handles the initialize request.
    ///
    /// A repeated initialize succeeds and leaves the flag set; the
    /// transition is monotonic.
    fn handle_initialize(&self, req: &JsonRpcRequest) -> Result<Value, ProtocolError> {
        // Schema validation guarantees params with protocolVersion here;
        // the typed decode records client details for logging only.
        if let Some(params) = &req.params {
            if let Ok(params) = serde_json::from_value::<InitializeParams>(params.clone()) {
                tracing::info!(
                    client_protocol_version = %params.protocol_version,
                    client = params.client_info.as_ref().map(|c| c.name.as_str()),
                    "Client initialising"
                );
            }
        }

        self.initialized.store(true, Ordering::Release);

        Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": self.server_info,
        }))
    }

    /// Handles the ping request. Available in any state.
    fn handle_ping() -> Value {
        json!({
            "status": "pong",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self) -> Value {
        json!({ "tools": self.registry.list_tools() })
    }

    /// Handles the tools/call request.
    async fn handle_tools_call(&self, req: &JsonRpcRequest) -> Result<Value, ProtocolError> {
        let params: ToolCallParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| ProtocolError::internal(format!("failed to decode tool call: {e}")))?
            .ok_or_else(|| ProtocolError::internal("missing tool call params"))?;

        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };

        tracing::debug!(tool = %params.name, "Dispatching tool call");

        self.registry
            .call_tool(&params.name, arguments)
            .await
            .map_err(|e| map_tool_error(&params.name, e))
    }
}

/// Maps a capability failure into the protocol taxonomy, preserving
/// recognised codes.
fn map_tool_error(name: &str, err: ToolError) -> ProtocolError {
    use crate::mcp::protocol::ErrorCode;

    match err {
        ToolError::NotFound { .. } => ProtocolError::new(
            ErrorCode::MethodNotFound,
            format!("Tool not found: {name}"),
        ),
        ToolError::InvalidArguments(msg) => ProtocolError::new(ErrorCode::InvalidParams, msg),
        ToolError::Execution(msg) => {
            tracing::error!(tool = %name, error = %msg, "Tool execution failed");
            ProtocolError::internal(msg)
        }
    }
}
