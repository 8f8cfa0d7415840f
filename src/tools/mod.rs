//! Capability registry consumed by the protocol session.
//!
//! The session dispatches `tools/list` and `tools/call` through the
//! [`ToolRegistry`] trait; tool implementations live behind it and stay
//! out of the protocol core. [`StaticRegistry`] is the in-process
//! implementation the binary wires up.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Describes one invokable tool for `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Errors a tool invocation may report back to the session.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The named tool is not registered. Surfaces to the client as
    /// method-not-found.
    #[error("tool not found: {name}")]
    NotFound {
        /// The requested tool name.
        name: String,
    },

    /// The tool rejected its arguments. Surfaces as invalid-params.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool started but failed. Surfaces as an internal error.
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// The capability interface the protocol session dispatches to.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Enumerates the registered tools.
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Invokes the named tool with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] when `name` is unknown, or the
    /// tool's own failure otherwise.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;
}

/// Handler signature for tools hosted in a [`StaticRegistry`].
pub type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// A fixed in-process tool registry, populated once at startup.
#[derive(Default)]
pub struct StaticRegistry {
    tools: HashMap<String, (ToolDescriptor, ToolHandler)>,
}

impl StaticRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its descriptor's name, replacing any
    /// previous registration with the same name.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: ToolHandler) {
        self.tools
            .insert(descriptor.name.clone(), (descriptor, handler));
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry has no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for StaticRegistry {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> =
            self.tools.values().map(|(desc, _)| desc.clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let (_, handler) = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        handler(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: Some(format!("test tool {name}")),
            input_schema: json!({"type": "object"}),
        }
    }

    fn echo_handler() -> ToolHandler {
        Box::new(|args| Box::pin(async move { Ok(json!({"echo": args})) }))
    }

    #[tokio::test]
    async fn register_and_call() {
        let mut registry = StaticRegistry::new();
        registry.register(descriptor("echo"), echo_handler());

        let result = registry.call_tool("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"echo": {"x": 1}}));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = StaticRegistry::new();
        let err = registry.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound { name } if name == "missing"));
    }

    #[test]
    fn list_is_sorted_by_name() {
        let mut registry = StaticRegistry::new();
        registry.register(descriptor("zeta"), echo_handler());
        registry.register(descriptor("alpha"), echo_handler());

        let names: Vec<String> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn descriptor_serialises_camel_case() {
        let json = serde_json::to_string(&descriptor("t")).unwrap();
        assert!(json.contains("inputSchema"));
    }
}
