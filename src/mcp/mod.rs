//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the protocol core: JSON-RPC 2.0 messages over an
//! HTTP request/response endpoint, with an auxiliary SSE channel for
//! server-initiated push.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│   Session   │───▶│   Registry   │     │
//! │   │ (HTTP+SSE)  │    │ (lifecycle) │    │ (tool calls) │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! │          │                  │                                │
//! │          ▼                  ▼                                │
//! │   ┌──────────────────────────────────┐                       │
//! │   │  JSON-RPC envelopes + schemas    │                       │
//! │   └──────────────────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod schema;
pub mod session;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use session::Session;
pub use transport::{McpServer, SseRegistry, TransportConfig};
