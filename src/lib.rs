//! imagery-mcp: MCP server exposing satellite imagery workflows over HTTP
//!
//! This library implements a JSON-RPC 2.0 request/response protocol over
//! HTTP with an auxiliary Server-Sent-Events channel for asynchronous
//! push. A single protocol session enforces the initialize-then-operate
//! handshake and dispatches tool calls to a pluggable capability registry.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol implementation (codec, schemas, session, transport)
//! - [`tools`] — Capability registry interface and in-process implementation

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;
