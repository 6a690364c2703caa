//! Shared types for the Labgate MCP gateway.
//!
//! This crate contains the wire types shared between the gateway
//! server and its HTTP client.

/// Default port for the gateway server.
pub const DEFAULT_PORT: u16 = 8080;

/// Path of the MCP Streamable HTTP endpoint.
pub const MCP_PATH: &str = "/api/mcp";

/// Header carrying the session id on every call after `initialize`.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Dedicated header for the caller's GitLab credential.
pub const TOKEN_HEADER: &str = "x-gitlab-token";

/// MCP protocol version we speak.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub mod api;
pub mod jsonrpc;

// Re-export commonly used types
pub use api::{
    CallToolParams, CallToolResult, ErrorResponse, InitializeResult, ServerInfo, SessionInfo,
    SessionListResponse, ToolContent, ToolDescriptor, ToolListResult,
};
pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
