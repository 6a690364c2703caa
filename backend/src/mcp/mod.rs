//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! This module implements the MCP 2025-03-26 Streamable HTTP transport,
//! letting AI agents drive GitLab through a single HTTP endpoint, with an
//! optional SSE stream for server-initiated messages.
//!
//! ## Endpoints
//!
//! - `POST /api/mcp` - Send JSON-RPC requests
//! - `GET /api/mcp` - Open SSE stream for server messages
//! - `DELETE /api/mcp` - Terminate session
//!
//! ## Session Management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned during
//! initialization and required for subsequent requests. Each session is
//! bound to the GitLab credential presented at initialization.

pub mod context;
pub mod handler;
pub mod session;
pub mod transport;

pub use context::RequestContext;
pub use handler::{McpHandler, McpRequest};
pub use session::{spawn_sweeper, Session, SessionStore};
pub use transport::{McpEvent, StreamLease, Transport};
