//! OpenAPI documentation configuration.

use labgate_types::api::{ErrorResponse, SessionInfo, SessionListResponse};
use labgate_types::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::mcp::mcp_post,
        crate::api::mcp::mcp_delete,
        crate::api::sessions::list_sessions,
        crate::health,
    ),
    components(
        schemas(
            JsonRpcRequest,
            JsonRpcResponse,
            JsonRpcError,
            SessionInfo,
            SessionListResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "mcp", description = "MCP Streamable HTTP endpoint (JSON-RPC 2.0)"),
        (name = "sessions", description = "Operator view of live sessions"),
        (name = "System", description = "System information endpoints")
    ),
    info(
        title = "Labgate MCP Gateway API",
        description = "Multi-tenant MCP gateway exposing GitLab operations to AI agents",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_gateway_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/mcp"));
        assert!(doc.paths.paths.contains_key("/api/sessions"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
