//! Labgate backend library.
//!
//! Labgate is a multi-tenant MCP gateway: AI agents speak JSON-RPC over
//! Streamable HTTP, and every tool call is translated into a GitLab REST
//! call made with the calling agent's own credential.
//!
//! This module exposes the application builder for use in tests.

use axum::http::HeaderValue;
use axum::http::{header, HeaderName, Method};
use axum::{routing::get, Router};
use labgate_types::SESSION_ID_HEADER;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gitlab;
pub mod logging;
pub mod mcp;
pub mod openapi;
pub mod operations;
pub mod state;

use state::AppState;

/// Create the Axum application router.
///
/// This function is used both by the main server binary and by integration tests.
pub fn create_app(state: AppState) -> Router {
    if state.operator_auth().enabled() {
        tracing::info!("Operator endpoints require an API key");
    } else {
        tracing::warn!("Operator API key not set - session listing is public");
    }

    let api_router = Router::new()
        .route(
            "/mcp",
            get(api::mcp::mcp_get)
                .post(api::mcp::mcp_post)
                .delete(api::mcp::mcp_delete),
        )
        .route("/sessions", get(api::sessions::list_sessions));

    let cors = {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
                HeaderName::from_static(labgate_types::TOKEN_HEADER),
                HeaderName::from_static(SESSION_ID_HEADER),
                HeaderName::from_static("x-api-key"),
            ])
            .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]);

        // If no origins specified, allow any origin
        // Otherwise, restrict to the specified origins
        let allowed = state.allowed_origins();
        if allowed.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = allowed
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            cors.allow_origin(origins)
        }
    };

    Router::new()
        .route("/health", get(health))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Server is alive", body = String)
    )
)]
pub async fn health() -> &'static str {
    "OK"
}
