//! Operator endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use labgate_types::{ErrorResponse, SessionListResponse};
use tracing::warn;

use crate::state::AppState;

/// List live MCP sessions.
///
/// Shows ids, timestamps and whether a push stream is attached. Credentials
/// are never included.
#[utoipa::path(
    get,
    path = "/api/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "Live sessions", body = SessionListResponse),
        (status = 401, description = "Operator key missing or wrong", body = ErrorResponse)
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionListResponse>, (StatusCode, Json<ErrorResponse>)> {
    if !state.operator_auth().verify(&headers) {
        warn!("Operator request rejected: missing or invalid API key");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(
                "Authentication required. Provide X-API-Key header or Authorization: Bearer <api-key>",
            )),
        ));
    }

    let sessions = state.sessions().list();
    Ok(Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    }))
}
