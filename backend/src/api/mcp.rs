//! MCP Streamable HTTP endpoint handlers.
//!
//! MCP 2025-03-26 Streamable HTTP transport.
//!
//! ## Endpoints
//!
//! - `POST /api/mcp` - Send JSON-RPC requests
//! - `GET /api/mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /api/mcp` - Terminate a session

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures::stream::Stream;
use labgate_types::{
    ErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, SESSION_ID_HEADER,
};
use reqwest::Url;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::{extract_credential, header_credential};
use crate::error::{AuthFailure, GatewayError, Result};
use crate::mcp::{McpEvent, McpHandler, McpRequest, RequestContext, Session, StreamLease};
use crate::state::AppState;

/// Validate Origin header for DNS rebinding protection.
fn validate_origin(headers: &HeaderMap, allowed_origins: &[String]) -> bool {
    // Requests without Origin come from non-browser clients
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    let Ok(origin_str) = origin.to_str() else {
        warn!("Rejecting MCP request with non-ASCII origin");
        return false;
    };

    if allowed_origins.iter().any(|o| o == origin_str) {
        return true;
    }
    if allowed_origins.is_empty() && is_loopback_origin(origin_str) {
        return true;
    }

    warn!("Rejecting MCP request from origin: {}", origin_str);
    false
}

/// Whether `origin` names a loopback host exactly, on any port.
fn is_loopback_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https")
        && matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
}

fn forbidden_origin() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::new("Invalid origin")),
    )
        .into_response()
}

/// Extract session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn with_session_header(mut resp: Response, session_id: &str) -> Response {
    if let Ok(hv) = HeaderValue::from_str(session_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), hv);
    }
    resp
}

/// Encode a gateway-level failure with its HTTP status.
fn error_response(id: Option<Value>, err: GatewayError) -> Response {
    let status = err.status();
    let body = JsonRpcResponse::from_error(id, err.to_rpc_error());
    let mut resp = (status, Json(body)).into_response();
    if status == StatusCode::UNAUTHORIZED {
        resp.headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    resp
}

/// Decode the request body, separating malformed JSON from a malformed envelope.
fn decode_envelope(body: &[u8]) -> Result<JsonRpcRequest> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
    if value.is_array() {
        return Err(GatewayError::InvalidRequest(
            "Batch requests are not supported".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

/// Route a call to its session, creating one for a fresh `initialize`.
///
/// A supplied session id must already exist; it is never adopted for a new
/// session.
async fn route(
    state: &AppState,
    headers: &HeaderMap,
    request: &McpRequest,
) -> Result<Arc<Session>> {
    if let Some(id) = get_session_id(headers) {
        let session = state
            .sessions()
            .get(&id)
            .ok_or(GatewayError::SessionNotFound)?;

        if let Some(presented) = header_credential(headers) {
            if !presented.matches(&session.credential()) {
                if !state.validator().validate(&presented).await {
                    warn!("MCP: Rejected credential swap on session {}", id);
                    return Err(GatewayError::Unauthenticated(AuthFailure::Invalid));
                }
                state.sessions().swap_credential(&id, presented);
            }
        }
        state.sessions().touch(&id);
        return Ok(session);
    }

    let McpRequest::Initialize(params) = request else {
        return Err(GatewayError::InvalidRequest(
            "Mcp-Session-Id header required".to_string(),
        ));
    };

    let body_token = params.token.as_ref().map(|t| t.expose_secret().as_str());
    let credential = extract_credential(headers, body_token)
        .ok_or(GatewayError::Unauthenticated(AuthFailure::Missing))?;
    if !state.validator().validate(&credential).await {
        return Err(GatewayError::Unauthenticated(AuthFailure::Invalid));
    }

    let session = state
        .sessions()
        .create(credential)
        .ok_or(GatewayError::ShuttingDown)?;
    info!("MCP: New session initialized: {}", session.id());
    Ok(session)
}

/// POST /api/mcp - Handle JSON-RPC requests.
///
/// The `Mcp-Session-Id` header is assigned on initialize and required for subsequent requests.
#[utoipa::path(
    post,
    path = "/api/mcp",
    tag = "mcp",
    request_body = JsonRpcRequest,
    responses(
        (status = 200, description = "JSON-RPC response", body = JsonRpcResponse),
        (status = 202, description = "Notification accepted"),
        (status = 400, description = "Malformed message or missing session id", body = JsonRpcResponse),
        (status = 401, description = "Missing or invalid GitLab credential", body = JsonRpcResponse),
        (status = 403, description = "Origin not allowed", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = JsonRpcResponse)
    )
)]
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !validate_origin(&headers, state.allowed_origins()) {
        return forbidden_origin();
    }

    let envelope = match decode_envelope(&body) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(None, e),
    };
    let request = match McpRequest::parse(&envelope) {
        Ok(request) => request,
        Err(e) => return error_response(envelope.id.clone(), e),
    };
    debug!("MCP POST: method={}", envelope.method);

    let session = match route(&state, &headers, &request).await {
        Ok(session) => session,
        Err(e) => return error_response(envelope.id.clone(), e),
    };
    let ctx = match RequestContext::attach(&session) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(envelope.id.clone(), e),
    };

    let response = McpHandler::handle(&state, &ctx, &envelope, request).await;
    drop(ctx);

    let resp = match response {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        // Notification - no response needed
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(resp, session.id())
}

/// GET /api/mcp - Open SSE stream for server-initiated messages.
///
/// The first frame is a heartbeat, sent immediately. Only one stream may be
/// open per session.
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_origin(&headers, state.allowed_origins()) {
        return forbidden_origin();
    }

    let Some(session_id) = get_session_id(&headers) else {
        return error_response(
            None,
            GatewayError::InvalidRequest("Mcp-Session-Id header required for SSE stream".into()),
        );
    };
    let Some(session) = state.sessions().get(&session_id) else {
        return error_response(None, GatewayError::SessionNotFound);
    };
    state.sessions().touch(&session_id);

    let lease = match session.transport().open_stream() {
        Ok(lease) => lease,
        Err(e) => {
            warn!("MCP: Refusing stream for session {}: {}", session_id, e);
            return error_response(None, e);
        }
    };

    let stream = push_stream(
        session.transport().subscribe(),
        lease,
        state.settings().heartbeat_interval,
    );
    with_session_header(Sse::new(stream).into_response(), &session_id)
}

struct PushStream {
    events: broadcast::Receiver<McpEvent>,
    heartbeat: Interval,
    lease: StreamLease,
}

impl PushStream {
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            tokio::select! {
                // Queued messages go out before a pending teardown is honoured
                biased;
                received = self.events.recv() => match received {
                    Ok(McpEvent::JsonRpc(json)) => return Some(Event::default().data(json)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("MCP: Push stream lagged, {} message(s) dropped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        self.lease.end();
                        return None;
                    }
                },
                _ = self.lease.cancelled() => return None,
                _ = self.heartbeat.tick() => return Some(heartbeat_event()),
            }
        }
    }
}

fn heartbeat_event() -> Event {
    let notification = JsonRpcNotification::new(
        "notifications/heartbeat",
        json!({ "timestamp": Utc::now().to_rfc3339() }),
    );
    match serde_json::to_string(&notification) {
        Ok(data) => Event::default().data(data),
        Err(_) => Event::default().comment("heartbeat"),
    }
}

/// SSE stream for one session. Ends when the lease is cancelled; dropping
/// it (client disconnect) releases the lease.
fn push_stream(
    events: broadcast::Receiver<McpEvent>,
    lease: StreamLease,
    heartbeat_period: Duration,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    // The first tick completes immediately
    let mut heartbeat = tokio::time::interval(heartbeat_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = PushStream {
        events,
        heartbeat,
        lease,
    };
    futures::stream::unfold(state, |mut state| async move {
        let event = state.next_event().await?;
        Some((Ok(event), state))
    })
}

/// DELETE /api/mcp - Terminate a session.
///
/// Stops new calls, waits a bounded grace period for in-flight ones, then
/// removes the session and ends its push stream.
#[utoipa::path(
    delete,
    path = "/api/mcp",
    tag = "mcp",
    params(("mcp-session-id" = String, Header, description = "Session to terminate")),
    responses(
        (status = 204, description = "Session terminated"),
        (status = 400, description = "Missing session id", body = JsonRpcResponse),
        (status = 403, description = "Origin not allowed", body = ErrorResponse),
        (status = 404, description = "Unknown session", body = JsonRpcResponse)
    )
)]
pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_origin(&headers, state.allowed_origins()) {
        return forbidden_origin();
    }

    let Some(session_id) = get_session_id(&headers) else {
        return error_response(
            None,
            GatewayError::InvalidRequest("Mcp-Session-Id header required".into()),
        );
    };
    let Some(session) = state.sessions().get(&session_id) else {
        return error_response(None, GatewayError::SessionNotFound);
    };

    let remaining = session
        .transport()
        .shutdown(state.settings().terminate_grace)
        .await;
    if remaining > 0 {
        warn!(
            "MCP: Terminating session {} with {} call(s) unfinished",
            session_id, remaining
        );
    }

    match state.sessions().remove(&session_id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error_response(None, GatewayError::SessionNotFound),
    }
}
