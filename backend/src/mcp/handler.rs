//! MCP JSON-RPC request handler.
//!
//! JSON-RPC messages are decoded into an [`McpRequest`] before routing, so a
//! malformed `initialize` never creates a session. [`McpHandler::handle`]
//! then runs the decoded message with the call's [`RequestContext`] and
//! encodes the outcome. Nothing raised while handling a call, panics
//! included, escapes it.

use futures::FutureExt;
use labgate_types::jsonrpc::JSONRPC_VERSION;
use labgate_types::{
    CallToolParams, CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ServerInfo, ToolListResult, PROTOCOL_VERSION,
};
use secrecy::Secret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info_span, warn, Instrument};

use super::context::RequestContext;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::state::AppState;

/// Parameters of the `initialize` method.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub client_info: Option<Value>,
    /// In-body credential, used when no credential header is present.
    #[serde(default)]
    pub token: Option<Secret<String>>,
}

/// A decoded MCP message.
#[derive(Debug)]
pub enum McpRequest {
    Initialize(InitializeParams),
    Ping,
    ListTools,
    CallTool(CallToolParams),
    /// Any message without an id. Never answered.
    Notification(String),
}

impl McpRequest {
    /// Decode a JSON-RPC envelope.
    pub fn parse(request: &JsonRpcRequest) -> Result<Self> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(GatewayError::InvalidRequest(format!(
                "Unsupported jsonrpc version: {}",
                request.jsonrpc
            )));
        }
        if request.is_notification() {
            return Ok(McpRequest::Notification(request.method.clone()));
        }

        match request.method.as_str() {
            "initialize" => Ok(McpRequest::Initialize(params(request)?)),
            "ping" => Ok(McpRequest::Ping),
            "tools/list" => Ok(McpRequest::ListTools),
            "tools/call" => Ok(McpRequest::CallTool(params(request)?)),
            other => Err(GatewayError::MethodNotFound(other.to_string())),
        }
    }
}

fn params<T: DeserializeOwned>(request: &JsonRpcRequest) -> Result<T> {
    let raw = request.params.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(raw).map_err(|e| GatewayError::invalid_argument("params", e.to_string()))
}

/// Result of `initialize`.
pub fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: json!({ "tools": {} }),
        server_info: ServerInfo {
            name: "labgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

/// MCP request handler.
pub struct McpHandler;

impl McpHandler {
    /// Handle a decoded message on a routed call.
    ///
    /// Returns `None` for notifications, a response otherwise.
    pub async fn handle(
        state: &AppState,
        ctx: &RequestContext,
        envelope: &JsonRpcRequest,
        request: McpRequest,
    ) -> Option<JsonRpcResponse> {
        let span = info_span!(
            "mcp_call",
            session = %ctx.session_id(),
            call = %ctx.call_id(),
            method = %envelope.method
        );

        async move {
            let id = envelope.id.clone();

            let outcome = AssertUnwindSafe(Self::dispatch(state, ctx, request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(GatewayError::Internal(format!("handler panicked: {}", reason)))
                });

            match outcome {
                Ok(Some(result)) => Some(JsonRpcResponse::success(id, result)),
                Ok(None) => None,
                Err(e) => {
                    match e.kind() {
                        ErrorKind::Internal => error!("MCP: {}", e),
                        ErrorKind::UpstreamError => warn!("MCP: {}", e),
                        _ => debug!("MCP: {}", e),
                    }
                    if envelope.is_notification() {
                        None
                    } else {
                        Some(JsonRpcResponse::from_error(id, e.to_rpc_error()))
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        state: &AppState,
        ctx: &RequestContext,
        request: McpRequest,
    ) -> Result<Option<Value>> {
        match request {
            McpRequest::Initialize(params) => {
                debug!(
                    "MCP: initialize (client protocol {:?}, client {:?})",
                    params.protocol_version, params.client_info
                );
                to_value(initialize_result()).map(Some)
            }
            McpRequest::Ping => Ok(Some(json!({}))),
            McpRequest::ListTools => to_value(ToolListResult {
                tools: state.operations().list(),
            })
            .map(Some),
            McpRequest::CallTool(params) => {
                let args = params.arguments.unwrap_or(Value::Null);
                let result = state
                    .operations()
                    .invoke(ctx, state.gitlab(), &params.name, args)
                    .await?;
                to_value(CallToolResult::from_value(result)).map(Some)
            }
            McpRequest::Notification(method) => {
                debug!("MCP: notification {}", method);
                Ok(None)
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::Internal(format!("Failed to encode result: {}", e)))
}
