//! HTTP client for the Labgate MCP gateway.
//!
//! [`GatewayClient`] speaks the gateway's Streamable HTTP surface: it opens
//! a session with `initialize`, then lists and invokes operations, reads the
//! push stream and terminates the session.

use futures::stream::{BoxStream, StreamExt};
use labgate_types::{
    jsonrpc::JsonRpcError, CallToolResult, JsonRpcRequest, JsonRpcResponse, SessionListResponse,
    ToolDescriptor, ToolListResult, MCP_PATH, PROTOCOL_VERSION, SESSION_ID_HEADER, TOKEN_HEADER,
};
use reqwest::{header, Client, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a JSON-RPC error object.
    #[error("Gateway error (HTTP {status}): {} ({})", .error.message, .error.code)]
    Rpc { status: u16, error: JsonRpcError },

    /// The gateway answered with a non-2xx status and no JSON-RPC error.
    #[error("Gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// HTTP status of the failed exchange, if the gateway answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Rpc { status, .. } | ClientError::Status { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            ClientError::InvalidResponse(_) => None,
        }
    }

    /// JSON-RPC error returned by the gateway, if any.
    pub fn rpc_error(&self) -> Option<&JsonRpcError> {
        match self {
            ClientError::Rpc { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Decoded push frames from `GET /api/mcp`.
pub type PushFrames = BoxStream<'static, Result<Value>>;

/// Client for one gateway. Cheap to clone; clones share the request id counter.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    base_url: String,
    client: Client,
    next_id: Arc<AtomicU64>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn mcp_url(&self) -> String {
        format!("{}{}", self.base_url, MCP_PATH)
    }

    fn request(&self, method: &str, params: Option<Value>) -> JsonRpcRequest {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        JsonRpcRequest::new(id, method, params)
    }

    /// Check that the gateway is up.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    /// Open a session bound to `credential`. Returns the session id.
    pub async fn initialize(&self, credential: &str) -> Result<String> {
        let request = self.request(
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "labgate-client", "version": env!("CARGO_PKG_VERSION") },
            })),
        );
        let response = self
            .client
            .post(self.mcp_url())
            .header(TOKEN_HEADER, credential)
            .json(&request)
            .send()
            .await?;

        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        read_result(response).await?;

        let session_id = session_id
            .ok_or_else(|| ClientError::InvalidResponse("missing session id header".into()))?;
        self.notify(&session_id, "notifications/initialized").await?;
        Ok(session_id)
    }

    /// Send a notification; the gateway answers 202 without a body.
    pub async fn notify(&self, session_id: &str, method: &str) -> Result<()> {
        let response = self
            .client
            .post(self.mcp_url())
            .header(SESSION_ID_HEADER, session_id)
            .json(&JsonRpcRequest::notification(method, None))
            .send()
            .await?;
        expect_status(response, StatusCode::ACCEPTED).await
    }

    /// Send one JSON-RPC request on a session and return its `result`.
    pub async fn call(&self, session_id: &str, method: &str, params: Option<Value>) -> Result<Value> {
        let request = self.request(method, params);
        let response = self
            .client
            .post(self.mcp_url())
            .header(SESSION_ID_HEADER, session_id)
            .json(&request)
            .send()
            .await?;
        read_result(response).await
    }

    pub async fn ping(&self, session_id: &str) -> Result<()> {
        self.call(session_id, "ping", None).await.map(|_| ())
    }

    /// List the operations the gateway exposes.
    pub async fn list_operations(&self, session_id: &str) -> Result<Vec<ToolDescriptor>> {
        let result = self.call(session_id, "tools/list", None).await?;
        let list: ToolListResult = serde_json::from_value(result)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(list.tools)
    }

    /// Invoke an operation and return its structured result.
    pub async fn invoke(&self, session_id: &str, name: &str, arguments: Value) -> Result<Value> {
        let result = self
            .call(
                session_id,
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        result
            .structured_content
            .ok_or_else(|| ClientError::InvalidResponse("result has no structuredContent".into()))
    }

    /// Terminate a session.
    pub async fn terminate(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.mcp_url())
            .header(SESSION_ID_HEADER, session_id)
            .send()
            .await?;
        expect_status(response, StatusCode::NO_CONTENT).await
    }

    /// Open the session's push stream.
    ///
    /// Yields each SSE `data` payload decoded as JSON. Comment-only frames
    /// are skipped. The stream ends when the gateway closes it.
    pub async fn open_stream(&self, session_id: &str) -> Result<PushFrames> {
        let response = self
            .client
            .get(self.mcp_url())
            .header(SESSION_ID_HEADER, session_id)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let bytes = response.bytes_stream().boxed();
        let frames = futures::stream::unfold(
            (bytes, Vec::new()),
            |(mut bytes, mut buffer)| async move {
                loop {
                    if let Some(frame) = take_frame(&mut buffer) {
                        return Some((frame, (bytes, buffer)));
                    }
                    match bytes.next().await? {
                        Ok(chunk) => buffer.extend_from_slice(&chunk),
                        Err(e) => return Some((Err(e.into()), (bytes, buffer))),
                    }
                }
            },
        );
        Ok(frames.boxed())
    }

    /// List live sessions (operator endpoint).
    pub async fn list_sessions(&self, api_key: Option<&str>) -> Result<SessionListResponse> {
        let url = format!("{}/api/sessions", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(key) = api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

/// Decode a JSON-RPC response body into its result.
async fn read_result(response: Response) -> Result<Value> {
    let status = response.status().as_u16();
    let body = response.text().await?;
    match serde_json::from_str::<JsonRpcResponse>(&body) {
        Ok(JsonRpcResponse {
            error: Some(error), ..
        }) => Err(ClientError::Rpc { status, error }),
        Ok(JsonRpcResponse {
            result: Some(result),
            ..
        }) if (200..300).contains(&status) => Ok(result),
        _ if !(200..300).contains(&status) => Err(ClientError::Status { status, body }),
        _ => Err(ClientError::InvalidResponse(body)),
    }
}

async fn expect_status(response: Response, expected: StatusCode) -> Result<()> {
    if response.status() == expected {
        return Ok(());
    }
    Err(error_from(response).await)
}

async fn error_from(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return e.into(),
    };
    match serde_json::from_str::<JsonRpcResponse>(&body) {
        Ok(JsonRpcResponse {
            error: Some(error), ..
        }) => ClientError::Rpc { status, error },
        _ => ClientError::Status { status, body },
    }
}

/// Pop the next complete SSE frame carrying data off `buffer`.
fn take_frame(buffer: &mut Vec<u8>) -> Option<Result<Value>> {
    loop {
        let end = buffer.windows(2).position(|w| w == b"\n\n")?;
        let frame: Vec<u8> = buffer.drain(..end + 2).collect();
        let text = String::from_utf8_lossy(&frame);

        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if data.is_empty() {
            continue;
        }
        let payload = data.join("\n");
        return Some(
            serde_json::from_str(&payload)
                .map_err(|e| ClientError::InvalidResponse(format!("bad push frame: {}", e))),
        );
    }
}
