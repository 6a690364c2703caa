//! End-to-end tests over real sockets, using `labgate-client`.
//!
//! The upstream GitLab is a local axum stub that records the credential of
//! every request it serves.

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use labgate::{
    auth::{Credential, TokenValidator},
    config::Config,
    create_app,
    gitlab::GitLabClient,
    state::AppState,
};
use labgate_client::GatewayClient;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

struct PrefixValidator;

#[async_trait]
impl TokenValidator for PrefixValidator {
    async fn validate(&self, credential: &Credential) -> bool {
        credential.expose().starts_with("tok-")
    }
}

/// Stub upstream. Requests made with `tok-B` park until released.
#[derive(Clone, Default)]
struct Upstream {
    seen: Arc<Mutex<Vec<(String, String)>>>,
    b_entered: Arc<Notify>,
    release_b: Arc<Notify>,
}

async fn search_projects(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let search = query.get("search").cloned().unwrap_or_default();
    upstream.seen.lock().push((search.clone(), auth.clone()));

    if auth == "Bearer tok-B" {
        upstream.b_entered.notify_one();
        upstream.release_b.notified().await;
    }
    Json(json!([{ "search": search, "authorization": auth }]))
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn start_gateway(upstream_url: &str) -> (GatewayClient, AppState) {
    start_gateway_with(upstream_url, &Config::default()).await
}

async fn start_gateway_with(upstream_url: &str, config: &Config) -> (GatewayClient, AppState) {
    let gitlab = GitLabClient::new(upstream_url, Duration::from_secs(10)).unwrap();
    let state = AppState::new(config, gitlab, Arc::new(PrefixValidator));
    let url = spawn(create_app(state.clone())).await;
    (GatewayClient::new(url), state)
}

async fn start_upstream() -> (Upstream, String) {
    let upstream = Upstream::default();
    let app = Router::new()
        .route("/projects", get(search_projects))
        .with_state(upstream.clone());
    let url = spawn(app).await;
    (upstream, url)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_sessions_keep_their_own_credentials() {
    let (upstream, upstream_url) = start_upstream().await;
    let (client, _) = start_gateway(&upstream_url).await;

    let sid_a = client.initialize("tok-A").await.unwrap();
    let sid_b = client.initialize("tok-B").await.unwrap();
    assert_ne!(sid_a, sid_b);

    let client_b = client.clone();
    let sid = sid_b.clone();
    let call_b = tokio::spawn(async move {
        client_b
            .invoke(&sid, "search_repositories", json!({"search": "from-b"}))
            .await
    });

    // B is parked upstream while A runs to completion
    tokio::time::timeout(Duration::from_secs(5), upstream.b_entered.notified())
        .await
        .expect("B never reached upstream");
    let result_a = client
        .invoke(&sid_a, "search_repositories", json!({"search": "from-a"}))
        .await
        .unwrap();
    assert_eq!(result_a["items"][0]["authorization"], "Bearer tok-A");
    assert!(!call_b.is_finished());

    upstream.release_b.notify_one();
    let result_b = tokio::time::timeout(Duration::from_secs(5), call_b)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result_b["count"], 1);
    assert_eq!(result_b["items"][0]["authorization"], "Bearer tok-B");

    let seen = upstream.seen.lock().clone();
    assert_eq!(seen.len(), 2);
    for (search, auth) in seen {
        match search.as_str() {
            "from-a" => assert_eq!(auth, "Bearer tok-A"),
            "from-b" => assert_eq!(auth, "Bearer tok-B"),
            other => panic!("unexpected upstream call: {}", other),
        }
    }
}

#[tokio::test]
async fn test_push_stream_lifecycle() {
    let (client, state) = start_gateway("http://127.0.0.1:9").await;
    let sid = client.initialize("tok-A").await.unwrap();

    let mut frames = client.open_stream(&sid).await.unwrap();

    // Default heartbeat period is 30s; the first one must not wait for it
    let first = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("no immediate heartbeat")
        .unwrap()
        .unwrap();
    assert_eq!(first["method"], "notifications/heartbeat");
    assert!(first["params"]["timestamp"].is_string());

    let listing = client.list_sessions(None).await.unwrap();
    assert!(listing.sessions.iter().any(|s| s.id == sid && s.connected));

    let second = client.open_stream(&sid).await;
    assert_eq!(second.err().and_then(|e| e.status()), Some(409));

    client.terminate(&sid).await.unwrap();

    let mut rest = Vec::new();
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = frames.next().await {
            rest.push(frame.unwrap());
        }
    })
    .await;
    assert!(ended.is_ok(), "stream still open after terminate");
    assert!(rest
        .iter()
        .any(|f| f["method"] == "notifications/session/closing"));
    assert!(!state.sessions().contains(&sid));
}

#[tokio::test]
async fn test_stream_requires_known_session() {
    let (client, _) = start_gateway("http://127.0.0.1:9").await;

    let err = client.open_stream("no-such-session").await.err().unwrap();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_stream_can_reopen_after_disconnect() {
    let mut config = Config::default();
    config.sessions.heartbeat_interval = Duration::from_millis(100);
    let (client, state) = start_gateway_with("http://127.0.0.1:9", &config).await;
    let sid = client.initialize("tok-A").await.unwrap();

    let mut frames = client.open_stream(&sid).await.unwrap();
    frames.next().await.unwrap().unwrap();
    drop(frames);

    // The server notices the disconnect on its next heartbeat write
    let mut reopened = None;
    for _ in 0..50 {
        if !state.sessions().get(&sid).unwrap().transport().is_connected() {
            reopened = Some(client.open_stream(&sid).await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let mut frames = reopened.expect("stream slot never released");
    let first = frames.next().await.unwrap().unwrap();
    assert_eq!(first["method"], "notifications/heartbeat");
}

#[tokio::test]
async fn test_client_error_carries_rpc_error() {
    let (client, _) = start_gateway("http://127.0.0.1:9").await;
    let sid = client.initialize("tok-A").await.unwrap();

    let err = client
        .invoke(&sid, "create_branch", json!({"project_id": 1}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(200));
    let rpc = err.rpc_error().unwrap();
    assert_eq!(rpc.code, -32602);
    assert!(rpc.message.contains("branch"));

    client.terminate(&sid).await.unwrap();
    let err = client.terminate(&sid).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}
