//! HTTP client for the upstream GitLab REST API (v4).
//!
//! The client holds no credential of its own: every call takes the
//! credential of the request it serves.

use crate::auth::Credential;
use crate::error::{GatewayError, Result};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default public GitLab API root.
pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";

/// HTTP client for the GitLab REST API.
#[derive(Clone, Debug)]
pub struct GitLabClient {
    base_url: String,
    client: Client,
}

impl GitLabClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("labgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path prefix for a project, accepting a numeric id or a `group/name` path.
    pub fn project_path(project_id: &str) -> String {
        format!("/projects/{}", urlencoding::encode(project_id))
    }

    /// Path of a file inside a project's repository.
    pub fn file_path(project_id: &str, file_path: &str) -> String {
        format!(
            "{}/repository/files/{}",
            Self::project_path(project_id),
            urlencoding::encode(file_path)
        )
    }

    /// Fetch the user owning the credential (`GET /user`).
    pub async fn current_user(&self, credential: &Credential) -> Result<Value> {
        self.get(credential, "/user", &[]).await
    }

    pub async fn get(
        &self,
        credential: &Credential,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        self.send(credential, Method::GET, path, query, None).await
    }

    pub async fn post(&self, credential: &Credential, path: &str, body: &Value) -> Result<Value> {
        self.send(credential, Method::POST, path, &[], Some(body))
            .await
    }

    pub async fn put(&self, credential: &Credential, path: &str, body: &Value) -> Result<Value> {
        self.send(credential, Method::PUT, path, &[], Some(body)).await
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| GatewayError::Internal(format!("Invalid upstream URL: {}", e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        credential: &Credential,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.url(path, query)?;
        debug!("GitLab {} {}", method, url.path());

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(credential.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body: parse_body(&text),
            });
        }

        if text.trim().is_empty() || status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| GatewayError::UpstreamFailure(format!("Failed to parse response: {}", e)))
    }
}

/// Keep a diagnostic body as JSON when possible, raw text otherwise.
fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(url: &str) -> GitLabClient {
        GitLabClient::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_project_path_encodes_namespace() {
        assert_eq!(GitLabClient::project_path("42"), "/projects/42");
        assert_eq!(
            GitLabClient::project_path("group/sub/app"),
            "/projects/group%2Fsub%2Fapp"
        );
        assert_eq!(
            GitLabClient::file_path("7", "src/main.rs"),
            "/projects/7/repository/files/src%2Fmain.rs"
        );
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/projects")
            .match_header("authorization", "Bearer tok-A")
            .match_query(Matcher::UrlEncoded("search".into(), "foo bar".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 1}]"#)
            .create_async()
            .await;

        let gitlab = client(&server.url());
        let value = gitlab
            .get(
                &Credential::new("tok-A"),
                "/projects",
                &[("search", "foo bar".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(value, json!([{"id": 1}]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_preserves_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/projects/7/issues")
            .with_status(422)
            .with_body(r#"{"message": {"title": ["can't be blank"]}}"#)
            .create_async()
            .await;

        let gitlab = client(&server.url());
        let err = gitlab
            .post(&Credential::new("tok"), "/projects/7/issues", &json!({}))
            .await
            .unwrap_err();

        match err {
            GatewayError::Upstream { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body["message"]["title"][0], "can't be blank");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/user")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let gitlab = client(&server.url());
        let err = gitlab
            .current_user(&Credential::new("tok"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Upstream { status: 502, body: Value::String(ref s) } if s == "Bad Gateway"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_upstream_failure() {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let gitlab = client("http://127.0.0.1:9");
        let err = gitlab
            .current_user(&Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFailure(_)));
    }
}
