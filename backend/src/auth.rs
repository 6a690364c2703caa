//! Credentials and their validation.
//!
//! Callers authenticate with their own GitLab token. The gateway never
//! stores a process-wide token: each session owns the credential it was
//! created with, and every upstream call uses the credential of the
//! request being served.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use labgate_types::TOKEN_HEADER;
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use tracing::{debug, warn};

use crate::gitlab::GitLabClient;

/// A caller's GitLab bearer token.
#[derive(Clone)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    /// Parse a raw token, treating blank values as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim();
        if token.is_empty() {
            None
        } else {
            Some(Self::new(token))
        }
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn matches(&self, other: &Credential) -> bool {
        self.expose() == other.expose()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Extract a credential from request headers.
///
/// Checks, in order:
/// 1. `X-GitLab-Token` header
/// 2. `Authorization: Bearer <token>` header
pub fn header_credential(headers: &HeaderMap) -> Option<Credential> {
    if let Some(credential) = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::parse)
    {
        return Some(credential);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(Credential::parse)
}

/// Extract the credential for an `initialize` call: headers first, then the
/// in-body `params.token` field.
pub fn extract_credential(headers: &HeaderMap, body_token: Option<&str>) -> Option<Credential> {
    header_credential(headers).or_else(|| body_token.and_then(Credential::parse))
}

/// Checks a credential against an identity provider.
///
/// Implementations fail closed: every error is reported as `false`.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, credential: &Credential) -> bool;
}

/// Validates credentials with GitLab's `GET /user`.
#[derive(Clone, Debug)]
pub struct UpstreamTokenValidator {
    gitlab: GitLabClient,
}

impl UpstreamTokenValidator {
    pub fn new(gitlab: GitLabClient) -> Self {
        Self { gitlab }
    }
}

#[async_trait]
impl TokenValidator for UpstreamTokenValidator {
    async fn validate(&self, credential: &Credential) -> bool {
        match self.gitlab.current_user(credential).await {
            Ok(user) => {
                debug!(
                    "Credential accepted for GitLab user {}",
                    user.get("username").and_then(|u| u.as_str()).unwrap_or("?")
                );
                true
            }
            Err(e) => {
                warn!("Credential rejected: {}", e);
                false
            }
        }
    }
}

/// Authentication for the operator endpoints (session listing).
#[derive(Clone, Debug, Default)]
pub struct OperatorAuth {
    /// API key for operator endpoints (from `server.operator_api_key`)
    pub api_key: Option<String>,
}

impl OperatorAuth {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Verify an operator request.
    ///
    /// Checks for the API key in:
    /// 1. `X-API-Key` header
    /// 2. `Authorization: Bearer <key>` header
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.api_key.as_deref() else {
            return true;
        };

        if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            if key == expected {
                return true;
            }
        }

        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| token == expected)
            .unwrap_or(false)
    }
}
