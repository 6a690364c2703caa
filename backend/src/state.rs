//! Application state management.

use std::sync::Arc;
use tracing::info;

use crate::auth::{OperatorAuth, TokenValidator, UpstreamTokenValidator};
use crate::config::{Config, SessionSettings};
use crate::gitlab::GitLabClient;
use crate::mcp::SessionStore;
use crate::operations::OperationRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Live MCP sessions
    sessions: SessionStore,
    /// Operations offered through `tools/call`
    operations: OperationRegistry,
    /// Upstream GitLab client
    gitlab: GitLabClient,
    /// Checks credentials presented at initialize or on a swap
    validator: Arc<dyn TokenValidator>,
    /// Session lifecycle timings
    settings: SessionSettings,
    /// Guard for the operator endpoints
    operator_auth: OperatorAuth,
    /// Origins accepted besides localhost
    allowed_origins: Vec<String>,
}

impl AppState {
    /// Create application state with every GitLab operation registered.
    pub fn new(
        config: &Config,
        gitlab: GitLabClient,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self::with_operations(
            config,
            gitlab,
            validator,
            OperationRegistry::with_gitlab_operations(),
        )
    }

    /// Create application state with an explicit operation registry.
    pub fn with_operations(
        config: &Config,
        gitlab: GitLabClient,
        validator: Arc<dyn TokenValidator>,
        operations: OperationRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                sessions: SessionStore::new(),
                operations,
                gitlab,
                validator,
                settings: config.sessions,
                operator_auth: OperatorAuth::new(config.operator_api_key.clone()),
                allowed_origins: config.allowed_origins.clone(),
            }),
        }
    }

    /// Build the production state: upstream client and upstream validator
    /// both pointed at the configured GitLab.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let gitlab = GitLabClient::new(&config.upstream_url, config.request_timeout)?;
        info!("Upstream GitLab API: {}", gitlab.base_url());
        let validator = Arc::new(UpstreamTokenValidator::new(gitlab.clone()));
        Ok(Self::new(config, gitlab, validator))
    }

    /// Get the session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Get the operation registry.
    pub fn operations(&self) -> &OperationRegistry {
        &self.inner.operations
    }

    /// Get the upstream GitLab client.
    pub fn gitlab(&self) -> &GitLabClient {
        &self.inner.gitlab
    }

    pub fn validator(&self) -> &dyn TokenValidator {
        self.inner.validator.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn operator_auth(&self) -> &OperatorAuth {
        &self.inner.operator_auth
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.inner.allowed_origins
    }
}
