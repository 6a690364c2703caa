//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gitlab::DEFAULT_API_URL;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
struct ConfigFile {
    #[serde(default)]
    #[garde(dive)]
    server: ServerConfig,
    #[serde(default)]
    #[garde(dive)]
    upstream: UpstreamConfig,
    #[serde(default)]
    #[garde(dive)]
    sessions: SessionsConfig,
    #[serde(default)]
    #[garde(skip)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ServerConfig {
    #[serde(default = "default_host")]
    #[garde(length(min = 1))]
    host: String,
    #[serde(default = "default_port")]
    #[garde(range(min = 1))]
    port: u16,
    /// Origins accepted on the MCP endpoint besides localhost
    #[serde(default)]
    #[garde(skip)]
    allowed_origins: Vec<String>,
    /// Key protecting the operator endpoints; open when unset
    #[serde(default)]
    #[garde(skip)]
    operator_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
            operator_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct UpstreamConfig {
    #[serde(default = "default_api_url")]
    #[garde(length(min = 1))]
    api_url: String,
    #[serde(default = "default_request_timeout")]
    #[garde(range(min = 1))]
    request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct SessionsConfig {
    #[serde(default = "default_idle_timeout")]
    #[garde(range(min = 1))]
    idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    #[garde(range(min = 1))]
    sweep_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    #[garde(range(min = 1))]
    heartbeat_interval_secs: u64,
    #[serde(default = "default_terminate_grace")]
    #[garde(skip)]
    terminate_grace_secs: u64,
    #[serde(default = "default_shutdown_deadline")]
    #[garde(range(min = 1))]
    shutdown_deadline_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            terminate_grace_secs: default_terminate_grace(),
            shutdown_deadline_secs: default_shutdown_deadline(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    log_level: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    labgate_types::DEFAULT_PORT
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    30 * 60
}

fn default_sweep_interval() -> u64 {
    5 * 60
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_terminate_grace() -> u64 {
    5
}

fn default_shutdown_deadline() -> u64 {
    10
}

/// Session lifecycle timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Inactivity after which a session is swept
    pub idle_timeout: Duration,
    /// How often the sweeper runs
    pub sweep_interval: Duration,
    /// Heartbeat period on the push stream
    pub heartbeat_interval: Duration,
    /// How long a terminate waits for in-flight calls
    pub terminate_grace: Duration,
    /// Hard limit on shutdown before the process exits anyway
    pub shutdown_deadline: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionsConfig::default().into()
    }
}

impl From<SessionsConfig> for SessionSettings {
    fn from(c: SessionsConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(c.idle_timeout_secs),
            sweep_interval: Duration::from_secs(c.sweep_interval_secs),
            heartbeat_interval: Duration::from_secs(c.heartbeat_interval_secs),
            terminate_grace: Duration::from_secs(c.terminate_grace_secs),
            shutdown_deadline: Duration::from_secs(c.shutdown_deadline_secs),
        }
    }
}

/// Values given on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream_url: Option<String>,
    pub log_level: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Extra origins accepted on the MCP endpoint
    pub allowed_origins: Vec<String>,
    /// Key protecting the operator endpoints
    pub operator_api_key: Option<String>,
    /// GitLab REST API root, e.g. `https://gitlab.com/api/v4`
    pub upstream_url: String,
    /// Timeout for each upstream request
    pub request_timeout: Duration,
    pub sessions: SessionSettings,
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (if set, overrides RUST_LOG environment variable)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.labgate.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/labgate/ on Linux)
    ///
    /// Environment variables use the `LABGATE_` prefix with `__` between
    /// section and key, e.g. `LABGATE_SESSIONS__IDLE_TIMEOUT_SECS`.
    pub fn from_figment(cli: CliOverrides) -> anyhow::Result<Self> {
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".labgate.toml"));
        let user_config = directories::ProjectDirs::from("", "", "labgate")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Build figment with priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new().merge(Serialized::defaults(ConfigFile::default()));

        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("LABGATE_").split("__"));

        if let Some(ref host) = cli.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = cli.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        if let Some(ref url) = cli.upstream_url {
            figment = figment.merge(Serialized::default("upstream.api_url", url));
        }
        if let Some(ref level) = cli.log_level {
            figment = figment.merge(Serialized::default("logging.log_level", level));
        }

        let config_file: ConfigFile = figment.extract()?;
        config_file
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        Ok(config_file.into())
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            allowed_origins: file.server.allowed_origins,
            operator_api_key: file.server.operator_api_key,
            upstream_url: file.upstream.api_url,
            request_timeout: Duration::from_secs(file.upstream.request_timeout_secs),
            sessions: file.sessions.into(),
            log_file: file.logging.log_file,
            log_level: file.logging.log_level,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}
