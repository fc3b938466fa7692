//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::admission::{ClientTier, QuotaTable, DEFAULT_HISTORY_CAPACITY};
use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides, e.g.
/// `TURNSTILE__UPSTREAM__API_TOKEN`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream API configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Admission bookkeeping configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Known clients, by client id
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,

    /// Quotas per tier and operation class
    #[serde(default)]
    pub quotas: QuotaTable,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Upstream API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every forwarded request
    #[serde(default)]
    pub api_token: String,

    /// Maximum number of attempts per forwarded request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout for a single attempt, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Idle connections kept per upstream host
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: String::new(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
            max_idle_connections: default_max_idle_connections(),
        }
    }
}

fn default_base_url() -> String {
    "https://your-domain.atlassian.net".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_idle_connections() -> usize {
    20
}

/// Admission bookkeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Request history entries kept per client
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Window for the requests-per-window metric, in seconds
    #[serde(default = "default_history_window")]
    pub history_window_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            history_window_secs: default_history_window(),
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_history_window() -> u64 {
    60
}

/// A known client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub tier: ClientTier,
    #[serde(default)]
    pub name: Option<String>,
}

/// The sections environment overrides may touch. Client ids and tier
/// names are map keys, which the `config` crate lowercases, so those stay
/// file-only.
#[derive(Debug, Serialize, Deserialize)]
struct ScalarSections {
    server: ServerConfig,
    upstream: UpstreamConfig,
    admission: AdmissionConfig,
}

impl TurnstileConfig {
    /// Load configuration: defaults, then the YAML file if given, then
    /// `TURNSTILE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::read_file(path)?,
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };

        let config = base.with_env_overrides(env_source())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with `TURNSTILE__*` environment
    /// variables layered on top.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    fn read_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(TurnstileError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Layer environment variables over the server, upstream and admission
    /// sections.
    fn with_env_overrides(self, env: config::Environment) -> Result<Self> {
        let scalars = ScalarSections {
            server: self.server,
            upstream: self.upstream,
            admission: self.admission,
        };

        let merged: ScalarSections = config::Config::builder()
            .add_source(config::Config::try_from(&scalars)?)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        Ok(Self {
            server: merged.server,
            upstream: merged.upstream,
            admission: merged.admission,
            clients: self.clients,
            quotas: self.quotas,
        })
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.upstream.base_url).map_err(|e| {
            TurnstileError::Config(format!(
                "Invalid upstream base_url {:?}: {}",
                self.upstream.base_url, e
            ))
        })?;

        if self.upstream.request_timeout_secs == 0 {
            return Err(TurnstileError::Config(
                "upstream.request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.admission.history_capacity == 0 {
            return Err(TurnstileError::Config(
                "admission.history_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
