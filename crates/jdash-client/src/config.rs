use jdash_core::rpc::{LOGIN_TIMEOUT, PING_TIME, POLL_INTERVAL};
use jdash_core::store::{Credential, DashboardConfig};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Models are fetched one at a time per controller to bound server load.
pub const MODEL_FETCH_CONCURRENCY: usize = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config json: {0}")]
    Parse(String),
    #[error("invalid controller endpoint {endpoint}: {message}")]
    Endpoint { endpoint: String, message: String },
}

pub fn load_dashboard_config(path: impl AsRef<Path>) -> Result<DashboardConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    parse_dashboard_config(&raw)
}

pub fn parse_dashboard_config(raw: &str) -> Result<DashboardConfig, ConfigError> {
    let config: DashboardConfig =
        serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
    if !config.controller_api_endpoint.is_empty() {
        validate_endpoint(&config.controller_api_endpoint)?;
    }
    Ok(config)
}

/// Controller endpoints must be `ws://` or `wss://` URLs.
pub fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(endpoint).map_err(|err| ConfigError::Endpoint {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::Endpoint {
            endpoint: endpoint.to_string(),
            message: format!("unsupported scheme {other}"),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub poll_interval: Duration,
    pub login_timeout: Duration,
    pub ping_interval: Duration,
    /// Stop after this many cycles. `None` polls until logout.
    pub max_cycles: Option<usize>,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            login_timeout: LOGIN_TIMEOUT,
            ping_interval: PING_TIME,
            max_cycles: None,
        }
    }
}

/// A controller the runner should log into and poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRegistration {
    pub ws_controller_url: String,
    pub credential: Option<Credential>,
    pub identity_provider_available: bool,
    pub additional_controller: bool,
}
