//! Client configuration loaded from environment variables.

use std::env;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:3000";
const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Replica runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the records API
    pub api_url: String,
    /// WebSocket URL of the pub-sub hub
    pub ws_url: String,
    /// Delay before re-establishing a dropped subscription
    pub reconnect_delay: Duration,
    /// Optional periodic reconciliation. Disabled when `None`.
    pub reconcile_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            reconcile_interval: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, reading `.env` first
    /// if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_url = env::var("MARKSYNC_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let ws_url = env::var("MARKSYNC_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());

        let reconnect_delay = match env::var("MARKSYNC_RECONNECT_DELAY_MS") {
            Ok(value) => Duration::from_millis(
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidReconnectDelay)?,
            ),
            Err(_) => Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        };

        let reconcile_interval = match env::var("MARKSYNC_RECONCILE_INTERVAL_SECS") {
            Ok(value) => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidReconcileInterval)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            ws_url,
            reconnect_delay,
            reconcile_interval,
        })
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Enable periodic reconciliation.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = Some(interval);
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid MARKSYNC_RECONNECT_DELAY_MS value")]
    InvalidReconnectDelay,

    #[error("Invalid MARKSYNC_RECONCILE_INTERVAL_SECS value")]
    InvalidReconcileInterval,
}
