use anyhow::{anyhow, Context, Result};
use helpdesk_core::RoutingConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::notify::RetryPolicy;

/// File name of the SQLite database inside `state_dir`.
pub const DATABASE_FILE: &str = "helpdesk-state.db";

/// Headroom added to the webhook timeout when deriving the per-attempt
/// dispatcher timeout.
pub const ATTEMPT_TIMEOUT_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// JSON routing table. The built-in salon roster is used when unset.
    pub routing_config_path: Option<PathBuf>,
    /// Enables the webhook channel when set.
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub console_notifications: bool,
    pub notify_max_retries: u32,
    pub notify_initial_backoff: Duration,
    pub notify_max_backoff: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let routing_config_path = parse_non_empty(env::var("ROUTING_CONFIG_PATH").ok())
            .map(PathBuf::from);

        let webhook_url = parse_non_empty(env::var("WEBHOOK_URL").ok());

        let webhook_timeout = Duration::from_secs(
            env::var("WEBHOOK_TIMEOUT_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u64>()
                .context("WEBHOOK_TIMEOUT_SECS must be a whole number of seconds")?,
        );

        let console_notifications = parse_flag(env::var("CONSOLE_NOTIFICATIONS").ok(), true)
            .context("CONSOLE_NOTIFICATIONS must be true or false")?;

        let notify_max_retries = env::var("NOTIFY_MAX_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .context("NOTIFY_MAX_RETRIES must be a valid number")?;

        let notify_initial_backoff = Duration::from_millis(
            env::var("NOTIFY_INITIAL_BACKOFF_MS")
                .unwrap_or_else(|_| "200".to_string())
                .parse::<u64>()
                .context("NOTIFY_INITIAL_BACKOFF_MS must be a valid number")?,
        );

        let notify_max_backoff = Duration::from_millis(
            env::var("NOTIFY_MAX_BACKOFF_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<u64>()
                .context("NOTIFY_MAX_BACKOFF_MS must be a valid number")?,
        );

        Ok(Config {
            port,
            state_dir,
            routing_config_path,
            webhook_url,
            webhook_timeout,
            console_notifications,
            notify_max_retries,
            notify_initial_backoff,
            notify_max_backoff,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }

    /// The attempt timeout never cuts a webhook call short: it is at least
    /// the webhook timeout plus `ATTEMPT_TIMEOUT_MARGIN`.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.notify_max_retries,
            initial_backoff: self.notify_initial_backoff,
            max_backoff: self.notify_max_backoff,
            attempt_timeout: defaults.attempt_timeout.max(
                self.webhook_timeout
                    .checked_add(ATTEMPT_TIMEOUT_MARGIN)
                    .unwrap_or(Duration::MAX),
            ),
        }
    }

    /// Load the routing table from `routing_config_path`, or the built-in
    /// default when unset.
    pub fn load_routing_config(&self) -> Result<RoutingConfig> {
        let Some(path) = &self.routing_config_path else {
            return Ok(RoutingConfig::salon_default());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read routing config {}", path.display()))?;
        RoutingConfig::from_json_str(&json)
            .with_context(|| format!("Invalid routing config {}", path.display()))
    }
}

/// Treat a missing, empty or whitespace-only value as unset.
pub fn parse_non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a boolean flag, falling back to `default` when unset or empty.
pub fn parse_flag(value: Option<String>, default: bool) -> Result<bool> {
    let Some(raw) = parse_non_empty(value) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{}'", other)),
    }
}
