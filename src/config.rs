//! Configuration for nexusgate-live
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::RefreshPolicy;
use crate::backoff::Backoff;
use crate::channel::ChannelConfig;
use crate::error::Result;
use crate::message::event_types;

/// Tail the NexusGate console's realtime event stream
#[derive(Parser, Debug, Clone)]
#[command(name = "nexusgate-tail")]
#[command(about = "Stream NexusGate console events as JSON lines")]
pub struct Args {
    /// Console origin; the event endpoint is derived from it
    /// (http -> ws, https -> wss)
    #[arg(long, env = "CONSOLE_URL", default_value = "http://localhost:8080")]
    pub console_url: String,

    /// REST API base path on the console
    #[arg(long, env = "API_BASE", default_value = "/api/v1")]
    pub api_base: String,

    /// Where the token and role are persisted between runs
    /// (defaults to <config dir>/nexusgate/credentials.json)
    #[arg(long, env = "TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Username for logging in when no token is stored
    #[arg(long, env = "NEXUSGATE_USERNAME")]
    pub username: Option<String>,

    /// Password for logging in when no token is stored
    #[arg(long, env = "NEXUSGATE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Comma-separated event types to print (empty = all known types)
    #[arg(long, env = "EVENTS", default_value = "")]
    pub events: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Delay before the first reconnect, in milliseconds
    #[arg(long, env = "RECONNECT_BASE_MS", default_value = "2000")]
    pub reconnect_base_ms: u64,

    /// Upper bound for any reconnect delay, in milliseconds
    #[arg(long, env = "RECONNECT_MAX_DELAY_MS", default_value = "30000")]
    pub reconnect_max_delay_ms: u64,

    /// Consecutive failed connections tolerated before giving up
    #[arg(long, env = "MAX_RECONNECT_ATTEMPTS", default_value = "30")]
    pub max_reconnect_attempts: u32,

    /// Share of the token's remaining lifetime to wait before refreshing
    #[arg(long, env = "REFRESH_LEAD_FRACTION", default_value = "0.8")]
    pub refresh_lead_fraction: f64,

    /// Minimum delay before a token refresh, in seconds
    #[arg(long, env = "MIN_REFRESH_SECS", default_value = "60")]
    pub min_refresh_secs: u64,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        ChannelConfig::from_origin(&self.console_url).map_err(|e| e.to_string())?;

        if !self.api_base.starts_with('/') {
            return Err("API_BASE must start with '/'".to_string());
        }

        if self.reconnect_base_ms == 0 {
            return Err("RECONNECT_BASE_MS must be greater than zero".to_string());
        }

        if self.reconnect_base_ms > self.reconnect_max_delay_ms {
            return Err(
                "RECONNECT_BASE_MS must be less than or equal to RECONNECT_MAX_DELAY_MS".to_string(),
            );
        }

        if !(self.refresh_lead_fraction > 0.0 && self.refresh_lead_fraction < 1.0) {
            return Err("REFRESH_LEAD_FRACTION must be between 0 and 1 (exclusive)".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(
                "NEXUSGATE_USERNAME and NEXUSGATE_PASSWORD must be set together".to_string(),
            );
        }

        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.reconnect_base_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            ..Backoff::default()
        }
    }

    pub fn channel_config(&self) -> Result<ChannelConfig> {
        Ok(ChannelConfig::from_origin(&self.console_url)?.with_backoff(self.backoff()))
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            lead_fraction: self.refresh_lead_fraction,
            min_delay: Duration::from_secs(self.min_refresh_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Console origin joined with the API base, without a trailing slash
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}",
            self.console_url.trim_end_matches('/'),
            self.api_base.trim_matches('/')
        )
    }

    /// Event types to subscribe to
    pub fn event_types(&self) -> Vec<String> {
        let requested: Vec<String> = self
            .events
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if requested.is_empty() {
            event_types::ALL.iter().map(|s| s.to_string()).collect()
        } else {
            requested
        }
    }

    /// Effective token file path
    pub fn token_file(&self) -> PathBuf {
        self.token_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nexusgate")
                .join("credentials.json")
        })
    }

    /// Credentials for login, if both halves were supplied
    pub fn login_credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }
}
