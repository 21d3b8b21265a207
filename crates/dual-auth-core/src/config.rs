//! Client configuration management.
//!
//! Retry, timeout and credential-refresh settings for a [`DualAuthClient`].
//! Configuration is stored at `~/.config/dual-auth/config.json`; any field
//! may be overridden with a `DUAL_AUTH_*` environment variable.
//!
//! [`DualAuthClient`]: crate::api::DualAuthClient

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::RetryPolicy;

/// Application name used for config directory paths
const APP_NAME: &str = "dual-auth";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "DUAL_AUTH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-request timeout applied by the HTTP transport.
    pub request_timeout_secs: u64,
    /// Deadline for a whole call when the caller does not set one.
    pub default_deadline_secs: u64,
    /// Transport retries for idempotent calls. Non-idempotent calls never retry.
    pub max_transport_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Random extra delay as a fraction of the backoff (0.0 disables it).
    pub jitter_factor: f64,
    /// Whether 429 and 5xx responses are retried like transport failures.
    pub retry_transient_statuses: bool,
    /// Credentials this close to expiry are treated as expired.
    pub refresh_window_secs: i64,
    /// Status codes meaning the server rejected the attached credential.
    pub auth_failure_statuses: Vec<u16>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            default_deadline_secs: 30,
            max_transport_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            jitter_factor: 0.2,
            retry_transient_statuses: true,
            refresh_window_secs: 30,
            auth_failure_statuses: vec![401, 403],
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `DUAL_AUTH_*` overrides. `lookup` maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("DEFAULT_DEADLINE_SECS") {
            self.default_deadline_secs = parse("DEFAULT_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = var("MAX_TRANSPORT_RETRIES") {
            self.max_transport_retries = parse("MAX_TRANSPORT_RETRIES", &v)?;
        }
        if let Some(v) = var("INITIAL_BACKOFF_MS") {
            self.initial_backoff_ms = parse("INITIAL_BACKOFF_MS", &v)?;
        }
        if let Some(v) = var("MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse("MAX_BACKOFF_MS", &v)?;
        }
        if let Some(v) = var("JITTER_FACTOR") {
            let jitter: f64 = parse("JITTER_FACTOR", &v)?;
            anyhow::ensure!(
                jitter.is_finite(),
                "Invalid value for {}JITTER_FACTOR: {:?}",
                ENV_PREFIX,
                v
            );
            self.jitter_factor = jitter;
        }
        if let Some(v) = var("RETRY_TRANSIENT_STATUSES") {
            self.retry_transient_statuses = parse("RETRY_TRANSIENT_STATUSES", &v)?;
        }
        if let Some(v) = var("REFRESH_WINDOW_SECS") {
            self.refresh_window_secs = parse("REFRESH_WINDOW_SECS", &v)?;
        }
        if let Some(v) = var("AUTH_FAILURE_STATUSES") {
            self.auth_failure_statuses = v
                .split(',')
                .map(|code| parse("AUTH_FAILURE_STATUSES", code.trim()))
                .collect::<Result<_>>()?;
        }
        if let Some(v) = var("USER_AGENT") {
            self.user_agent = v;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }

    pub fn refresh_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_window_secs.max(0))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_transport_retries: self.max_transport_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter_factor: if self.jitter_factor.is_finite() {
                self.jitter_factor.clamp(0.0, 1.0)
            } else {
                0.0
            },
            retry_transient_statuses: self.retry_transient_statuses,
        }
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}{}: {:?}", ENV_PREFIX, name, value))
}
