//! Application configuration management.
//!
//! Configuration is read from `~/.config/ledgerlink/config.json` (keys match the
//! host-side option names, e.g. `apiBaseUrl`), then overridden by `LEDGERLINK_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "ledgerlink";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default wait for the parent frame's credentials.
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 15_000;

/// Number of times the token request is sent within the handshake window.
const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 3;

/// Ceiling on the balance reachable through `add`.
const DEFAULT_MAX_CREDIT_LIMIT: i64 = 25_000;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Page size used for the history refresh that follows a mutation.
const DEFAULT_HISTORY_PAGE_SIZE: u32 = 10;

/// How the runtime mode is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    #[default]
    Auto,
    Embedded,
    Standalone,
}

impl ModeSetting {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(ModeSetting::Auto),
            "embedded" | "iframe" => Some(ModeSetting::Embedded),
            "standalone" => Some(ModeSetting::Standalone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub api_base_url: String,
    pub auth_url: String,
    pub mode: ModeSetting,
    pub allowed_origins: Vec<String>,
    pub handshake_timeout_ms: u64,
    pub handshake_attempts: u32,
    pub max_credit_limit: i64,
    pub require_description: bool,
    pub history_page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3001/api/credits".to_string(),
            auth_url: "http://localhost:3001/api/auth".to_string(),
            mode: ModeSetting::Auto,
            allowed_origins: Vec::new(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            max_credit_limit: DEFAULT_MAX_CREDIT_LIMIT,
            require_description: true,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for persisted session scopes.
    pub fn session_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("sessions"))
    }

    /// Apply `LEDGERLINK_*` overrides from `lookup`. Unparsable values are
    /// logged and skipped.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LEDGERLINK_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("LEDGERLINK_AUTH_URL") {
            self.auth_url = v;
        }
        if let Some(v) = lookup("LEDGERLINK_MODE") {
            match ModeSetting::parse(&v) {
                Some(mode) => self.mode = mode,
                None => warn!(value = %v, "Ignoring unknown LEDGERLINK_MODE"),
            }
        }
        if let Some(v) = lookup("LEDGERLINK_ALLOWED_ORIGINS") {
            self.allowed_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        parse_override(&lookup, "LEDGERLINK_HANDSHAKE_TIMEOUT_MS", &mut self.handshake_timeout_ms);
        parse_override(&lookup, "LEDGERLINK_HANDSHAKE_ATTEMPTS", &mut self.handshake_attempts);
        parse_override(&lookup, "LEDGERLINK_MAX_CREDIT_LIMIT", &mut self.max_credit_limit);
        parse_override(&lookup, "LEDGERLINK_REQUIRE_DESCRIPTION", &mut self.require_description);
        parse_override(&lookup, "LEDGERLINK_HISTORY_PAGE_SIZE", &mut self.history_page_size);
        parse_override(&lookup, "LEDGERLINK_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid apiBaseUrl: {}", self.api_base_url))?;
        reqwest::Url::parse(&self.auth_url)
            .with_context(|| format!("Invalid authUrl: {}", self.auth_url))?;
        if self.max_credit_limit <= 0 {
            bail!("maxCreditLimit must be positive (got {})", self.max_credit_limit);
        }
        if self.handshake_timeout_ms == 0 {
            bail!("handshakeTimeoutMs must be greater than zero");
        }
        if self.handshake_attempts == 0 {
            bail!("handshakeAttempts must be at least 1");
        }
        if self.history_page_size == 0 {
            bail!("historyPageSize must be at least 1");
        }
        if self.mode == ModeSetting::Embedded && self.allowed_origins.is_empty() {
            warn!("Embedded mode with an empty allowedOrigins list - every parent message will be rejected");
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_override<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key = key, value = %raw, "Ignoring unparsable config override"),
        }
    }
}
