//! Load bridge config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Bridge configuration. File: ~/.config/tring/config.toml or /etc/tring/config.toml.
/// Env overrides: TRING_HTTP_TIMEOUT_SECS, TRING_CALL_LINK_TIMEOUT_MS,
/// TRING_REMOTE_FRAME_CAPACITY, TRING_LOG.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TringConfig {
    /// Bound on one bridged HTTP request (default 30).
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Wait for the call-link parse callback (default 2000).
    #[serde(default = "default_call_link_timeout_ms")]
    pub call_link_timeout_ms: u64,
    /// Transient buffer size for remote video frames (default 5 000 000 bytes).
    #[serde(default = "default_remote_frame_capacity")]
    pub remote_frame_capacity: usize,
    /// `tracing` filter directive used by `init_tracing` (default "info").
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}
fn default_call_link_timeout_ms() -> u64 {
    2000
}
fn default_remote_frame_capacity() -> usize {
    5_000_000
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for TringConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            call_link_timeout_ms: default_call_link_timeout_ms(),
            remote_frame_capacity: default_remote_frame_capacity(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl TringConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn call_link_timeout(&self) -> Duration {
        Duration::from_millis(self.call_link_timeout_ms)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load config: merge default, then config file (if present), then env vars.
    pub fn load() -> Self {
        let mut c = load_file().unwrap_or_default();
        c.apply_env(|k| std::env::var(k).ok());
        c
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("TRING_HTTP_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.http_timeout_secs = v;
        }
        if let Some(v) = var("TRING_CALL_LINK_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.call_link_timeout_ms = v;
        }
        if let Some(v) = var("TRING_REMOTE_FRAME_CAPACITY").and_then(|s| s.parse().ok()) {
            self.remote_frame_capacity = v;
        }
        if let Some(v) = var("TRING_LOG") {
            self.log_filter = v;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/tring/config.toml"));
    }
    out.push(PathBuf::from("/etc/tring/config.toml"));
    out
}

fn load_file() -> Option<TringConfig> {
    for p in config_paths() {
        if p.exists() {
            let s = std::fs::read_to_string(&p).ok()?;
            match TringConfig::from_toml_str(&s) {
                Ok(c) => return Some(c),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config file");
                    return None;
                }
            }
        }
    }
    None
}
