//! Editor configuration parsed from environment variables.
//!
//! Every knob has a typed default; `from_env` only overrides what is set.
//! Unparseable numeric values fall back to the default with a warning so a
//! typo in a tuning variable never stops the editor from starting.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ErrorCode;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5173/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 60;
pub const DEFAULT_HISTORY_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 3;
pub const DEFAULT_UPLOAD_MAX_RETRIES: u32 = 3;
pub const DEFAULT_UPLOAD_RETRY_BASE_MS: u64 = 250;
pub const DEFAULT_UNDO_CAPACITY: usize = 50;
pub const DEFAULT_SESSION_DIR: &str = ".cardlayers/sessions";
pub const DEFAULT_HIT_TEST_INTERVAL_MS: u64 = 50;
pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 1000;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `CARDLAYERS_API_TOKEN_ENV` names a variable that is not set.
    #[error("missing API token: env var {var} not set")]
    MissingToken { var: String },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken { .. } => "E_MISSING_API_TOKEN",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

// =============================================================================
// CONFIG TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Job status polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl PollConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Upload queue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadConfig {
    /// Entries uploaded concurrently per batch.
    pub concurrency: usize,
    /// Attempts per cache entry before it stays `failed`.
    pub max_retries: u32,
    /// Linear back-off step between retries of the same entry.
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub timeouts: RemoteTimeouts,
    pub poll: PollConfig,
    pub history_debounce_ms: u64,
    pub upload: UploadConfig,
    pub undo_capacity: usize,
    pub session_dir: PathBuf,
    pub hit_test_interval_ms: u64,
    pub autosave_interval_ms: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            timeouts: RemoteTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            poll: PollConfig { interval_ms: DEFAULT_POLL_INTERVAL_MS, max_attempts: DEFAULT_POLL_MAX_ATTEMPTS },
            history_debounce_ms: DEFAULT_HISTORY_DEBOUNCE_MS,
            upload: UploadConfig {
                concurrency: DEFAULT_UPLOAD_CONCURRENCY,
                max_retries: DEFAULT_UPLOAD_MAX_RETRIES,
                retry_base_ms: DEFAULT_UPLOAD_RETRY_BASE_MS,
            },
            undo_capacity: DEFAULT_UNDO_CAPACITY,
            session_dir: PathBuf::from(DEFAULT_SESSION_DIR),
            hit_test_interval_ms: DEFAULT_HIT_TEST_INTERVAL_MS,
            autosave_interval_ms: DEFAULT_AUTOSAVE_INTERVAL_MS,
        }
    }
}

impl EditorConfig {
    /// Build typed editor config from environment variables.
    ///
    /// Optional:
    /// - `CARDLAYERS_API_BASE_URL`: remote job API base (trailing `/` trimmed)
    /// - `CARDLAYERS_API_TOKEN_ENV`: names the env var holding a bearer token
    /// - `CARDLAYERS_REQUEST_TIMEOUT_SECS` / `CARDLAYERS_CONNECT_TIMEOUT_SECS`
    /// - `CARDLAYERS_POLL_INTERVAL_MS` / `CARDLAYERS_POLL_MAX_ATTEMPTS`
    /// - `CARDLAYERS_HISTORY_DEBOUNCE_MS`
    /// - `CARDLAYERS_UPLOAD_CONCURRENCY` / `CARDLAYERS_UPLOAD_MAX_RETRIES` /
    ///   `CARDLAYERS_UPLOAD_RETRY_BASE_MS`
    /// - `CARDLAYERS_UNDO_CAPACITY`
    /// - `CARDLAYERS_SESSION_DIR`
    /// - `CARDLAYERS_HIT_TEST_INTERVAL_MS` / `CARDLAYERS_AUTOSAVE_INTERVAL_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = std::env::var("CARDLAYERS_API_BASE_URL")
            .unwrap_or(defaults.api_base_url)
            .trim_end_matches('/')
            .to_string();

        let api_token = match std::env::var("CARDLAYERS_API_TOKEN_ENV") {
            Ok(var) => Some(std::env::var(&var).map_err(|_| ConfigError::MissingToken { var: var.clone() })?),
            Err(_) => None,
        };

        let config = Self {
            api_base_url,
            api_token,
            timeouts: RemoteTimeouts {
                request_secs: env_parse("CARDLAYERS_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
                connect_secs: env_parse("CARDLAYERS_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            poll: PollConfig {
                interval_ms: env_parse("CARDLAYERS_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
                max_attempts: env_parse("CARDLAYERS_POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS),
            },
            history_debounce_ms: env_parse("CARDLAYERS_HISTORY_DEBOUNCE_MS", DEFAULT_HISTORY_DEBOUNCE_MS),
            upload: UploadConfig {
                concurrency: env_parse("CARDLAYERS_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY),
                max_retries: env_parse("CARDLAYERS_UPLOAD_MAX_RETRIES", DEFAULT_UPLOAD_MAX_RETRIES),
                retry_base_ms: env_parse("CARDLAYERS_UPLOAD_RETRY_BASE_MS", DEFAULT_UPLOAD_RETRY_BASE_MS),
            },
            undo_capacity: env_parse("CARDLAYERS_UNDO_CAPACITY", DEFAULT_UNDO_CAPACITY),
            session_dir: std::env::var("CARDLAYERS_SESSION_DIR").map_or(defaults.session_dir, PathBuf::from),
            hit_test_interval_ms: env_parse("CARDLAYERS_HIT_TEST_INTERVAL_MS", DEFAULT_HIT_TEST_INTERVAL_MS),
            autosave_interval_ms: env_parse("CARDLAYERS_AUTOSAVE_INTERVAL_MS", DEFAULT_AUTOSAVE_INTERVAL_MS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall queues or disable history.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.concurrency == 0 {
            return Err(ConfigError::Invalid { key: "CARDLAYERS_UPLOAD_CONCURRENCY", reason: "must be > 0".into() });
        }
        if self.undo_capacity == 0 {
            return Err(ConfigError::Invalid { key: "CARDLAYERS_UNDO_CAPACITY", reason: "must be > 0".into() });
        }
        if self.poll.max_attempts == 0 {
            return Err(ConfigError::Invalid { key: "CARDLAYERS_POLL_MAX_ATTEMPTS", reason: "must be > 0".into() });
        }
        Ok(())
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "config: unparseable value, using default");
            default
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
