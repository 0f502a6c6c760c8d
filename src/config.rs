//! Engine configuration.
//!
//! Settings come from the environment and are mapped one field at a time into
//! [`EngineConfig`]; unknown variables are ignored, malformed ones rejected.

use crate::error::{EngineError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Path of the SQLite database file. Unset means in-memory.
pub const ENV_DB_PATH: &str = "SPLIT_LEDGER_DB";
/// Milliseconds to wait on a locked database before giving up.
pub const ENV_BUSY_TIMEOUT_MS: &str = "SPLIT_LEDGER_BUSY_TIMEOUT_MS";
/// `true` to reconcile a balance against its entries on every read.
pub const ENV_VERIFY_ON_READ: &str = "SPLIT_LEDGER_VERIFY_ON_READ";

/// Storage and verification settings for a [`SplitEngine`](crate::SplitEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub db_path: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub verify_on_read: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            db_path: None,
            busy_timeout: Duration::from_secs(5),
            verify_on_read: false,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from any key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();

        if let Some(path) = lookup(ENV_DB_PATH) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                config.db_path = Some(PathBuf::from(trimmed));
            }
        }

        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|e| EngineError::InvalidSetting {
                key: ENV_BUSY_TIMEOUT_MS,
                value: raw.clone(),
                message: e.to_string(),
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup(ENV_VERIFY_ON_READ) {
            config.verify_on_read = match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(EngineError::InvalidSetting {
                        key: ENV_VERIFY_ON_READ,
                        value: raw,
                        message: "expected true or false".to_string(),
                    })
                }
            };
        }

        Ok(config)
    }
}
