//! Cache configuration loaded from `~/.config/reread/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file are both
//! valid. A file that exists but does not parse is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};
use crate::guard::RetryPolicy;

/// Tunables for the store, retry guard and diff engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file shared by every process using the cache.
    pub db_path: PathBuf,
    /// Revisions retained per path by the retention policy.
    pub keep_revisions: usize,
    pub busy_timeout_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_attempts: u32,
    /// Rendered diff lines returned before truncation.
    pub diff_output_max_lines: usize,
    /// Above this size either side is returned in full instead of diffed.
    pub diff_max_input_bytes: usize,
    pub diff_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            keep_revisions: 10,
            busy_timeout_ms: 5_000,
            retry_base_ms: 20,
            retry_max_attempts: 8,
            diff_output_max_lines: 200,
            diff_max_input_bytes: 4 * 1024 * 1024,
            diff_timeout_ms: 2_000,
        }
    }
}

impl CacheConfig {
    /// Returns the retry policy described by this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(self.retry_base_ms),
            max_attempts: self.retry_max_attempts,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn diff_timeout(&self) -> Duration {
        Duration::from_millis(self.diff_timeout_ms)
    }

    /// Parses a TOML document. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if the text is not valid TOML or a field
    /// has the wrong type.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Loads the config at `path`, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` on parse failure and `CacheError::Io` if
    /// the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw)
                .map_err(|e| CacheError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Returns `$XDG_CONFIG_HOME/reread`, falling back to `~/.config/reread`.
pub fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("reread")
}

/// Returns the path to the reread config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn default_db_path() -> PathBuf {
    let base = std::env::var("XDG_CACHE_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".cache"))
        })
        .unwrap_or_else(|| PathBuf::from(".cache"));
    base.join("reread").join("cache.db")
}
