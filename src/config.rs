//! Engine configuration.

use crate::error::{FeedError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which backend the engine opens.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Process-local tables.
    Memory,

    /// Durable log-structured tables in a directory.
    File {
        path: PathBuf,
        #[serde(default = "default_true")]
        create_if_missing: bool,
        #[serde(default = "default_sync_interval")]
        sync_interval: u64,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Memory
    }
}

/// What a write does when some fan-out targets fail.
///
/// Every target is attempted either way; nothing is retried or rolled back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutErrorPolicy {
    /// Return `FanoutFailed` after attempting every target.
    #[default]
    Fail,
    /// Log each failure and report success.
    LogAndContinue,
}

/// Engine configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FanlineConfig {
    /// Storage backend.
    pub backend: BackendConfig,

    /// Entries copied into a new subscriber's timeline on subscribe.
    /// Default: 20
    pub backfill_limit: usize,

    /// Page size when the caller gives none.
    /// Default: 20
    pub default_per_page: usize,

    /// Decoded events kept in the event store's LRU cache for feed reads
    /// (0 = no cache). Only enable it when this handle is the sole writer
    /// of its backend; the cache is not invalidated by other handles.
    /// Default: 0
    pub event_cache_size: usize,

    /// Levels of sub-timelines followed when fetching subevents.
    /// Default: 8
    pub max_subevent_depth: usize,

    /// Threads pushing timeline writes during fan-out (1 = sequential).
    /// Default: 1
    pub fanout_workers: usize,

    /// Partial fan-out failure handling.
    pub fanout_errors: FanoutErrorPolicy,
}

impl Default for FanlineConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            backfill_limit: 20,
            default_per_page: 20,
            event_cache_size: 0,
            max_subevent_depth: 8,
            fanout_workers: 1,
            fanout_errors: FanoutErrorPolicy::Fail,
        }
    }
}

impl FanlineConfig {
    /// Configuration for a durable store at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::File {
                path: path.into(),
                create_if_missing: true,
                sync_interval: default_sync_interval(),
            },
            ..Default::default()
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| FeedError::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_per_page == 0 {
            return Err(FeedError::Validation("default_per_page must be at least 1".into()));
        }
        if self.fanout_workers == 0 {
            return Err(FeedError::Validation("fanout_workers must be at least 1".into()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    crate::backend::FileBackend::DEFAULT_SYNC_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = FanlineConfig::default();
        assert_eq!(config.backfill_limit, 20);
        assert_eq!(config.default_per_page, 20);
        assert_eq!(config.event_cache_size, 0);
        assert_eq!(config.backend, BackendConfig::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"backfill_limit": 5, "fanout_errors": "log_and_continue",
                "backend": {{"kind": "file", "path": "/tmp/feeds"}}}}"#
        )
        .unwrap();

        let config = FanlineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.backfill_limit, 5);
        assert_eq!(config.default_per_page, 20);
        assert_eq!(config.fanout_errors, FanoutErrorPolicy::LogAndContinue);
        assert_eq!(
            config.backend,
            BackendConfig::File {
                path: PathBuf::from("/tmp/feeds"),
                create_if_missing: true,
                sync_interval: 1,
            }
        );
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"fanout_workers": 0}}"#).unwrap();
        assert!(matches!(
            FanlineConfig::from_json_file(file.path()),
            Err(FeedError::Validation(_))
        ));
    }
}
