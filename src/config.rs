use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
/// A run whose heartbeat is older than this is treated as dead.
pub const DEFAULT_RUN_LEASE_SECS: u64 = 3600;
/// Upper bound for a single stored attachment file (1 GB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Knobs for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub connect_retries: u32,
    pub io_timeout: Duration,
    pub account_timeout: Option<Duration>,
    pub max_file_size: u64,
    /// Heartbeats land after every folder, so this must outlast the slowest folder.
    pub run_lease: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            account_timeout: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            run_lease: Duration::from_secs(DEFAULT_RUN_LEASE_SECS),
        }
    }
}

impl SyncSettings {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.io_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "io_timeout",
                message: "must be greater than zero".to_string(),
            });
        }
        if matches!(self.account_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(ConfigError::InvalidValue {
                key: "account_timeout",
                message: "must be greater than zero when set".to_string(),
            });
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_file_size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.run_lease.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "run_lease",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }
}
