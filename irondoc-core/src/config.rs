//! Store configuration
//!
//! Chooses the isolation strategy, retry policy and page geometry for a
//! [`Database`](crate::Database). Every field has a default, so an empty TOML
//! document is a valid configuration.
//!
//! ```toml
//! isolation = "optimistic"
//! heap_page_capacity = 8192
//!
//! [retry]
//! max_retries = 8
//! base_delay_ms = 2
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IronDocError, Result};

/// Transaction isolation strategy
///
/// - **None**: read-committed, no coordination, never conflicts
/// - **Snapshot**: MVCC snapshot isolation, newer writer wins on a shared page
/// - **Optimistic**: OCC, reads validated against page versions at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    None,
    Snapshot,
    Optimistic,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Snapshot
    }
}

/// Backoff policy used by [`OccRetry`](crate::concurrency::OccRetry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; `max_retries + 1` attempts in total
    pub max_retries: u32,
    /// Delay before retry `n` is `base_delay_ms * 2^n`
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_delay_ms: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub isolation: IsolationLevel,
    pub retry: RetryConfig,
    /// Payload bytes per heap page before records spill to a new page
    pub heap_page_capacity: usize,
    /// Entries per ordered-index leaf before it splits
    pub index_leaf_capacity: usize,
    /// Optional log filter applied by `Database::open` (e.g. "debug")
    pub log_level: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            isolation: IsolationLevel::default(),
            retry: RetryConfig::default(),
            heap_page_capacity: 4096,
            index_leaf_capacity: 64,
            log_level: None,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.retry.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_heap_page_capacity(mut self, capacity: usize) -> Self {
        self.heap_page_capacity = capacity;
        self
    }

    pub fn with_index_leaf_capacity(mut self, capacity: usize) -> Self {
        self.index_leaf_capacity = capacity;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heap_page_capacity == 0 {
            return Err(IronDocError::Config(
                "heap_page_capacity must be greater than zero".to_string(),
            ));
        }
        // A leaf must hold at least two entries to split into non-empty halves
        if self.index_leaf_capacity < 2 {
            return Err(IronDocError::Config(
                "index_leaf_capacity must be at least 2".to_string(),
            ));
        }
        if let Some(ref level) = self.log_level {
            level.parse::<crate::logging::LogLevel>()?;
        }
        Ok(())
    }
}
