//! Storage engine configuration: block geometry, caching, durability and
//! writer admission.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Smallest supported block size in bytes.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Largest supported block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Default block size: 4 KB.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Minimum block cache capacity.
const MIN_CACHE_BLOCKS: usize = 16;

/// How `beginWrite` behaves while another write transaction is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LockWait {
    /// Wait until the active writer finishes.
    #[default]
    Block,
    /// Fail immediately with a lock timeout.
    FailFast,
    /// Wait at most `after`, then fail with a lock timeout.
    Timeout {
        /// Wait budget.
        #[serde(with = "super::humantime_serde")]
        #[schemars(with = "String")]
        after: Duration,
    },
}

impl LockWait {
    /// Returns the wait budget, or `None` for an unbounded wait.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Block => None,
            Self::FailFast => Some(Duration::ZERO),
            Self::Timeout { after } => Some(*after),
        }
    }
}

/// Store configuration.
///
/// # Validation Rules
///
/// - `block_size` must be a power of two in 512..=65536
/// - `cache_blocks` must be >= 16
/// - a `LockWait::Timeout` budget must be non-zero
///
/// # Example
///
/// ```no_run
/// # use graphvault_types::config::{LockWait, StoreConfig};
/// # use std::time::Duration;
/// let config = StoreConfig::builder()
///     .block_size(8192)
///     .write_lock(LockWait::Timeout { after: Duration::from_secs(2) })
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Block size in bytes. Fixed for the lifetime of a store file.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Maximum number of blocks held in the shared block cache.
    #[serde(default = "default_cache_blocks")]
    pub cache_blocks: usize,
    /// Whether commit calls `sync` on the channel before returning.
    ///
    /// When disabled, a commit can return before its blocks and header reach
    /// stable storage. A crash may then lose the most recent commits, and
    /// recovery can fall back to an earlier commit slot. Enabled by default.
    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,
    /// Default admission policy for write transactions.
    #[serde(default)]
    pub write_lock: LockWait,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if:
    /// - `block_size` is not a power of two in 512..=65536
    /// - `cache_blocks` < 16
    /// - `write_lock` is a zero-length timeout
    #[builder]
    pub fn new(
        #[builder(default = default_block_size())] block_size: usize,
        #[builder(default = default_cache_blocks())] cache_blocks: usize,
        #[builder(default = default_sync_on_commit())] sync_on_commit: bool,
        #[builder(default)] write_lock: LockWait,
    ) -> Result<Self, ConfigError> {
        let config = Self { block_size, cache_blocks, sync_on_commit, write_lock };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.block_size.is_power_of_two()
            || self.block_size < MIN_BLOCK_SIZE
            || self.block_size > MAX_BLOCK_SIZE
        {
            return Err(ConfigError::Validation {
                message: format!(
                    "block_size must be a power of two in {}..={}, got {}",
                    MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, self.block_size
                ),
            });
        }
        if self.cache_blocks < MIN_CACHE_BLOCKS {
            return Err(ConfigError::Validation {
                message: format!(
                    "cache_blocks must be >= {}, got {}",
                    MIN_CACHE_BLOCKS, self.cache_blocks
                ),
            });
        }
        if let LockWait::Timeout { after } = self.write_lock {
            if after.is_zero() {
                return Err(ConfigError::Validation {
                    message: "write_lock timeout must be non-zero (use fail_fast instead)"
                        .to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            cache_blocks: default_cache_blocks(),
            sync_on_commit: default_sync_on_commit(),
            write_lock: LockWait::default(),
        }
    }
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_cache_blocks() -> usize {
    1024 // ~4MB with 4KB blocks
}

fn default_sync_on_commit() -> bool {
    true
}
