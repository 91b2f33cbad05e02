//! Configuration Module - Snapshot Tuning Parameters
//!
//! Manages the configuration of an isolate group's snapshot engine.
//! The defaults keep every buffer inline and bound inline recursion well
//! below the size of a default thread stack.

use serde::{Deserialize, Serialize};

/// Configuration for snapshot passes
///
/// # Examples
///
/// ```rust
/// use fsnap::SnapshotConfig;
///
/// // Use default configuration
/// let config = SnapshotConfig::default();
///
/// // Externalize message buffers larger than 64KB
/// let config = SnapshotConfig {
///     externalize_threshold: 64 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Byte size above which a typed buffer in a message is externalized
    ///
    /// A buffer of exactly this many bytes is still copied inline.
    /// Only message passes consult it.
    /// Default: `u64::MAX` (never externalize)
    pub externalize_threshold: u64,

    /// Maximum inline nesting depth of one pass
    ///
    /// Split kinds (arrays, instances) reached in reference mode do not
    /// count, since they are written through the forward list.
    /// Default: 1024
    pub max_depth: usize,

    /// Initial capacity of the write buffer in bytes
    ///
    /// Default: 4KB
    pub initial_capacity: usize,

    /// Enable verbose pass logging
    ///
    /// Prints pass start/end events on the console.
    /// Default: false
    pub verbose: bool,

    /// Enable per-pass statistics
    ///
    /// Default: true
    pub stats_enabled: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            // Transfer
            externalize_threshold: u64::MAX,

            // Traversal
            max_depth: 1024,
            initial_capacity: 4 * KB,

            // Debug
            verbose: false,
            stats_enabled: true,
        }
    }
}

impl SnapshotConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fsnap::SnapshotConfig;
    ///
    /// let config = SnapshotConfig {
    ///     max_depth: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidDepth(
                "max_depth must be > 0".to_string(),
            ));
        }

        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigError::InvalidDepth(format!(
                "max_depth must be <= {}",
                MAX_DEPTH_LIMIT
            )));
        }

        if self.initial_capacity > MAX_INITIAL_CAPACITY {
            return Err(ConfigError::InvalidCapacity(format!(
                "initial_capacity must be <= {} bytes",
                MAX_INITIAL_CAPACITY
            )));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - FSNAP_EXTERNALIZE_THRESHOLD
    /// - FSNAP_MAX_DEPTH
    /// - FSNAP_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export FSNAP_EXTERNALIZE_THRESHOLD=65536
    /// export FSNAP_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FSNAP_EXTERNALIZE_THRESHOLD") {
            if let Ok(bytes) = val.parse::<u64>() {
                config.externalize_threshold = bytes;
            }
        }

        if let Ok(val) = std::env::var("FSNAP_MAX_DEPTH") {
            if let Ok(depth) = val.parse::<usize>() {
                config.max_depth = depth;
            }
        }

        if let Ok(val) = std::env::var("FSNAP_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Parse configuration from JSON
    ///
    /// Missing fields fall back to their defaults. The result is validated.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SnapshotConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check whether a message buffer of `len` bytes goes out of line
    pub fn should_externalize(&self, len: usize) -> bool {
        len as u64 > self.externalize_threshold
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid depth: {0}")]
    InvalidDepth(String),

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Invalid configuration text: {0}")]
    Parse(String),
}

// ============================================================================
// CONSTANTS
// ============================================================================

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

/// Hard ceiling for `max_depth`
const MAX_DEPTH_LIMIT: usize = 1 << 16;

/// Hard ceiling for `initial_capacity`
const MAX_INITIAL_CAPACITY: usize = 256 * MB;
