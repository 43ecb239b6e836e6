//! Configuration for bridge VMs.
//!
//! Every VM created by an [`crate::Engine`] is set up from one
//! [`BridgeConfig`]. Engine limits apply per isolate.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Default nesting limit when decoding native values.
pub const DEFAULT_MAX_DECODE_DEPTH: usize = 64;

/// Per-VM engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Heap limit in bytes. `None` leaves the engine default (unlimited).
    pub memory_limit: Option<usize>,

    /// Native stack limit for script execution, in bytes.
    pub max_stack_size: Option<usize>,

    /// Allocation threshold that triggers a GC cycle, in bytes.
    pub gc_threshold: Option<usize>,

    /// Run queued promise jobs after every load and dispatch.
    /// Default: true
    pub drain_jobs: bool,

    /// Maximum nesting depth accepted when decoding a native value.
    /// Default: 64
    pub max_decode_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: None,
            gc_threshold: None,
            drain_jobs: true,
            max_decode_depth: DEFAULT_MAX_DECODE_DEPTH,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the stack limit in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Set the GC threshold in bytes.
    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }

    /// Enable or disable draining of pending jobs.
    pub fn drain_jobs(mut self, enabled: bool) -> Self {
        self.drain_jobs = enabled;
        self
    }

    /// Set the decode nesting limit.
    pub fn max_decode_depth(mut self, depth: usize) -> Self {
        self.max_decode_depth = depth;
        self
    }

    /// Reject settings no engine could run with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.max_decode_depth == 0 {
            return Err(BridgeError::config("max_decode_depth must be at least 1"));
        }
        if self.memory_limit == Some(0) {
            return Err(BridgeError::config("memory_limit must be non-zero"));
        }
        if self.max_stack_size == Some(0) {
            return Err(BridgeError::config("max_stack_size must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(config.drain_jobs);
        assert_eq!(config.max_decode_depth, DEFAULT_MAX_DECODE_DEPTH);
        assert!(config.memory_limit.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfig::new()
            .memory_limit(64 * 1024 * 1024)
            .max_stack_size(512 * 1024)
            .drain_jobs(false);
        assert_eq!(config.memory_limit, Some(64 * 1024 * 1024));
        assert_eq!(config.max_stack_size, Some(512 * 1024));
        assert!(!config.drain_jobs);
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(BridgeConfig::new().max_decode_depth(0).validate().is_err());
        assert!(BridgeConfig::new().memory_limit(0).validate().is_err());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"memory_limit": 1048576, "drain_jobs": false}"#).unwrap();
        assert_eq!(config.memory_limit, Some(1048576));
        assert!(!config.drain_jobs);
        assert_eq!(config.max_decode_depth, DEFAULT_MAX_DECODE_DEPTH);
    }
}
