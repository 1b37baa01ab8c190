//! Runtime configuration

use std::time::Duration;

use crate::defaults;

/// Tunables of a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Allocations since the last collection that trigger an automatic
    /// collection at the next safe point. `0` disables automatic collection.
    pub gc_threshold: usize,

    /// Maximum nesting of host calls
    pub max_call_depth: usize,

    /// How long `run_until_idle` waits without progress
    pub idle_timeout: Duration,

    /// Longest array the runtime will store, capped at `u32::MAX`
    pub max_array_length: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_threshold: defaults::DEFAULT_GC_THRESHOLD,
            max_call_depth: defaults::DEFAULT_MAX_CALL_DEPTH,
            idle_timeout: Duration::from_millis(defaults::DEFAULT_IDLE_TIMEOUT_MS),
            max_array_length: defaults::DEFAULT_MAX_ARRAY_LENGTH,
        }
    }
}

impl RuntimeConfig {
    /// Configuration that only collects when asked to
    pub fn manual_gc() -> Self {
        Self {
            gc_threshold: 0,
            ..Self::default()
        }
    }

    /// Set the automatic collection threshold
    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    /// Set the maximum call depth
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set the idle timeout of `run_until_idle`
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the longest array the runtime will store
    pub fn with_max_array_length(mut self, len: usize) -> Self {
        self.max_array_length = len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.gc_threshold, defaults::DEFAULT_GC_THRESHOLD);
        assert_eq!(config.max_call_depth, defaults::DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_array_length, defaults::DEFAULT_MAX_ARRAY_LENGTH);
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::manual_gc()
            .with_max_call_depth(8)
            .with_idle_timeout(Duration::from_millis(10))
            .with_max_array_length(16);
        assert_eq!(config.gc_threshold, 0);
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.idle_timeout, Duration::from_millis(10));
        assert_eq!(config.max_array_length, 16);
    }
}
