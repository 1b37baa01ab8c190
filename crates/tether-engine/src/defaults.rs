//! Default constants for runtime configuration.

/// Objects allocated since the last collection before a collection is
/// attempted at the next safe point.
pub const DEFAULT_GC_THRESHOLD: usize = 10_000;

/// Lower bound for the adaptive collection threshold.
pub const MIN_GC_THRESHOLD: usize = 64;

/// Maximum nesting of host calls before `RangeError` is thrown.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;

/// Longest array stored by default; longer lengths throw `RangeError`.
pub const DEFAULT_MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Host array length limit, regardless of configuration.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// How long `run_until_idle` waits for queued work before giving up, in
/// milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 5_000;

/// Maximum nesting accepted when converting host values to JSON.
pub const MAX_JSON_DEPTH: usize = 128;
