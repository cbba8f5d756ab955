//! Error types
//!
//! The scheduling core itself cannot fail: cancellation reports a match as
//! a plain `bool`, and callback panics are not caught. Only configuration
//! is validated.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("loop interval of {interval_ms} ms exceeds the {max_ms} ms limit")]
    LoopIntervalTooLong { interval_ms: u32, max_ms: u32 },
    #[error("blocking warning threshold must be at least 1 ms")]
    ZeroBlockingThreshold,
    #[error("cleanup threshold must be at least one item")]
    ZeroCleanupThreshold,
}
