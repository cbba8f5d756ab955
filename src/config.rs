//! Configuration constants for the ATmega128 scheduler

use crate::error::ConfigError;

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// UART baud rate
pub const UART_BAUD: u32 = 9600;

/// Timer0 prescaler used for the millisecond tick
const TIMER0_PRESCALER: u32 = 64;

/// Timer0 compare value giving one interrupt per millisecond (CTC mode)
pub const TIMER0_COMPARE: u8 = (CPU_FREQ_HZ / TIMER0_PRESCALER / 1000 - 1) as u8;

/// Target duration of one main loop iteration
pub const DEFAULT_LOOP_INTERVAL_MS: u32 = 16;

/// A component turn longer than this is reported as blocking
pub const DEFAULT_BLOCKING_WARN_MS: u32 = 50;

/// Cancelled items tolerated in the heap before a cleanup pass
pub const MAX_LOGICALLY_DELETED_ITEMS: usize = 10;

/// Upper bound for the loop interval
pub const MAX_LOOP_INTERVAL_MS: u32 = 60_000;

/// Main loop tuning, validated by [`AppConfigBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfig {
    pub loop_interval_ms: u32,
    pub blocking_warn_ms: u32,
    /// Spread the first firing of new intervals over `[P/2, P]`
    pub interval_jitter: bool,
    pub cleanup_threshold: usize,
}

impl AppConfig {
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_interval_ms > MAX_LOOP_INTERVAL_MS {
            return Err(ConfigError::LoopIntervalTooLong {
                interval_ms: self.loop_interval_ms,
                max_ms: MAX_LOOP_INTERVAL_MS,
            });
        }
        if self.blocking_warn_ms == 0 {
            return Err(ConfigError::ZeroBlockingThreshold);
        }
        if self.cleanup_threshold == 0 {
            return Err(ConfigError::ZeroCleanupThreshold);
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: DEFAULT_LOOP_INTERVAL_MS,
            blocking_warn_ms: DEFAULT_BLOCKING_WARN_MS,
            interval_jitter: true,
            cleanup_threshold: MAX_LOGICALLY_DELETED_ITEMS,
        }
    }
}

pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn loop_interval(mut self, ms: u32) -> Self {
        self.config.loop_interval_ms = ms;
        self
    }

    pub fn blocking_warn(mut self, ms: u32) -> Self {
        self.config.blocking_warn_ms = ms;
        self
    }

    pub fn interval_jitter(mut self, enabled: bool) -> Self {
        self.config.interval_jitter = enabled;
        self
    }

    pub fn cleanup_threshold(mut self, items: usize) -> Self {
        self.config.cleanup_threshold = items;
        self
    }

    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AppConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
