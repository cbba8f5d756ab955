//! Cooperative timers: the central scheduler and the per-component tables

mod item;
mod scheduler;
mod timers;

pub use item::{ItemKind, RetryResult};
pub use scheduler::Scheduler;
pub use timers::{TimerKind, TimerTable};

/// Delay value meaning "cancel the previous timer and schedule nothing".
pub const SCHEDULER_DONT_RUN: u32 = u32::MAX;
