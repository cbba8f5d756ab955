//! Cooperative timer and scheduling core for ATmega128 firmware
//!
//! Everything runs on the single main loop. Components register named
//! timeouts and intervals either with the central [`rtos::Scheduler`]
//! (min-heap ordered across all components) or with their own
//! [`rtos::TimerTable`]. Both are pumped once per loop iteration by
//! [`application::Application::loop_once`].
//!
//! Time comes from a free-running millisecond counter that wraps at 2^32
//! (about 49.7 days). The scheduler extends it into a 64-bit epoch so
//! deadlines keep their order across the wrap.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "atmega128", feature(abi_avr_interrupt))]

extern crate alloc;

#[macro_use]
mod fmt;

pub mod application;
pub mod component;
pub mod config;
pub mod drivers;
pub mod error;
pub mod os;
pub mod rtos;

#[cfg(feature = "atmega128")]
pub mod hal;

pub use application::Application;
pub use component::{Component, ComponentBase, ComponentId, ComponentState};
pub use config::AppConfig;
pub use error::ConfigError;
pub use os::{Clock, ManualClock, NoJitter, RandomSource, XorShift32};
pub use rtos::{ItemKind, RetryResult, Scheduler, TimerKind, TimerTable, SCHEDULER_DONT_RUN};
