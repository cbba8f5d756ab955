//! System time and randomness sources used by the scheduling core
//!
//! The millisecond counter wraps at 2^32. Everything that compares two
//! 32-bit readings goes through the wrapping helpers here; the central
//! scheduler additionally extends readings into a 64-bit [`Epoch`].

use alloc::rc::Rc;
use core::cell::Cell;

/// Free-running millisecond counter, wrapping at 2^32.
pub trait Clock {
    fn millis(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline]
    fn millis(&self) -> u32 {
        (**self).millis()
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    #[inline]
    fn millis(&self) -> u32 {
        (**self).millis()
    }
}

/// Milliseconds from `since` to `now`, correct across one wrap.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// True once at least `period` ms have passed since `last`.
#[inline]
pub fn is_due(now: u32, last: u32, period: u32) -> bool {
    elapsed(now, last) >= period
}

/// Clock driven by hand, for host builds and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u32>,
}

impl ManualClock {
    pub const fn new(start: u32) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: u32) {
        self.now.set(now);
    }

    /// Move the clock forward, wrapping like the hardware counter.
    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    #[inline]
    fn millis(&self) -> u32 {
        self.now.get()
    }
}

/// Extends wrapping 32-bit readings into a monotonic 64-bit timeline.
///
/// Must observe the counter at least once per wrap period.
#[derive(Debug, Default)]
pub struct Epoch {
    last: Cell<u32>,
    major: Cell<u32>,
}

impl Epoch {
    pub const fn new() -> Self {
        Self {
            last: Cell::new(0),
            major: Cell::new(0),
        }
    }

    /// Record a fresh reading and return it on the 64-bit timeline.
    pub fn update(&self, now: u32) -> u64 {
        if now < self.last.get() {
            self.major.set(self.major.get().wrapping_add(1));
            trace!("millis() wrapped, epoch {}", self.major.get());
        }
        self.last.set(now);
        ((self.major.get() as u64) << 32) | now as u64
    }

    /// Number of wraps observed so far.
    #[inline]
    pub fn major(&self) -> u32 {
        self.major.get()
    }
}

/// Source of the interval jitter offsets. Need not be cryptographic.
pub trait RandomSource {
    fn next_u32(&mut self) -> u32;
}

/// Marsaglia xorshift, small enough for the AVR.
#[derive(Debug, Clone)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    const FALLBACK_SEED: u32 = 0x9E37_79B9;

    pub const fn new(seed: u32) -> Self {
        // An all-zero state never leaves zero
        let state = if seed == 0 { Self::FALLBACK_SEED } else { seed };
        Self { state }
    }
}

impl RandomSource for XorShift32 {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

/// Always returns zero, which disables interval jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl RandomSource for NoJitter {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        0
    }
}
