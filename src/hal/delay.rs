use alloc::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;

use crate::os::{self, Clock};

/// Busy-waits on a millisecond clock.
pub struct MillisDelay<C> {
    clock: Rc<C>,
}

impl<C: Clock> MillisDelay<C> {
    pub fn new(clock: Rc<C>) -> Self {
        Self { clock }
    }
}

impl<C: Clock> DelayMs<u32> for MillisDelay<C> {
    fn delay_ms(&mut self, ms: u32) {
        let start = self.clock.millis();
        while !os::is_due(self.clock.millis(), start, ms) {
            core::hint::spin_loop();
        }
    }
}
