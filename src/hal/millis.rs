use core::cell::Cell;

use avr_device::atmega128a::TC0;
use avr_device::interrupt::Mutex;

use crate::config::TIMER0_COMPARE;
use crate::os::Clock;

// TCCR0: WGM01 (CTC) | CS02 (clk/64)
const TCCR0_CTC_DIV64: u8 = (1 << 3) | (1 << 2);
// TIMSK: OCIE0
const TIMSK_OCIE0: u8 = 1 << 1;

static MILLIS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Millisecond counter driven by the Timer0 compare interrupt.
///
/// Wraps after about 49.7 days; the scheduler copes with that.
pub struct MillisClock {
    _tc0: TC0,
}

impl MillisClock {
    /// Start the 1 kHz tick. Interrupts still have to be enabled globally.
    pub fn new(tc0: TC0) -> Self {
        tc0.tccr0.write(|w| unsafe { w.bits(TCCR0_CTC_DIV64) });
        tc0.ocr0.write(|w| unsafe { w.bits(TIMER0_COMPARE) });
        tc0.tcnt0.write(|w| unsafe { w.bits(0) });
        tc0.timsk.modify(|r, w| unsafe { w.bits(r.bits() | TIMSK_OCIE0) });
        Self { _tc0: tc0 }
    }
}

impl Clock for MillisClock {
    fn millis(&self) -> u32 {
        avr_device::interrupt::free(|cs| MILLIS.borrow(cs).get())
    }
}

#[avr_device::interrupt(atmega128a)]
fn TIMER0_COMP() {
    avr_device::interrupt::free(|cs| {
        let counter = MILLIS.borrow(cs);
        counter.set(counter.get().wrapping_add(1));
    });
}
