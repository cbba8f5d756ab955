//! ATmega128 peripherals backing the scheduler: the millisecond tick, a
//! delay built on it, a polled UART for `ufmt` output and Port B pins.

pub mod delay;
pub mod gpio;
pub mod millis;
pub mod uart;

pub use delay::MillisDelay;
pub use gpio::PortBPin;
pub use millis::MillisClock;
pub use uart::Uart;
