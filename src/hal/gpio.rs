use core::convert::Infallible;

use avr_device::atmega128a::PORTB;
use embedded_hal::digital::v2::OutputPin;

/// Output pin `N` of Port B.
pub struct PortBPin<const N: u8> {
    _private: (),
}

impl<const N: u8> PortBPin<N> {
    /// Switch the pin to output, driven low.
    ///
    /// Takes the port by reference; pins on the same port stay independent
    /// since every write is a read-modify-write of a single bit.
    pub fn into_output(port: &PORTB) -> Self {
        port.portb.modify(|r, w| unsafe { w.bits(r.bits() & !(1 << N)) });
        port.ddrb.modify(|r, w| unsafe { w.bits(r.bits() | (1 << N)) });
        Self { _private: () }
    }

    fn port() -> &'static avr_device::atmega128a::portb::RegisterBlock {
        // Only this pin's bit is touched, inside a critical section
        unsafe { &*PORTB::ptr() }
    }
}

impl<const N: u8> OutputPin for PortBPin<N> {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        avr_device::interrupt::free(|_| {
            Self::port().portb.modify(|r, w| unsafe { w.bits(r.bits() & !(1 << N)) });
        });
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        avr_device::interrupt::free(|_| {
            Self::port().portb.modify(|r, w| unsafe { w.bits(r.bits() | (1 << N)) });
        });
        Ok(())
    }
}
