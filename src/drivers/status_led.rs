//! Status LED reflecting the application-wide warning/error state
//!
//! Steady on while everything is fine, slow blink on warning, fast blink
//! on error. The blinking runs on the component's own timer table.

use alloc::rc::Rc;
use core::cell::RefCell;

use embedded_hal::digital::v2::OutputPin;

use crate::component::{setup_priority, Component, ComponentBase, STATUS_ERROR, STATUS_WARNING};

/// Half period of the error blink, in ms
pub const ERROR_BLINK_MS: u32 = 250;
/// Half period of the warning blink, in ms
pub const WARNING_BLINK_MS: u32 = 1500;

const BLINK: &str = "blink";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    Off,
    Steady,
    Blink(u32),
}

pub struct StatusLed<P> {
    base: ComponentBase,
    pin: Rc<RefCell<P>>,
    mode: Mode,
}

impl<P: OutputPin + 'static> StatusLed<P> {
    pub fn new(base: ComponentBase, pin: P) -> Self {
        Self {
            base,
            pin: Rc::new(RefCell::new(pin)),
            mode: Mode::Off,
        }
    }

    fn wanted_mode(&self) -> Mode {
        let state = self.base.app_state();
        if state & STATUS_ERROR != 0 {
            Mode::Blink(ERROR_BLINK_MS)
        } else if state & STATUS_WARNING != 0 {
            Mode::Blink(WARNING_BLINK_MS)
        } else {
            Mode::Steady
        }
    }

    fn enter(&mut self, mode: Mode) {
        // Pin errors are ignored: there is nowhere left to report them
        match mode {
            Mode::Off => {
                self.base.cancel_interval(BLINK);
                self.pin.borrow_mut().set_low().ok();
            }
            Mode::Steady => {
                self.base.cancel_interval(BLINK);
                self.pin.borrow_mut().set_high().ok();
            }
            Mode::Blink(half_period) => {
                self.pin.borrow_mut().set_high().ok();
                let pin = Rc::clone(&self.pin);
                let mut lit = true;
                self.base.set_interval(BLINK, half_period, move || {
                    lit = !lit;
                    let mut pin = pin.borrow_mut();
                    if lit {
                        pin.set_high().ok();
                    } else {
                        pin.set_low().ok();
                    }
                });
            }
        }
        self.mode = mode;
    }
}

impl<P: OutputPin + 'static> Component for StatusLed<P> {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn setup(&mut self) {
        self.enter(Mode::Off);
    }

    fn run(&mut self) {
        let wanted = self.wanted_mode();
        if wanted != self.mode {
            self.enter(wanted);
        }
    }

    fn setup_priority(&self) -> f32 {
        setup_priority::HARDWARE
    }

    fn name(&self) -> &str {
        "status_led"
    }
}
