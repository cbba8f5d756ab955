#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;
use core::mem::MaybeUninit;

use avr_device::atmega128a::Peripherals;
use embedded_alloc::Heap;
use panic_halt as _;
use ufmt::uwriteln;

use atmega128_scheduler::component::setup_priority;
use atmega128_scheduler::drivers::StatusLed;
use atmega128_scheduler::hal::{MillisClock, MillisDelay, PortBPin, Uart};
use atmega128_scheduler::{AppConfig, Application, Component, ComponentBase, Scheduler, XorShift32};

const HEAP_SIZE: usize = 1024;
const BEAT_MS: u32 = 1000;
const DUMP_EVERY: u32 = 10;

#[global_allocator]
static HEAP: Heap = Heap::empty();

/// Prints a heartbeat over the UART and dumps the scheduler now and then.
struct Heartbeat {
    base: ComponentBase,
    uart: Rc<RefCell<Uart>>,
}

impl Component for Heartbeat {
    fn base(&self) -> &ComponentBase {
        &self.base
    }

    fn setup(&mut self) {
        let uart = Rc::clone(&self.uart);
        let scheduler: Weak<Scheduler> = Rc::downgrade(self.base.scheduler());
        let mut beats = 0u32;
        self.base.schedule_interval("beat", BEAT_MS, move || {
            beats = beats.wrapping_add(1);
            let mut uart = uart.borrow_mut();
            uwriteln!(uart, "beat {}", beats).ok();
            if beats % DUMP_EVERY == 0 {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.dump(&mut *uart).ok();
                }
            }
        });
    }

    fn setup_priority(&self) -> f32 {
        setup_priority::PROCESSOR
    }

    fn name(&self) -> &str {
        "heartbeat"
    }
}

#[avr_device::entry]
fn main() -> ! {
    {
        static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
        unsafe { HEAP.init(core::ptr::addr_of_mut!(HEAP_MEM) as usize, HEAP_SIZE) }
    }

    let dp = Peripherals::take().unwrap();

    let clock = Rc::new(MillisClock::new(dp.TC0));
    let uart = Rc::new(RefCell::new(Uart::new(dp.USART0)));
    let led_pin = PortBPin::<0>::into_output(&dp.PORTB);

    // Enable interrupts globally
    unsafe { avr_device::interrupt::enable() };

    uwriteln!(uart.borrow_mut(), "ATmega128 scheduler v{}", env!("CARGO_PKG_VERSION")).ok();

    let delay = MillisDelay::new(Rc::clone(&clock));
    let mut app = Application::new(
        AppConfig::default(),
        clock,
        Box::new(XorShift32::new(0x2545_F491)),
        delay,
    );

    let led = StatusLed::new(app.new_base(), led_pin);
    app.register(Box::new(led));
    let heartbeat = Heartbeat {
        base: app.new_base(),
        uart: Rc::clone(&uart),
    };
    app.register(Box::new(heartbeat));

    app.setup();

    loop {
        app.loop_once();
    }
}
