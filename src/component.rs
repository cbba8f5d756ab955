//! Components: the units of work driven by the main loop
//!
//! Every component owns a [`ComponentBase`], which carries its identity,
//! lifecycle state, status flags and its own [`TimerTable`], and hands out
//! the central [`Scheduler`] keyed on that identity.

use alloc::borrow::Cow;
use alloc::rc::Rc;
use core::cell::Cell;

use crate::os::Clock;
use crate::rtos::{RetryResult, Scheduler, TimerTable};

/// Status bit raised while any component reports a warning
pub const STATUS_WARNING: u8 = 0x08;
/// Status bit raised while any component reports an error
pub const STATUS_ERROR: u8 = 0x10;

/// Setup order; higher values are set up first.
pub mod setup_priority {
    /// Communication buses (I2C, SPI, UART)
    pub const BUS: f32 = 1000.0;
    /// Direct pin and port expanders
    pub const IO: f32 = 900.0;
    /// Drivers that talk to hardware through a bus
    pub const HARDWARE: f32 = 800.0;
    /// Sensors and other data producers
    pub const DATA: f32 = 600.0;
    /// Components consuming other components' data
    pub const PROCESSOR: f32 = 400.0;
    pub const LATE: f32 = -100.0;
}

/// Identity of a component as seen by the scheduler.
///
/// Only used to key named timers; carries no ownership.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ComponentId(u16);

impl ComponentId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ComponentState {
    Construction,
    Setup,
    Loop,
    Failed,
}

pub struct ComponentBase {
    id: ComponentId,
    state: Cell<ComponentState>,
    status: Cell<u8>,
    timers: TimerTable,
    scheduler: Rc<Scheduler>,
    app_state: Rc<Cell<u8>>,
}

impl ComponentBase {
    pub fn new(id: ComponentId, scheduler: Rc<Scheduler>, clock: Rc<dyn Clock>) -> Self {
        Self {
            id,
            state: Cell::new(ComponentState::Construction),
            status: Cell::new(0),
            timers: TimerTable::new(clock),
            scheduler,
            app_state: Rc::new(Cell::new(0)),
        }
    }

    /// Share the application-wide status so the component can observe it.
    pub(crate) fn with_app_state(mut self, app_state: Rc<Cell<u8>>) -> Self {
        self.app_state = app_state;
        self
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: ComponentState) {
        self.state.set(state);
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.state.get() == ComponentState::Failed
    }

    /// Stop looping this component and drop its pending local timers.
    pub fn mark_failed(&self) {
        error!("Component {} was marked as failed", self.id.get());
        self.state.set(ComponentState::Failed);
        self.status_set_error();
        self.timers.cancel_all();
    }

    /// Own status bits (`STATUS_WARNING` / `STATUS_ERROR`).
    #[inline]
    pub fn status(&self) -> u8 {
        self.status.get()
    }

    /// Combined status of all components, as of the current loop iteration.
    #[inline]
    pub fn app_state(&self) -> u8 {
        self.app_state.get()
    }

    pub fn status_set_warning(&self) {
        if self.status.get() & STATUS_WARNING == 0 {
            warn!("Component {} set Warning flag", self.id.get());
        }
        self.status.set(self.status.get() | STATUS_WARNING);
    }

    pub fn status_clear_warning(&self) {
        self.status.set(self.status.get() & !STATUS_WARNING);
    }

    pub fn status_set_error(&self) {
        if self.status.get() & STATUS_ERROR == 0 {
            error!("Component {} set Error flag", self.id.get());
        }
        self.status.set(self.status.get() | STATUS_ERROR);
    }

    pub fn status_clear_error(&self) {
        self.status.set(self.status.get() & !STATUS_ERROR);
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn scheduler(&self) -> &Rc<Scheduler> {
        &self.scheduler
    }

    pub fn set_interval(
        &self,
        name: impl Into<Cow<'static, str>>,
        interval_ms: u32,
        f: impl FnMut() + 'static,
    ) {
        self.timers.set_interval(name, interval_ms, f);
    }

    pub fn cancel_interval(&self, name: &str) -> bool {
        self.timers.cancel_interval(name)
    }

    pub fn set_timeout(
        &self,
        name: impl Into<Cow<'static, str>>,
        timeout_ms: u32,
        f: impl FnMut() + 'static,
    ) {
        self.timers.set_timeout(name, timeout_ms, f);
    }

    pub fn cancel_timeout(&self, name: &str) -> bool {
        self.timers.cancel_timeout(name)
    }

    pub fn defer(&self, name: impl Into<Cow<'static, str>>, f: impl FnMut() + 'static) {
        self.timers.defer(name, f);
    }

    pub fn cancel_defer(&self, name: &str) -> bool {
        self.timers.cancel_defer(name)
    }

    pub fn schedule_timeout(
        &self,
        name: impl Into<Cow<'static, str>>,
        timeout_ms: u32,
        f: impl FnMut() + 'static,
    ) {
        self.scheduler.set_timeout(self.id, name, timeout_ms, f);
    }

    pub fn cancel_scheduled_timeout(&self, name: &str) -> bool {
        self.scheduler.cancel_timeout(self.id, name)
    }

    pub fn schedule_interval(
        &self,
        name: impl Into<Cow<'static, str>>,
        interval_ms: u32,
        f: impl FnMut() + 'static,
    ) {
        self.scheduler.set_interval(self.id, name, interval_ms, f);
    }

    pub fn cancel_scheduled_interval(&self, name: &str) -> bool {
        self.scheduler.cancel_interval(self.id, name)
    }

    pub fn schedule_retry(
        &self,
        name: impl Into<Cow<'static, str>>,
        initial_wait_ms: u32,
        max_attempts: u8,
        attempt: impl FnMut(u8) -> RetryResult + 'static,
        backoff_factor: f32,
    ) {
        self.scheduler
            .set_retry(self.id, name, initial_wait_ms, max_attempts, attempt, backoff_factor);
    }

    pub fn cancel_scheduled_retry(&self, name: &str) -> bool {
        self.scheduler.cancel_retry(self.id, name)
    }

    /// Pump this component's own timers.
    pub(crate) fn loop_internal(&self, now: u32) -> usize {
        self.timers.run_due(now)
    }
}

pub trait Component {
    fn base(&self) -> &ComponentBase;

    fn setup(&mut self) {}

    /// One turn of work in the main loop. Must not block.
    fn run(&mut self) {}

    fn setup_priority(&self) -> f32 {
        setup_priority::DATA
    }

    fn name(&self) -> &str {
        "component"
    }
}
