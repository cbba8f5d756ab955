//! Application layer: owns the components and drives the main loop
//!
//! One loop iteration pumps the central scheduler, gives every component
//! its turn (own timers first, then `run()`), and idles until the next
//! iteration is due or the scheduler has work.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::cmp::Ordering;

use embedded_hal::blocking::delay::DelayMs;

use crate::component::{Component, ComponentBase, ComponentId, ComponentState};
use crate::config::AppConfig;
use crate::os::{self, Clock, NoJitter, RandomSource};
use crate::rtos::Scheduler;

pub struct Application<D> {
    config: AppConfig,
    clock: Rc<dyn Clock>,
    scheduler: Rc<Scheduler>,
    components: Vec<Box<dyn Component>>,
    delay: D,
    app_state: Rc<Cell<u8>>,
    next_id: u16,
    last_loop: u32,
}

impl<D: DelayMs<u32>> Application<D> {
    pub fn new(config: AppConfig, clock: Rc<dyn Clock>, rng: Box<dyn RandomSource>, delay: D) -> Self {
        let rng: Box<dyn RandomSource> = if config.interval_jitter {
            rng
        } else {
            Box::new(NoJitter)
        };
        let scheduler = Scheduler::new(Rc::clone(&clock), rng)
            .with_cleanup_threshold(config.cleanup_threshold);
        let last_loop = clock.millis();

        Self {
            config,
            clock,
            scheduler: Rc::new(scheduler),
            components: Vec::new(),
            delay,
            app_state: Rc::new(Cell::new(0)),
            next_id: 0,
            last_loop,
        }
    }

    pub fn scheduler(&self) -> &Rc<Scheduler> {
        &self.scheduler
    }

    /// Base for a new component, with a fresh identity.
    pub fn new_base(&mut self) -> ComponentBase {
        let id = ComponentId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        ComponentBase::new(id, Rc::clone(&self.scheduler), Rc::clone(&self.clock))
            .with_app_state(Rc::clone(&self.app_state))
    }

    pub fn register(&mut self, component: Box<dyn Component>) {
        debug!("Registered component {} ({})", component.base().id().get(), component.name());
        self.components.push(component);
    }

    /// Set up all components, highest setup priority first.
    pub fn setup(&mut self) {
        info!("Running through setup()...");
        // Stable: equal priorities keep registration order
        self.components.sort_by(|a, b| {
            b.setup_priority()
                .partial_cmp(&a.setup_priority())
                .unwrap_or(Ordering::Equal)
        });

        for component in self.components.iter_mut() {
            debug!("Setting up {}", component.name());
            component.base().set_state(ComponentState::Setup);
            component.setup();
            if !component.base().is_failed() {
                component.base().set_state(ComponentState::Loop);
            }
        }
        self.last_loop = self.clock.millis();
    }

    /// One main loop iteration. Returns the milliseconds spent idling.
    pub fn loop_once(&mut self) -> u32 {
        self.scheduler.call();
        self.app_state.set(self.collect_status());

        for component in self.components.iter_mut() {
            if component.base().is_failed() {
                continue;
            }
            let start = self.clock.millis();
            component.base().loop_internal(start);
            component.run();

            let took = os::elapsed(self.clock.millis(), start);
            if took > self.config.blocking_warn_ms {
                warn!(
                    "Component {} took a long time for an operation ({} ms)",
                    component.name(),
                    took
                );
            }
        }

        let idle = self.idle_time();
        if idle > 0 {
            self.delay.delay_ms(idle);
        }
        self.last_loop = self.clock.millis();
        idle
    }

    /// Combined warning/error bits of every component.
    pub fn app_state(&self) -> u8 {
        self.collect_status()
    }

    fn collect_status(&self) -> u8 {
        self.components
            .iter()
            .fold(0, |state, component| state | component.base().status())
    }

    /// Sleep until the loop interval is used up, but wake early for due
    /// scheduler work. Never less than half the remaining interval, so a
    /// busy scheduler cannot turn the loop into a spin.
    fn idle_time(&self) -> u32 {
        let elapsed = os::elapsed(self.clock.millis(), self.last_loop);
        let delay_time = self.config.loop_interval_ms.saturating_sub(elapsed);
        let next_schedule = self
            .scheduler
            .next_schedule_in()
            .unwrap_or(delay_time)
            .max(delay_time / 2);
        next_schedule.min(delay_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{setup_priority, STATUS_WARNING};
    use crate::os::ManualClock;
    use alloc::vec;

    /// Delay that moves the manual clock instead of sleeping.
    struct ClockDelay {
        clock: Rc<ManualClock>,
        slept: Vec<u32>,
    }

    impl DelayMs<u32> for ClockDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.slept.push(ms);
            self.clock.advance(ms);
        }
    }

    struct Scripted {
        base: ComponentBase,
        label: &'static str,
        priority: f32,
        events: Rc<core::cell::RefCell<Vec<&'static str>>>,
        fail_in_setup: bool,
    }

    impl Component for Scripted {
        fn base(&self) -> &ComponentBase {
            &self.base
        }

        fn setup(&mut self) {
            self.events.borrow_mut().push(self.label);
            if self.fail_in_setup {
                self.base.mark_failed();
            }
        }

        fn run(&mut self) {
            self.events.borrow_mut().push("run");
        }

        fn setup_priority(&self) -> f32 {
            self.priority
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    fn app(start: u32, loop_interval: u32) -> (Rc<ManualClock>, Application<ClockDelay>) {
        let clock = Rc::new(ManualClock::new(start));
        let config = AppConfig::builder()
            .loop_interval(loop_interval)
            .interval_jitter(false)
            .build()
            .unwrap();
        let delay = ClockDelay {
            clock: clock.clone(),
            slept: Vec::new(),
        };
        let app = Application::new(config, clock.clone(), Box::new(NoJitter), delay);
        (clock, app)
    }

    fn scripted(
        app: &mut Application<ClockDelay>,
        label: &'static str,
        priority: f32,
        events: &Rc<core::cell::RefCell<Vec<&'static str>>>,
    ) -> Scripted {
        Scripted {
            base: app.new_base(),
            label,
            priority,
            events: Rc::clone(events),
            fail_in_setup: false,
        }
    }

    #[test]
    fn setup_runs_by_descending_priority() {
        let (_clock, mut app) = app(0, 16);
        let events = Rc::new(core::cell::RefCell::new(Vec::new()));
        let data = scripted(&mut app, "data", setup_priority::DATA, &events);
        let bus = scripted(&mut app, "bus", setup_priority::BUS, &events);
        let late = scripted(&mut app, "late", setup_priority::LATE, &events);
        let data2 = scripted(&mut app, "data2", setup_priority::DATA, &events);
        for p in [data, bus, late, data2] {
            app.register(Box::new(p));
        }

        app.setup();
        assert_eq!(*events.borrow(), ["bus", "data", "data2", "late"]);
    }

    #[test]
    fn failed_components_are_skipped() {
        let (_clock, mut app) = app(0, 16);
        let events = Rc::new(core::cell::RefCell::new(Vec::new()));
        let mut broken = scripted(&mut app, "broken", setup_priority::DATA, &events);
        broken.fail_in_setup = true;
        app.register(Box::new(broken));

        app.setup();
        app.loop_once();
        assert_eq!(*events.borrow(), ["broken"]);
        assert_eq!(app.app_state(), crate::component::STATUS_ERROR);
    }

    #[test]
    fn ids_are_sequential() {
        let (_clock, mut app) = app(0, 16);
        assert_eq!(app.new_base().id(), ComponentId::new(0));
        assert_eq!(app.new_base().id(), ComponentId::new(1));
    }

    #[test]
    fn idles_for_the_rest_of_the_loop_interval() {
        let (_clock, mut app) = app(0, 16);
        app.setup();
        assert_eq!(app.loop_once(), 16);
        assert_eq!(app.loop_once(), 16);
        assert_eq!(app.delay.slept, vec![16, 16]);
    }

    #[test]
    fn wakes_early_for_scheduler_work_but_not_below_half() {
        let (clock, mut app) = app(0, 16);
        app.setup();
        let owner = ComponentId::new(99);
        app.scheduler().set_timeout(owner, "soon", 10, || {});
        assert_eq!(app.loop_once(), 10);
        assert_eq!(clock.millis(), 10);

        app.scheduler().set_timeout(owner, "sooner", 2, || {});
        assert_eq!(app.loop_once(), 8);
    }

    #[test]
    fn component_timers_run_in_their_turn() {
        let (clock, mut app) = app(0, 16);
        let events = Rc::new(core::cell::RefCell::new(Vec::new()));
        let p = scripted(&mut app, "p", setup_priority::DATA, &events);
        let log = Rc::clone(&events);
        p.base.set_timeout("t", 20, move || log.borrow_mut().push("timer"));
        app.register(Box::new(p));
        app.setup();

        app.loop_once();
        clock.set(20);
        app.loop_once();
        assert_eq!(*events.borrow(), ["p", "run", "timer", "run"]);
    }

    #[test]
    fn app_state_collects_component_status() {
        let (_clock, mut app) = app(0, 16);
        let events = Rc::new(core::cell::RefCell::new(Vec::new()));
        let p = scripted(&mut app, "p", setup_priority::DATA, &events);
        p.base.status_set_warning();
        let observer = app.new_base();
        app.register(Box::new(p));
        app.setup();

        assert_eq!(observer.app_state(), 0);
        app.loop_once();
        assert_eq!(observer.app_state(), STATUS_WARNING);
    }
}
