//! Per-component timer table
//!
//! A flat list of named timers owned by one component and pumped from that
//! component's turn in the main loop. No cross-component ordering: each
//! component only keeps a handful of timers, so a linear scan is enough.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use super::SCHEDULER_DONT_RUN;
use crate::os::{self, Clock};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Interval,
    Timeout,
    /// Runs on the very next pump, whatever the elapsed time
    Defer,
}

struct TimeFunction {
    name: Cow<'static, str>,
    kind: TimerKind,
    interval: u32,
    last_execution: u32,
    /// Taken out while the callback runs
    callback: Option<Box<dyn FnMut()>>,
    remove: bool,
}

impl TimeFunction {
    fn should_run(&self, now: u32) -> bool {
        if self.remove {
            return false;
        }
        match self.kind {
            TimerKind::Defer => true,
            _ if self.interval == SCHEDULER_DONT_RUN => false,
            _ => os::is_due(now, self.last_execution, self.interval),
        }
    }

    /// Skip ahead by whole periods so the phase never drifts.
    fn advance(&mut self, now: u32) {
        if self.interval == 0 {
            self.last_execution = now;
            return;
        }
        let elapsed = os::elapsed(now, self.last_execution);
        self.last_execution = self
            .last_execution
            .wrapping_add(elapsed - elapsed % self.interval);
    }
}

pub struct TimerTable {
    clock: Rc<dyn Clock>,
    functions: RefCell<Vec<TimeFunction>>,
}

impl TimerTable {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            functions: RefCell::new(Vec::new()),
        }
    }

    pub fn set_interval(
        &self,
        name: impl Into<Cow<'static, str>>,
        interval_ms: u32,
        f: impl FnMut() + 'static,
    ) {
        self.set(name.into(), TimerKind::Interval, interval_ms, Box::new(f));
    }

    pub fn cancel_interval(&self, name: &str) -> bool {
        self.cancel(name, TimerKind::Interval)
    }

    pub fn set_timeout(
        &self,
        name: impl Into<Cow<'static, str>>,
        timeout_ms: u32,
        f: impl FnMut() + 'static,
    ) {
        self.set(name.into(), TimerKind::Timeout, timeout_ms, Box::new(f));
    }

    pub fn cancel_timeout(&self, name: &str) -> bool {
        self.cancel(name, TimerKind::Timeout)
    }

    /// Run `f` once on the next pump.
    pub fn defer(&self, name: impl Into<Cow<'static, str>>, f: impl FnMut() + 'static) {
        self.set(name.into(), TimerKind::Defer, 0, Box::new(f));
    }

    pub fn cancel_defer(&self, name: &str) -> bool {
        self.cancel(name, TimerKind::Defer)
    }

    /// Flag every timer for removal. Returns how many were live.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for function in self.functions.borrow_mut().iter_mut().filter(|f| !f.remove) {
            function.remove = true;
            cancelled += 1;
        }
        cancelled
    }

    /// Run every due timer, then erase finished and cancelled ones.
    ///
    /// Only the timers present when the scan starts are considered; timers
    /// registered by a callback wait for the next pump. Returns the number
    /// of callbacks invoked.
    pub fn run_due(&self, now: u32) -> usize {
        let scan = self.functions.borrow().len();
        let mut ran = 0;

        for index in 0..scan {
            let mut callback = {
                let mut functions = self.functions.borrow_mut();
                let function = &mut functions[index];
                if !function.should_run(now) {
                    continue;
                }
                function.callback.take()
            };

            if let Some(f) = callback.as_mut() {
                f();
                ran += 1;
            }

            // The callback may have grown the vector, so look the entry up
            // again by index instead of holding on to it.
            let mut functions = self.functions.borrow_mut();
            let function = &mut functions[index];
            function.callback = callback;
            match function.kind {
                TimerKind::Interval if !function.remove => function.advance(now),
                TimerKind::Interval => {}
                TimerKind::Timeout | TimerKind::Defer => function.remove = true,
            }
        }

        let removed: Vec<TimeFunction> = {
            let mut functions = self.functions.borrow_mut();
            let (live, removed) = core::mem::take(&mut *functions)
                .into_iter()
                .partition(|function| !function.remove);
            *functions = live;
            removed
        };
        // Erased callbacks may touch the table from their destructors
        drop(removed);
        ran
    }

    /// Live timers.
    pub fn len(&self) -> usize {
        self.functions.borrow().iter().filter(|f| !f.remove).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set(&self, name: Cow<'static, str>, kind: TimerKind, interval: u32, f: Box<dyn FnMut()>) {
        if !name.is_empty() {
            self.cancel(&name, kind);
        }
        trace!("Component timer '{}' set: {} ms", &*name, interval);
        let last_execution = self.clock.millis();
        self.functions.borrow_mut().push(TimeFunction {
            name,
            kind,
            interval,
            last_execution,
            callback: Some(f),
            remove: false,
        });
    }

    fn cancel(&self, name: &str, kind: TimerKind) -> bool {
        if name.is_empty() {
            return false;
        }
        let mut found = false;
        for function in self.functions.borrow_mut().iter_mut() {
            if !function.remove && function.kind == kind && function.name == name {
                function.remove = true;
                found = true;
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::ManualClock;
    use alloc::rc::Weak;
    use core::cell::Cell;

    fn table(start: u32) -> (Rc<ManualClock>, Rc<TimerTable>) {
        let clock = Rc::new(ManualClock::new(start));
        let table = Rc::new(TimerTable::new(clock.clone()));
        (clock, table)
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut() + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        (count, move || c.set(c.get() + 1))
    }

    #[test]
    fn timeout_runs_once_then_disappears() {
        let (clock, table) = table(0);
        let (count, f) = counter();
        table.set_timeout("t", 100, f);

        assert_eq!(table.run_due(99), 0);
        clock.set(100);
        assert_eq!(table.run_due(100), 1);
        assert_eq!(table.run_due(300), 0);
        assert_eq!(count.get(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn defer_runs_on_next_pump_regardless_of_time() {
        let (_clock, table) = table(1000);
        let (count, f) = counter();
        table.defer("d", f);

        // even with a clock that has not moved
        assert_eq!(table.run_due(1000), 1);
        assert_eq!(table.run_due(1000), 0);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn interval_catches_up_without_burst() {
        let (_clock, table) = table(0);
        let (count, f) = counter();
        table.set_interval("i", 100, f);

        table.run_due(350);
        assert_eq!(count.get(), 1);
        // realigned to 300, so 399 is not due yet
        table.run_due(399);
        assert_eq!(count.get(), 1);
        table.run_due(400);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn interval_survives_millis_wrap() {
        let start = u32::MAX - 49;
        let (_clock, table) = table(start);
        let (count, f) = counter();
        table.set_interval("i", 100, f);

        table.run_due(start.wrapping_add(99));
        assert_eq!(count.get(), 0);
        table.run_due(start.wrapping_add(100));
        assert_eq!(count.get(), 1);
        table.run_due(start.wrapping_add(200));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn dont_run_sentinel_never_fires() {
        let (_clock, table) = table(0);
        let (count, f) = counter();
        table.set_timeout("never", SCHEDULER_DONT_RUN, f);

        table.run_due(u32::MAX);
        table.run_due(5);
        assert_eq!(count.get(), 0);
        assert_eq!(table.len(), 1);
        assert!(table.cancel_timeout("never"));
    }

    #[test]
    fn same_name_replaces_and_anonymous_coexist() {
        let (_clock, table) = table(0);
        let (named, f1) = counter();
        let (_, f2) = counter();
        table.set_timeout("x", 10, f2);
        table.set_timeout("x", 10, f1);
        let (anon, f3) = counter();
        let (_, f4) = counter();
        table.set_timeout("", 10, f3);
        table.set_timeout("", 10, f4);
        assert_eq!(table.len(), 3);

        assert_eq!(table.run_due(10), 3);
        assert_eq!(named.get(), 1);
        assert_eq!(anon.get(), 1);
    }

    #[test]
    fn cancel_is_scoped_by_kind() {
        let (_clock, table) = table(0);
        table.set_interval("x", 10, || {});
        table.defer("x", || {});
        assert!(!table.cancel_timeout("x"));
        assert!(table.cancel_defer("x"));
        assert!(!table.cancel_defer("x"));
        assert!(table.cancel_interval("x"));
        assert!(!table.cancel_interval("never-set"));
        assert!(table.is_empty());
    }

    #[test]
    fn callbacks_may_register_and_cancel_during_the_scan() {
        let (_clock, table) = table(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let (t, o) = (Rc::downgrade(&table), Rc::clone(&order));
        table.defer("first", move || {
            o.borrow_mut().push("first");
            if let Some(table) = t.upgrade() {
                // cancels an entry later in this same scan
                table.cancel_timeout("victim");
                let o = Rc::clone(&o);
                table.defer("follow-up", move || o.borrow_mut().push("follow-up"));
            }
        });
        let o = Rc::clone(&order);
        table.set_timeout("victim", 0, move || o.borrow_mut().push("victim"));

        table.run_due(0);
        assert_eq!(*order.borrow(), ["first"]);
        table.run_due(0);
        assert_eq!(*order.borrow(), ["first", "follow-up"]);
        assert!(table.is_empty());
    }

    #[test]
    fn zero_interval_runs_on_every_pump() {
        let (_clock, table) = table(0);
        let (count, f) = counter();
        table.set_interval("spin", 0, f);

        for now in [0, 0, 1, u32::MAX, 3] {
            table.run_due(now);
        }
        assert_eq!(count.get(), 5);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn dont_run_interval_never_fires() {
        let (_clock, table) = table(0);
        let (count, f) = counter();
        table.set_interval("never", SCHEDULER_DONT_RUN, f);

        for now in [0, 1000, u32::MAX - 1, u32::MAX, 5] {
            table.run_due(now);
        }
        assert_eq!(count.get(), 0);
        assert!(table.cancel_interval("never"));
    }

    struct CancelOnDrop(Weak<TimerTable>);

    impl Drop for CancelOnDrop {
        fn drop(&mut self) {
            if let Some(table) = self.0.upgrade() {
                table.cancel_timeout("sibling");
            }
        }
    }

    #[test]
    fn erased_callback_may_touch_the_table_when_dropped() {
        let (_clock, table) = table(0);
        let guard = CancelOnDrop(Rc::downgrade(&table));
        table.set_timeout("sibling", 100, || {});
        table.defer("once", move || {
            let _guard = &guard;
        });

        assert_eq!(table.run_due(0), 1);
        assert!(table.is_empty());
        assert!(!table.cancel_timeout("sibling"));
    }

    #[test]
    fn timeout_rearming_itself_keeps_one_entry() {
        let (_clock, table) = table(0);
        let runs = Rc::new(Cell::new(0));

        fn arm(table: &Rc<TimerTable>, runs: &Rc<Cell<u32>>) {
            let (weak, runs_inner) = (Rc::downgrade(table), Rc::clone(runs));
            table.set_timeout("tick", 10, move || {
                runs_inner.set(runs_inner.get() + 1);
                if let Some(table) = weak.upgrade() {
                    arm(&table, &runs_inner);
                }
            });
        }

        arm(&table, &runs);
        table.run_due(10);
        table.run_due(20);
        table.run_due(30);
        assert_eq!(runs.get(), 3);
        assert_eq!(table.len(), 1);
    }
}
