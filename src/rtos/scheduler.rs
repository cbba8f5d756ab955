//! Central time-ordered scheduler
//!
//! Items live in a min-heap keyed on their absolute deadline on the 64-bit
//! epoch timeline. New items are staged in `to_add` and merged only at the
//! start and the end of [`Scheduler::call`], and cancellation only flips a
//! flag, so callbacks may freely schedule and cancel while the pump is
//! iterating.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::collections::BinaryHeap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::cmp::Reverse;

use super::item::{ItemKind, RetryResult, RetryState, SchedulerItem, Work};
use super::SCHEDULER_DONT_RUN;
use crate::component::ComponentId;
use crate::config::MAX_LOGICALLY_DELETED_ITEMS;
use crate::os::{Clock, Epoch, RandomSource};

type Heap = BinaryHeap<Reverse<Rc<SchedulerItem>>>;

pub struct Scheduler {
    clock: Rc<dyn Clock>,
    rng: RefCell<Box<dyn RandomSource>>,
    epoch: Epoch,
    items: RefCell<Heap>,
    to_add: RefCell<Vec<Rc<SchedulerItem>>>,
    /// Item whose callback is executing right now
    running: RefCell<Option<Rc<SchedulerItem>>>,
    /// Cancelled items still sitting in `items`
    to_remove: Cell<usize>,
    cleanup_threshold: usize,
    next_seq: Cell<u64>,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>, rng: Box<dyn RandomSource>) -> Self {
        Self {
            clock,
            rng: RefCell::new(rng),
            epoch: Epoch::new(),
            items: RefCell::new(BinaryHeap::new()),
            to_add: RefCell::new(Vec::new()),
            running: RefCell::new(None),
            to_remove: Cell::new(0),
            cleanup_threshold: MAX_LOGICALLY_DELETED_ITEMS,
            next_seq: Cell::new(0),
        }
    }

    /// Number of cancelled heap items tolerated before `call()` purges them.
    pub fn with_cleanup_threshold(mut self, items: usize) -> Self {
        self.cleanup_threshold = items;
        self
    }

    /// Run `callback` once, `timeout_ms` from now.
    ///
    /// A named timeout replaces any pending timeout with the same owner and
    /// name. [`SCHEDULER_DONT_RUN`] only cancels.
    pub fn set_timeout(
        &self,
        owner: ComponentId,
        name: impl Into<Cow<'static, str>>,
        timeout_ms: u32,
        callback: impl FnMut() + 'static,
    ) {
        self.set_item(
            owner,
            name.into(),
            ItemKind::Timeout,
            timeout_ms,
            Work::Callback(Box::new(callback)),
        );
    }

    pub fn cancel_timeout(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_item(owner, name, ItemKind::Timeout)
    }

    /// Run `callback` every `interval_ms`.
    ///
    /// The first firing lands somewhere in `[interval_ms / 2, interval_ms]`
    /// from now, depending on the random source. An interval of 0 runs on
    /// every pump.
    pub fn set_interval(
        &self,
        owner: ComponentId,
        name: impl Into<Cow<'static, str>>,
        interval_ms: u32,
        callback: impl FnMut() + 'static,
    ) {
        self.set_item(
            owner,
            name.into(),
            ItemKind::Interval,
            interval_ms,
            Work::Callback(Box::new(callback)),
        );
    }

    pub fn cancel_interval(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_item(owner, name, ItemKind::Interval)
    }

    /// Call `attempt` until it returns [`RetryResult::Done`] or runs out of
    /// attempts.
    ///
    /// The first attempt runs on the next pump. Each later attempt waits
    /// the current wait time, which starts at `initial_wait_ms` and is
    /// multiplied by `backoff_factor` after every retry. `attempt` receives
    /// the number of attempts left after this one.
    pub fn set_retry(
        &self,
        owner: ComponentId,
        name: impl Into<Cow<'static, str>>,
        initial_wait_ms: u32,
        max_attempts: u8,
        attempt: impl FnMut(u8) -> RetryResult + 'static,
        backoff_factor: f32,
    ) {
        let name = name.into();
        if initial_wait_ms == SCHEDULER_DONT_RUN || max_attempts == 0 {
            self.cancel_item(owner, &name, ItemKind::Timeout);
            return;
        }
        let state = RetryState::new(Box::new(attempt), max_attempts, initial_wait_ms, backoff_factor);
        self.set_item(owner, name, ItemKind::Timeout, 0, Work::Retry(state));
    }

    pub fn cancel_retry(&self, owner: ComponentId, name: &str) -> bool {
        self.cancel_timeout(owner, name)
    }

    /// Milliseconds until the earliest live item is due, 0 when overdue.
    pub fn next_schedule_in(&self) -> Option<u32> {
        let now = self.now();
        let (heap_min, removed) = {
            let mut items = self.items.borrow_mut();
            let removed = self.take_removed_heads(&mut items);
            (items.peek().map(|Reverse(item)| item.next_execution()), removed)
        };
        drop(removed);
        let pending_min = self
            .to_add
            .borrow()
            .iter()
            .filter(|item| !item.is_removed())
            .map(|item| item.next_execution())
            .min();

        let earliest = heap_min.into_iter().chain(pending_min).min()?;
        Some(u32::try_from(earliest.saturating_sub(now)).unwrap_or(u32::MAX))
    }

    /// Run everything that is due. Called once per main loop iteration.
    pub fn call(&self) {
        let now = self.now();
        self.process_to_add();

        if self.to_remove.get() > self.cleanup_threshold {
            self.cleanup();
        }

        while let Some(item) = self.pop_due(now) {
            trace!(
                "Running {} '{}' of component {}",
                item.kind().as_str(),
                item.name(),
                item.owner().get()
            );

            self.running.replace(Some(Rc::clone(&item)));
            let next = item.fire(now);
            self.running.replace(None);

            // Cancelled or superseded from inside its own callback
            if item.is_removed() {
                continue;
            }
            if let Some(next) = next {
                item.set_next_execution(next);
                self.to_add.borrow_mut().push(item);
            }
        }

        self.process_to_add();
    }

    /// Live items, including staged ones and the one executing.
    pub fn len(&self) -> usize {
        let in_heap = self
            .items
            .borrow()
            .iter()
            .filter(|Reverse(item)| !item.is_removed())
            .count();
        let staged = self.to_add.borrow().iter().filter(|item| !item.is_removed()).count();
        let running = self
            .running
            .borrow()
            .as_ref()
            .map_or(0, |item| usize::from(!item.is_removed()));
        in_heap + staged + running
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Print every live item, earliest first.
    pub fn dump<W>(&self, w: &mut W) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        let now = self.now();
        let mut live: Vec<Rc<SchedulerItem>> = self
            .items
            .borrow()
            .iter()
            .map(|Reverse(item)| Rc::clone(item))
            .chain(self.to_add.borrow().iter().cloned())
            .filter(|item| !item.is_removed())
            .collect();
        live.sort();

        ufmt::uwriteln!(w, "Scheduler: {} items (epoch {})", live.len(), self.epoch.major())?;
        for item in live.iter() {
            let due_in = u32::try_from(item.next_execution().saturating_sub(now)).unwrap_or(u32::MAX);
            ufmt::uwriteln!(
                w,
                "  {} '{}' component={} due_in={}ms",
                item.kind(),
                item.name(),
                item.owner().get(),
                due_in
            )?;
        }
        Ok(())
    }

    fn now(&self) -> u64 {
        self.epoch.update(self.clock.millis())
    }

    fn set_item(
        &self,
        owner: ComponentId,
        name: Cow<'static, str>,
        kind: ItemKind,
        delay_ms: u32,
        work: Work,
    ) {
        // Anonymous items are never replaced
        if !name.is_empty() {
            self.cancel_item(owner, &name, kind);
        }
        if delay_ms == SCHEDULER_DONT_RUN {
            trace!("{} '{}' set to never run", kind.as_str(), &*name);
            return;
        }

        let now = self.now();
        let offset = if kind == ItemKind::Interval && delay_ms > 0 {
            (self.rng.borrow_mut().next_u32() % delay_ms) / 2
        } else {
            0
        };
        let next_execution = now + (delay_ms - offset) as u64;

        trace!(
            "set_{} '{}' for component {}: {} ms (offset {})",
            kind.as_str(),
            &*name,
            owner.get(),
            delay_ms,
            offset
        );

        let seq = self.next_seq.get();
        self.next_seq.set(seq.wrapping_add(1));

        let item = SchedulerItem::new(owner, name, kind, delay_ms, next_execution, seq, work);
        self.to_add.borrow_mut().push(Rc::new(item));
    }

    fn cancel_item(&self, owner: ComponentId, name: &str, kind: ItemKind) -> bool {
        if name.is_empty() {
            return false;
        }

        let mut found = false;
        for Reverse(item) in self.items.borrow().iter() {
            if item.matches(owner, name, kind) {
                item.mark_removed();
                self.to_remove.set(self.to_remove.get() + 1);
                found = true;
            }
        }
        for item in self.to_add.borrow().iter() {
            if item.matches(owner, name, kind) {
                item.mark_removed();
                found = true;
            }
        }
        if let Some(item) = self.running.borrow().as_ref() {
            if item.matches(owner, name, kind) {
                item.mark_removed();
                found = true;
            }
        }

        if found {
            trace!("Cancelled {} '{}' of component {}", kind.as_str(), name, owner.get());
        }
        found
    }

    /// Pop the earliest live item if it is due by `now`.
    fn pop_due(&self, now: u64) -> Option<Rc<SchedulerItem>> {
        let (due, removed) = {
            let mut items = self.items.borrow_mut();
            let removed = self.take_removed_heads(&mut items);
            let head_due = items
                .peek()
                .is_some_and(|Reverse(head)| head.next_execution() <= now);
            let due = if head_due {
                items.pop().map(|Reverse(item)| item)
            } else {
                None
            };
            (due, removed)
        };
        // Dropping an item runs its callback's destructors, which may call
        // back into the scheduler, so only after the heap borrow is released.
        drop(removed);
        due
    }

    fn take_removed_heads(&self, items: &mut Heap) -> Vec<Rc<SchedulerItem>> {
        let mut removed = Vec::new();
        while items.peek().is_some_and(|Reverse(item)| item.is_removed()) {
            if let Some(Reverse(item)) = items.pop() {
                removed.push(item);
            }
            self.to_remove.set(self.to_remove.get().saturating_sub(1));
        }
        removed
    }

    fn process_to_add(&self) {
        let staged = core::mem::take(&mut *self.to_add.borrow_mut());
        if staged.is_empty() {
            return;
        }
        let (live, removed): (Vec<_>, Vec<_>) =
            staged.into_iter().partition(|item| !item.is_removed());
        self.items
            .borrow_mut()
            .extend(live.into_iter().map(Reverse));
        drop(removed);
    }

    fn cleanup(&self) {
        let removed: Vec<_> = {
            let mut items = self.items.borrow_mut();
            let (live, removed): (Vec<_>, Vec<_>) = core::mem::take(&mut *items)
                .into_vec()
                .into_iter()
                .partition(|Reverse(item)| !item.is_removed());
            *items = BinaryHeap::from(live);
            removed
        };
        self.to_remove.set(0);
        debug!("Scheduler cleanup dropped {} cancelled items", removed.len());
    }
}
