//! Scheduled work items and their heap ordering

use alloc::borrow::Cow;
use alloc::boxed::Box;
use core::cell::{Cell, RefCell};
use core::cmp::Ordering;

use crate::component::ComponentId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ItemKind {
    /// Fires once
    Timeout,
    /// Fires repeatedly, phase-locked to its period
    Interval,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Timeout => "timeout",
            ItemKind::Interval => "interval",
        }
    }
}

impl ufmt::uDisplay for ItemKind {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        f.write_str(self.as_str())
    }
}

/// What a retry callback wants after an attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryResult {
    Done,
    Retry,
}

pub(crate) struct RetryState {
    attempt: Box<dyn FnMut(u8) -> RetryResult>,
    remaining: u8,
    wait_ms: u32,
    backoff: f32,
}

impl RetryState {
    pub(crate) fn new(
        attempt: Box<dyn FnMut(u8) -> RetryResult>,
        max_attempts: u8,
        initial_wait_ms: u32,
        backoff: f32,
    ) -> Self {
        Self {
            attempt,
            remaining: max_attempts,
            wait_ms: initial_wait_ms,
            backoff,
        }
    }

    /// Run one attempt; returns the wait before the next one, if any.
    fn run(&mut self) -> Option<u32> {
        self.remaining = self.remaining.saturating_sub(1);
        let result = (self.attempt)(self.remaining);
        if result == RetryResult::Done || self.remaining == 0 {
            return None;
        }
        let wait = self.wait_ms;
        // float-to-int `as` saturates
        self.wait_ms = (self.wait_ms as f32 * self.backoff) as u32;
        Some(wait)
    }
}

pub(crate) enum Work {
    Callback(Box<dyn FnMut()>),
    Retry(RetryState),
}

pub(crate) struct SchedulerItem {
    owner: ComponentId,
    name: Cow<'static, str>,
    kind: ItemKind,
    interval: u32,
    /// Absolute deadline on the 64-bit epoch timeline
    next_execution: Cell<u64>,
    /// Insertion order, breaks ties between equal deadlines
    seq: u64,
    remove: Cell<bool>,
    work: RefCell<Work>,
}

impl SchedulerItem {
    pub(crate) fn new(
        owner: ComponentId,
        name: Cow<'static, str>,
        kind: ItemKind,
        interval: u32,
        next_execution: u64,
        seq: u64,
        work: Work,
    ) -> Self {
        Self {
            owner,
            name,
            kind,
            interval,
            next_execution: Cell::new(next_execution),
            seq,
            remove: Cell::new(false),
            work: RefCell::new(work),
        }
    }

    #[inline]
    pub(crate) fn owner(&self) -> ComponentId {
        self.owner
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub(crate) fn kind(&self) -> ItemKind {
        self.kind
    }

    #[inline]
    pub(crate) fn next_execution(&self) -> u64 {
        self.next_execution.get()
    }

    /// Only valid while the item is outside the heap.
    #[inline]
    pub(crate) fn set_next_execution(&self, next: u64) {
        self.next_execution.set(next);
    }

    #[inline]
    pub(crate) fn is_removed(&self) -> bool {
        self.remove.get()
    }

    #[inline]
    pub(crate) fn mark_removed(&self) {
        self.remove.set(true);
    }

    /// Live item with this exact identity.
    pub(crate) fn matches(&self, owner: ComponentId, name: &str, kind: ItemKind) -> bool {
        !self.is_removed() && self.owner == owner && self.kind == kind && self.name == name
    }

    /// Invoke the work and return the next deadline if it must run again.
    ///
    /// `now` is the pump's reading; the item is due, so
    /// `now >= next_execution`.
    pub(crate) fn fire(&self, now: u64) -> Option<u64> {
        let mut work = self.work.borrow_mut();
        match &mut *work {
            Work::Callback(callback) => {
                callback();
                match self.kind {
                    ItemKind::Interval => Some(self.next_after(now)),
                    ItemKind::Timeout => None,
                }
            }
            Work::Retry(state) => state.run().map(|wait| now + wait as u64),
        }
    }

    /// Deadline of the first period boundary strictly after `now`.
    ///
    /// Missed periods collapse into the firing that just happened, and the
    /// phase stays locked to the first deadline.
    fn next_after(&self, now: u64) -> u64 {
        let period = self.interval as u64;
        if period == 0 {
            return now;
        }
        let next = self.next_execution.get();
        let missed = now.saturating_sub(next) / period;
        next + (missed + 1) * period
    }
}

impl PartialEq for SchedulerItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SchedulerItem {}

impl PartialOrd for SchedulerItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchedulerItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_execution
            .get()
            .cmp(&other.next_execution.get())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;

    fn interval_item(interval: u32, next: u64) -> SchedulerItem {
        SchedulerItem::new(
            ComponentId::new(1),
            Cow::Borrowed("x"),
            ItemKind::Interval,
            interval,
            next,
            0,
            Work::Callback(Box::new(|| {})),
        )
    }

    #[test]
    fn interval_resyncs_to_phase() {
        let item = interval_item(100, 100);
        // on time
        assert_eq!(item.fire(100), Some(200));
        // starved for 3.5 periods: one firing, next boundary
        let item = interval_item(100, 100);
        assert_eq!(item.fire(350), Some(400));
    }

    #[test]
    fn zero_interval_is_always_due() {
        let item = interval_item(0, 10);
        assert_eq!(item.fire(25), Some(25));
    }

    #[test]
    fn ties_break_on_insertion_order() {
        let a = interval_item(10, 50);
        let mut b = interval_item(10, 50);
        b.seq = 1;
        assert!(a < b);
        b.set_next_execution(49);
        assert!(b < a);
    }

    #[test]
    fn retry_counts_down_and_backs_off() {
        let seen = Rc::new(RefCell::new(alloc::vec::Vec::new()));
        let log = Rc::clone(&seen);
        let mut state = RetryState::new(
            Box::new(move |remaining| {
                log.borrow_mut().push(remaining);
                RetryResult::Retry
            }),
            3,
            100,
            2.0,
        );
        assert_eq!(state.run(), Some(100));
        assert_eq!(state.run(), Some(200));
        assert_eq!(state.run(), None);
        assert_eq!(*seen.borrow(), [2, 1, 0]);
    }

    #[test]
    fn retry_stops_when_done() {
        let mut state = RetryState::new(Box::new(|_| RetryResult::Done), 5, 100, 1.0);
        assert_eq!(state.run(), None);
    }

    #[test]
    fn matches_ignores_removed_items() {
        let item = interval_item(10, 10);
        assert!(item.matches(ComponentId::new(1), "x", ItemKind::Interval));
        assert!(!item.matches(ComponentId::new(1), "x", ItemKind::Timeout));
        assert!(!item.matches(ComponentId::new(2), "x", ItemKind::Interval));
        item.mark_removed();
        assert!(!item.matches(ComponentId::new(1), "x", ItemKind::Interval));
    }
}
