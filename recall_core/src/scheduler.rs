//! Cooperative timer queue on a virtual clock.
//!
//! The host advances time explicitly (`advance_by` / `advance_to`), which
//! fires every due timer in `(due, registration)` order. Callbacks run with no
//! scheduler borrow held, so they may freely schedule or cancel timers.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

/// Cancellation handle for a scheduled callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

enum TimerTask {
    Once(Box<dyn FnOnce(u64)>),
    Every {
        period_ms: u64,
        callback: Box<dyn FnMut(u64)>,
    },
}

#[derive(Default)]
struct SchedulerState {
    now_ms: u64,
    next_seq: u64,
    queue: BTreeMap<(u64, u64), (TimerHandle, TimerTask)>,
    index: HashMap<TimerHandle, (u64, u64)>,
    running: Option<RunningTimer>,
    advancing: bool,
    fired: u64,
}

struct RunningTimer {
    handle: TimerHandle,
    cancelled: bool,
}

impl SchedulerState {
    fn next_key(&mut self, due_ms: u64) -> (u64, u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        (due_ms, seq)
    }

    fn insert(&mut self, handle: TimerHandle, due_ms: u64, task: TimerTask) {
        let key = self.next_key(due_ms);
        self.queue.insert(key, (handle, task));
        self.index.insert(handle, key);
    }

    fn pop_due(&mut self, target_ms: u64) -> Option<(u64, TimerHandle, TimerTask)> {
        let key = *self.queue.keys().next()?;
        if key.0 > target_ms {
            return None;
        }
        let (handle, task) = self.queue.remove(&key)?;
        self.index.remove(&handle);
        Some((key.0, handle, task))
    }
}

/// Shared handle to the session's timer queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ms
    }

    /// Run `callback` once, `delay_ms` from now.
    pub fn after<F>(&self, delay_ms: u64, callback: F) -> TimerHandle
    where
        F: FnOnce(u64) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let handle = TimerHandle(state.next_seq);
        let due = state.now_ms.saturating_add(delay_ms);
        state.insert(handle, due, TimerTask::Once(Box::new(callback)));
        handle
    }

    /// Run `callback` every `period_ms`, first firing one period from now.
    ///
    /// A zero period is treated as one millisecond.
    pub fn every<F>(&self, period_ms: u64, callback: F) -> TimerHandle
    where
        F: FnMut(u64) + 'static,
    {
        let period_ms = period_ms.max(1);
        let mut state = self.state.borrow_mut();
        let handle = TimerHandle(state.next_seq);
        let due = state.now_ms.saturating_add(period_ms);
        state.insert(
            handle,
            due,
            TimerTask::Every {
                period_ms,
                callback: Box::new(callback),
            },
        );
        handle
    }

    /// Cancel a pending timer. Returns false when the handle is unknown or
    /// already fired.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut state = self.state.borrow_mut();
        if let Some(running) = state.running.as_mut() {
            if running.handle == handle {
                running.cancelled = true;
                return true;
            }
        }
        match state.index.remove(&handle) {
            Some(key) => {
                state.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        let state = self.state.borrow();
        state.index.contains_key(&handle)
            || state
                .running
                .as_ref()
                .map(|running| running.handle == handle && !running.cancelled)
                .unwrap_or(false)
    }

    /// Number of timers still queued.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Total callbacks fired since construction.
    pub fn fired(&self) -> u64 {
        self.state.borrow().fired
    }

    pub fn advance_by(&self, delta_ms: u64) {
        let target = self.now_ms().saturating_add(delta_ms);
        self.advance_to(target);
    }

    /// Fire every timer due at or before `target_ms`, then set the clock to
    /// `target_ms`. Time never moves backwards; nested calls from inside a
    /// callback are ignored.
    pub fn advance_to(&self, target_ms: u64) {
        {
            let mut state = self.state.borrow_mut();
            if state.advancing {
                warn!(
                    target: "recall::scheduler",
                    target_ms,
                    "scheduler.nested_advance_ignored"
                );
                return;
            }
            if target_ms < state.now_ms {
                return;
            }
            state.advancing = true;
        }

        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                match state.pop_due(target_ms) {
                    Some((due, handle, task)) => {
                        state.now_ms = due;
                        state.running = Some(RunningTimer {
                            handle,
                            cancelled: false,
                        });
                        state.fired += 1;
                        Some((due, handle, task))
                    }
                    None => None,
                }
            };

            let Some((due, handle, task)) = next else {
                break;
            };
            trace!(target: "recall::scheduler", %handle, due, "timer.fired");

            match task {
                TimerTask::Once(callback) => {
                    callback(due);
                    self.state.borrow_mut().running = None;
                }
                TimerTask::Every {
                    period_ms,
                    mut callback,
                } => {
                    callback(due);
                    let mut state = self.state.borrow_mut();
                    let cancelled = state
                        .running
                        .take()
                        .map(|running| running.cancelled)
                        .unwrap_or(false);
                    if !cancelled {
                        state.insert(
                            handle,
                            due.saturating_add(period_ms),
                            TimerTask::Every {
                                period_ms,
                                callback,
                            },
                        );
                    }
                }
            }
        }

        let mut state = self.state.borrow_mut();
        state.now_ms = target_ms;
        state.advancing = false;
    }
}

/// Deferred release actions owned by a component.
///
/// Actions run in reverse registration order on [`Teardown::release`] and on
/// drop, so a component's timers and subscriptions never outlive it.
#[derive(Default)]
pub struct Teardown {
    actions: Vec<Box<dyn FnOnce()>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer<F>(&mut self, action: F)
    where
        F: FnOnce() + 'static,
    {
        self.actions.push(Box::new(action));
    }

    pub fn track_timer(&mut self, scheduler: &Scheduler, handle: TimerHandle) {
        let scheduler = scheduler.clone();
        self.defer(move || {
            scheduler.cancel(handle);
        });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn release(&mut self) {
        while let Some(action) = self.actions.pop() {
            action();
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("actions", &self.actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn once_timers_fire_in_due_then_registration_order() {
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (label, delay) in [("b", 20u64), ("a", 10), ("c", 20)] {
            let log = Rc::clone(&log);
            scheduler.after(delay, move |now| log.borrow_mut().push((label, now)));
        }
        scheduler.advance_by(25);
        assert_eq!(*log.borrow(), vec![("a", 10), ("b", 20), ("c", 20)]);
        assert_eq!(scheduler.now_ms(), 25);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn periodic_timers_repeat_until_cancelled() {
        let scheduler = Scheduler::new();
        let count = Rc::new(Cell::new(0));
        let handle = {
            let count = Rc::clone(&count);
            scheduler.every(100, move |_| count.set(count.get() + 1))
        };
        scheduler.advance_by(350);
        assert_eq!(count.get(), 3);
        assert!(scheduler.cancel(handle));
        scheduler.advance_by(1000);
        assert_eq!(count.get(), 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn periodic_timer_can_cancel_itself() {
        let scheduler = Scheduler::new();
        let count = Rc::new(Cell::new(0));
        let slot: Rc<Cell<Option<TimerHandle>>> = Rc::new(Cell::new(None));
        let handle = {
            let count = Rc::clone(&count);
            let slot = Rc::clone(&slot);
            let inner = scheduler.clone();
            scheduler.every(10, move |_| {
                count.set(count.get() + 1);
                if count.get() == 2 {
                    if let Some(handle) = slot.get() {
                        inner.cancel(handle);
                    }
                }
            })
        };
        slot.set(Some(handle));
        scheduler.advance_by(100);
        assert_eq!(count.get(), 2);
        assert!(!scheduler.is_pending(handle));
    }

    #[test]
    fn callbacks_may_schedule_follow_up_timers() {
        let scheduler = Scheduler::new();
        let fired_at = Rc::new(Cell::new(0u64));
        {
            let inner = scheduler.clone();
            let fired_at = Rc::clone(&fired_at);
            scheduler.after(10, move |_| {
                let fired_at = Rc::clone(&fired_at);
                inner.after(15, move |now| fired_at.set(now));
            });
        }
        scheduler.advance_by(30);
        assert_eq!(fired_at.get(), 25);
    }

    #[test]
    fn clock_never_moves_backwards() {
        let scheduler = Scheduler::new();
        scheduler.advance_to(500);
        scheduler.advance_to(100);
        assert_eq!(scheduler.now_ms(), 500);
    }

    #[test]
    fn teardown_cancels_tracked_timers_on_drop() {
        let scheduler = Scheduler::new();
        {
            let mut teardown = Teardown::new();
            let handle = scheduler.every(50, |_| {});
            teardown.track_timer(&scheduler, handle);
            let handle = scheduler.after(500, |_| {});
            teardown.track_timer(&scheduler, handle);
            assert_eq!(scheduler.pending(), 2);
        }
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn teardown_runs_in_reverse_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut teardown = Teardown::new();
        for step in 0..3 {
            let order = Rc::clone(&order);
            teardown.defer(move || order.borrow_mut().push(step));
        }
        teardown.release();
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        assert!(teardown.is_empty());
    }
}
