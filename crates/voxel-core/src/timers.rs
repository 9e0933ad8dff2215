//! The timer scheduler.
//!
//! Every time-dependent peripheral is a callback state machine registered
//! here; there are no per-peripheral threads. A dedicated scheduler thread
//! pops due timers off a wrap-safe min-heap and runs their callbacks
//! serially, which linearizes all peripheral state transitions.
//!
//! Callbacks return their next deadline, or 0 to stop. External threads may
//! register, reschedule, or unregister timers at any time through stable
//! handles; a mutation that races an in-flight callback wins over that
//! callback's return value.

use crate::clock::{tick_after, tick_before, Clock};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// A timer callback: receives the current tick, returns the next deadline
/// (0 unregisters). Must not block.
pub type TimerCallback = Box<dyn FnMut(u32) -> u32 + Send>;

/// Shutdown reason raised when the heap falls persistently behind the
/// clock.
pub const FAULT_TIMER_LAG: &str = "Timer too close";
/// Shutdown reason raised when callbacks keep panicking.
pub const FAULT_CALLBACK: &str = "Command failure";

/// How far behind `now` a deadline may run before it counts as a lag
/// strike, in ticks at 16 MHz scale (scaled by frequency at construction).
const MAX_LAG_US: u64 = 100_000;
/// Consecutive lag strikes before the fault hook fires.
const LAG_STRIKES: u32 = 32;
/// Consecutive callback panics before the fault hook fires.
const PANIC_STRIKES: u32 = 3;

/// Stable identity of a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    slot: usize,
    generation: u64,
}

struct Slot {
    generation: u64,
    /// Bumped on every external schedule mutation; lets the dispatcher
    /// detect that a callback's return value has been superseded.
    epoch: u64,
    deadline: u32,
    armed: bool,
    live: bool,
    callback: Option<TimerCallback>,
}

#[derive(Clone, Copy)]
struct Entry {
    deadline: u32,
    seq: u64,
    slot: usize,
    generation: u64,
    epoch: u64,
}

fn entry_before(a: &Entry, b: &Entry) -> bool {
    if a.deadline != b.deadline {
        tick_before(a.deadline, b.deadline)
    } else {
        a.seq < b.seq
    }
}

#[derive(Default)]
struct Heap(Vec<Entry>);

// A hand-rolled binary heap: the wrap-safe tick order is only a total
// order within a 2^31 window, which std's BinaryHeap cannot express.
impl Heap {
    fn push(&mut self, entry: Entry) {
        self.0.push(entry);
        let mut i = self.0.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if entry_before(&self.0[i], &self.0[parent]) {
                self.0.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<&Entry> {
        self.0.first()
    }

    fn pop(&mut self) -> Option<Entry> {
        if self.0.is_empty() {
            return None;
        }
        let last = self.0.len() - 1;
        self.0.swap(0, last);
        let top = self.0.pop();
        let mut i = 0;
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.0.len() && entry_before(&self.0[left], &self.0[smallest]) {
                smallest = left;
            }
            if right < self.0.len() && entry_before(&self.0[right], &self.0[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.0.swap(i, smallest);
            i = smallest;
        }
        top
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

struct Inner {
    slots: Vec<Slot>,
    free: Vec<usize>,
    heap: Heap,
    seq: u64,
    lag_strikes: u32,
    panic_strikes: u32,
}

impl Inner {
    /// A heap entry is authoritative only while it matches the slot it
    /// points at; superseded entries are dropped lazily on pop.
    fn entry_current(&self, entry: &Entry) -> bool {
        let slot = &self.slots[entry.slot];
        slot.live
            && slot.armed
            && slot.generation == entry.generation
            && slot.epoch == entry.epoch
            && slot.deadline == entry.deadline
    }
}

type FaultHook = Box<dyn FnMut(&'static str) + Send>;

/// The timer scheduler. One per emulator; shared by `Arc`.
pub struct Scheduler {
    clock: Arc<Clock>,
    inner: Mutex<Inner>,
    wakeup: Condvar,
    running: AtomicBool,
    fault: Mutex<Option<FaultHook>>,
    max_lag: u32,
}

impl Scheduler {
    pub fn new(clock: Arc<Clock>) -> Arc<Self> {
        let max_lag = clock.ticks_from_us(MAX_LAG_US).max(1);
        Arc::new(Scheduler {
            clock,
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                heap: Heap::default(),
                seq: 0,
                lag_strikes: 0,
                panic_strikes: 0,
            }),
            wakeup: Condvar::new(),
            running: AtomicBool::new(false),
            fault: Mutex::new(None),
            max_lag,
        })
    }

    /// The clock this scheduler dispatches against.
    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    /// Installs the hook invoked on scheduler faults (timer lag, repeated
    /// callback panics). The protocol session points this at its shutdown
    /// path.
    pub fn set_fault_hook(&self, hook: FaultHook) {
        *self.fault.lock() = Some(hook);
    }

    /// Registers a timer. A deadline of 0 leaves the timer disarmed until
    /// the first `reschedule`.
    pub fn register(&self, callback: TimerCallback, deadline: u32) -> TimerHandle {
        let mut inner = self.inner.lock();
        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None => {
                inner.slots.push(Slot {
                    generation: 0,
                    epoch: 0,
                    deadline: 0,
                    armed: false,
                    live: false,
                    callback: None,
                });
                inner.slots.len() - 1
            }
        };
        let s = &mut inner.slots[slot];
        s.generation += 1;
        s.epoch += 1;
        s.deadline = deadline;
        s.armed = deadline != 0;
        s.live = true;
        s.callback = Some(callback);
        let handle = TimerHandle {
            slot,
            generation: s.generation,
        };
        if deadline != 0 {
            self.push_entry(&mut inner, slot, deadline);
            drop(inner);
            self.wakeup.notify_one();
        }
        handle
    }

    /// Moves a timer to a new deadline; 0 disarms it. The handle stays
    /// valid either way.
    pub fn reschedule(&self, handle: TimerHandle, deadline: u32) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(handle.slot) else {
            return;
        };
        if !slot.live || slot.generation != handle.generation {
            return;
        }
        slot.epoch += 1;
        slot.deadline = deadline;
        slot.armed = deadline != 0;
        if deadline != 0 {
            self.push_entry(&mut inner, handle.slot, deadline);
            drop(inner);
            self.wakeup.notify_one();
        }
    }

    /// Permanently removes a timer. The timer will not fire again; a
    /// callback already executing on the scheduler thread may still
    /// complete concurrently.
    pub fn unregister(&self, handle: TimerHandle) {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.slots.get_mut(handle.slot) else {
            return;
        };
        if !slot.live || slot.generation != handle.generation {
            return;
        }
        slot.live = false;
        slot.armed = false;
        slot.epoch += 1;
        slot.callback = None;
        inner.free.push(handle.slot);
    }

    /// Wrap-safe deadline comparison, exposed for peripherals.
    pub fn compare(&self, a: u32, b: u32) -> std::cmp::Ordering {
        crate::clock::tick_cmp(a, b)
    }

    /// Number of armed timers (current entries only).
    pub fn armed_len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter(|slot| slot.live && slot.armed)
            .count()
    }

    fn push_entry(&self, inner: &mut Inner, slot: usize, deadline: u32) {
        inner.seq += 1;
        let entry = Entry {
            deadline,
            seq: inner.seq,
            slot,
            generation: inner.slots[slot].generation,
            epoch: inner.slots[slot].epoch,
        };
        inner.heap.push(entry);
    }

    /// Dispatches every timer due at or before the current tick. Returns
    /// the number of callbacks invoked. This is the scheduler thread's loop
    /// body, and the direct entry point for deterministic tests.
    pub fn run_pending(&self) -> usize {
        let mut dispatched = 0;
        loop {
            let mut fault_reason = None;
            let mut inner = self.inner.lock();
            let now = self.clock.now();
            let entry = loop {
                let Some(top) = inner.heap.peek().copied() else {
                    break None;
                };
                if !inner.entry_current(&top) {
                    inner.heap.pop();
                    continue;
                }
                if tick_after(top.deadline, now) {
                    break None;
                }
                break inner.heap.pop();
            };
            let Some(entry) = entry else {
                return dispatched;
            };

            // Lag watchdog: a deadline serviced far behind `now` means the
            // callback load exceeds the tick budget.
            if now.wrapping_sub(entry.deadline) > self.max_lag {
                inner.lag_strikes += 1;
                if inner.lag_strikes >= LAG_STRIKES {
                    inner.lag_strikes = 0;
                    fault_reason = Some(FAULT_TIMER_LAG);
                }
            } else {
                inner.lag_strikes = 0;
            }

            let slot = &mut inner.slots[entry.slot];
            let Some(mut callback) = slot.callback.take() else {
                continue;
            };
            let epoch = entry.epoch;
            drop(inner);

            if let Some(reason) = fault_reason {
                self.raise_fault(reason);
            }

            let result = catch_unwind(AssertUnwindSafe(|| callback(now)));
            dispatched += 1;

            let mut inner = self.inner.lock();
            let slot = &mut inner.slots[entry.slot];
            let still_same = slot.live && slot.generation == entry.generation;
            if still_same {
                slot.callback = Some(callback);
            }
            match result {
                Ok(next) => {
                    inner.panic_strikes = 0;
                    // Apply the return value only if nothing rescheduled or
                    // tore the timer down while the callback ran.
                    if still_same && inner.slots[entry.slot].epoch == epoch {
                        let slot = &mut inner.slots[entry.slot];
                        if next != 0 {
                            slot.epoch += 1;
                            slot.deadline = next;
                            slot.armed = true;
                            self.push_entry(&mut inner, entry.slot, next);
                        } else {
                            slot.armed = false;
                        }
                    }
                }
                Err(_) => {
                    error!(slot = entry.slot, "timer callback panicked; unregistering");
                    if still_same {
                        let slot = &mut inner.slots[entry.slot];
                        slot.live = false;
                        slot.armed = false;
                        slot.callback = None;
                        inner.free.push(entry.slot);
                    }
                    inner.panic_strikes += 1;
                    let escalate = inner.panic_strikes >= PANIC_STRIKES;
                    if escalate {
                        inner.panic_strikes = 0;
                    }
                    drop(inner);
                    if escalate {
                        self.raise_fault(FAULT_CALLBACK);
                    }
                    continue;
                }
            }
        }
    }

    fn raise_fault(&self, reason: &'static str) {
        warn!(reason, "scheduler fault");
        if let Some(hook) = self.fault.lock().as_mut() {
            hook(reason);
        }
    }

    /// The scheduler thread body: dispatch due timers, then sleep until
    /// kicked by the ticker or a registration.
    pub fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            if self.run_pending() == 0 {
                let mut inner = self.inner.lock();
                if inner.heap.len() == 0 {
                    self.wakeup.wait_for(&mut inner, Duration::from_millis(5));
                } else {
                    self.wakeup
                        .wait_for(&mut inner, Duration::from_micros(200));
                }
            }
        }
    }

    /// Wakes the scheduler thread; called by the ticker after advancing
    /// the clock.
    pub fn kick(&self) {
        self.wakeup.notify_one();
    }

    /// Stops the scheduler thread at the next loop iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fixture() -> (Arc<Clock>, Arc<Scheduler>) {
        let clock = Arc::new(Clock::new(1_000_000));
        let sched = Scheduler::new(clock.clone());
        (clock, sched)
    }

    #[test]
    fn test_dispatch_in_deadline_order() {
        let (clock, sched) = fixture();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, deadline) in [(1u32, 300u32), (2, 100), (3, 200)] {
            let order = order.clone();
            sched.register(
                Box::new(move |_| {
                    order.lock().push(tag);
                    0
                }),
                deadline,
            );
        }
        clock.advance(1000);
        sched.run_pending();
        assert_eq!(*order.lock(), vec![2, 3, 1]);
    }

    #[test]
    fn test_callback_return_reschedules() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        sched.register(
            Box::new(move |now| {
                counter.fetch_add(1, Ordering::SeqCst);
                if counter.load(Ordering::SeqCst) < 3 {
                    now + 10
                } else {
                    0
                }
            }),
            10,
        );
        for _ in 0..5 {
            clock.advance(100);
            sched.run_pending();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(sched.armed_len(), 0);
    }

    #[test]
    fn test_timer_does_not_fire_early() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        sched.register(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
            500,
        );
        clock.advance(499);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        clock.advance(1);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reschedule_moves_deadline() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let handle = sched.register(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
            100,
        );
        sched.reschedule(handle, 5000);
        clock.advance(1000);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        clock.advance(4000);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reschedule_zero_disarms() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let handle = sched.register(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
            100,
        );
        sched.reschedule(handle, 0);
        clock.advance(1000);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        // The handle survives a disarm.
        sched.reschedule(handle, 1500);
        clock.advance(1000);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_prevents_fire() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let handle = sched.register(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
            100,
        );
        sched.unregister(handle);
        clock.advance(1000);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_register_other_timers() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let sched2 = sched.clone();
        sched.register(
            Box::new(move |now| {
                let counter = counter.clone();
                sched2.register(
                    Box::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        0
                    }),
                    now + 10,
                );
                0
            }),
            100,
        );
        clock.advance(1000);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_across_wraparound() {
        let (clock, sched) = fixture();
        clock.advance(u32::MAX - 50);
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        // Deadline is numerically tiny but chronologically in the future.
        sched.register(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
            20,
        );
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        clock.advance(100);
        sched.run_pending();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sustained_lag_raises_fault() {
        let (clock, sched) = fixture();
        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = faults.clone();
        sched.set_fault_hook(Box::new(move |reason| seen.lock().push(reason)));
        for deadline in 1..=40 {
            sched.register(Box::new(|_| 0), deadline);
        }
        // Every dispatch services a deadline far behind the clock.
        clock.advance(10_000_000);
        sched.run_pending();
        assert_eq!(faults.lock().as_slice(), &[FAULT_TIMER_LAG]);
    }

    #[test]
    fn test_panicking_callback_is_unregistered() {
        let (clock, sched) = fixture();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        sched.register(Box::new(|_| panic!("boom")), 10);
        sched.register(
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }),
            20,
        );
        clock.advance(1000);
        sched.run_pending();
        // The survivor still ran and the panicking timer is gone.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(sched.armed_len(), 0);
    }
}
