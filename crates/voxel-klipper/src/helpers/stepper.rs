//! The stepper pulse engine.
//!
//! Generates step pulses from queued moves with accel-ramped intervals.
//! The step counter lives in the shared pin word (incremented atomically
//! per pulse); direction changes toggle the word's DIR bit.

use crate::frontend::Frontend;
use crate::move_queue::Move;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;
use voxel_core::atomic::{stepper_bits, PinWord};
use voxel_core::clock::{tick_after, tick_before};
use voxel_core::object::ObjectId;
use voxel_core::timers::TimerHandle;

struct StepState {
    next_dir: u8,
    needs_reset: bool,
    interval: u32,
    count: u16,
    add: i16,
    dir: u8,
    next_step_time: u32,
    position: i32,
}

pub struct StepperPulse {
    oid: u8,
    object: ObjectId,
    front: Weak<Frontend>,
    word: Arc<PinWord>,
    step_pulse: u32,
    timer: TimerHandle,
    state: Mutex<StepState>,
}

impl StepperPulse {
    pub fn new(
        front: &Arc<Frontend>,
        oid: u8,
        object: ObjectId,
        word: Arc<PinWord>,
        invert_step: u8,
        step_pulse: u32,
    ) -> Arc<Self> {
        // An inverted step pin changes the idle polarity, not the pulse
        // count; the counter semantics are unaffected.
        let _ = invert_step;
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.send_step(now))),
                0,
            );
            StepperPulse {
                oid,
                object,
                front: Arc::downgrade(front),
                word,
                step_pulse,
                timer,
                state: Mutex::new(StepState {
                    next_dir: 0,
                    needs_reset: false,
                    interval: 0,
                    count: 0,
                    add: 0,
                    dir: 0,
                    next_step_time: 0,
                    position: 0,
                }),
            }
        })
    }

    pub fn oid(&self) -> u8 {
        self.oid
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn timer(&self) -> TimerHandle {
        self.timer
    }

    pub fn pin_word(&self) -> &Arc<PinWord> {
        &self.word
    }

    pub fn set_next_dir(&self, dir: u8) {
        self.state.lock().next_dir = dir & 1;
    }

    /// Appends a move; arms the pulse timer when the engine is idle.
    pub fn queue_move(&self, interval: u32, count: u16, add: i16) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        if st.needs_reset {
            // Moves queued after a trigger stop are dropped until the host
            // reseeds the step clock.
            return;
        }
        if count == 0 {
            drop(st);
            front.shutdown("Invalid count parameter");
            return;
        }
        let queued = front.moves().put(
            self.oid,
            Move {
                interval,
                count,
                add,
                dir: st.next_dir,
            },
        );
        if !queued {
            debug!(oid = self.oid, "move queue full, dropping move");
            return;
        }
        if st.count == 0 {
            let timeout = self.next_move(&front, &mut st);
            front.sched().reschedule(self.timer, timeout);
        }
    }

    /// Seeds the step clock and re-enables the engine after a trigger
    /// stop.
    pub fn reset_clock(&self, clock: u32) {
        let mut st = self.state.lock();
        st.next_step_time = clock;
        st.needs_reset = false;
    }

    pub fn position(&self) -> i32 {
        self.state.lock().position
    }

    /// The cancellation signal handed to a TRSync.
    pub fn stop_signal(self: &Arc<Self>) -> Box<dyn FnMut(u8) + Send> {
        let weak = Arc::downgrade(self);
        Box::new(move |_reason| {
            if let Some(stepper) = weak.upgrade() {
                stepper.stop_moves();
            }
        })
    }

    /// Halts pulse generation: clears the queue and the DIR bit, and
    /// requires a `reset_step_clock` before new moves are accepted.
    pub fn stop_moves(&self) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        front.sched().reschedule(self.timer, 0);
        st.count = 0;
        st.needs_reset = true;
        front.moves().clear_oid(self.oid);
        self.word.fetch_and(!stepper_bits::DIR);
    }

    /// Dequeues the next move, accounting position and direction.
    fn next_move(&self, front: &Frontend, st: &mut StepState) -> u32 {
        let Some(m) = front.moves().pop(self.oid) else {
            return 0;
        };
        if st.dir != m.dir {
            self.word.fetch_xor(stepper_bits::DIR);
        }
        st.position = st
            .position
            .wrapping_add(m.count as i32 * if m.dir != 0 { 1 } else { -1 });
        st.next_step_time = st.next_step_time.wrapping_add(m.interval);
        st.interval = m.interval.wrapping_add(m.add as u32);
        st.count = m.count;
        st.add = m.add;
        st.dir = m.dir;
        st.next_step_time
    }

    /// Computes the tick of the next pulse, clamped to keep the step-high
    /// window at least `step_pulse` wide.
    fn calc_step_time(&self, front: &Frontend, st: &mut StepState, now: u32) -> u32 {
        let min_step = now.wrapping_add(self.step_pulse);
        if st.count > 0 {
            st.next_step_time = st.next_step_time.wrapping_add(st.interval);
            st.interval = st.interval.wrapping_add(st.add as u32);
            if tick_before(st.next_step_time, min_step) {
                return min_step;
            }
            return st.next_step_time;
        }
        let timeout = self.next_move(front, st);
        if timeout == 0 || tick_after(timeout, min_step) {
            return timeout;
        }
        min_step
    }

    /// The pulse timer callback.
    fn send_step(&self, now: u32) -> u32 {
        let Some(front) = self.front.upgrade() else {
            return 0;
        };
        let mut st = self.state.lock();
        self.word.inc();
        st.count = st.count.saturating_sub(1);
        self.calc_step_time(&front, &mut st, now)
    }
}
