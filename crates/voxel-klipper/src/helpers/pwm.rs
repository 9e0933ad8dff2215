//! The hardware-PWM output wrapper.
//!
//! Duty changes are queued against future clocks; the max-duration safety
//! net mirrors the digital-out wrapper's, with the PWM-specific shutdown
//! reasons.

use crate::frontend::Frontend;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use voxel_core::clock::tick_before;
use voxel_core::object::{ObjectId, OptValue, Options};
use voxel_core::timers::TimerHandle;

#[derive(Clone, Copy)]
struct PwmEvent {
    clock: u32,
    value: u16,
}

struct PwmState {
    value: u16,
    default_value: u16,
    cycle_ticks: u32,
    max_duration: u32,
    end_time: u32,
    check_end: bool,
    events: VecDeque<PwmEvent>,
}

pub struct PwmOut {
    oid: u8,
    object: ObjectId,
    front: Weak<Frontend>,
    pwm_max: u16,
    timer: TimerHandle,
    state: Mutex<PwmState>,
}

impl PwmOut {
    pub fn new(front: &Arc<Frontend>, oid: u8, object: ObjectId) -> Arc<Self> {
        let pwm_max = front.registry().board().pwm_max;
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.on_timer(now))),
                0,
            );
            PwmOut {
                oid,
                object,
                front: Arc::downgrade(front),
                pwm_max,
                timer,
                state: Mutex::new(PwmState {
                    value: 0,
                    default_value: 0,
                    cycle_ticks: 0,
                    max_duration: 0,
                    end_time: 0,
                    check_end: false,
                    events: VecDeque::new(),
                }),
            }
        })
    }

    pub fn oid(&self) -> u8 {
        self.oid
    }

    pub fn timer(&self) -> TimerHandle {
        self.timer
    }

    /// Validates and applies the configured cycle parameters.
    pub fn set_params(
        &self,
        cycle_ticks: u32,
        value: u16,
        default_value: u16,
        max_duration: u32,
    ) -> bool {
        if value > self.pwm_max || default_value > self.pwm_max || cycle_ticks == 0 {
            return false;
        }
        let Some(front) = self.front.upgrade() else {
            return false;
        };
        {
            let mut st = self.state.lock();
            st.cycle_ticks = cycle_ticks;
            st.value = value;
            st.default_value = default_value;
            st.max_duration = max_duration;
        }
        self.apply(&front, value);
        true
    }

    /// Queues a duty change at a future clock.
    pub fn queue(&self, clock: u32, value: u16) -> bool {
        if value > self.pwm_max {
            return false;
        }
        let Some(front) = self.front.upgrade() else {
            return false;
        };
        let mut st = self.state.lock();
        st.events.push_back(PwmEvent { clock, value });
        if st.events.len() == 1 {
            front.sched().reschedule(self.timer, clock);
        }
        true
    }

    /// Drives the backing PWM object. Completion failures surface as a
    /// duty-cycle shutdown.
    fn apply(&self, front: &Frontend, value: u16) {
        let percent = value as f64 * 100.0 / self.pwm_max as f64;
        let mut opts = Options::new();
        opts.set("cycle", OptValue::Float(percent));
        let weak = self.front.clone();
        match front.resolve_and_queue(self.object, "set_cycle", opts, move |_, status, _| {
            if status < 0 {
                if let Some(front) = weak.upgrade() {
                    front.shutdown("Failed to set PWM duty cycle");
                }
            }
        }) {
            Ok(()) => {}
            Err(()) => front.shutdown("Failed to set PWM duty cycle"),
        }
    }

    fn on_timer(&self, _now: u32) -> u32 {
        let Some(front) = self.front.upgrade() else {
            return 0;
        };
        let mut st = self.state.lock();
        let Some(event) = st.events.pop_front() else {
            if st.check_end {
                drop(st);
                front.shutdown("Missed scheduling of next PWM out event");
            }
            return 0;
        };
        st.value = event.value;
        let off_default = event.value != st.default_value;
        if let Some(next) = st.events.front().copied() {
            if off_default
                && st.max_duration != 0
                && tick_before(event.clock.wrapping_add(st.max_duration), next.clock)
            {
                drop(st);
                front.shutdown("PWM move exceeds max duration");
                return 0;
            }
            drop(st);
            self.apply(&front, event.value);
            return next.clock;
        }
        let next = if off_default && st.max_duration != 0 {
            st.check_end = true;
            st.end_time = event.clock.wrapping_add(st.max_duration);
            st.end_time
        } else {
            st.check_end = false;
            0
        };
        drop(st);
        self.apply(&front, event.value);
        next
    }
}
