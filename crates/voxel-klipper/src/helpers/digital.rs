//! The digital-out wrapper: immediate sets, scheduled level changes, soft
//! PWM cycling, and the max-duration safety deadline.

use crate::frontend::Frontend;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::debug;
use voxel_core::atomic::{stepper_bits, PinWord};
use voxel_core::clock::{tick_after, tick_before};
use voxel_core::object::{ObjectId, OptValue, Options};
use voxel_core::timers::TimerHandle;

const F_ON: u8 = 1 << 0;
const F_TOGGLING: u8 = 1 << 1;
const F_CHECK_END: u8 = 1 << 2;
const F_DEFAULT_ON: u8 = 1 << 3;

/// Where a digital-out wrapper writes its level.
pub enum PinSink {
    /// A plain digital-pin object, driven through the bus.
    Bus { object: ObjectId },
    /// A whole shared word holding a 0/1 level (heater pins).
    Level(Arc<PinWord>),
    /// The ENABLE bit of a stepper's shared control word.
    EnableBit(Arc<PinWord>),
}

#[derive(Clone, Copy)]
struct Cycle {
    waketime: u32,
    on_ticks: u32,
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    /// Waiting for (or servicing) the next scheduled cycle.
    Event,
    /// Soft-PWM toggling between on and off durations.
    Toggling,
    /// The `update` safety deadline: revert to the default level.
    Safety,
}

struct DigState {
    mode: Mode,
    flags: u8,
    cycles: VecDeque<Cycle>,
    end_time: u32,
    max_duration: u32,
    cycle_ticks: u32,
    waketime: u32,
    on_duration: u32,
    off_duration: u32,
}

pub struct DigitalOut {
    oid: u8,
    front: Weak<Frontend>,
    sink: PinSink,
    timer: TimerHandle,
    state: Mutex<DigState>,
}

impl DigitalOut {
    pub fn new(front: &Arc<Frontend>, oid: u8, sink: PinSink) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.on_timer(now))),
                0,
            );
            DigitalOut {
                oid,
                front: Arc::downgrade(front),
                sink,
                timer,
                state: Mutex::new(DigState {
                    mode: Mode::Event,
                    flags: 0,
                    cycles: VecDeque::new(),
                    end_time: 0,
                    max_duration: 0,
                    cycle_ticks: 0,
                    waketime: 0,
                    on_duration: 0,
                    off_duration: 0,
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

    fn set_pin(&self, front: &Frontend, on: bool) {
        match &self.sink {
            PinSink::Bus { object } => {
                let mut opts = Options::new();
                opts.set("state", OptValue::Int(on as i64));
                front.submit(*object, "set", opts);
            }
            PinSink::Level(word) => word.store(on as u32),
            PinSink::EnableBit(word) => {
                if on {
                    word.fetch_or(stepper_bits::ENABLE);
                } else {
                    word.fetch_and(!stepper_bits::ENABLE);
                }
            }
        }
    }

    pub fn set_initial_value(&self, value: bool, default_value: bool) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        st.flags = if value { F_ON } else { 0 };
        if default_value {
            st.flags |= F_DEFAULT_ON;
        }
        self.set_pin(&front, value);
    }

    pub fn set_max_duration(&self, ticks: u32) {
        self.state.lock().max_duration = ticks;
    }

    pub fn set_cycle_ticks(&self, ticks: u32) {
        self.state.lock().cycle_ticks = ticks;
    }

    /// Enqueues a future level change (or soft-PWM cycle start).
    pub fn schedule_cycle(&self, start: u32, on_ticks: u32) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        // A pending safety deadline bounds how far out a new event may be.
        if st.mode == Mode::Safety
            && st.flags & F_CHECK_END != 0
            && tick_before(st.end_time, start)
        {
            drop(st);
            front.shutdown("Scheduled digital out event will exceed max duration");
            return;
        }
        st.cycles.push_back(Cycle {
            waketime: start,
            on_ticks,
        });
        debug!(oid = self.oid, start, on_ticks, queued = st.cycles.len(), "cycle scheduled");
        if st.cycles.len() > 1 {
            return;
        }
        st.end_time = start;
        st.flags |= F_CHECK_END;
        if !(st.flags & F_TOGGLING != 0 && tick_before(st.waketime, start)) {
            st.mode = Mode::Event;
            st.waketime = start;
            front.sched().reschedule(self.timer, start);
        }
    }

    /// Immediate level set, arming the safety deadline when the level is
    /// held away from its default.
    pub fn update(&self, value: bool) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        front.sched().reschedule(self.timer, 0);
        st.cycles.clear();
        self.set_pin(&front, value);
        let default_on = st.flags & F_DEFAULT_ON != 0;
        st.flags = (st.flags & F_DEFAULT_ON) | if value { F_ON } else { 0 };
        if value != default_on && st.max_duration != 0 {
            st.flags |= F_CHECK_END;
            st.mode = Mode::Safety;
            st.end_time = front.now().wrapping_add(st.max_duration);
            st.waketime = st.end_time;
            front.sched().reschedule(self.timer, st.end_time);
        } else {
            st.flags &= !F_CHECK_END;
        }
    }

    fn on_timer(&self, now: u32) -> u32 {
        let Some(front) = self.front.upgrade() else {
            return 0;
        };
        let mut st = self.state.lock();
        match st.mode {
            Mode::Event => self.event(&front, &mut st),
            Mode::Toggling => self.toggling(&front, &mut st),
            Mode::Safety => self.safety(&front, &mut st, now),
        }
    }

    /// Services the next scheduled cycle at its waketime.
    fn event(&self, front: &Frontend, st: &mut DigState) -> u32 {
        let Some(cycle) = st.cycles.pop_front() else {
            front.shutdown("Missed scheduling of next digital out event");
            return 0;
        };
        let on = cycle.on_ticks > 0;
        self.set_pin(front, on);
        let mut flags = if on { F_ON } else { 0 };
        let mut end_time = 0u32;
        let default_on = st.flags & F_DEFAULT_ON != 0;
        if !on || cycle.on_ticks >= st.cycle_ticks {
            // Steady level for this cycle.
            if on != default_on && st.max_duration != 0 {
                end_time = st.waketime.wrapping_add(st.max_duration);
                flags |= F_CHECK_END;
            }
        } else {
            flags |= F_TOGGLING;
            if st.max_duration != 0 {
                end_time = st.waketime.wrapping_add(st.max_duration);
                flags |= F_CHECK_END;
            }
        }
        if let Some(next) = st.cycles.front() {
            if flags & F_CHECK_END != 0 && tick_before(end_time, next.waketime) {
                front.shutdown("Scheduled digital out event will exceed max duration");
                return 0;
            }
            end_time = next.waketime;
            flags |= F_CHECK_END;
        }
        st.end_time = end_time;
        st.flags = flags | (st.flags & F_DEFAULT_ON);
        if flags & F_TOGGLING == 0 {
            if flags & F_CHECK_END == 0 {
                return 0;
            }
            st.waketime = end_time;
            return end_time;
        }
        let waketime = st.waketime.wrapping_add(cycle.on_ticks);
        if flags & F_CHECK_END != 0 && tick_after(waketime, end_time) {
            st.waketime = end_time;
            return end_time;
        }
        st.mode = Mode::Toggling;
        st.waketime = waketime;
        st.on_duration = cycle.on_ticks;
        st.off_duration = st.cycle_ticks.wrapping_sub(cycle.on_ticks);
        waketime
    }

    /// Soft-PWM edge: flip the level and pick the matching duration.
    fn toggling(&self, front: &Frontend, st: &mut DigState) -> u32 {
        st.flags ^= F_ON;
        self.set_pin(front, st.flags & F_ON != 0);
        let mut waketime = st.waketime.wrapping_add(if st.flags & F_ON != 0 {
            st.on_duration
        } else {
            st.off_duration
        });
        if st.flags & F_CHECK_END != 0 && tick_after(waketime, st.end_time) {
            st.mode = Mode::Event;
            waketime = st.end_time;
        }
        st.waketime = waketime;
        waketime
    }

    /// The `update` safety deadline expired: revert the pin to its default
    /// level.
    fn safety(&self, front: &Frontend, st: &mut DigState, now: u32) -> u32 {
        let default_on = st.flags & F_DEFAULT_ON != 0;
        debug!(oid = self.oid, now, default_on, "max duration reached, reverting");
        self.set_pin(front, default_on);
        st.flags = (st.flags & F_DEFAULT_ON) | if default_on { F_ON } else { 0 };
        st.mode = Mode::Event;
        0
    }
}
