//! The endstop homing sampler.
//!
//! Klipper wants the endstop pin to read at its trigger level for a number
//! of consecutive samples before the trigger fires, so homing runs a
//! two-phase sample/oversample state machine rather than reacting to a
//! single edge.

use crate::frontend::Frontend;
use crate::helpers::trsync::TrSync;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use voxel_core::atomic::PinWord;
use voxel_core::timers::TimerHandle;

#[derive(Clone, Copy, PartialEq)]
enum SampleMode {
    Idle,
    Sample,
    Oversample,
}

struct EndState {
    mode: SampleMode,
    sample_time: u32,
    sample_count: u8,
    rest_time: u32,
    trigger_count: u8,
    trigger_reason: u8,
    pin_value: u8,
    nextwake: u32,
    trsync: Option<Arc<TrSync>>,
    homing: bool,
}

pub struct EndstopSampler {
    oid: u8,
    front: Weak<Frontend>,
    word: Arc<PinWord>,
    timer: TimerHandle,
    state: Mutex<EndState>,
}

impl EndstopSampler {
    pub fn new(front: &Arc<Frontend>, oid: u8, word: Arc<PinWord>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.on_timer(now))),
                0,
            );
            EndstopSampler {
                oid,
                front: Arc::downgrade(front),
                word,
                timer,
                state: Mutex::new(EndState {
                    mode: SampleMode::Idle,
                    sample_time: 0,
                    sample_count: 0,
                    rest_time: 0,
                    trigger_count: 0,
                    trigger_reason: 0,
                    pin_value: 1,
                    nextwake: 0,
                    trsync: None,
                    homing: false,
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

    /// Starts a scheduled homing query at `clock`.
    #[allow(clippy::too_many_arguments)]
    pub fn home(
        &self,
        clock: u32,
        sample_ticks: u32,
        sample_count: u8,
        rest_ticks: u32,
        pin_value: u8,
        trsync: Option<Arc<TrSync>>,
        trigger_reason: u8,
    ) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        front.sched().reschedule(self.timer, 0);
        st.sample_time = sample_ticks;
        st.sample_count = sample_count;
        if sample_count == 0 {
            st.homing = false;
            st.mode = SampleMode::Idle;
            st.trsync = None;
            return;
        }
        st.rest_time = rest_ticks;
        st.trigger_count = sample_count;
        st.trigger_reason = trigger_reason;
        st.pin_value = pin_value;
        st.trsync = trsync;
        st.homing = true;
        st.mode = SampleMode::Sample;
        front.sched().reschedule(self.timer, clock);
    }

    /// Snapshot for `endstop_query_state`.
    pub fn query_state(&self) -> (bool, u32, bool) {
        let st = self.state.lock();
        (st.homing, st.nextwake, self.level())
    }

    fn level(&self) -> bool {
        self.word.load() & 1 != 0
    }

    fn triggered(&self, st: &EndState) -> bool {
        self.level() == (st.pin_value != 0)
    }

    fn on_timer(&self, now: u32) -> u32 {
        let mut st = self.state.lock();
        match st.mode {
            SampleMode::Idle => 0,
            SampleMode::Sample => self.sample(&mut st, now),
            SampleMode::Oversample => self.oversample(&mut st, now),
        }
    }

    fn sample(&self, st: &mut EndState, now: u32) -> u32 {
        if !self.triggered(st) {
            return now.wrapping_add(st.rest_time);
        }
        // First time the pin reads triggered: confirm it over
        // `sample_count` consecutive samples.
        st.nextwake = now.wrapping_add(st.rest_time);
        st.mode = SampleMode::Oversample;
        self.oversample(st, now)
    }

    fn oversample(&self, st: &mut EndState, now: u32) -> u32 {
        if !self.triggered(st) {
            // Bounce: go back to coarse sampling.
            st.mode = SampleMode::Sample;
            st.trigger_count = st.sample_count;
            return st.nextwake;
        }
        st.trigger_count -= 1;
        if st.trigger_count == 0 {
            st.homing = false;
            st.mode = SampleMode::Idle;
            if let Some(trsync) = st.trsync.take() {
                trsync.do_trigger(st.trigger_reason);
            }
            return 0;
        }
        now.wrapping_add(st.sample_time)
    }
}
