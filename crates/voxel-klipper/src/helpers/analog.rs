//! The analog-in (ADC) sampler.
//!
//! Oversamples the backing thermistor's ADC value, range-checks the summed
//! result, and reports it to the host with the next query clock.

use crate::frontend::Frontend;
use crate::proto_defs::QUERY_ANALOG_IN;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use voxel_core::object::ObjectId;
use voxel_core::timers::TimerHandle;
use voxel_proto::message::ParamValue;

struct AnalogState {
    query_time: u32,
    query_sleep_time: u32,
    max_sample_count: u8,
    sample_count: u8,
    rest_ticks: u32,
    value: u32,
    min_value: u32,
    max_value: u32,
    invalid_count: u8,
    range_check_count: u8,
}

pub struct AnalogPin {
    oid: u8,
    object: ObjectId,
    front: Weak<Frontend>,
    timer: TimerHandle,
    state: Mutex<AnalogState>,
}

impl AnalogPin {
    pub fn new(front: &Arc<Frontend>, oid: u8, object: ObjectId) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.on_timer(now))),
                0,
            );
            AnalogPin {
                oid,
                object,
                front: Arc::downgrade(front),
                timer,
                state: Mutex::new(AnalogState {
                    query_time: 0,
                    query_sleep_time: 0,
                    max_sample_count: 0,
                    sample_count: 0,
                    rest_ticks: 0,
                    value: 0,
                    min_value: 0,
                    max_value: u32::MAX,
                    invalid_count: 0,
                    range_check_count: 0,
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

    /// Arms a periodic oversampled query starting at `clock`.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_query(
        &self,
        clock: u32,
        sample_ticks: u32,
        sample_count: u8,
        rest_ticks: u32,
        min_value: u32,
        max_value: u32,
        range_check_count: u8,
    ) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        st.query_time = clock;
        st.query_sleep_time = sample_ticks;
        st.max_sample_count = sample_count;
        st.sample_count = 0;
        st.rest_ticks = rest_ticks;
        st.value = 0;
        st.min_value = min_value;
        st.max_value = max_value;
        st.invalid_count = 0;
        st.range_check_count = range_check_count;
        front.sched().reschedule(self.timer, clock);
    }

    fn on_timer(&self, now: u32) -> u32 {
        let Some(front) = self.front.upgrade() else {
            return 0;
        };
        let adc = front
            .query_one(self.object)
            .and_then(|status| status.get("adc").and_then(|v| v.as_u32()))
            .unwrap_or(0);
        let mut st = self.state.lock();
        st.value = st.value.wrapping_add(adc);
        st.sample_count += 1;
        if st.sample_count < st.max_sample_count {
            return now.wrapping_add(st.query_sleep_time);
        }
        let value = st.value;
        if value >= st.min_value && value <= st.max_value {
            st.invalid_count = 0;
        } else {
            st.invalid_count += 1;
            if st.invalid_count >= st.range_check_count {
                drop(st);
                front.shutdown("ADC out of range");
                return 0;
            }
        }
        st.query_time = st.query_time.wrapping_add(st.rest_ticks);
        let next_clock = st.query_time;
        st.value = 0;
        st.sample_count = 0;
        drop(st);
        front.respond(
            &QUERY_ANALOG_IN,
            &[
                ("oid", ParamValue::Uint(self.oid as u32)),
                ("next_clock", ParamValue::Uint(next_clock)),
                ("value", ParamValue::Uint(value & 0xffff)),
            ],
        );
        next_clock
    }
}
