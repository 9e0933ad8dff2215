//! Trigger-sync objects.
//!
//! A TRSync fans one trigger out to registered signal handlers (stepper
//! stops, in practice), reports its state to the host on a cadence, and
//! enforces a host-supplied expiry timeout.

use crate::frontend::Frontend;
use crate::proto_defs::TRSYNC_STATE;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use voxel_core::timers::TimerHandle;
use voxel_proto::message::ParamValue;

type Signal = Box<dyn FnMut(u8) + Send>;

struct TrState {
    can_trigger: bool,
    trigger_reason: u8,
    expire_reason: u8,
    report_ticks: u32,
    signals: Vec<Signal>,
}

pub struct TrSync {
    oid: u8,
    front: Weak<Frontend>,
    report_timer: TimerHandle,
    expire_timer: TimerHandle,
    state: Mutex<TrState>,
}

impl TrSync {
    pub fn new(front: &Arc<Frontend>, oid: u8) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let report_timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.report_handler(now))),
                0,
            );
            let cb = weak.clone();
            let expire_timer = front.sched().register(
                Box::new(move |_| {
                    if let Some(trsync) = cb.upgrade() {
                        trsync.expire_handler();
                    }
                    0
                }),
                0,
            );
            TrSync {
                oid,
                front: Arc::downgrade(front),
                report_timer,
                expire_timer,
                state: Mutex::new(TrState {
                    can_trigger: false,
                    trigger_reason: 0,
                    expire_reason: 0,
                    report_ticks: 0,
                    signals: Vec::new(),
                }),
            }
        })
    }

    pub fn oid(&self) -> u8 {
        self.oid
    }

    pub fn report_timer(&self) -> TimerHandle {
        self.report_timer
    }

    pub fn expire_timer(&self) -> TimerHandle {
        self.expire_timer
    }

    /// Arms the sync object: clears prior state and starts periodic
    /// reporting (a zero cadence disables reports).
    pub fn start(&self, report_clock: u32, report_ticks: u32, expire_reason: u8) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let mut st = self.state.lock();
        st.signals.clear();
        st.can_trigger = true;
        st.trigger_reason = 0;
        st.report_ticks = report_ticks;
        st.expire_reason = expire_reason;
        front.sched().reschedule(self.expire_timer, 0);
        front
            .sched()
            .reschedule(self.report_timer, if report_ticks != 0 { report_clock } else { 0 });
    }

    /// Schedules the auto-trigger deadline. Ignored once triggered.
    pub fn set_timeout(&self, clock: u32) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        if self.state.lock().can_trigger {
            front.sched().reschedule(self.expire_timer, clock);
        }
    }

    /// Registers a handler invoked (at most once) on trigger.
    pub fn add_signal(&self, signal: Signal) {
        self.state.lock().signals.push(signal);
    }

    /// Fires the trigger: idempotent after the first call. Invokes every
    /// registered signal exactly once and emits an immediate state report.
    pub fn do_trigger(&self, reason: u8) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let signals = {
            let mut st = self.state.lock();
            if !st.can_trigger {
                return;
            }
            st.can_trigger = false;
            st.trigger_reason = reason;
            std::mem::take(&mut st.signals)
        };
        for mut signal in signals {
            signal(reason);
        }
        self.report(front.now(), None);
    }

    /// Host-requested trigger: fires and cancels both timers.
    pub fn trigger(&self, reason: u8) {
        self.do_trigger(reason);
        if let Some(front) = self.front.upgrade() {
            front.sched().reschedule(self.report_timer, 0);
            front.sched().reschedule(self.expire_timer, 0);
        }
    }

    /// Emits one `trsync_state` report.
    pub fn report(&self, ticks: u32, reason: Option<u8>) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        let (can_trigger, trigger_reason) = {
            let st = self.state.lock();
            (st.can_trigger, reason.unwrap_or(st.trigger_reason))
        };
        front.respond(
            &TRSYNC_STATE,
            &[
                ("oid", ParamValue::Uint(self.oid as u32)),
                ("can_trigger", ParamValue::Uint(can_trigger as u32)),
                ("trigger_reason", ParamValue::Uint(trigger_reason as u32)),
                ("clock", ParamValue::Uint(ticks)),
            ],
        );
    }

    fn report_handler(&self, ticks: u32) -> u32 {
        self.report(ticks, None);
        let report_ticks = self.state.lock().report_ticks;
        if report_ticks == 0 {
            return 0;
        }
        ticks.wrapping_add(report_ticks)
    }

    fn expire_handler(&self) {
        let reason = self.state.lock().expire_reason;
        self.do_trigger(reason);
    }
}
