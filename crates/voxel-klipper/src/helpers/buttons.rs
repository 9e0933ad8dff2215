//! The button bank wrapper.
//!
//! Polls up to a fixed set of bound input pins on a host-supplied cadence
//! and reports state diffs as packed bit bytes.

use crate::frontend::Frontend;
use crate::proto_defs::BUTTONS_QUERY;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use voxel_core::object::ObjectId;
use voxel_core::timers::TimerHandle;
use voxel_proto::message::ParamValue;

/// Most pins one bank may bind.
pub const MAX_BUTTONS: u8 = 8;

#[derive(Clone)]
struct Binding {
    object: ObjectId,
    pin: String,
}

struct BtnState {
    buttons: Vec<Option<Binding>>,
    rest_ticks: u32,
    retransmit_count: u8,
    invert: u8,
    ack_count: u8,
    last_state: Option<Vec<u8>>,
    pending_retransmits: u8,
}

pub struct ButtonBank {
    oid: u8,
    front: Weak<Frontend>,
    timer: TimerHandle,
    state: Mutex<BtnState>,
}

impl ButtonBank {
    pub fn new(front: &Arc<Frontend>, oid: u8, button_count: u8) -> Option<Arc<Self>> {
        if button_count == 0 || button_count > MAX_BUTTONS {
            return None;
        }
        Some(Arc::new_cyclic(|weak: &Weak<Self>| {
            let cb = weak.clone();
            let timer = front.sched().register(
                Box::new(move |now| cb.upgrade().map_or(0, |w| w.on_timer(now))),
                0,
            );
            ButtonBank {
                oid,
                front: Arc::downgrade(front),
                timer,
                state: Mutex::new(BtnState {
                    buttons: vec![None; button_count as usize],
                    rest_ticks: 0,
                    retransmit_count: 0,
                    invert: 0,
                    ack_count: 0,
                    last_state: None,
                    pending_retransmits: 0,
                }),
            }
        }))
    }

    pub fn oid(&self) -> u8 {
        self.oid
    }

    pub fn timer(&self) -> TimerHandle {
        self.timer
    }

    /// Binds a pin to a slot; false when the slot index is out of range.
    pub fn add_button(&self, pos: u8, object: ObjectId, pin: String) -> bool {
        let mut st = self.state.lock();
        let Some(slot) = st.buttons.get_mut(pos as usize) else {
            return false;
        };
        *slot = Some(Binding { object, pin });
        true
    }

    /// Starts polling at `clock`, every `rest_ticks`.
    pub fn query(&self, clock: u32, rest_ticks: u32, retransmit_count: u8, invert: u8) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        {
            let mut st = self.state.lock();
            st.rest_ticks = rest_ticks;
            st.retransmit_count = retransmit_count;
            st.invert = invert;
            st.last_state = None;
            st.pending_retransmits = 0;
        }
        front
            .sched()
            .reschedule(self.timer, if rest_ticks != 0 { clock } else { 0 });
    }

    /// Host acknowledgement of received reports.
    pub fn ack(&self, count: u8) {
        let mut st = self.state.lock();
        st.pending_retransmits = st.pending_retransmits.saturating_sub(count);
    }

    fn read_state(&self, front: &Frontend, st: &BtnState) -> Vec<u8> {
        let mut bytes = vec![0u8; st.buttons.len().div_ceil(8)];
        for (index, binding) in st.buttons.iter().enumerate() {
            let Some(binding) = binding else { continue };
            let level = front
                .registry()
                .object(binding.object)
                .ok()
                .and_then(|obj| obj.pin_level(&binding.pin))
                .unwrap_or(false);
            let bit = (level as u8) ^ ((st.invert >> (index % 8)) & 1);
            bytes[index / 8] |= bit << (index % 8);
        }
        bytes
    }

    fn on_timer(&self, now: u32) -> u32 {
        let Some(front) = self.front.upgrade() else {
            return 0;
        };
        let mut st = self.state.lock();
        let current = self.read_state(&front, &st);
        let changed = st.last_state.as_ref() != Some(&current);
        let retransmit = st.pending_retransmits > 0 && st.pending_retransmits <= st.retransmit_count;
        let next = now.wrapping_add(st.rest_ticks);
        if changed {
            st.ack_count = st.ack_count.wrapping_add(1);
            st.pending_retransmits = st.pending_retransmits.saturating_add(1);
            st.last_state = Some(current.clone());
        }
        if changed || retransmit {
            let ack_count = st.ack_count;
            drop(st);
            front.respond(
                &BUTTONS_QUERY,
                &[
                    ("oid", ParamValue::Uint(self.oid as u32)),
                    ("ack_count", ParamValue::Uint(ack_count as u32)),
                    ("state", ParamValue::Bytes(current)),
                ],
            );
        }
        next
    }
}
