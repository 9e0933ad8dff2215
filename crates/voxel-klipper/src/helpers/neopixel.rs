//! The neopixel chain wrapper.
//!
//! Holds the host-visible byte buffer for an addressable LED strip. There
//! is no physical wire to bit-bang; `send` latches the buffer and reports
//! success.

use crate::frontend::Frontend;
use crate::proto_defs::NEOPIXEL_SEND;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use voxel_core::object::ObjectId;
use voxel_proto::message::ParamValue;

/// Largest strip buffer accepted at configure time.
pub const MAX_DATA_SIZE: u16 = 1024;

pub struct NeopixelChain {
    oid: u8,
    #[allow(dead_code)]
    object: ObjectId,
    front: Weak<Frontend>,
    buffer: Mutex<Vec<u8>>,
}

impl NeopixelChain {
    /// Fails when the requested buffer exceeds [`MAX_DATA_SIZE`].
    pub fn new(
        front: &Arc<Frontend>,
        oid: u8,
        object: ObjectId,
        data_size: u16,
    ) -> Option<Arc<Self>> {
        if data_size == 0 || data_size > MAX_DATA_SIZE {
            return None;
        }
        Some(Arc::new(NeopixelChain {
            oid,
            object,
            front: Arc::downgrade(front),
            buffer: Mutex::new(vec![0; data_size as usize]),
        }))
    }

    pub fn oid(&self) -> u8 {
        self.oid
    }

    /// Writes `data` into the buffer at `pos`; false when out of bounds.
    pub fn update(&self, pos: u16, data: &[u8]) -> bool {
        let mut buffer = self.buffer.lock();
        let start = pos as usize;
        let end = start + data.len();
        if end > buffer.len() {
            return false;
        }
        buffer[start..end].copy_from_slice(data);
        true
    }

    /// Latches the buffer and reports the transfer result.
    pub fn send(&self) {
        let Some(front) = self.front.upgrade() else {
            return;
        };
        front.respond(
            &NEOPIXEL_SEND,
            &[
                ("oid", ParamValue::Uint(self.oid as u32)),
                ("success", ParamValue::Uint(1)),
            ],
        );
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }
}
