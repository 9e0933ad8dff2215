//! The SPI target wrapper.
//!
//! Forwards transfer bytes to the registered bus target (a display, in
//! this board's wiring) and returns the read-back slice for
//! `spi_transfer`.

use crate::frontend::Frontend;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;
use voxel_core::object::{ObjectId, OptValue, Options, Value};

struct SpiConfig {
    bus: Option<[String; 3]>,
    mode: u32,
    rate: u32,
}

pub struct SpiTarget {
    oid: u8,
    target: ObjectId,
    cs_active_high: bool,
    front: Weak<Frontend>,
    config: Mutex<SpiConfig>,
}

impl SpiTarget {
    pub fn new(front: &Arc<Frontend>, oid: u8, target: ObjectId, cs_active_high: bool) -> Arc<Self> {
        Arc::new(SpiTarget {
            oid,
            target,
            cs_active_high,
            front: Arc::downgrade(front),
            config: Mutex::new(SpiConfig {
                bus: None,
                mode: 0,
                rate: 0,
            }),
        })
    }

    pub fn oid(&self) -> u8 {
        self.oid
    }

    pub fn cs_active_high(&self) -> bool {
        self.cs_active_high
    }

    /// Selects a hardware SPI bus by index.
    pub fn set_bus(&self, bus: u32, mode: u32, rate: u32) -> bool {
        let Some(front) = self.front.upgrade() else {
            return false;
        };
        let buses = &front.registry().board().spi_buses;
        let Some(pins) = buses.get(bus as usize) else {
            return false;
        };
        let mut config = self.config.lock();
        config.bus = Some(pins.clone());
        config.mode = mode;
        config.rate = rate;
        true
    }

    /// Configures a bit-banged bus on explicit pins.
    pub fn set_software_bus(
        &self,
        miso: String,
        mosi: String,
        sclk: String,
        mode: u32,
        rate: u32,
    ) -> bool {
        let Some(front) = self.front.upgrade() else {
            return false;
        };
        let board = front.registry().board();
        for pin in [&miso, &mosi, &sclk] {
            if board.parse_pin(pin).is_err() {
                return false;
            }
        }
        let mut config = self.config.lock();
        config.bus = Some([miso, mosi, sclk]);
        config.mode = mode;
        config.rate = rate;
        true
    }

    /// Ships bytes to the target; optionally collects the read-back.
    pub fn transfer(&self, data: &[u8], read_back: bool) -> Option<Vec<u8>> {
        let front = self.front.upgrade()?;
        let mut opts = Options::new();
        opts.set("is_data", OptValue::Bool(false));
        opts.set("data", OptValue::Bytes(data.to_vec()));
        let write = front.exec_sync(self.target, "write", opts)?;
        if write.status != 0 {
            debug!(oid = self.oid, status = write.status, "spi write failed");
            return None;
        }
        if !read_back {
            return Some(Vec::new());
        }
        let mut opts = Options::new();
        opts.set("len", OptValue::Int(data.len() as i64));
        let read = front.exec_sync(self.target, "read", opts)?;
        match read.data.and_then(|mut d| d.remove("data")) {
            Some(Value::Bytes(bytes)) => Some(bytes),
            _ => Some(vec![0; data.len()]),
        }
    }
}
