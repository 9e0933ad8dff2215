//! A heater element.
//!
//! The heater pin is exposed as a shared word so the digital-out wrapper
//! driving it writes the level without a bus round trip. The thermal model
//! reads the level from the same word.

use crate::atomic::PinWord;
use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::{status_code, CoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const CMD_USE_PINS: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_USE_PINS,
    name: "use_pins",
    args: &["enable"],
}];

const DEFAULT_MAX_TEMP: f64 = 275.0;

pub struct HeaterObject {
    id: ObjectId,
    name: String,
    pin: String,
    max_temp: f64,
    word: Arc<PinWord>,
    pins_granted: AtomicBool,
}

impl HeaterObject {
    pub fn from_options(id: ObjectId, name: &str, opts: &Options) -> Result<Self, CoreError> {
        Ok(HeaterObject {
            id,
            name: name.to_string(),
            pin: opts.require_str("pin")?.to_string(),
            max_temp: opts.get_f64("max_temp").unwrap_or(DEFAULT_MAX_TEMP),
            word: Arc::new(PinWord::new(0)),
            pins_granted: AtomicBool::new(false),
        })
    }
}

impl SimObject for HeaterObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Heater
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    fn commands(&self) -> &'static [CommandSpec] {
        COMMANDS
    }

    fn exec(&self, cmd: &CommandSpec, opts: &Options) -> Result<CmdResult, CoreError> {
        match cmd.id {
            CMD_USE_PINS => {
                let enable = opts.get_bool("enable").unwrap_or(true);
                let granted = self
                    .pins_granted
                    .compare_exchange(!enable, enable, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if granted {
                    Ok(CmdResult::ok())
                } else {
                    Ok(CmdResult::failed(-status_code::EBUSY))
                }
            }
            _ => Err(CoreError::InvalidArg(format!("heater command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::new();
        status.insert("state", Value::Bool(self.word.load() & 1 != 0));
        status.insert("max_temp", Value::Float(self.max_temp));
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }

    fn pin_word(&self) -> Option<Arc<PinWord>> {
        Some(self.word.clone())
    }

    fn reset(&self) {
        self.word.store(0);
        self.pins_granted.store(false, Ordering::SeqCst);
    }
}
