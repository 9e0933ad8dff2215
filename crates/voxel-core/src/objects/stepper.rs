//! The stepper motor driver object.
//!
//! Owns the shared 32-bit control word. The pulse engine in the protocol
//! front end increments the step-counter bits; digital-out wrappers bound
//! to the enable/direction pins mutate the control bits of the same word.

use crate::atomic::{stepper_bits, PinWord};
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

pub struct StepperObject {
    id: ObjectId,
    name: String,
    step_pin: String,
    dir_pin: String,
    enable_pin: String,
    word: Arc<PinWord>,
    pins_granted: AtomicBool,
}

impl StepperObject {
    pub fn from_options(id: ObjectId, name: &str, opts: &Options) -> Result<Self, CoreError> {
        Ok(StepperObject {
            id,
            name: name.to_string(),
            step_pin: opts.require_str("step_pin")?.to_string(),
            dir_pin: opts.require_str("dir_pin")?.to_string(),
            enable_pin: opts.require_str("enable_pin")?.to_string(),
            word: Arc::new(PinWord::new(0)),
            pins_granted: AtomicBool::new(false),
        })
    }
}

impl SimObject for StepperObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Stepper
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
                // Only one front end may drive the pins at a time.
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
            _ => Err(CoreError::InvalidArg(format!("stepper command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let word = self.word.load();
        let mut status = Status::new();
        status.insert("steps", Value::Uint(word & stepper_bits::STEP_MASK));
        status.insert("enabled", Value::Bool(word & stepper_bits::ENABLE != 0));
        status.insert("dir", Value::Bool(word & stepper_bits::DIR != 0));
        status.insert("step_pin", Value::Str(self.step_pin.clone()));
        status.insert("dir_pin", Value::Str(self.dir_pin.clone()));
        status.insert("enable_pin", Value::Str(self.enable_pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![
            ("step_pin", self.step_pin.clone()),
            ("dir_pin", self.dir_pin.clone()),
            ("enable_pin", self.enable_pin.clone()),
        ]
    }

    fn pin_word(&self) -> Option<Arc<PinWord>> {
        Some(self.word.clone())
    }

    fn reset(&self) {
        self.word.store(0);
        self.pins_granted.store(false, Ordering::SeqCst);
    }
}
