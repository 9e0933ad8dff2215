//! Endstop and probe switches.
//!
//! The switch level lives in a shared pin word so the homing sampler can
//! read it lock-free from timer callbacks. The kinematics collaborator (or
//! a test) flips it through the bus `set` command.

use crate::atomic::PinWord;
use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::CoreError;
use std::sync::Arc;

pub const CMD_SET: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_SET,
    name: "set",
    args: &["state"],
}];

pub struct EndstopObject {
    class: ObjectClass,
    id: ObjectId,
    name: String,
    pin: String,
    word: Arc<PinWord>,
}

impl EndstopObject {
    pub fn from_options(
        class: ObjectClass,
        id: ObjectId,
        name: &str,
        opts: &Options,
    ) -> Result<Self, CoreError> {
        debug_assert!(matches!(class, ObjectClass::Endstop | ObjectClass::Probe));
        Ok(EndstopObject {
            class,
            id,
            name: name.to_string(),
            pin: opts.require_str("pin")?.to_string(),
            word: Arc::new(PinWord::new(0)),
        })
    }
}

impl SimObject for EndstopObject {
    fn class(&self) -> ObjectClass {
        self.class
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
            CMD_SET => {
                self.word
                    .store(opts.get_u32("state").unwrap_or(0) & 1);
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!("endstop command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::new();
        status.insert("state", Value::Bool(self.word.load() & 1 != 0));
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }

    fn pin_word(&self) -> Option<Arc<PinWord>> {
        Some(self.word.clone())
    }

    fn pin_level(&self, pin: &str) -> Option<bool> {
        (pin == self.pin).then(|| self.word.load() & 1 != 0)
    }

    fn reset(&self) {
        self.word.store(0);
    }
}
