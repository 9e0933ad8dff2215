//! A quadrature rotary encoder.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::CoreError;
use parking_lot::Mutex;

pub const CMD_PULSES: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_PULSES,
    name: "pulses",
    args: &["count", "direction"],
}];

pub struct EncoderObject {
    id: ObjectId,
    name: String,
    pin_a: String,
    pin_b: String,
    state: Mutex<[bool; 2]>,
}

impl EncoderObject {
    pub fn from_options(id: ObjectId, name: &str, opts: &Options) -> Result<Self, CoreError> {
        Ok(EncoderObject {
            id,
            name: name.to_string(),
            pin_a: opts.require_str("pin_a")?.to_string(),
            pin_b: opts.require_str("pin_b")?.to_string(),
            state: Mutex::new([false, false]),
        })
    }
}

impl SimObject for EncoderObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Encoder
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
            CMD_PULSES => {
                let count = opts.require_u32("count")?;
                let direction = opts.get_u32("direction").unwrap_or(0) as usize & 1;
                let mut state = self.state.lock();
                // Toggle the two phases alternately, offset by direction.
                for pulse in 0..count * 2 {
                    let phase = (direction + pulse as usize) % 2;
                    state[phase] = !state[phase];
                }
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!("encoder command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let state = self.state.lock();
        let mut status = Status::new();
        status.insert("a", Value::Bool(state[0]));
        status.insert("b", Value::Bool(state[1]));
        status.insert("pin_a", Value::Str(self.pin_a.clone()));
        status.insert("pin_b", Value::Str(self.pin_b.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin_a", self.pin_a.clone()), ("pin_b", self.pin_b.clone())]
    }

    fn pin_level(&self, pin: &str) -> Option<bool> {
        let state = self.state.lock();
        if pin == self.pin_a {
            Some(state[0])
        } else if pin == self.pin_b {
            Some(state[1])
        } else {
            None
        }
    }

    fn reset(&self) {
        *self.state.lock() = [false, false];
    }
}
