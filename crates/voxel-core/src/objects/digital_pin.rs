//! A general-purpose digital output pin.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::CoreError;
use parking_lot::Mutex;

pub const CMD_SET: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_SET,
    name: "set",
    args: &["state"],
}];

pub struct DigitalPinObject {
    id: ObjectId,
    name: String,
    pin: String,
    default_state: bool,
    state: Mutex<bool>,
}

impl DigitalPinObject {
    pub fn new(id: ObjectId, name: &str, pin: &str, state: bool) -> Self {
        DigitalPinObject {
            id,
            name: name.to_string(),
            pin: pin.to_string(),
            default_state: state,
            state: Mutex::new(state),
        }
    }

    pub fn from_options(id: ObjectId, name: &str, opts: &Options) -> Result<Self, CoreError> {
        let pin = opts.require_str("pin")?;
        let state = opts.get_bool("value").unwrap_or(false);
        Ok(Self::new(id, name, pin, state))
    }
}

impl SimObject for DigitalPinObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::DigitalPin
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
                *self.state.lock() = opts.get_u32("state").unwrap_or(0) != 0;
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!(
                "digital_pin command {}",
                cmd.id
            ))),
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::new();
        status.insert("state", Value::Bool(*self.state.lock()));
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }

    fn pin_level(&self, pin: &str) -> Option<bool> {
        (pin == self.pin).then(|| *self.state.lock())
    }

    fn reset(&self) {
        *self.state.lock() = self.default_state;
    }
}
