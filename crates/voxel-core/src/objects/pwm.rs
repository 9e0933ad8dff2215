//! A hardware PWM output.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::{status_code, CoreError};
use parking_lot::Mutex;

pub const CMD_SET_CYCLE: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_SET_CYCLE,
    name: "set_cycle",
    args: &["cycle"],
}];

pub struct PwmObject {
    id: ObjectId,
    name: String,
    pin: String,
    pwm_max: u16,
    /// Duty cycle as a 0.0..=1.0 fraction.
    duty: Mutex<f64>,
}

impl PwmObject {
    pub fn from_options(
        id: ObjectId,
        name: &str,
        opts: &Options,
        pwm_max: u16,
    ) -> Result<Self, CoreError> {
        Ok(PwmObject {
            id,
            name: name.to_string(),
            pin: opts.require_str("pin")?.to_string(),
            pwm_max,
            duty: Mutex::new(0.0),
        })
    }

    pub fn pwm_max(&self) -> u16 {
        self.pwm_max
    }
}

impl SimObject for PwmObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Pwm
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
            CMD_SET_CYCLE => {
                let cycle = opts
                    .get_f64("cycle")
                    .ok_or_else(|| CoreError::InvalidArg("missing option 'cycle'".to_string()))?;
                if !(0.0..=100.0).contains(&cycle) {
                    return Ok(CmdResult::failed(-status_code::EINVAL));
                }
                *self.duty.lock() = cycle / 100.0;
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!("pwm command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::new();
        status.insert("cycle", Value::Float(*self.duty.lock() * 100.0));
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }

    fn reset(&self) {
        *self.duty.lock() = 0.0;
    }
}
