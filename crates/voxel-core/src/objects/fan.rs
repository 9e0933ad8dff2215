//! A cooling fan on a PWM-capable pin.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::{status_code, CoreError};
use std::sync::atomic::{AtomicU32, Ordering};

pub const CMD_SET: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_SET,
    name: "set",
    args: &["speed"],
}];

pub struct FanObject {
    id: ObjectId,
    name: String,
    pin: String,
    pwm_max: u16,
    speed: AtomicU32,
}

impl FanObject {
    pub fn from_options(
        id: ObjectId,
        name: &str,
        opts: &Options,
        pwm_max: u16,
    ) -> Result<Self, CoreError> {
        Ok(FanObject {
            id,
            name: name.to_string(),
            pin: opts.require_str("pin")?.to_string(),
            pwm_max,
            speed: AtomicU32::new(0),
        })
    }
}

impl SimObject for FanObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Fan
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
                let speed = opts.require_u32("speed")?;
                if speed > self.pwm_max as u32 {
                    return Ok(CmdResult::failed(-status_code::EINVAL));
                }
                self.speed.store(speed, Ordering::SeqCst);
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!("fan command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::new();
        status.insert("speed", Value::Uint(self.speed.load(Ordering::SeqCst)));
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }

    fn reset(&self) {
        self.speed.store(0, Ordering::SeqCst);
    }
}
