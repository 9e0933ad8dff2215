//! A thermistor sampled through the ADC.
//!
//! The thermal model lives outside the core; whatever simulates it writes
//! the instantaneous ADC reading here through the bus, and the analog-in
//! sampler reads it back out of the status snapshot.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::{status_code, CoreError};
use std::sync::atomic::{AtomicU32, Ordering};

pub const CMD_SET_ADC: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_SET_ADC,
    name: "set_adc",
    args: &["value"],
}];

pub struct ThermistorObject {
    id: ObjectId,
    name: String,
    pin: String,
    adc_max: u16,
    adc: AtomicU32,
}

impl ThermistorObject {
    pub fn from_options(
        id: ObjectId,
        name: &str,
        opts: &Options,
        adc_max: u16,
    ) -> Result<Self, CoreError> {
        let pin = opts.require_str("pin")?;
        let initial = opts
            .get_u32("adc")
            .unwrap_or(adc_max as u32 / 2)
            .min(adc_max as u32);
        Ok(ThermistorObject {
            id,
            name: name.to_string(),
            pin: pin.to_string(),
            adc_max,
            adc: AtomicU32::new(initial),
        })
    }
}

impl SimObject for ThermistorObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Thermistor
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
            CMD_SET_ADC => {
                let value = opts.require_u32("value")?;
                if value > self.adc_max as u32 {
                    return Ok(CmdResult::failed(-status_code::EINVAL));
                }
                self.adc.store(value, Ordering::SeqCst);
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!(
                "thermistor command {}",
                cmd.id
            ))),
        }
    }

    fn status(&self) -> Status {
        let mut status = Status::new();
        status.insert("adc", Value::Uint(self.adc.load(Ordering::SeqCst)));
        status.insert("adc_max", Value::Uint(self.adc_max as u32));
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }
}
