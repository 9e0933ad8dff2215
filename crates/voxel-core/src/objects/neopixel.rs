//! An addressable LED strip.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::{status_code, CoreError};
use parking_lot::Mutex;

pub const CMD_SET: u32 = 0;

const COMMANDS: &[CommandSpec] = &[CommandSpec {
    id: CMD_SET,
    name: "set",
    args: &["index", "color"],
}];

/// Hard cap on the LED count, matching the wire-side buffer limit.
pub const MAX_LED_COUNT: u32 = 1024;

pub struct NeopixelObject {
    id: ObjectId,
    name: String,
    pin: String,
    count: u32,
    colors: Mutex<Vec<[u8; 4]>>,
}

impl NeopixelObject {
    pub fn from_options(id: ObjectId, name: &str, opts: &Options) -> Result<Self, CoreError> {
        let count = opts.get_u32("count").unwrap_or(1);
        if count == 0 || count > MAX_LED_COUNT {
            return Err(CoreError::Config(format!(
                "neopixel '{name}' count {count} out of range"
            )));
        }
        Ok(NeopixelObject {
            id,
            name: name.to_string(),
            pin: opts.require_str("pin")?.to_string(),
            count,
            colors: Mutex::new(vec![[0; 4]; count as usize]),
        })
    }
}

impl SimObject for NeopixelObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Neopixel
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
                let index = opts.require_u32("index")?;
                if index >= self.count {
                    return Ok(CmdResult::failed(-status_code::EINVAL));
                }
                let bytes = opts.get_bytes("color").unwrap_or(&[]);
                let mut color = [0u8; 4];
                for (dst, src) in color.iter_mut().zip(bytes) {
                    *dst = *src;
                }
                self.colors.lock()[index as usize] = color;
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!(
                "neopixel command {}",
                cmd.id
            ))),
        }
    }

    fn status(&self) -> Status {
        let colors = self.colors.lock();
        let mut status = Status::new();
        status.insert("count", Value::Uint(self.count));
        status.insert(
            "colors",
            Value::Bytes(colors.iter().flatten().copied().collect()),
        );
        status.insert("pin", Value::Str(self.pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![("pin", self.pin.clone())]
    }

    fn reset(&self) {
        let mut colors = self.colors.lock();
        colors.iter_mut().for_each(|c| *c = [0; 4]);
    }
}
