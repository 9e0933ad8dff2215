//! An SPI character/graphic display target.
//!
//! The session's SPI wrapper forwards transfer bytes here. The display
//! keeps a bounded log of command and data bytes; transfers read back as
//! zeros, which matches a write-only LCD controller.

use crate::object::{CmdResult, CommandSpec, ObjectClass, ObjectId, Options, SimObject, Status, Value};
use crate::CoreError;
use parking_lot::Mutex;

pub const CMD_WRITE: u32 = 0;
pub const CMD_READ: u32 = 1;
pub const CMD_RESET: u32 = 2;

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        id: CMD_WRITE,
        name: "write",
        args: &["is_data", "data"],
    },
    CommandSpec {
        id: CMD_READ,
        name: "read",
        args: &["len"],
    },
    CommandSpec {
        id: CMD_RESET,
        name: "reset",
        args: &[],
    },
];

const BUFFER_LIMIT: usize = 1024;

#[derive(Default)]
struct DisplayState {
    data: Vec<u8>,
    commands_seen: u32,
}

pub struct DisplayObject {
    id: ObjectId,
    name: String,
    cs_pin: String,
    sclk_pin: String,
    data_pin: String,
    state: Mutex<DisplayState>,
}

impl DisplayObject {
    pub fn from_options(id: ObjectId, name: &str, opts: &Options) -> Result<Self, CoreError> {
        Ok(DisplayObject {
            id,
            name: name.to_string(),
            cs_pin: opts.require_str("cs_pin")?.to_string(),
            sclk_pin: opts.require_str("sclk_pin")?.to_string(),
            data_pin: opts.require_str("data_pin")?.to_string(),
            state: Mutex::new(DisplayState::default()),
        })
    }
}

impl SimObject for DisplayObject {
    fn class(&self) -> ObjectClass {
        ObjectClass::Display
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
            CMD_WRITE => {
                let bytes = opts.get_bytes("data").unwrap_or(&[]);
                let mut state = self.state.lock();
                if !opts.get_bool("is_data").unwrap_or(false) {
                    state.commands_seen += bytes.len() as u32;
                }
                state.data.extend_from_slice(bytes);
                let overflow = state.data.len().saturating_sub(BUFFER_LIMIT);
                if overflow > 0 {
                    state.data.drain(..overflow);
                }
                Ok(CmdResult::ok())
            }
            CMD_READ => {
                let len = opts.get_u32("len").unwrap_or(0) as usize;
                let mut data = Status::new();
                data.insert("data", Value::Bytes(vec![0; len]));
                Ok(CmdResult::with_data(data))
            }
            CMD_RESET => {
                *self.state.lock() = DisplayState::default();
                Ok(CmdResult::ok())
            }
            _ => Err(CoreError::InvalidArg(format!("display command {}", cmd.id))),
        }
    }

    fn status(&self) -> Status {
        let state = self.state.lock();
        let mut status = Status::new();
        status.insert("bytes", Value::Uint(state.data.len() as u32));
        status.insert("commands", Value::Uint(state.commands_seen));
        status.insert("cs_pin", Value::Str(self.cs_pin.clone()));
        status.insert("sclk_pin", Value::Str(self.sclk_pin.clone()));
        status.insert("data_pin", Value::Str(self.data_pin.clone()));
        status
    }

    fn pins(&self) -> Vec<(&'static str, String)> {
        vec![
            ("cs_pin", self.cs_pin.clone()),
            ("sclk_pin", self.sclk_pin.clone()),
            ("data_pin", self.data_pin.clone()),
        ]
    }

    fn reset(&self) {
        *self.state.lock() = DisplayState::default();
    }
}
