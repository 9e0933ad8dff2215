//! The peripheral object model.
//!
//! Every simulated peripheral is a [`SimObject`] with an immutable
//! `{class, name, id}` identity, a frozen status snapshot, and a typed
//! command table. Objects are created once at startup from the parsed
//! configuration and live for the lifetime of the emulator.

use crate::atomic::PinWord;
use crate::CoreError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// System-wide unique object identifier. Stable for the emulator lifetime.
pub type ObjectId = u32;

/// Classes of simulated peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectClass {
    Stepper,
    Endstop,
    Probe,
    Thermistor,
    Heater,
    Pwm,
    Fan,
    DigitalPin,
    Display,
    Encoder,
    Neopixel,
    Spi,
    TrSync,
    Buttons,
    Axis,
    Toolhead,
}

impl ObjectClass {
    pub const ALL: &'static [ObjectClass] = &[
        ObjectClass::Stepper,
        ObjectClass::Endstop,
        ObjectClass::Probe,
        ObjectClass::Thermistor,
        ObjectClass::Heater,
        ObjectClass::Pwm,
        ObjectClass::Fan,
        ObjectClass::DigitalPin,
        ObjectClass::Display,
        ObjectClass::Encoder,
        ObjectClass::Neopixel,
        ObjectClass::Spi,
        ObjectClass::TrSync,
        ObjectClass::Buttons,
        ObjectClass::Axis,
        ObjectClass::Toolhead,
    ];

    /// The configuration section / text-channel name of this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Stepper => "stepper",
            ObjectClass::Endstop => "endstop",
            ObjectClass::Probe => "probe",
            ObjectClass::Thermistor => "thermistor",
            ObjectClass::Heater => "heater",
            ObjectClass::Pwm => "pwm",
            ObjectClass::Fan => "fan",
            ObjectClass::DigitalPin => "digital_pin",
            ObjectClass::Display => "display",
            ObjectClass::Encoder => "encoder",
            ObjectClass::Neopixel => "neopixel",
            ObjectClass::Spi => "spi",
            ObjectClass::TrSync => "trsync",
            ObjectClass::Buttons => "buttons",
            ObjectClass::Axis => "axis",
            ObjectClass::Toolhead => "toolhead",
        }
    }

    pub fn parse(text: &str) -> Option<ObjectClass> {
        Self::ALL.iter().copied().find(|c| c.as_str() == text)
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value in a status snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Uint(u32),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) if *v >= 0 && *v <= u32::MAX as i64 => Some(*v as u32),
            Value::Bool(b) => Some(*b as u32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Uint(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Uint(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// A frozen status snapshot: stable for the duration of one query call.
pub type Status = BTreeMap<&'static str, Value>;

/// Typed option values parsed from configuration sections or the
/// `k=v,k=v` option strings of the text command channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
    Bytes(Vec<u8>),
}

impl OptValue {
    /// Parses a raw string the way the configuration loader types values:
    /// list, integer, float, boolean, then plain string, first match wins.
    pub fn infer(raw: &str) -> OptValue {
        let raw = raw.trim();
        if raw.contains(',') {
            return OptValue::List(raw.split(',').map(|s| s.trim().to_string()).collect());
        }
        if let Ok(v) = raw.parse::<i64>() {
            return OptValue::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return OptValue::Float(v);
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" => return OptValue::Bool(true),
            "false" | "no" | "off" => return OptValue::Bool(false),
            _ => {}
        }
        OptValue::Str(raw.to_string())
    }
}

/// A bag of named options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options(BTreeMap<String, OptValue>);

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    /// Parses the text channel's `k=v,k=v` option syntax. Note the comma is
    /// a pair separator here, not a list separator.
    pub fn parse_pairs(text: &str) -> Result<Options, CoreError> {
        let mut opts = Options::new();
        for pair in text.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| CoreError::InvalidArg(format!("malformed option '{pair}'")))?;
            opts.set(key.trim(), OptValue::infer(value));
        }
        Ok(opts)
    }

    pub fn set(&mut self, key: &str, value: OptValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&OptValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(OptValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(OptValue::Int(v)) => Some(*v),
            Some(OptValue::Bool(b)) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_i64(key)
            .filter(|v| *v >= 0 && *v <= u32::MAX as i64)
            .map(|v| v as u32)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(OptValue::Float(v)) => Some(*v),
            Some(OptValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(OptValue::Bool(b)) => Some(*b),
            Some(OptValue::Int(v)) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.0.get(key) {
            Some(OptValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Fetches a required option, surfacing `InvalidArg` when missing.
    pub fn require_str(&self, key: &str) -> Result<&str, CoreError> {
        self.get_str(key)
            .ok_or_else(|| CoreError::InvalidArg(format!("missing option '{key}'")))
    }

    pub fn require_u32(&self, key: &str) -> Result<u32, CoreError> {
        self.get_u32(key)
            .ok_or_else(|| CoreError::InvalidArg(format!("missing option '{key}'")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptValue)> {
        self.0.iter()
    }
}

/// One entry of an object's command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub id: u32,
    pub name: &'static str,
    /// Argument names, for the text channel's option validation.
    pub args: &'static [&'static str],
}

/// The outcome of an object command.
#[derive(Debug, Default)]
pub struct CmdResult {
    /// 0 for success, a negative errno-style code otherwise.
    pub status: i32,
    /// Optional result data delivered with the completion.
    pub data: Option<Status>,
}

impl CmdResult {
    pub fn ok() -> Self {
        CmdResult::default()
    }

    pub fn failed(status: i32) -> Self {
        CmdResult { status, data: None }
    }

    pub fn with_data(data: Status) -> Self {
        CmdResult {
            status: 0,
            data: Some(data),
        }
    }
}

/// A simulated peripheral.
///
/// Implementations keep their mutable state behind interior mutability so
/// the registry can share them across the worker and scheduler threads.
pub trait SimObject: Send + Sync {
    fn class(&self) -> ObjectClass;
    fn name(&self) -> &str;
    fn id(&self) -> ObjectId;

    /// The object's command table.
    fn commands(&self) -> &'static [CommandSpec] {
        &[]
    }

    /// Executes one command from the table.
    fn exec(&self, cmd: &CommandSpec, opts: &Options) -> Result<CmdResult, CoreError>;

    /// A frozen snapshot of host-visible state.
    fn status(&self) -> Status;

    /// The physical pins this object claims, as `(role, pin)` pairs.
    fn pins(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// The shared control word, for peripherals that expose one.
    fn pin_word(&self) -> Option<Arc<PinWord>> {
        None
    }

    /// The current digital level of one of this object's pins, for
    /// peripherals that can be sampled as button inputs.
    fn pin_level(&self, _pin: &str) -> Option<bool> {
        None
    }

    /// Returns the object to its power-on state.
    fn reset(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_parse_roundtrip() {
        for class in ObjectClass::ALL {
            assert_eq!(ObjectClass::parse(class.as_str()), Some(*class));
        }
        assert_eq!(ObjectClass::parse("warp_drive"), None);
    }

    #[test]
    fn test_opt_value_inference() {
        assert_eq!(OptValue::infer("42"), OptValue::Int(42));
        assert_eq!(OptValue::infer("2.5"), OptValue::Float(2.5));
        assert_eq!(OptValue::infer("true"), OptValue::Bool(true));
        assert_eq!(OptValue::infer("PA4"), OptValue::Str("PA4".to_string()));
        assert_eq!(
            OptValue::infer("PA4, PA5"),
            OptValue::List(vec!["PA4".to_string(), "PA5".to_string()])
        );
    }

    #[test]
    fn test_parse_pairs() {
        let opts = Options::parse_pairs("state=1,pin=PA3").unwrap();
        assert_eq!(opts.get_u32("state"), Some(1));
        assert_eq!(opts.get_str("pin"), Some("PA3"));
        assert!(Options::parse_pairs("nonsense").is_err());
    }
}
