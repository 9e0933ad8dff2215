//! Message schemas and payload encoding/decoding.
//!
//! The host and MCU agree on a dictionary of message format strings (for
//! example `"config_stepper oid=%c step_pin=%c dir_pin=%c invert_step=%c
//! step_pulse_ticks=%u"`). Each format string is assigned a numeric tag in
//! the identity dictionary; on the wire a message is its tag followed by the
//! parameters encoded positionally.

use crate::{vlq, Error};
use std::collections::HashMap;
use std::sync::Arc;

/// Wire encoding of a single message parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// `%u` - unsigned 32-bit, VLQ encoded.
    U32,
    /// `%i` - signed 32-bit, zig-zag VLQ encoded.
    I32,
    /// `%hu` - unsigned 16-bit, VLQ encoded.
    U16,
    /// `%hi` - signed 16-bit, zig-zag VLQ encoded.
    I16,
    /// `%c` - a single raw byte.
    Byte,
    /// `%s` - NUL-terminated string.
    Str,
    /// `%.*s` / `%*s` - length byte followed by raw bytes.
    Buffer,
}

impl ParamType {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "%u" => Some(ParamType::U32),
            "%i" => Some(ParamType::I32),
            "%hu" => Some(ParamType::U16),
            "%hi" => Some(ParamType::I16),
            "%c" => Some(ParamType::Byte),
            "%s" => Some(ParamType::Str),
            "%.*s" | "%*s" => Some(ParamType::Buffer),
            _ => None,
        }
    }
}

/// A decoded (or to-be-encoded) parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Uint(u32),
    Int(i32),
    Str(String),
    Bytes(Vec<u8>),
}

impl ParamValue {
    fn as_uint(&self, name: &str) -> Result<u32, Error> {
        match self {
            ParamValue::Uint(v) => Ok(*v),
            _ => Err(Error::ParamType(name.to_string())),
        }
    }

    fn as_int(&self, name: &str) -> Result<i32, Error> {
        match self {
            ParamValue::Int(v) => Ok(*v),
            ParamValue::Uint(v) if *v <= i32::MAX as u32 => Ok(*v as i32),
            _ => Err(Error::ParamType(name.to_string())),
        }
    }
}

/// One named, typed parameter slot of a message.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
}

/// A parsed message format string.
#[derive(Debug, Clone)]
pub struct MessageSchema {
    /// First word of the format string, e.g. `"queue_step"`.
    pub name: String,
    /// The full format string as registered in the identity dictionary.
    pub format: String,
    /// Numeric tag assigned in the identity dictionary.
    pub tag: u32,
    pub params: Vec<ParamSpec>,
}

impl MessageSchema {
    /// Parses a format string such as `"queue_step oid=%c interval=%u
    /// count=%hu add=%hi"` into a schema.
    pub fn parse(format: &str, tag: u32) -> Result<Self, Error> {
        let mut words = format.split_ascii_whitespace();
        let name = words
            .next()
            .ok_or_else(|| Error::InvalidFormat(format.to_string()))?;
        if name.contains('=') {
            return Err(Error::InvalidFormat(format.to_string()));
        }
        let mut params = Vec::new();
        for word in words {
            let (pname, code) = word
                .split_once('=')
                .ok_or_else(|| Error::InvalidFormat(format.to_string()))?;
            let kind = ParamType::from_code(code)
                .ok_or_else(|| Error::InvalidFormat(format.to_string()))?;
            params.push(ParamSpec {
                name: pname.to_string(),
                kind,
            });
        }
        Ok(MessageSchema {
            name: name.to_string(),
            format: format.to_string(),
            tag,
            params,
        })
    }

    /// Encodes this message (tag plus parameters) into `out`.
    ///
    /// Parameters are given as `(name, value)` pairs and may appear in any
    /// order; every slot of the schema must be present exactly once.
    pub fn encode(&self, params: &[(&str, ParamValue)], out: &mut Vec<u8>) -> Result<(), Error> {
        vlq::encode_u32(out, self.tag);
        for spec in &self.params {
            let value = params
                .iter()
                .find(|(name, _)| *name == spec.name)
                .map(|(_, value)| value)
                .ok_or_else(|| Error::MissingParam(spec.name.clone()))?;
            encode_param(spec, value, out)?;
        }
        Ok(())
    }

    /// Decodes this message's parameters from `data` starting at `*pos`
    /// (which must point just past the tag).
    pub fn decode(&self, data: &[u8], pos: &mut usize) -> Result<Vec<ParamValue>, Error> {
        let mut values = Vec::with_capacity(self.params.len());
        for spec in &self.params {
            values.push(decode_param(spec.kind, data, pos)?);
        }
        Ok(values)
    }
}

fn encode_param(spec: &ParamSpec, value: &ParamValue, out: &mut Vec<u8>) -> Result<(), Error> {
    match spec.kind {
        ParamType::U32 => vlq::encode_u32(out, value.as_uint(&spec.name)?),
        ParamType::I32 => vlq::encode_i32(out, value.as_int(&spec.name)?),
        ParamType::U16 => {
            let v = value.as_uint(&spec.name)?;
            if v > u16::MAX as u32 {
                return Err(Error::OutOfRange(v as u64, spec.name.clone()));
            }
            vlq::encode_u32(out, v);
        }
        ParamType::I16 => {
            let v = value.as_int(&spec.name)?;
            if v > i16::MAX as i32 || v < i16::MIN as i32 {
                return Err(Error::OutOfRange(v as u64, spec.name.clone()));
            }
            vlq::encode_i32(out, v);
        }
        ParamType::Byte => {
            let v = value.as_uint(&spec.name)?;
            if v > u8::MAX as u32 {
                return Err(Error::OutOfRange(v as u64, spec.name.clone()));
            }
            out.push(v as u8);
        }
        ParamType::Str => match value {
            ParamValue::Str(s) if !s.as_bytes().contains(&0) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            _ => return Err(Error::ParamType(spec.name.clone())),
        },
        ParamType::Buffer => match value {
            ParamValue::Bytes(b) if b.len() <= u8::MAX as usize => {
                out.push(b.len() as u8);
                out.extend_from_slice(b);
            }
            ParamValue::Bytes(b) => {
                return Err(Error::OutOfRange(b.len() as u64, spec.name.clone()))
            }
            _ => return Err(Error::ParamType(spec.name.clone())),
        },
    }
    Ok(())
}

fn decode_param(kind: ParamType, data: &[u8], pos: &mut usize) -> Result<ParamValue, Error> {
    match kind {
        ParamType::U32 | ParamType::U16 => Ok(ParamValue::Uint(vlq::decode_u32(data, pos)?)),
        ParamType::I32 | ParamType::I16 => Ok(ParamValue::Int(vlq::decode_i32(data, pos)?)),
        ParamType::Byte => {
            let byte = *data.get(*pos).ok_or(Error::IncompleteFrame)?;
            *pos += 1;
            Ok(ParamValue::Uint(byte as u32))
        }
        ParamType::Str => {
            let rest = &data[*pos..];
            let end = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(Error::IncompleteFrame)?;
            let s = String::from_utf8(rest[..end].to_vec())
                .map_err(|_| Error::InvalidPayload)?;
            *pos += end + 1;
            Ok(ParamValue::Str(s))
        }
        ParamType::Buffer => {
            let len = *data.get(*pos).ok_or(Error::IncompleteFrame)? as usize;
            *pos += 1;
            if data.len() < *pos + len {
                return Err(Error::IncompleteFrame);
            }
            let bytes = data[*pos..*pos + len].to_vec();
            *pos += len;
            Ok(ParamValue::Bytes(bytes))
        }
    }
}

/// The dictionary of all message schemas known to a session, indexed by
/// name and by tag.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    by_name: HashMap<String, Arc<MessageSchema>>,
    by_tag: HashMap<u32, Arc<MessageSchema>>,
}

impl MessageRegistry {
    /// Creates a new, empty `MessageRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a format string under the given tag.
    pub fn insert(&mut self, format: &str, tag: u32) -> Result<(), Error> {
        let schema = Arc::new(MessageSchema::parse(format, tag)?);
        self.by_name.insert(schema.name.clone(), schema.clone());
        self.by_tag.insert(tag, schema);
        Ok(())
    }

    /// Looks a schema up by message name (the first word of its format).
    pub fn lookup(&self, name: &str) -> Option<&Arc<MessageSchema>> {
        self.by_name.get(name)
    }

    /// Encodes a message into payload bytes by name.
    pub fn encode_by_name(
        &self,
        name: &str,
        params: &[(&str, ParamValue)],
    ) -> Result<Vec<u8>, Error> {
        let schema = self
            .by_name
            .get(name)
            .ok_or_else(|| Error::UnknownMessage(name.to_string()))?;
        let mut out = Vec::new();
        schema.encode(params, &mut out)?;
        Ok(out)
    }

    /// Decodes the next message from a payload, advancing `*pos`.
    pub fn decode_next(
        &self,
        data: &[u8],
        pos: &mut usize,
    ) -> Result<(Arc<MessageSchema>, Vec<ParamValue>), Error> {
        let tag = vlq::decode_u32(data, pos)?;
        let schema = self.by_tag.get(&tag).ok_or(Error::UnknownTag(tag))?;
        let values = schema.decode(data, pos)?;
        Ok((schema.clone(), values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        let schema =
            MessageSchema::parse("queue_step oid=%c interval=%u count=%hu add=%hi", 7).unwrap();
        assert_eq!(schema.name, "queue_step");
        assert_eq!(schema.params.len(), 4);
        assert_eq!(schema.params[0].kind, ParamType::Byte);
        assert_eq!(schema.params[3].kind, ParamType::I16);
    }

    #[test]
    fn test_parse_bare_name() {
        let schema = MessageSchema::parse("get_config", 3).unwrap();
        assert!(schema.params.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_code() {
        assert!(MessageSchema::parse("foo bar=%q", 1).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut registry = MessageRegistry::new();
        registry
            .insert("queue_step oid=%c interval=%u count=%hu add=%hi", 9)
            .unwrap();
        let payload = registry
            .encode_by_name(
                "queue_step",
                &[
                    ("oid", ParamValue::Uint(3)),
                    ("interval", ParamValue::Uint(5000)),
                    ("count", ParamValue::Uint(120)),
                    ("add", ParamValue::Int(-7)),
                ],
            )
            .unwrap();
        let mut pos = 0;
        let (schema, values) = registry.decode_next(&payload, &mut pos).unwrap();
        assert_eq!(schema.name, "queue_step");
        assert_eq!(pos, payload.len());
        assert_eq!(
            values,
            vec![
                ParamValue::Uint(3),
                ParamValue::Uint(5000),
                ParamValue::Uint(120),
                ParamValue::Int(-7),
            ]
        );
    }

    #[test]
    fn test_encode_buffer_and_string() {
        let mut registry = MessageRegistry::new();
        registry.insert("debug_ping data=%*s", 2).unwrap();
        let payload = registry
            .encode_by_name("debug_ping", &[("data", ParamValue::Bytes(vec![1, 2, 0x7e]))])
            .unwrap();
        let mut pos = 0;
        let (_, values) = registry.decode_next(&payload, &mut pos).unwrap();
        assert_eq!(values, vec![ParamValue::Bytes(vec![1, 2, 0x7e])]);
    }

    #[test]
    fn test_encode_missing_param_is_error() {
        let mut registry = MessageRegistry::new();
        registry.insert("update_digital_out oid=%c value=%c", 4).unwrap();
        let err = registry
            .encode_by_name("update_digital_out", &[("oid", ParamValue::Uint(1))])
            .unwrap_err();
        assert!(matches!(err, Error::MissingParam(_)));
    }

    #[test]
    fn test_byte_param_range_checked() {
        let mut registry = MessageRegistry::new();
        registry.insert("update_digital_out oid=%c value=%c", 4).unwrap();
        let err = registry
            .encode_by_name(
                "update_digital_out",
                &[("oid", ParamValue::Uint(300)), ("value", ParamValue::Uint(0))],
            )
            .unwrap_err();
        assert!(matches!(err, Error::OutOfRange(300, _)));
    }
}
