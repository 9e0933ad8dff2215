//! The self-describing identity dictionary.
//!
//! At connection time the host downloads a compressed JSON dictionary
//! describing every command and response format string, the enumerations
//! (pin names, static strings), and static configuration values. Tags for
//! dynamically registered messages start at [`TAG_BASE`]; tags 0 and 1 are
//! reserved for the identify exchange itself.

use crate::Error;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

/// Tag of the `identify_response` message (fixed by the protocol).
pub const IDENTIFY_RESPONSE_TAG: u32 = 0;
/// Tag of the `identify` command (fixed by the protocol).
pub const IDENTIFY_TAG: u32 = 1;
/// First tag available for dynamically registered messages.
pub const TAG_BASE: u32 = 2;

/// Format string of the `identify_response` message.
pub const IDENTIFY_RESPONSE_FORMAT: &str = "identify_response offset=%u data=%.*s";
/// Format string of the `identify` command.
pub const IDENTIFY_FORMAT: &str = "identify offset=%u count=%c";

/// One entry of an enumeration: either a plain id or a `[base, count]`
/// range covering consecutive ids.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnumValue {
    Id(u32),
    Range([u32; 2]),
}

/// A value of the identity `config` section.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ConfigValue {
    Uint(u64),
    Str(String),
}

/// The identity dictionary served to the host.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Identity {
    pub version: String,
    pub commands: BTreeMap<String, u32>,
    pub responses: BTreeMap<String, u32>,
    pub enumerations: BTreeMap<String, BTreeMap<String, EnumValue>>,
    pub config: BTreeMap<String, ConfigValue>,
}

impl Identity {
    /// Creates an identity pre-populated with the reserved identify
    /// exchange messages.
    pub fn new(version: &str) -> Self {
        let mut identity = Identity {
            version: version.to_string(),
            ..Default::default()
        };
        identity
            .responses
            .insert(IDENTIFY_RESPONSE_FORMAT.to_string(), IDENTIFY_RESPONSE_TAG);
        identity
            .commands
            .insert(IDENTIFY_FORMAT.to_string(), IDENTIFY_TAG);
        identity
    }

    /// Serializes the dictionary to JSON and compresses it with zlib. The
    /// result is cached by the session and served in chunks by `identify`.
    pub fn compress(&self) -> Result<Vec<u8>, Error> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn test_reserved_tags() {
        let identity = Identity::new("test-1.0");
        assert_eq!(identity.responses[IDENTIFY_RESPONSE_FORMAT], 0);
        assert_eq!(identity.commands[IDENTIFY_FORMAT], 1);
    }

    #[test]
    fn test_compress_roundtrip() {
        let mut identity = Identity::new("test-1.0");
        identity
            .commands
            .insert("get_clock".to_string(), TAG_BASE);
        let mut pins = BTreeMap::new();
        pins.insert("PA0".to_string(), EnumValue::Range([0, 16]));
        identity.enumerations.insert("pin".to_string(), pins);
        identity
            .config
            .insert("CLOCK_FREQ".to_string(), ConfigValue::Uint(16_000_000));

        let blob = identity.compress().unwrap();
        let mut json = String::new();
        ZlibDecoder::new(&blob[..]).read_to_string(&mut json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], "test-1.0");
        assert_eq!(value["commands"]["get_clock"], 2);
        assert_eq!(value["enumerations"]["pin"]["PA0"][1], 16);
        assert_eq!(value["config"]["CLOCK_FREQ"], 16_000_000);
    }
}
