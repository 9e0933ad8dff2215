//! Emulator Configuration Loader
//!
//! Parses the INI-style machine description: `[class name]` sections with
//! typed key/value options, plus an optional `[mcu]` section for clock
//! settings. `<include file>` lines splice other configuration files in
//! before parsing.

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;
use std::path::Path;
use tracing::{debug, warn};
use voxel_core::clock::parse_frequency;
use voxel_core::object::{ObjectClass, Options, OptValue};

/// One `[class name]` object section.
#[derive(Debug)]
pub struct ObjectSection {
    pub class: ObjectClass,
    pub name: String,
    pub options: Options,
}

/// The parsed machine description.
#[derive(Debug, Default)]
pub struct EmulatorConfig {
    /// MCU clock frequency from `[mcu] frequency`, when present.
    pub frequency: Option<u32>,
    pub objects: Vec<ObjectSection>,
}

impl EmulatorConfig {
    /// Loads and parses a configuration file, following includes.
    pub fn load(path: &Path) -> Result<Self> {
        let content = read_with_includes(path)?;
        Self::parse(&content)
    }

    /// Parses configuration text (includes already spliced).
    pub fn parse(content: &str) -> Result<Self> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|err| anyhow!("configuration parse error: {err}"))?;

        let mut config = EmulatorConfig::default();
        for section in ini.sections() {
            if section == "mcu" {
                if let Some(freq) = ini.get(&section, "frequency") {
                    config.frequency = Some(
                        parse_frequency(&freq)
                            .with_context(|| format!("[mcu] frequency '{freq}'"))?,
                    );
                }
                continue;
            }
            let Some((class_name, object_name)) = section.split_once(char::is_whitespace) else {
                return Err(anyhow!("section '[{section}]' is missing an object name"));
            };
            let Some(class) = ObjectClass::parse(class_name.trim()) else {
                warn!(section, "no definitions for this object class, skipping");
                continue;
            };
            let mut options = Options::new();
            if let Some(map) = ini.get_map_ref().get(&section) {
                for (key, value) in map {
                    if let Some(value) = value {
                        options.set(key, OptValue::infer(value));
                    }
                }
            }
            debug!(%class, name = object_name, "configuration section");
            config.objects.push(ObjectSection {
                class,
                name: object_name.trim().to_string(),
                options,
            });
        }
        Ok(config)
    }
}

/// Reads a file, recursively splicing `<include other.cfg>` lines
/// (resolved relative to the including file).
fn read_with_includes(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut content = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_end();
        if let Some(include) = trimmed
            .strip_prefix("<include ")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            content.push(read_with_includes(&base.join(include.trim()))?);
        } else {
            content.push(trimmed.to_string());
        }
    }
    Ok(content.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let config = EmulatorConfig::parse(
            "[mcu]\n\
             frequency = 16MHz\n\
             \n\
             [stepper x]\n\
             step_pin = PA1\n\
             dir_pin = PA2\n\
             enable_pin = PA3\n\
             \n\
             [thermistor hotend]\n\
             pin = PC0\n",
        )
        .unwrap();
        assert_eq!(config.frequency, Some(16_000_000));
        assert_eq!(config.objects.len(), 2);
        let stepper = &config.objects[0];
        assert_eq!(stepper.class, ObjectClass::Stepper);
        assert_eq!(stepper.name, "x");
        assert_eq!(stepper.options.get_str("step_pin"), Some("PA1"));
    }

    #[test]
    fn test_unknown_class_is_skipped() {
        let config = EmulatorConfig::parse("[flux_capacitor fc]\npin = PA0\n").unwrap();
        assert!(config.objects.is_empty());
    }

    #[test]
    fn test_section_without_name_is_an_error() {
        assert!(EmulatorConfig::parse("[stepper]\nstep_pin = PA1\n").is_err());
    }

    #[test]
    fn test_includes_are_spliced() {
        let dir = std::env::temp_dir().join("voxel-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("pins.cfg"), "[digital_pin led]\npin = PC7\n").unwrap();
        std::fs::write(
            dir.join("printer.cfg"),
            "<include pins.cfg>\n[endstop x]\npin = PA4\n",
        )
        .unwrap();
        let config = EmulatorConfig::load(&dir.join("printer.cfg")).unwrap();
        assert_eq!(config.objects.len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
