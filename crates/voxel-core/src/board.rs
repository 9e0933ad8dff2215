//! Board descriptions: pin banks, bus wiring, and per-class object limits.
//!
//! Pins are named by bank plus index (`PA0`..`PH15`). The identity
//! dictionary exposes each bank as a `[base, count]` range so the host can
//! send pins as small integers; `pin_id`/`pin_name` translate between the
//! two representations.

use crate::object::ObjectClass;
use crate::CoreError;
use std::collections::HashMap;

/// A contiguous bank of pins sharing a name prefix.
#[derive(Debug, Clone)]
pub struct PinBank {
    pub name: String,
    pub first: u32,
    pub count: u32,
}

impl PinBank {
    pub fn new(name: &str, first: u32, count: u32) -> Self {
        PinBank {
            name: name.to_string(),
            first,
            count,
        }
    }
}

/// Static description of the emulated controller board.
#[derive(Debug, Clone)]
pub struct Board {
    pub name: String,
    pub frequency: u32,
    pub banks: Vec<PinBank>,
    /// Software SPI buses as `[miso, mosi, sclk]` pin triples.
    pub spi_buses: Vec<[String; 3]>,
    pub adc_max: u16,
    pub pwm_max: u16,
    limits: HashMap<ObjectClass, u32>,
}

impl Board {
    /// The default board: eight 16-pin banks, six SPI buses, and the object
    /// complement of a typical 32-bit motion controller.
    pub fn generic(frequency: u32) -> Self {
        let banks = ["PA", "PB", "PC", "PD", "PE", "PF", "PG", "PH"]
            .iter()
            .map(|name| PinBank::new(name, 0, 16))
            .collect();
        let spi = [
            ["PA6", "PA7", "PA5"],
            ["PB4", "PB5", "PB3"],
            ["PB14", "PB15", "PB13"],
            ["PC2", "PC3", "PB10"],
            ["PC11", "PC12", "PC10"],
            ["PE13", "PE14", "PE12"],
        ];
        let mut limits = HashMap::new();
        limits.insert(ObjectClass::Stepper, 8);
        limits.insert(ObjectClass::Pwm, 6);
        limits.insert(ObjectClass::Heater, 4);
        limits.insert(ObjectClass::Probe, 1);
        limits.insert(ObjectClass::Endstop, 5);
        limits.insert(ObjectClass::Thermistor, 5);
        limits.insert(ObjectClass::Fan, 4);
        limits.insert(ObjectClass::Display, 1);
        limits.insert(ObjectClass::Encoder, 1);
        limits.insert(ObjectClass::DigitalPin, 22);
        limits.insert(ObjectClass::Neopixel, 1);
        Board {
            name: "generic".to_string(),
            frequency,
            banks,
            spi_buses: spi
                .iter()
                .map(|b| [b[0].to_string(), b[1].to_string(), b[2].to_string()])
                .collect(),
            adc_max: 4095,
            pwm_max: 255,
            limits,
        }
    }

    /// How many objects of `class` this board supports, if limited.
    pub fn limit(&self, class: ObjectClass) -> Option<u32> {
        self.limits.get(&class).copied()
    }

    /// Splits a pin name into its bank and index, validating the range.
    pub fn parse_pin(&self, pin: &str) -> Result<(usize, u32), CoreError> {
        for (bank_idx, bank) in self.banks.iter().enumerate() {
            if let Some(rest) = pin.strip_prefix(bank.name.as_str()) {
                let index: u32 = rest
                    .parse()
                    .map_err(|_| CoreError::UnknownPin(pin.to_string()))?;
                if index < bank.first || index >= bank.first + bank.count {
                    return Err(CoreError::UnknownPin(pin.to_string()));
                }
                return Ok((bank_idx, index));
            }
        }
        Err(CoreError::UnknownPin(pin.to_string()))
    }

    /// The global numeric id of a named pin, as used on the wire.
    pub fn pin_id(&self, pin: &str) -> Result<u32, CoreError> {
        let (bank_idx, index) = self.parse_pin(pin)?;
        let mut base = 0;
        for bank in &self.banks[..bank_idx] {
            base += bank.count;
        }
        Ok(base + (index - self.banks[bank_idx].first))
    }

    /// The name of a pin given its global numeric id.
    pub fn pin_name(&self, id: u32) -> Option<String> {
        let mut base = 0;
        for bank in &self.banks {
            if id < base + bank.count {
                return Some(format!("{}{}", bank.name, bank.first + (id - base)));
            }
            base += bank.count;
        }
        None
    }

    /// Iterates bank enumeration entries as `(label, base, count)`.
    pub fn pin_enumeration(&self) -> Vec<(String, u32, u32)> {
        let mut base = 0;
        let mut out = Vec::with_capacity(self.banks.len());
        for bank in &self.banks {
            out.push((format!("{}{}", bank.name, bank.first), base + bank.first, bank.count));
            base += bank.count;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pin() {
        let board = Board::generic(16_000_000);
        assert!(board.parse_pin("PA0").is_ok());
        assert!(board.parse_pin("PH15").is_ok());
        assert!(board.parse_pin("PA16").is_err());
        assert!(board.parse_pin("PZ3").is_err());
        assert!(board.parse_pin("nope").is_err());
    }

    #[test]
    fn test_pin_id_name_roundtrip() {
        let board = Board::generic(16_000_000);
        assert_eq!(board.pin_id("PA0").unwrap(), 0);
        assert_eq!(board.pin_id("PA15").unwrap(), 15);
        assert_eq!(board.pin_id("PB0").unwrap(), 16);
        assert_eq!(board.pin_id("PH15").unwrap(), 127);
        for id in [0u32, 15, 16, 100, 127] {
            let name = board.pin_name(id).unwrap();
            assert_eq!(board.pin_id(&name).unwrap(), id);
        }
        assert_eq!(board.pin_name(128), None);
    }

    #[test]
    fn test_pin_enumeration_bases() {
        let board = Board::generic(16_000_000);
        let banks = board.pin_enumeration();
        assert_eq!(banks[0], ("PA0".to_string(), 0, 16));
        assert_eq!(banks[1], ("PB0".to_string(), 16, 16));
        assert_eq!(banks[7], ("PH0".to_string(), 112, 16));
    }
}
