//! The virtual MCU clock.
//!
//! Ticks are unsigned 32-bit counts of the configured MCU frequency. The
//! counter wraps roughly every 71 minutes at 1 MHz, so all comparisons go
//! through the wrap-safe predicates below; raw `<` on ticks is a bug.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as MemOrdering};

/// Returns true when tick `a` chronologically precedes tick `b`.
///
/// Valid whenever the two ticks are less than half the counter range
/// (2^31) apart, which the scheduler guarantees for all live deadlines.
#[inline]
pub fn tick_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Returns true when tick `a` chronologically follows tick `b`.
#[inline]
pub fn tick_after(a: u32, b: u32) -> bool {
    tick_before(b, a)
}

/// Three-way wrap-safe tick comparison.
#[inline]
pub fn tick_cmp(a: u32, b: u32) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if tick_before(a, b) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Monotonically increasing (modulo 2^32) tick counter shared by every
/// component of the emulator.
///
/// Only the supervisor ticker advances the counter; everything else reads.
#[derive(Debug)]
pub struct Clock {
    now: AtomicU32,
    frequency: u32,
}

impl Clock {
    /// Creates a clock running at `frequency` ticks per second.
    pub fn new(frequency: u32) -> Self {
        Clock {
            now: AtomicU32::new(0),
            frequency,
        }
    }

    /// The configured MCU frequency in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// The current tick.
    pub fn now(&self) -> u32 {
        self.now.load(MemOrdering::Acquire)
    }

    /// Advances the clock by `ticks`, returning the new value.
    pub fn advance(&self, ticks: u32) -> u32 {
        self.now
            .fetch_add(ticks, MemOrdering::AcqRel)
            .wrapping_add(ticks)
    }

    /// Converts a microsecond interval into ticks at this clock's
    /// frequency.
    pub fn ticks_from_us(&self, us: u64) -> u32 {
        (us.saturating_mul(self.frequency as u64) / 1_000_000) as u32
    }

    /// Nanoseconds of wall time represented by one tick.
    pub fn tick_ns(&self) -> f64 {
        1e9 / self.frequency as f64
    }
}

/// Parses a frequency given as a bare number or with a `kHz`/`MHz`/`GHz`
/// suffix (case-insensitive), e.g. `"16MHz"` or `"400000"`.
pub fn parse_frequency(text: &str) -> Result<u32, crate::CoreError> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| crate::CoreError::Config(format!("invalid frequency '{text}'")))?;
    let scale = match suffix.to_ascii_lowercase().as_str() {
        "" | "hz" => 1.0,
        "khz" => 1e3,
        "mhz" => 1e6,
        "ghz" => 1e9,
        _ => {
            return Err(crate::CoreError::Config(format!(
                "invalid frequency suffix '{suffix}'"
            )))
        }
    };
    Ok((value * scale) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_before_after_basic() {
        assert!(tick_before(1, 2));
        assert!(!tick_before(2, 1));
        assert!(!tick_before(7, 7));
        assert!(tick_after(2, 1));
    }

    #[test]
    fn test_before_tolerates_wraparound() {
        // A deadline just past the wrap point is still "after" now.
        let now = u32::MAX - 10;
        let deadline = now.wrapping_add(100);
        assert!(tick_before(now, deadline));
        assert!(tick_after(deadline, now));
        // After the wrap, the old tick is in the past.
        assert!(!tick_before(deadline, now.wrapping_sub(10)));
    }

    #[test]
    fn test_cmp_orders_within_half_range() {
        let base = 0xfffffff0u32;
        let ticks: Vec<u32> = (0..8).map(|i| base.wrapping_add(i * 5)).collect();
        let mut shuffled = ticks.clone();
        shuffled.reverse();
        shuffled.sort_by(|&a, &b| tick_cmp(a, b));
        assert_eq!(shuffled, ticks);
    }

    #[test]
    fn test_clock_advance_wraps() {
        let clock = Clock::new(1_000_000);
        clock.advance(u32::MAX - 5);
        let now = clock.advance(10);
        assert_eq!(now, 4);
        assert!(tick_before(u32::MAX - 5, now));
    }

    #[test]
    fn test_ticks_from_us() {
        let clock = Clock::new(16_000_000);
        assert_eq!(clock.ticks_from_us(1_000_000), 16_000_000);
        assert_eq!(clock.ticks_from_us(100_000), 1_600_000);
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency("400000").unwrap(), 400_000);
        assert_eq!(parse_frequency("16MHz").unwrap(), 16_000_000);
        assert_eq!(parse_frequency("8khz").unwrap(), 8_000);
        assert_eq!(parse_frequency("1.5MHz").unwrap(), 1_500_000);
        assert!(parse_frequency("fast").is_err());
    }
}
