//! Lock-free 32-bit pin words.
//!
//! A `PinWord` is a shared control word observed by several peripherals at
//! once. The canonical user is the stepper pulse engine, which hands
//! references to its word to the digital-out wrappers configured on its
//! enable/direction pins so their updates become plain bit operations.

use std::sync::atomic::{AtomicU32, Ordering};

/// Bit layout of a stepper control word.
pub mod stepper_bits {
    /// Bits 0-15: free-running step counter.
    pub const STEP_MASK: u32 = (1 << 16) - 1;
    /// Bit 30: direction.
    pub const DIR: u32 = 1 << 30;
    /// Bit 31: driver enable.
    pub const ENABLE: u32 = 1 << 31;
    /// Everything that is not the step counter.
    pub const CONTROL_MASK: u32 = !STEP_MASK;
}

/// An atomic 32-bit word shared between peripherals by `Arc` handle.
#[derive(Debug, Default)]
pub struct PinWord(AtomicU32);

impl PinWord {
    pub fn new(value: u32) -> Self {
        PinWord(AtomicU32::new(value))
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn store(&self, value: u32) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// Increments the word, returning the previous value.
    pub fn inc(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// Decrements the word, returning the previous value.
    pub fn dec(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::SeqCst)
    }

    pub fn add(&self, value: u32) -> u32 {
        self.0.fetch_add(value, Ordering::SeqCst)
    }

    pub fn sub(&self, value: u32) -> u32 {
        self.0.fetch_sub(value, Ordering::SeqCst)
    }

    pub fn fetch_and(&self, mask: u32) -> u32 {
        self.0.fetch_and(mask, Ordering::SeqCst)
    }

    pub fn fetch_or(&self, mask: u32) -> u32 {
        self.0.fetch_or(mask, Ordering::SeqCst)
    }

    pub fn fetch_xor(&self, mask: u32) -> u32 {
        self.0.fetch_xor(mask, Ordering::SeqCst)
    }

    pub fn exchange(&self, value: u32) -> u32 {
        self.0.swap(value, Ordering::SeqCst)
    }

    pub fn compare_exchange(&self, expected: u32, new: u32) -> Result<u32, u32> {
        self.0
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
    }

    /// The step-counter bits of a stepper control word.
    pub fn step_count(&self) -> u32 {
        self.load() & stepper_bits::STEP_MASK
    }

    /// Tests an individual bit mask.
    pub fn is_set(&self, mask: u32) -> bool {
        self.load() & mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_bit_ops() {
        let word = PinWord::new(0);
        word.fetch_or(stepper_bits::ENABLE);
        assert!(word.is_set(stepper_bits::ENABLE));
        word.fetch_xor(stepper_bits::DIR);
        assert!(word.is_set(stepper_bits::DIR));
        word.fetch_and(!stepper_bits::ENABLE);
        assert!(!word.is_set(stepper_bits::ENABLE));
        assert!(word.is_set(stepper_bits::DIR));
    }

    #[test]
    fn test_step_count_isolated_from_control_bits() {
        let word = PinWord::new(stepper_bits::ENABLE | stepper_bits::DIR);
        for _ in 0..100 {
            word.inc();
        }
        assert_eq!(word.step_count(), 100);
        assert!(word.is_set(stepper_bits::ENABLE));
        assert!(word.is_set(stepper_bits::DIR));
    }

    #[test]
    fn test_step_count_monotonic_across_threads() {
        let word = Arc::new(PinWord::new(0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let word = word.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        word.inc();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(word.step_count(), 4000);
    }

    #[test]
    fn test_compare_exchange() {
        let word = PinWord::new(5);
        assert_eq!(word.compare_exchange(5, 9), Ok(5));
        assert_eq!(word.compare_exchange(5, 11), Err(9));
        assert_eq!(word.load(), 9);
    }
}
