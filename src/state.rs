// src/state.rs

//! Lock-free lifecycle state register.
//!
//! A [`StateRegister`] is a bitmask of [`flags`]. Several bits may be set at
//! once while an instance moves between phases; the engine decides which
//! combinations are meaningful. All operations are lock-free and a failed
//! transition simply returns `false`.

use std::sync::atomic::{AtomicU32, Ordering};

/// Lifecycle bits.
pub mod flags {
    pub const NONE: u32 = 0;
    pub const INITIALIZING: u32 = 1 << 0;
    pub const RUNNING: u32 = 1 << 1;
    pub const DONE: u32 = 1 << 2;
    pub const DISPOSED: u32 = 1 << 3;
}

#[derive(Debug, Default)]
pub struct StateRegister {
    bits: AtomicU32,
}

impl StateRegister {
    pub fn new(initial: u32) -> Self {
        Self {
            bits: AtomicU32::new(initial),
        }
    }

    /// Overwrite the whole register.
    pub fn clear(&self, bits: u32) {
        self.bits.store(bits, Ordering::SeqCst);
    }

    pub fn set(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::SeqCst);
    }

    pub fn unset(&self, bits: u32) {
        self.bits.fetch_and(!bits, Ordering::SeqCst);
    }

    /// OR `bits` into the register, but only while `current & mask == expected`.
    pub fn compare_and_set(&self, expected: u32, mask: u32, bits: u32) -> bool {
        self.transition(expected, mask, |current| current | bits)
    }

    /// Clear `bits`, but only while `current & mask == expected`.
    pub fn compare_and_unset(&self, expected: u32, mask: u32, bits: u32) -> bool {
        self.transition(expected, mask, |current| current & !bits)
    }

    /// Overwrite the register with `bits`, but only while
    /// `current & mask == expected`.
    pub fn compare_and_replace(&self, expected: u32, mask: u32, bits: u32) -> bool {
        self.transition(expected, mask, |_| bits)
    }

    pub fn get(&self) -> u32 {
        self.bits.load(Ordering::SeqCst)
    }

    /// True if every bit in `bits` is set.
    pub fn is(&self, bits: u32) -> bool {
        self.get() & bits == bits
    }

    /// True if the masked value equals `value` exactly.
    pub fn is_masked(&self, value: u32, mask: u32) -> bool {
        self.get() & mask == value
    }

    fn transition(&self, expected: u32, mask: u32, op: impl Fn(u32) -> u32) -> bool {
        let mut current = self.bits.load(Ordering::SeqCst);

        // Retry on contention for as long as the guard still holds.
        while current & mask == expected {
            match self.bits.compare_exchange_weak(
                current,
                op(current),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }

        false
    }
}
