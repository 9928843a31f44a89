//! One way latches disabling KMS functions and keys until the next reset

use secure_engine_kms_interface::ObjectHandle;

use crate::config::{LOCKABLE_FUNCTIONS, LOCKABLE_KEYS};

const KEY_WORDS: usize = (LOCKABLE_KEYS / 32) as usize;

/// Once set, a latch is never cleared.
///
/// Identifiers beyond the covered space can not be latched. They never dispatch nor classify to a
/// usable object range, so there is nothing to protect.
#[derive(Debug, Clone, Default)]
pub struct LockRegistry {
    functions: u128,
    keys: [u32; KEY_WORDS],
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_function(&mut self, id: u32) {
        if id < LOCKABLE_FUNCTIONS {
            self.functions |= 1 << id;
        } else {
            debug!("Function {id:#x} is outside of the lockable range");
        }
    }

    pub fn is_function_locked(&self, id: u32) -> bool {
        id < LOCKABLE_FUNCTIONS && self.functions & (1 << id) != 0
    }

    /// Raw function latches, for checks that must not go through [`is_function_locked`](Self::is_function_locked)
    pub(crate) fn function_bits(&self) -> u128 {
        self.functions
    }

    pub fn lock_key(&mut self, handle: ObjectHandle) {
        if handle < LOCKABLE_KEYS {
            self.keys[(handle / 32) as usize] |= 1 << (handle % 32);
        } else {
            debug!("Key {handle} is outside of the lockable range");
        }
    }

    pub fn is_key_locked(&self, handle: ObjectHandle) -> bool {
        self.keys
            .get((handle / 32) as usize)
            .map(|word| word & (1 << (handle % 32)) != 0)
            .unwrap_or(false)
    }

    /// Raw key latch word covering `handle`, for the redundant lookup check
    pub(crate) fn key_word(&self, handle: ObjectHandle) -> u32 {
        self.keys
            .get((handle >> 5) as usize)
            .copied()
            .unwrap_or_default()
    }
}
