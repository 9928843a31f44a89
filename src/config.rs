//! Build time limits and runtime configuration

use secure_engine_kms_interface::ObjectHandle;

use crate::objects::ObjectLayout;

/// Number of sessions that can be open at the same time
pub const SESSIONS_MAX: usize = 5;
/// Number of handles a single `FindObjectsInit` can collect
pub const SEARCH_MAX: usize = 32;
/// Largest serialised object
pub const OBJECT_MAX_LEN: usize = 512;
/// Capacity of the NVM object cache, static and dynamic objects together
pub const NVM_OBJECTS_MAX: usize = 40;
/// Capacity of the volatile object store
pub const VM_OBJECTS_MAX: usize = 20;
/// Largest blob payload accepted by `ImportBlob`
pub const BLOB_MAX_LEN: usize = 2048;
/// Function identifiers covered by the function lock latches
pub const LOCKABLE_FUNCTIONS: u32 = 128;
/// Object handles covered by the key lock latches
pub const LOCKABLE_KEYS: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    EmptyRange,
    NullHandle,
    Overlap,
    BeyondLockCapacity,
    BeyondStoreCapacity,
    EmbeddedObjectInvalid,
    BlobKeyNotEmbedded,
}

/// Address range `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn of<T: ?Sized>(value: &T) -> Self {
        Self::new(value as *const T as *const u8 as usize, core::mem::size_of_val(value))
    }

    /// Whether `[address, address + len)` lies entirely inside the region
    pub fn contains(&self, address: usize, len: usize) -> bool {
        let (Some(end), Some(region_end)) =
            (address.checked_add(len), self.start.checked_add(self.len))
        else {
            return false;
        };
        address >= self.start && end <= region_end
    }

    /// Whether `[address, address + len)` shares at least one byte with the region
    pub fn overlaps(&self, address: usize, len: usize) -> bool {
        if len == 0 || self.len == 0 {
            return false;
        }
        let end = address.saturating_add(len);
        let region_end = self.start.saturating_add(self.len);
        address < region_end && self.start < end
    }
}

/// Memory areas the call gate checks caller supplied addresses against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryMap {
    /// Code of the call gate interface, the only legal origin of a call
    pub interface_rom: Region,
    /// Whole RAM
    pub ram: Region,
    /// RAM private to the enclave
    pub se_ram: Region,
    /// RAM owned by the secure bootloader
    pub bootloader_ram: Region,
}

/// Embedded keys used to authenticate and decrypt imported blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobKeys {
    pub verify: ObjectHandle,
    pub decrypt: ObjectHandle,
}

#[derive(Debug, Clone, Copy)]
pub struct KmsConfig {
    pub layout: ObjectLayout,
    /// Serialised objects baked into the firmware
    pub embedded: &'static [&'static [u8]],
    pub blob_keys: Option<BlobKeys>,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            layout: ObjectLayout::default(),
            embedded: &[],
            blob_keys: None,
        }
    }
}
