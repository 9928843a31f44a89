use serde::{Deserialize, Serialize};
use serde_byte_array::ByteArray;

use crate::pkcs11::MechanismFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// Blank padded, non terminated text field as used by PKCS#11 records.
///
/// Text longer than the field is truncated.
pub fn blank_padded<const N: usize>(text: &str) -> ByteArray<N> {
    let mut field = [b' '; N];
    let len = text.len().min(N);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    ByteArray::new(field)
}

/// Reply of `GetInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub cryptoki_version: Version,
    pub manufacturer_id: ByteArray<32>,
    pub flags: u32,
    pub library_description: ByteArray<32>,
    pub library_version: Version,
}

/// Reply of `GetSlotInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub slot_description: ByteArray<64>,
    pub manufacturer_id: ByteArray<32>,
    pub flags: u32,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

/// Reply of `GetTokenInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub label: ByteArray<32>,
    pub manufacturer_id: ByteArray<32>,
    pub model: ByteArray<16>,
    pub serial_number: ByteArray<16>,
    pub flags: u32,
    pub max_session_count: u32,
    pub session_count: u32,
    pub max_rw_session_count: u32,
    pub rw_session_count: u32,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

/// Reply of `GetMechanismInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismInfo {
    pub min_key_size: u32,
    pub max_key_size: u32,
    pub flags: u32,
}

impl MechanismInfo {
    pub fn new(min_key_size: u32, max_key_size: u32, flags: MechanismFlags) -> Self {
        Self {
            min_key_size,
            max_key_size,
            flags: flags.bits(),
        }
    }

    pub fn flags(&self) -> MechanismFlags {
        MechanismFlags::from_bits_truncate(self.flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub slot_id: u32,
    pub state: u32,
    pub flags: u32,
}

/// Version and size of the firmware installed in an active slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveFwInfo {
    pub version: u16,
    pub size: u32,
}
