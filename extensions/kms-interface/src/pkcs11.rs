use bitflags::bitflags;

pub type SessionHandle = u32;
pub type ObjectHandle = u32;
pub type SlotId = u32;
pub type AttributeType = u32;
pub type MechanismType = u32;

bitflags! {
    /// Flags of `OpenSession`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u32 {
        const RW_SESSION = 0x0000_0002;
        const SERIAL_SESSION = 0x0000_0004;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u32 {
        const TOKEN_PRESENT = 0x0000_0001;
        const REMOVABLE_DEVICE = 0x0000_0002;
        const HW_SLOT = 0x0000_0004;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TokenFlags: u32 {
        const RNG = 0x0000_0001;
        const WRITE_PROTECTED = 0x0000_0002;
        const LOGIN_REQUIRED = 0x0000_0004;
        const TOKEN_INITIALIZED = 0x0000_0400;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MechanismFlags: u32 {
        const HW = 0x0000_0001;
        const ENCRYPT = 0x0000_0100;
        const DECRYPT = 0x0000_0200;
        const DIGEST = 0x0000_0400;
        const SIGN = 0x0000_0800;
        const VERIFY = 0x0000_2000;
        const GENERATE_KEY_PAIR = 0x0001_0000;
        const DERIVE = 0x0008_0000;
    }
}

/// Attribute types (`CKA_*`)
pub mod attribute {
    use super::AttributeType;

    pub const CLASS: AttributeType = 0x0000;
    pub const TOKEN: AttributeType = 0x0001;
    pub const PRIVATE: AttributeType = 0x0002;
    pub const LABEL: AttributeType = 0x0003;
    pub const VALUE: AttributeType = 0x0011;
    pub const CERTIFICATE_TYPE: AttributeType = 0x0080;
    pub const KEY_TYPE: AttributeType = 0x0100;
    pub const ID: AttributeType = 0x0102;
    pub const SENSITIVE: AttributeType = 0x0103;
    pub const ENCRYPT: AttributeType = 0x0104;
    pub const DECRYPT: AttributeType = 0x0105;
    pub const SIGN: AttributeType = 0x0108;
    pub const VERIFY: AttributeType = 0x010A;
    pub const DERIVE: AttributeType = 0x010C;
    pub const VALUE_LEN: AttributeType = 0x0161;
    pub const EXTRACTABLE: AttributeType = 0x0162;
    pub const DESTROYABLE: AttributeType = 0x0172;
    pub const EC_PARAMS: AttributeType = 0x0180;
    pub const EC_POINT: AttributeType = 0x0181;
    pub const HW_FEATURE_TYPE: AttributeType = 0x0300;
}

/// Object classes (`CKO_*`)
pub mod class {
    pub const DATA: u32 = 0;
    pub const CERTIFICATE: u32 = 1;
    pub const PUBLIC_KEY: u32 = 2;
    pub const PRIVATE_KEY: u32 = 3;
    pub const SECRET_KEY: u32 = 4;
    pub const HW_FEATURE: u32 = 5;
}

/// Key types (`CKK_*`)
pub mod key_type {
    pub const EC: u32 = 0x03;
    pub const GENERIC_SECRET: u32 = 0x10;
    pub const AES: u32 = 0x1F;
    pub const CHACHA20: u32 = 0x33;
}

/// Mechanism types (`CKM_*`)
pub mod mechanism {
    use super::MechanismType;

    pub const SHA256: MechanismType = 0x0250;
    pub const SHA256_HMAC: MechanismType = 0x0251;
    pub const EC_KEY_PAIR_GEN: MechanismType = 0x1040;
    pub const ECDSA: MechanismType = 0x1041;
    pub const ECDSA_SHA256: MechanismType = 0x1044;
    pub const ECDH1_DERIVE: MechanismType = 0x1050;
    pub const AES_ECB: MechanismType = 0x1081;
    pub const AES_CBC: MechanismType = 0x1082;
    pub const AES_GCM: MechanismType = 0x1087;
    pub const CHACHA20_POLY1305: MechanismType = 0x4021;
    pub const HKDF_DERIVE: MechanismType = 0x402A;
}
