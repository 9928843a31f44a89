use serde::{Deserialize, Serialize};

/// Bits of a raw function identifier that carry the trust origin of the caller.
pub const CLUSTER_MASK: u32 = 0x00FF_0000;

/// First valid function identifier.
pub const FIRST_ID: u32 = 0x01;
/// Exclusive upper bound of the function identifiers.
pub const LAST_ID: u32 = 0x47;

enum_number! {
    #[repr(u32)]
    /// Origin of a KMS request, OR-ed into the function identifier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum Cluster {
        /// The request crossed the call gate from the non secure world
        Unsecure = 0x005A_0000,
        /// The request was issued inside the enclave
        SecureWorld = 0x00A1_0000,
    }
}

enum_number! {
    #[repr(u32)]
    /// KMS entry points, numbered in PKCS#11 order followed by the vendor extensions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum FunctionId {
        Initialize = 0x01,
        Finalize = 0x02,
        GetInfo = 0x03,
        GetSlotList = 0x04,
        GetSlotInfo = 0x05,
        GetTokenInfo = 0x06,
        GetMechanismList = 0x07,
        GetMechanismInfo = 0x08,
        InitToken = 0x09,
        InitPin = 0x0A,
        SetPin = 0x0B,
        OpenSession = 0x0C,
        CloseSession = 0x0D,
        CloseAllSessions = 0x0E,
        GetSessionInfo = 0x0F,
        GetOperationState = 0x10,
        SetOperationState = 0x11,
        Login = 0x12,
        Logout = 0x13,
        CreateObject = 0x14,
        CopyObject = 0x15,
        DestroyObject = 0x16,
        GetObjectSize = 0x17,
        GetAttributeValue = 0x18,
        SetAttributeValue = 0x19,
        FindObjectsInit = 0x1A,
        FindObjects = 0x1B,
        FindObjectsFinal = 0x1C,
        EncryptInit = 0x1D,
        Encrypt = 0x1E,
        EncryptUpdate = 0x1F,
        EncryptFinal = 0x20,
        DecryptInit = 0x21,
        Decrypt = 0x22,
        DecryptUpdate = 0x23,
        DecryptFinal = 0x24,
        DigestInit = 0x25,
        Digest = 0x26,
        DigestUpdate = 0x27,
        DigestKey = 0x28,
        DigestFinal = 0x29,
        SignInit = 0x2A,
        Sign = 0x2B,
        SignUpdate = 0x2C,
        SignFinal = 0x2D,
        SignRecoverInit = 0x2E,
        SignRecover = 0x2F,
        VerifyInit = 0x30,
        Verify = 0x31,
        VerifyUpdate = 0x32,
        VerifyFinal = 0x33,
        VerifyRecoverInit = 0x34,
        VerifyRecover = 0x35,
        DigestEncryptUpdate = 0x36,
        DecryptDigestUpdate = 0x37,
        SignEncryptUpdate = 0x38,
        DecryptVerifyUpdate = 0x39,
        GenerateKey = 0x3A,
        GenerateKeyPair = 0x3B,
        WrapKey = 0x3C,
        UnwrapKey = 0x3D,
        DeriveKey = 0x3E,
        SeedRandom = 0x3F,
        GenerateRandom = 0x40,
        GetFunctionStatus = 0x41,
        CancelFunction = 0x42,
        WaitForSlotEvent = 0x43,
        /// Install an authenticated and encrypted object blob into NVM
        ImportBlob = 0x44,
        /// Permanently lock a list of key handles
        LockKeys = 0x45,
        /// Permanently lock a list of function identifiers
        LockServices = 0x46,
    }
}

impl FunctionId {
    /// Raw identifier tagged with the given origin.
    pub fn with_cluster(self, cluster: Cluster) -> u32 {
        u32::from(self) | u32::from(cluster)
    }

    /// Strip the cluster tag from a raw identifier.
    pub const fn strip_cluster(raw: u32) -> u32 {
        raw & !CLUSTER_MASK
    }
}
