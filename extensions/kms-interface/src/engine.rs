use serde::{Deserialize, Serialize};

/// Bits of a service identifier selecting an add-on service family.
pub const SE_ADDON_MASK: u32 = 0x7000_0000;
/// Add-on family of KMS requests forwarded through the call gate.
pub const KMS_ADDON: u32 = 0x1000_0000;
/// Slot number requesting validation of every active slot at once.
pub const VALID_ALL_SLOTS: u32 = 255;

/// Whether a raw service identifier carries a forwarded KMS request.
pub const fn is_kms_service(id: u32) -> bool {
    id & SE_ADDON_MASK == KMS_ADDON
}

enum_number! {
    #[repr(u32)]
    /// Services reachable through the secure engine call gate
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum ServiceId {
        Init = 0x00,
        LlDecryptInit = 0x04,
        LlDecryptAppend = 0x05,
        LlDecryptFinish = 0x06,
        LlAuthenticateFwInit = 0x07,
        LlAuthenticateFwAppend = 0x08,
        LlAuthenticateFwFinish = 0x09,
        HlAuthenticateMetadata = 0x10,
        AppGetActiveFwInfo = 0x20,
        AppValidateFw = 0x21,
        AppGetFwState = 0x22,
        SysSaveDisableIrq = 0x60,
        SysRestoreEnableIrq = 0x61,
        ImgRead = 0x92,
        ImgWrite = 0x93,
        ImgErase = 0x94,
        ImgGetFwState = 0x95,
        ImgSetFwState = 0x96,
        LockRestrictServices = 0x100,
        ExtFlashDecryptInit = 0x110,
        ExitInterrupt = 0x1000,
    }
}

impl ServiceId {
    /// Services refused once the bootloader locked the restricted services.
    pub fn is_restricted(self) -> bool {
        matches!(
            self,
            Self::Init
                | Self::LlDecryptInit
                | Self::LlDecryptAppend
                | Self::LlDecryptFinish
                | Self::LlAuthenticateFwInit
                | Self::LlAuthenticateFwAppend
                | Self::LlAuthenticateFwFinish
                | Self::HlAuthenticateMetadata
                | Self::ImgRead
                | Self::ImgWrite
                | Self::ImgErase
                | Self::ImgSetFwState
                | Self::ExtFlashDecryptInit
        )
    }
}

enum_number! {
    #[repr(u32)]
    /// Result of a call gate service
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum SeResult {
        Error = 0x0001_8799,
        Success = 0x0012_310F,
    }
}

enum_number! {
    #[repr(u32)]
    /// Detailed status written back to the caller
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum SeStatus {
        Ok = 0x0012_E223,
        Ko = 0x0013_023D,
        SignatureErr = 0x0014_6AC1,
        FlashReadErr = 0x0014_B817,
        Busy = 0x1200_E578,
    }
}

enum_number! {
    #[repr(u32)]
    /// Kind of firmware image handled by the low level decrypt and authenticate services
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum FwType {
        Complete = 0,
        Partial = 1,
    }
}

/// Lifecycle of a firmware image, stored in the slot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FwState {
    /// Freshly installed, never started
    New,
    /// Started once, waiting for the application to validate itself
    SelfTest,
    /// Validated by the application
    Valid,
    /// Validated together with every other active slot
    ValidAll,
    /// Rejected, or any unrecognised pattern
    Invalid,
}

const ERASED: u32 = 0xFFFF_FFFF;
const CLEARED: u32 = 0;
const VALID_ALL_MARK: u32 = 0x5555_5555;

impl FwState {
    /// Flash encoding of the state, three words that can only be cleared.
    pub const fn pattern(self) -> [u32; 3] {
        match self {
            Self::New => [ERASED, ERASED, ERASED],
            Self::SelfTest => [ERASED, ERASED, CLEARED],
            Self::Valid => [ERASED, CLEARED, CLEARED],
            Self::ValidAll => [ERASED, VALID_ALL_MARK, CLEARED],
            Self::Invalid => [CLEARED, CLEARED, CLEARED],
        }
    }

    /// Decode a state field, anything unknown is `Invalid`.
    pub fn from_pattern(words: [u32; 3]) -> Self {
        [Self::New, Self::SelfTest, Self::Valid, Self::ValidAll]
            .into_iter()
            .find(|state| state.pattern() == words)
            .unwrap_or(Self::Invalid)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::SelfTest)
                | (Self::SelfTest, Self::Invalid)
                | (Self::SelfTest, Self::Valid)
                | (Self::SelfTest, Self::ValidAll)
                | (Self::Valid, Self::Invalid)
        )
    }
}
