use serde::{Deserialize, Serialize};

enum_number! {
    #[repr(u32)]
    /// PKCS#11 return values produced by the KMS
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(into = "u32", try_from = "u32")]
    pub enum Rv {
        Ok = 0x000,
        HostMemory = 0x002,
        SlotIdInvalid = 0x003,
        GeneralError = 0x005,
        FunctionFailed = 0x006,
        ArgumentsBad = 0x007,
        AttributeSensitive = 0x011,
        AttributeTypeInvalid = 0x012,
        AttributeValueInvalid = 0x013,
        ActionProhibited = 0x01B,
        DataInvalid = 0x020,
        DataLenRange = 0x021,
        DeviceMemory = 0x031,
        EncryptedDataInvalid = 0x040,
        FunctionNotSupported = 0x054,
        KeyHandleInvalid = 0x060,
        MechanismInvalid = 0x070,
        ObjectHandleInvalid = 0x082,
        OperationActive = 0x090,
        OperationNotInitialized = 0x091,
        SessionCount = 0x0B1,
        SessionHandleInvalid = 0x0B3,
        SessionParallelNotSupported = 0x0B4,
        SignatureInvalid = 0x0C0,
        TemplateIncomplete = 0x0D0,
        BufferTooSmall = 0x150,
        CryptokiNotInitialized = 0x190,
        CryptokiAlreadyInitialized = 0x191,
    }
}

impl Rv {
    pub fn is_ok(self) -> bool {
        self == Rv::Ok
    }

    /// Convert into a `Result`, keeping every non `Ok` value as the error.
    pub fn into_result(self) -> Result<(), Rv> {
        match self {
            Rv::Ok => Ok(()),
            rv => Err(rv),
        }
    }
}

impl From<Result<(), Rv>> for Rv {
    fn from(result: Result<(), Rv>) -> Self {
        match result {
            Ok(()) => Rv::Ok,
            Err(rv) => rv,
        }
    }
}
