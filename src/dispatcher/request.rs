use core::mem::size_of_val;

use secure_engine_kms_interface::{
    FunctionId, Info, MechanismInfo, MechanismType, ObjectHandle, SessionFlags, SessionHandle,
    SessionInfo, SlotId, SlotInfo, TokenInfo,
};

use crate::crypto::Mechanism;
use crate::objects::{Attribute, AttributeRequest};
use crate::session::Notify;

/// Arguments of a KMS call, one variant per implemented function
///
/// Outputs are written through the mutable references. `None` output buffers request the length
/// of the output only.
#[derive(Debug)]
pub enum Request<'a, 'v> {
    Initialize,
    Finalize,
    GetInfo {
        info: &'a mut Option<Info>,
    },
    GetSlotList {
        token_present: bool,
        slots: Option<&'a mut [SlotId]>,
        count: &'a mut usize,
    },
    GetSlotInfo {
        slot: SlotId,
        info: &'a mut Option<SlotInfo>,
    },
    GetTokenInfo {
        slot: SlotId,
        info: &'a mut Option<TokenInfo>,
    },
    GetMechanismInfo {
        slot: SlotId,
        mechanism: MechanismType,
        info: &'a mut Option<MechanismInfo>,
    },
    OpenSession {
        slot: SlotId,
        flags: SessionFlags,
        notify: Option<Notify>,
        session: &'a mut SessionHandle,
    },
    CloseSession {
        session: SessionHandle,
    },
    GetSessionInfo {
        session: SessionHandle,
        info: &'a mut Option<SessionInfo>,
    },
    CreateObject {
        session: SessionHandle,
        template: &'a [Attribute<'a>],
        object: &'a mut ObjectHandle,
    },
    DestroyObject {
        session: SessionHandle,
        object: ObjectHandle,
    },
    GetAttributeValue {
        session: SessionHandle,
        object: ObjectHandle,
        template: &'a mut [AttributeRequest<'v>],
    },
    SetAttributeValue {
        session: SessionHandle,
        object: ObjectHandle,
        template: &'a [Attribute<'a>],
    },
    FindObjectsInit {
        session: SessionHandle,
        template: &'a [Attribute<'a>],
    },
    FindObjects {
        session: SessionHandle,
        objects: &'a mut [ObjectHandle],
        count: &'a mut usize,
    },
    FindObjectsFinal {
        session: SessionHandle,
    },
    EncryptInit {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
        key: ObjectHandle,
    },
    Encrypt {
        session: SessionHandle,
        data: &'a [u8],
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    EncryptUpdate {
        session: SessionHandle,
        data: &'a [u8],
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    EncryptFinal {
        session: SessionHandle,
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    DecryptInit {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
        key: ObjectHandle,
    },
    Decrypt {
        session: SessionHandle,
        data: &'a [u8],
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    DecryptUpdate {
        session: SessionHandle,
        data: &'a [u8],
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    DecryptFinal {
        session: SessionHandle,
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    DigestInit {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
    },
    Digest {
        session: SessionHandle,
        data: &'a [u8],
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    DigestUpdate {
        session: SessionHandle,
        data: &'a [u8],
    },
    DigestFinal {
        session: SessionHandle,
        output: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    SignInit {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
        key: ObjectHandle,
    },
    Sign {
        session: SessionHandle,
        data: &'a [u8],
        signature: Option<&'a mut [u8]>,
        len: &'a mut usize,
    },
    VerifyInit {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
        key: ObjectHandle,
    },
    Verify {
        session: SessionHandle,
        data: &'a [u8],
        signature: &'a [u8],
    },
    DeriveKey {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
        base_key: ObjectHandle,
        template: &'a [Attribute<'a>],
        key: &'a mut ObjectHandle,
    },
    GenerateKeyPair {
        session: SessionHandle,
        mechanism: Option<Mechanism<'a>>,
        public_template: &'a [Attribute<'a>],
        private_template: &'a [Attribute<'a>],
        public_key: &'a mut ObjectHandle,
        private_key: &'a mut ObjectHandle,
    },
    GenerateRandom {
        session: SessionHandle,
        output: &'a mut [u8],
    },
    ImportBlob {
        header: &'a [u8],
        blob: &'a [u8],
    },
    LockKeys {
        keys: &'a [ObjectHandle],
    },
    LockServices {
        functions: &'a [u32],
    },
    /// Function without arguments defined here
    Other(FunctionId),
}

impl Request<'_, '_> {
    pub fn function(&self) -> FunctionId {
        match self {
            Self::Initialize => FunctionId::Initialize,
            Self::Finalize => FunctionId::Finalize,
            Self::GetInfo { .. } => FunctionId::GetInfo,
            Self::GetSlotList { .. } => FunctionId::GetSlotList,
            Self::GetSlotInfo { .. } => FunctionId::GetSlotInfo,
            Self::GetTokenInfo { .. } => FunctionId::GetTokenInfo,
            Self::GetMechanismInfo { .. } => FunctionId::GetMechanismInfo,
            Self::OpenSession { .. } => FunctionId::OpenSession,
            Self::CloseSession { .. } => FunctionId::CloseSession,
            Self::GetSessionInfo { .. } => FunctionId::GetSessionInfo,
            Self::CreateObject { .. } => FunctionId::CreateObject,
            Self::DestroyObject { .. } => FunctionId::DestroyObject,
            Self::GetAttributeValue { .. } => FunctionId::GetAttributeValue,
            Self::SetAttributeValue { .. } => FunctionId::SetAttributeValue,
            Self::FindObjectsInit { .. } => FunctionId::FindObjectsInit,
            Self::FindObjects { .. } => FunctionId::FindObjects,
            Self::FindObjectsFinal { .. } => FunctionId::FindObjectsFinal,
            Self::EncryptInit { .. } => FunctionId::EncryptInit,
            Self::Encrypt { .. } => FunctionId::Encrypt,
            Self::EncryptUpdate { .. } => FunctionId::EncryptUpdate,
            Self::EncryptFinal { .. } => FunctionId::EncryptFinal,
            Self::DecryptInit { .. } => FunctionId::DecryptInit,
            Self::Decrypt { .. } => FunctionId::Decrypt,
            Self::DecryptUpdate { .. } => FunctionId::DecryptUpdate,
            Self::DecryptFinal { .. } => FunctionId::DecryptFinal,
            Self::DigestInit { .. } => FunctionId::DigestInit,
            Self::Digest { .. } => FunctionId::Digest,
            Self::DigestUpdate { .. } => FunctionId::DigestUpdate,
            Self::DigestFinal { .. } => FunctionId::DigestFinal,
            Self::SignInit { .. } => FunctionId::SignInit,
            Self::Sign { .. } => FunctionId::Sign,
            Self::VerifyInit { .. } => FunctionId::VerifyInit,
            Self::Verify { .. } => FunctionId::Verify,
            Self::DeriveKey { .. } => FunctionId::DeriveKey,
            Self::GenerateKeyPair { .. } => FunctionId::GenerateKeyPair,
            Self::GenerateRandom { .. } => FunctionId::GenerateRandom,
            Self::ImportBlob { .. } => FunctionId::ImportBlob,
            Self::LockKeys { .. } => FunctionId::LockKeys,
            Self::LockServices { .. } => FunctionId::LockServices,
            Self::Other(function) => *function,
        }
    }

    fn mechanism(&self) -> Option<&Mechanism<'_>> {
        match self {
            Self::EncryptInit { mechanism, .. }
            | Self::DecryptInit { mechanism, .. }
            | Self::DigestInit { mechanism, .. }
            | Self::SignInit { mechanism, .. }
            | Self::VerifyInit { mechanism, .. }
            | Self::DeriveKey { mechanism, .. }
            | Self::GenerateKeyPair { mechanism, .. } => mechanism.as_ref(),
            _ => None,
        }
    }

    /// Call `visit(address, len)` for every caller supplied buffer
    pub fn visit_buffers(&self, mut visit: impl FnMut(usize, usize)) {
        let mut visit = |(address, len): (usize, usize)| visit(address, len);

        if let Some(mechanism) = self.mechanism() {
            visit(region(mechanism.parameter));
        }
        match self {
            Self::Initialize
            | Self::Finalize
            | Self::Other(_)
            | Self::CloseSession { .. }
            | Self::DestroyObject { .. }
            | Self::FindObjectsFinal { .. }
            | Self::EncryptInit { .. }
            | Self::DecryptInit { .. }
            | Self::DigestInit { .. }
            | Self::SignInit { .. }
            | Self::VerifyInit { .. } => {}
            Self::GetInfo { info } => visit(region(&**info)),
            Self::GetSlotList { slots, count, .. } => {
                if let Some(slots) = slots {
                    visit(region(&**slots));
                }
                visit(region(&**count));
            }
            Self::GetSlotInfo { info, .. } => visit(region(&**info)),
            Self::GetTokenInfo { info, .. } => visit(region(&**info)),
            Self::GetMechanismInfo { info, .. } => visit(region(&**info)),
            Self::OpenSession { session, .. } => visit(region(&**session)),
            Self::GetSessionInfo { info, .. } => visit(region(&**info)),
            Self::CreateObject {
                template, object, ..
            } => {
                visit_template(template, &mut visit);
                visit(region(&**object));
            }
            Self::GetAttributeValue { template, .. } => {
                visit(region(&**template));
                for request in template.iter() {
                    if let Some(value) = &request.value {
                        visit(region(&**value));
                    }
                }
            }
            Self::SetAttributeValue { template, .. } | Self::FindObjectsInit { template, .. } => {
                visit_template(template, &mut visit)
            }
            Self::FindObjects { objects, count, .. } => {
                visit(region(&**objects));
                visit(region(&**count));
            }
            Self::Encrypt {
                data, output, len, ..
            }
            | Self::EncryptUpdate {
                data, output, len, ..
            }
            | Self::Decrypt {
                data, output, len, ..
            }
            | Self::DecryptUpdate {
                data, output, len, ..
            }
            | Self::Digest {
                data, output, len, ..
            }
            | Self::Sign {
                data,
                signature: output,
                len,
                ..
            } => {
                visit(region(*data));
                if let Some(output) = output {
                    visit(region(&**output));
                }
                visit(region(&**len));
            }
            Self::EncryptFinal { output, len, .. }
            | Self::DecryptFinal { output, len, .. }
            | Self::DigestFinal { output, len, .. } => {
                if let Some(output) = output {
                    visit(region(&**output));
                }
                visit(region(&**len));
            }
            Self::DigestUpdate { data, .. } => visit(region(*data)),
            Self::Verify {
                data, signature, ..
            } => {
                visit(region(*data));
                visit(region(*signature));
            }
            Self::DeriveKey { template, key, .. } => {
                visit_template(template, &mut visit);
                visit(region(&**key));
            }
            Self::GenerateKeyPair {
                public_template,
                private_template,
                public_key,
                private_key,
                ..
            } => {
                visit_template(public_template, &mut visit);
                visit_template(private_template, &mut visit);
                visit(region(&**public_key));
                visit(region(&**private_key));
            }
            Self::GenerateRandom { output, .. } => visit(region(&**output)),
            Self::ImportBlob { header, blob } => {
                visit(region(*header));
                visit(region(*blob));
            }
            Self::LockKeys { keys } => visit(region(*keys)),
            Self::LockServices { functions } => visit(region(*functions)),
        }
    }
}

fn region<T: ?Sized>(value: &T) -> (usize, usize) {
    (value as *const T as *const u8 as usize, size_of_val(value))
}

fn visit_template(template: &[Attribute<'_>], visit: &mut impl FnMut((usize, usize))) {
    visit(region(template));
    for attribute in template {
        visit(region(attribute.value));
    }
}
