//! Fixtures shared by the unit tests

use std::boxed::Box;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::vec::Vec;

use hex_literal::hex;
use p256::ecdsa::SigningKey;
use rand::{CryptoRng, RngCore};
use secure_engine_kms_interface::{
    attribute, class, key_type, Cluster, FunctionId, FwState, ObjectHandle, Rv, SessionFlags,
    SessionHandle, SlotId,
};

use crate::config::{BlobKeys, KmsConfig, OBJECT_MAX_LEN};
use crate::crypto::{write_output, Mechanism, SoftwareCrypto};
use crate::dispatcher::{Kms, KmsEntry, Request};
use crate::ext_token::{ExternalSession, ExternalToken, NoExternalToken};
use crate::fwimg::{Flash, FlashError, ImageLayout, SlotConfig};
use crate::objects::{Attribute, AttributeRequest, HandleRange, ObjectBuilder, ObjectLayout};
use crate::store::{NvmError, NvmStorage, ObjectBlob};

pub const SIGNER_SCALAR: [u8; 32] =
    hex!("c9afa9d845ba75166b5c215767b1d6934e50c3db36e89b127b8a622b120f6721");
pub const BLOB_KEY: [u8; 32] = [0x42; 32];
pub const EXTERNAL_BASE: ExternalSession = 0x100;
pub const EXTERNAL_OBJECT: ObjectHandle = 70;
pub const EXTERNAL_SIGNATURE: &[u8] = b"external signature";

/// Deterministic xorshift generator
#[derive(Debug, Clone)]
pub struct TestRng(u64);

impl Default for TestRng {
    fn default() -> Self {
        Self(0x2545_F491_4F6C_DD1D)
    }
}

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let value = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&value[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for TestRng {}

#[derive(Debug, Clone, Default)]
pub struct MemoryNvm {
    records: BTreeMap<u32, Vec<u8>>,
    /// Key whose writes fail
    failing: Option<u32>,
}

impl MemoryNvm {
    pub fn failing_on(key: u32) -> Self {
        Self {
            records: BTreeMap::new(),
            failing: Some(key),
        }
    }

    pub fn contains(&self, key: u32) -> bool {
        self.records.contains_key(&key)
    }
}

impl NvmStorage for MemoryNvm {
    fn read<'b>(&mut self, key: u32, buffer: &'b mut [u8]) -> Result<Option<&'b [u8]>, NvmError> {
        let Some(record) = self.records.get(&key) else {
            return Ok(None);
        };
        let buffer = buffer.get_mut(..record.len()).ok_or(NvmError)?;
        buffer.copy_from_slice(record);
        Ok(Some(buffer))
    }

    fn write(&mut self, key: u32, data: &[u8]) -> Result<(), NvmError> {
        if self.failing == Some(key) {
            return Err(NvmError);
        }
        self.records.insert(key, data.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: u32) -> Result<(), NvmError> {
        self.records.remove(&key);
        Ok(())
    }
}

fn build(handle: ObjectHandle, attributes: &[(u32, &[u8])]) -> ObjectBlob {
    let mut builder = ObjectBuilder::<OBJECT_MAX_LEN>::new(handle).unwrap();
    for (kind, value) in attributes {
        builder.push(*kind, value).unwrap();
    }
    builder.finish()
}

/// Data object carrying a label
pub fn object(handle: ObjectHandle, label: &[u8]) -> ObjectBlob {
    build(
        handle,
        &[
            (attribute::CLASS, &class::DATA.to_le_bytes()),
            (attribute::LABEL, label),
        ],
    )
}

pub fn signer_point() -> [u8; 65] {
    let key = SigningKey::from_slice(&SIGNER_SCALAR).unwrap();
    let point = key.verifying_key().to_encoded_point(false);
    point.as_bytes().try_into().unwrap()
}

/// Provisioned objects: AES key, signing key pair, blob decryption key and HMAC key
pub fn embedded() -> &'static [&'static [u8]] {
    static EMBEDDED: OnceLock<&'static [&'static [u8]]> = OnceLock::new();
    EMBEDDED.get_or_init(|| {
        let secret = class::SECRET_KEY.to_le_bytes();
        let ec = key_type::EC.to_le_bytes();
        let point = signer_point();
        let objects = [
            build(
                1,
                &[
                    (attribute::CLASS, &secret),
                    (attribute::KEY_TYPE, &key_type::AES.to_le_bytes()),
                    (attribute::LABEL, b"aes"),
                    (attribute::VALUE, &[0x2B; 16]),
                    (attribute::EXTRACTABLE, &[0]),
                ],
            ),
            build(
                2,
                &[
                    (attribute::CLASS, &class::PRIVATE_KEY.to_le_bytes()),
                    (attribute::KEY_TYPE, &ec),
                    (attribute::LABEL, b"signer"),
                    (attribute::VALUE, &SIGNER_SCALAR),
                    (attribute::SIGN, &[1]),
                    (attribute::EXTRACTABLE, &[0]),
                ],
            ),
            build(
                3,
                &[
                    (attribute::CLASS, &class::PUBLIC_KEY.to_le_bytes()),
                    (attribute::KEY_TYPE, &ec),
                    (attribute::LABEL, b"blob verify"),
                    (attribute::EC_POINT, &point),
                    (attribute::VERIFY, &[1]),
                ],
            ),
            build(
                4,
                &[
                    (attribute::CLASS, &secret),
                    (attribute::KEY_TYPE, &key_type::CHACHA20.to_le_bytes()),
                    (attribute::LABEL, b"blob decrypt"),
                    (attribute::VALUE, &BLOB_KEY),
                    (attribute::EXTRACTABLE, &[0]),
                ],
            ),
            build(
                5,
                &[
                    (attribute::CLASS, &secret),
                    (attribute::KEY_TYPE, &key_type::GENERIC_SECRET.to_le_bytes()),
                    (attribute::LABEL, b"hmac"),
                    (attribute::VALUE, &[0x5C; 32]),
                ],
            ),
        ];
        let objects: Vec<&'static [u8]> = objects
            .iter()
            .map(|blob| &*Box::leak(blob.to_vec().into_boxed_slice()))
            .collect();
        let objects: &'static [&'static [u8]] = Box::leak(objects.into_boxed_slice());
        objects
    })
}

pub fn config() -> KmsConfig {
    KmsConfig {
        layout: ObjectLayout {
            nvm_dynamic: Some(HandleRange::new(111, 130)),
            ..Default::default()
        },
        embedded: embedded(),
        blob_keys: Some(BlobKeys {
            verify: 3,
            decrypt: 4,
        }),
    }
}

pub type TestKms<T = NoExternalToken> = Kms<SoftwareCrypto<TestRng>, T, MemoryNvm>;

pub fn kms() -> TestKms {
    kms_with(NoExternalToken)
}

pub fn kms_with<T: ExternalToken>(token: T) -> TestKms<T> {
    Kms::new(
        config(),
        SoftwareCrypto::new(TestRng::default()),
        token,
        MemoryNvm::default(),
    )
    .unwrap()
}

pub fn kms_on(nvm: MemoryNvm) -> TestKms {
    Kms::new(
        config(),
        SoftwareCrypto::new(TestRng::default()),
        NoExternalToken,
        nvm,
    )
    .unwrap()
}

/// Dispatch `request` under its own function identifier, as issued inside the enclave
pub fn call(kms: &mut impl KmsEntry, request: Request<'_, '_>) -> Rv {
    let id = request.function().with_cluster(Cluster::SecureWorld);
    kms.dispatch(id, request)
}

pub fn open_session(kms: &mut impl KmsEntry) -> SessionHandle {
    let mut session = 0;
    let request = Request::OpenSession {
        slot: 0,
        flags: SessionFlags::SERIAL_SESSION,
        notify: None,
        session: &mut session,
    };
    assert_eq!(call(kms, request), Rv::Ok);
    session
}

/// External token recording the calls it receives
#[derive(Debug)]
pub struct MockToken {
    functions: &'static [FunctionId],
    pub calls: Vec<FunctionId>,
    pub lifecycle: Rv,
    pub close_result: Rv,
    pub refuse_sessions: bool,
    pub notify_requested: bool,
    opened: u32,
}

impl MockToken {
    pub fn implementing(functions: &'static [FunctionId]) -> Self {
        Self {
            functions,
            calls: Vec::new(),
            lifecycle: Rv::Ok,
            close_result: Rv::Ok,
            refuse_sessions: false,
            notify_requested: false,
            opened: 0,
        }
    }
}

impl ExternalToken for MockToken {
    fn implements(&self, function: FunctionId) -> bool {
        self.functions.contains(&function)
    }

    fn initialize(&mut self) -> Rv {
        self.calls.push(FunctionId::Initialize);
        self.lifecycle
    }

    fn finalize(&mut self) -> Rv {
        self.calls.push(FunctionId::Finalize);
        self.lifecycle
    }

    fn open_session(
        &mut self,
        _slot: SlotId,
        _flags: SessionFlags,
        notify: bool,
    ) -> Result<ExternalSession, Rv> {
        self.calls.push(FunctionId::OpenSession);
        if self.refuse_sessions {
            return Err(Rv::SessionCount);
        }
        self.notify_requested = notify;
        self.opened += 1;
        Ok(EXTERNAL_BASE + self.opened - 1)
    }

    fn close_session(&mut self, _session: ExternalSession) -> Rv {
        self.calls.push(FunctionId::CloseSession);
        self.close_result
    }

    fn create_object(
        &mut self,
        _session: ExternalSession,
        _template: &[Attribute<'_>],
    ) -> Result<ObjectHandle, Rv> {
        self.calls.push(FunctionId::CreateObject);
        Ok(EXTERNAL_OBJECT)
    }

    fn destroy_object(&mut self, _session: ExternalSession, _object: ObjectHandle) -> Rv {
        self.calls.push(FunctionId::DestroyObject);
        Rv::Ok
    }

    fn get_attribute_value(
        &mut self,
        _session: ExternalSession,
        _object: ObjectHandle,
        template: &mut [AttributeRequest<'_>],
    ) -> Rv {
        self.calls.push(FunctionId::GetAttributeValue);
        for request in template {
            request.len = Some(b"external".len());
        }
        Rv::Ok
    }

    fn sign_init(
        &mut self,
        _session: ExternalSession,
        _mechanism: &Mechanism<'_>,
        _key: ObjectHandle,
    ) -> Rv {
        self.calls.push(FunctionId::SignInit);
        Rv::Ok
    }

    fn sign(
        &mut self,
        _session: ExternalSession,
        _data: &[u8],
        signature: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        self.calls.push(FunctionId::Sign);
        write_output(EXTERNAL_SIGNATURE, signature, len)
    }

    fn generate_random(&mut self, _session: ExternalSession, output: &mut [u8]) -> Rv {
        self.calls.push(FunctionId::GenerateRandom);
        output.fill(0xA5);
        Rv::Ok
    }
}

pub const IMAGE_LAYOUT: ImageLayout = ImageLayout {
    slots: &[
        SlotConfig::active(0x0800_0000),
        SlotConfig::active(0x0801_0000),
        SlotConfig::download(0x0802_0000),
    ],
    master_slot: 0,
    state_offset: 0x20,
    image_offset: 0x200,
};

/// Sparse flash, erased bytes read as `0xFF`
#[derive(Debug, Clone, Default)]
pub struct MemoryFlash {
    bytes: BTreeMap<usize, u8>,
    writes: usize,
    erases: usize,
}

impl MemoryFlash {
    /// Program bytes regardless of their current value
    pub fn program(&mut self, address: usize, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.bytes.insert(address + offset, *byte);
        }
    }

    pub fn set_word(&mut self, slot: usize, idx: usize, value: u32) {
        let address = IMAGE_LAYOUT.slots[slot].header + IMAGE_LAYOUT.state_offset + idx * 4;
        self.program(address, &value.to_le_bytes());
    }

    pub fn set_state(&mut self, slot: usize, state: FwState) {
        for (idx, word) in state.pattern().into_iter().enumerate() {
            self.set_word(slot, idx, word);
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn erase_count(&self) -> usize {
        self.erases
    }

    fn byte(&self, address: usize) -> u8 {
        self.bytes.get(&address).copied().unwrap_or(0xFF)
    }
}

impl Flash for MemoryFlash {
    fn read(&mut self, address: usize, buffer: &mut [u8]) -> Result<(), FlashError> {
        for (offset, byte) in buffer.iter_mut().enumerate() {
            *byte = self.byte(address + offset);
        }
        Ok(())
    }

    fn write(&mut self, address: usize, data: &[u8]) -> Result<(), FlashError> {
        let sets_bits = data
            .iter()
            .enumerate()
            .any(|(offset, byte)| byte & !self.byte(address + offset) != 0);
        if sets_bits {
            return Err(FlashError);
        }
        self.writes += 1;
        self.program(address, data);
        Ok(())
    }

    fn erase(&mut self, address: usize, len: usize) -> Result<(), FlashError> {
        self.erases += 1;
        self.bytes.retain(|at, _| !(address..address + len).contains(at));
        Ok(())
    }
}
