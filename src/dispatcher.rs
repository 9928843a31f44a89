//! KMS entry point
//!
//! Every request goes through [`KmsEntry::dispatch`]: the function identifier is range checked and
//! lock checked before the request is routed by the provenance of the objects it designates.

use core::hint::black_box;

use secure_engine_kms_interface::{
    blank_padded, FunctionId, Info, MechanismInfo, MechanismType, ObjectHandle, Rv,
    SessionFlags, SessionHandle, SessionInfo, SlotFlags, SlotId, SlotInfo, TokenFlags, TokenInfo,
    Version, FIRST_ID, LAST_ID,
};

use crate::config::{BlobKeys, ConfigError, KmsConfig, OBJECT_MAX_LEN, SESSIONS_MAX};
use crate::crypto::CryptoProvider;
use crate::ext_token::{ExternalSession, ExternalToken, NoExternalToken};
use crate::locks::LockRegistry;
use crate::objects::{self, Attribute, ObjectBuilder, ObjectLayout, ObjectRange, ObjectView};
use crate::session::{Notify, SessionRegistry, SessionState, EXTERNAL_SESSION_UNKNOWN};
use crate::store::{NoNvm, NvmStorage, ObjectStore};

mod crypto_ops;
mod import;
mod object_ops;
mod request;

pub use import::{BlobHeader, BLOB_HEADER_LEN, BLOB_MAGIC};
pub use request::Request;

const SLOT: SlotId = 0;
const CRYPTOKI_VERSION: Version = Version {
    major: 2,
    minor: 40,
};
const LIBRARY_VERSION: Version = Version { major: 0, minor: 1 };
const MANUFACTURER: &str = "Secure Engine";

/// PKCS#11 session states reported by `GetSessionInfo`
const RO_PUBLIC_SESSION: u32 = 0;
const RW_PUBLIC_SESSION: u32 = 2;

/// Entry point of the key management services
pub trait KmsEntry {
    /// `function_id` may carry the cluster tag of the caller.
    fn dispatch(&mut self, function_id: u32, request: Request<'_, '_>) -> Rv;
}

pub struct Kms<C, T = NoExternalToken, N = NoNvm> {
    locks: LockRegistry,
    sessions: SessionRegistry,
    store: ObjectStore<N>,
    crypto: C,
    token: T,
    blob_keys: Option<BlobKeys>,
}

/// Look up a local object, hiding locked keys
///
/// The lock is checked before and after the lookup, in two different forms.
fn lookup<'s, N: NvmStorage>(
    store: &'s ObjectStore<N>,
    locks: &LockRegistry,
    handle: ObjectHandle,
) -> Option<ObjectView<'s>> {
    if locks.is_key_locked(handle) {
        return None;
    }
    let object = store.get(handle)?;
    if black_box(locks.key_word(handle)) & (1 << (handle & 31)) != 0 {
        return None;
    }
    Some(object)
}

/// Local result unless it is `Ok`, in which case the token's result
fn merge(local: Rv, external: Option<Rv>) -> Rv {
    match external {
        Some(external) if local == Rv::Ok => external,
        _ => local,
    }
}

fn builder_error(_err: objects::Error) -> Rv {
    debug!("Failed to build object: {_err:?}");
    Rv::HostMemory
}

impl<C: CryptoProvider, T: ExternalToken, N: NvmStorage> Kms<C, T, N> {
    pub fn new(config: KmsConfig, crypto: C, token: T, nvm: N) -> Result<Self, ConfigError> {
        config.layout.validate()?;
        let store = ObjectStore::new(config.layout, config.embedded, nvm);
        if !store.embedded_valid() {
            return Err(ConfigError::EmbeddedObjectInvalid);
        }
        if let Some(keys) = config.blob_keys {
            for handle in [keys.verify, keys.decrypt] {
                if config.layout.classify(handle) != ObjectRange::Embedded
                    || store.get(handle).is_none()
                {
                    return Err(ConfigError::BlobKeyNotEmbedded);
                }
            }
        }
        Ok(Self {
            locks: LockRegistry::new(),
            sessions: SessionRegistry::new(),
            store,
            crypto,
            token,
            blob_keys: config.blob_keys,
        })
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn layout(&self) -> &ObjectLayout {
        self.store.layout()
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    /// Event reported by the external token for one of its sessions
    ///
    /// Forwarded to the callback given when the matching local session was opened.
    pub fn notify_from_token(&self, external: ExternalSession, event: u32) -> Rv {
        match self.sessions.local_for_external(external) {
            Some(local) => self.sessions.notify(local, event),
            None => Rv::SessionHandleInvalid,
        }
    }

    fn handle(&mut self, request: Request<'_, '_>) -> Rv {
        match request {
            Request::Initialize => self.initialize(),
            Request::Finalize => self.finalize(),
            Request::GetInfo { info } => self.get_info(info).into(),
            Request::GetSlotList {
                token_present: _,
                slots,
                count,
            } => self.get_slot_list(slots, count).into(),
            Request::GetSlotInfo { slot, info } => self.get_slot_info(slot, info).into(),
            Request::GetTokenInfo { slot, info } => self.get_token_info(slot, info).into(),
            Request::GetMechanismInfo {
                slot,
                mechanism,
                info,
            } => self.get_mechanism_info(slot, mechanism, info).into(),
            Request::OpenSession {
                slot,
                flags,
                notify,
                session,
            } => self.open_session(slot, flags, notify, session).into(),
            Request::CloseSession { session } => self.close_session(session),
            Request::GetSessionInfo { session, info } => {
                self.get_session_info(session, info).into()
            }
            Request::CreateObject {
                session,
                template,
                object,
            } => self.create_object(session, template, object).into(),
            Request::DestroyObject { session, object } => {
                self.destroy_object(session, object).into()
            }
            Request::GetAttributeValue {
                session,
                object,
                template,
            } => self.get_attribute_value(session, object, template).into(),
            Request::SetAttributeValue {
                session,
                object,
                template,
            } => self.set_attribute_value(session, object, template).into(),
            Request::FindObjectsInit { session, template } => {
                self.find_objects_init(session, template).into()
            }
            Request::FindObjects {
                session,
                objects,
                count,
            } => self.find_objects(session, objects, count).into(),
            Request::FindObjectsFinal { session } => self.find_objects_final(session).into(),
            Request::EncryptInit {
                session,
                mechanism,
                key,
            } => self
                .crypt_init(session, mechanism, key, SessionState::Encrypting)
                .into(),
            Request::Encrypt {
                session,
                data,
                output,
                len,
            } => self.encrypt(session, data, output, len, true),
            Request::EncryptUpdate {
                session,
                data,
                output,
                len,
            } => self.encrypt(session, data, output, len, false),
            Request::EncryptFinal {
                session,
                output,
                len,
            } => self.encrypt_final(session, output, len),
            Request::DecryptInit {
                session,
                mechanism,
                key,
            } => self
                .crypt_init(session, mechanism, key, SessionState::Decrypting)
                .into(),
            Request::Decrypt {
                session,
                data,
                output,
                len,
            } => self.decrypt(session, data, output, len, true),
            Request::DecryptUpdate {
                session,
                data,
                output,
                len,
            } => self.decrypt(session, data, output, len, false),
            Request::DecryptFinal {
                session,
                output,
                len,
            } => self.decrypt_final(session, output, len),
            Request::DigestInit { session, mechanism } => {
                self.digest_init(session, mechanism).into()
            }
            Request::Digest {
                session,
                data,
                output,
                len,
            } => self.digest(session, data, output, len),
            Request::DigestUpdate { session, data } => self.digest_update(session, data),
            Request::DigestFinal {
                session,
                output,
                len,
            } => self.digest_final(session, output, len),
            Request::SignInit {
                session,
                mechanism,
                key,
            } => self
                .sign_verify_init(session, mechanism, key, SessionState::Signing)
                .into(),
            Request::Sign {
                session,
                data,
                signature,
                len,
            } => self.sign(session, data, signature, len),
            Request::VerifyInit {
                session,
                mechanism,
                key,
            } => self
                .sign_verify_init(session, mechanism, key, SessionState::Verifying)
                .into(),
            Request::Verify {
                session,
                data,
                signature,
            } => self.verify(session, data, signature),
            Request::DeriveKey {
                session,
                mechanism,
                base_key,
                template,
                key,
            } => self
                .derive_key(session, mechanism, base_key, template, key)
                .into(),
            Request::GenerateKeyPair {
                session,
                mechanism,
                public_template,
                private_template,
                public_key,
                private_key,
            } => self
                .generate_key_pair(
                    session,
                    mechanism,
                    public_template,
                    private_template,
                    public_key,
                    private_key,
                )
                .into(),
            Request::GenerateRandom { session, output } => {
                self.generate_random(session, output).into()
            }
            Request::ImportBlob { header, blob } => self.import_blob(header, blob).into(),
            Request::LockKeys { keys } => self.lock_keys(keys).into(),
            Request::LockServices { functions } => self.lock_services(functions).into(),
            Request::Other(_function) => {
                debug!("{_function:?} is not supported");
                Rv::FunctionNotSupported
            }
        }
    }

    fn require_init(&self) -> Result<(), Rv> {
        if !self.sessions.is_initialized() {
            return Err(Rv::CryptokiNotInitialized);
        }
        Ok(())
    }

    fn require_session(&self, session: SessionHandle) -> Result<(), Rv> {
        self.require_init()?;
        self.sessions.check(session)
    }

    fn require_idle(&self, session: SessionHandle) -> Result<(), Rv> {
        if self.sessions.state(session)? != SessionState::Idle {
            return Err(Rv::OperationActive);
        }
        Ok(())
    }

    fn require_state(&self, session: SessionHandle, state: SessionState) -> Result<(), Rv> {
        self.require_session(session)?;
        if self.sessions.state(session)? != state {
            return Err(Rv::OperationNotInitialized);
        }
        Ok(())
    }

    /// Token session to use for `function`, when the token implements it
    fn token_session(
        &self,
        function: FunctionId,
        session: SessionHandle,
    ) -> Result<ExternalSession, Rv> {
        if !self.token.implements(function) {
            debug!("External token does not implement {function:?}");
            return Err(Rv::FunctionNotSupported);
        }
        Ok(self.sessions.external_session(session))
    }

    /// Lock latch of `handle`, read in two different forms
    fn key_locked(&self, handle: ObjectHandle) -> bool {
        self.locks.is_key_locked(handle)
            || black_box(self.locks.key_word(handle)) >> (handle & 31) & 1 == 1
    }

    /// Range receiving objects created with `template`
    fn target_range(&self, template: &[Attribute<'_>]) -> ObjectRange {
        let layout = self.layout();
        let token = objects::find(template, secure_engine_kms_interface::attribute::TOKEN)
            .and_then(|value| value.first())
            .is_some_and(|value| *value != 0);
        if token && layout.nvm_dynamic.is_some() {
            ObjectRange::NvmDynamic
        } else if layout.vm_dynamic.is_some() {
            ObjectRange::VmDynamic
        } else {
            ObjectRange::NvmDynamic
        }
    }

    /// Serialise and store a new object from attribute lists, earlier lists taking precedence
    fn store_object(
        &mut self,
        range: ObjectRange,
        parts: &[&[Attribute<'_>]],
    ) -> Result<ObjectHandle, Rv> {
        let handle = self.store.free_handle(range)?;
        let mut builder = ObjectBuilder::<OBJECT_MAX_LEN>::new(handle).map_err(builder_error)?;
        for part in parts {
            builder.extend(part).map_err(builder_error)?;
        }
        let handle = self.store.insert(&builder.finish())?;
        debug!("Stored object {handle} in {range:?}");
        Ok(handle)
    }

    fn initialize(&mut self) -> Rv {
        let external = self
            .token
            .implements(FunctionId::Initialize)
            .then(|| self.token.initialize());
        let mut local = self.sessions.initialize();
        if local == Rv::Ok {
            if let Err(_err) = self.store.load() {
                error!("Failed to load NVM objects: {_err:?}");
                self.sessions.finalize();
                local = Rv::DeviceMemory;
            } else {
                info!("KMS initialized");
            }
        }
        merge(local, external)
    }

    fn finalize(&mut self) -> Rv {
        let external = self
            .token
            .implements(FunctionId::Finalize)
            .then(|| self.token.finalize());
        let (local, finalized) = self.sessions.finalize();
        if finalized {
            for session in 1..=SESSIONS_MAX as SessionHandle {
                self.crypto.release(session);
            }
            self.store.release();
            info!("KMS finalized");
        }
        merge(local, external)
    }

    fn get_info(&self, info: &mut Option<Info>) -> Result<(), Rv> {
        self.require_init()?;
        *info = Some(Info {
            cryptoki_version: CRYPTOKI_VERSION,
            manufacturer_id: blank_padded(MANUFACTURER),
            flags: 0,
            library_description: blank_padded("Key management services"),
            library_version: LIBRARY_VERSION,
        });
        Ok(())
    }

    fn get_slot_list(&self, slots: Option<&mut [SlotId]>, count: &mut usize) -> Result<(), Rv> {
        self.require_init()?;
        *count = 1;
        match slots {
            None => Ok(()),
            Some([]) => Err(Rv::BufferTooSmall),
            Some([first, ..]) => {
                *first = SLOT;
                Ok(())
            }
        }
    }

    fn check_slot(&self, slot: SlotId) -> Result<(), Rv> {
        self.require_init()?;
        if slot != SLOT {
            return Err(Rv::SlotIdInvalid);
        }
        Ok(())
    }

    fn get_slot_info(&self, slot: SlotId, info: &mut Option<SlotInfo>) -> Result<(), Rv> {
        self.check_slot(slot)?;
        *info = Some(SlotInfo {
            slot_description: blank_padded("Secure engine enclave"),
            manufacturer_id: blank_padded(MANUFACTURER),
            flags: (SlotFlags::TOKEN_PRESENT | SlotFlags::HW_SLOT).bits(),
            hardware_version: Version { major: 0, minor: 0 },
            firmware_version: LIBRARY_VERSION,
        });
        Ok(())
    }

    fn get_token_info(&self, slot: SlotId, info: &mut Option<TokenInfo>) -> Result<(), Rv> {
        self.check_slot(slot)?;
        let model = if self.token.implements(FunctionId::Initialize) {
            "KMS + Ext.Token"
        } else {
            "KMS Foundations"
        };
        *info = Some(TokenInfo {
            label: blank_padded("Secure engine KMS"),
            manufacturer_id: blank_padded(MANUFACTURER),
            model: blank_padded(model),
            serial_number: blank_padded(""),
            flags: TokenFlags::WRITE_PROTECTED.bits(),
            max_session_count: SESSIONS_MAX as u32,
            session_count: self.sessions.open_count() as u32,
            max_rw_session_count: SESSIONS_MAX as u32,
            rw_session_count: self.sessions.rw_count() as u32,
            hardware_version: Version { major: 0, minor: 0 },
            firmware_version: LIBRARY_VERSION,
        });
        Ok(())
    }

    fn get_mechanism_info(
        &mut self,
        slot: SlotId,
        mechanism: MechanismType,
        info: &mut Option<MechanismInfo>,
    ) -> Result<(), Rv> {
        self.check_slot(slot)?;
        if self.token.implements(FunctionId::GetMechanismInfo) {
            if let Ok(external) = self.token.get_mechanism_info(slot, mechanism) {
                *info = Some(external);
                return Ok(());
            }
        }
        *info = Some(
            self.crypto
                .mechanism_info(mechanism)
                .ok_or(Rv::MechanismInvalid)?,
        );
        Ok(())
    }

    fn open_session(
        &mut self,
        slot: SlotId,
        flags: SessionFlags,
        notify: Option<Notify>,
        session: &mut SessionHandle,
    ) -> Result<(), Rv> {
        self.require_init()?;
        let handle = self.sessions.open(slot, flags, notify)?;
        if self.token.implements(FunctionId::OpenSession) {
            match self.token.open_session(slot, flags, notify.is_some()) {
                Ok(external) => self.sessions.register_external_session(handle, external)?,
                Err(rv) => {
                    warn!("External token refused to open a session: {rv:?}");
                    self.sessions.close(handle).ok();
                    return Err(rv);
                }
            }
        }
        debug!("Opened session {handle}");
        *session = handle;
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) -> Rv {
        if let Err(rv) = self.require_session(session) {
            return rv;
        }
        let external = self.sessions.external_session(session);
        let external = (self.token.implements(FunctionId::CloseSession)
            && external != EXTERNAL_SESSION_UNKNOWN)
            .then(|| self.token.close_session(external));
        self.crypto.release(session);
        let local = self.sessions.close(session).into();
        merge(local, external)
    }

    fn get_session_info(
        &self,
        session: SessionHandle,
        info: &mut Option<SessionInfo>,
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        let flags = self.sessions.flags(session)?;
        let state = if flags.contains(SessionFlags::RW_SESSION) {
            RW_PUBLIC_SESSION
        } else {
            RO_PUBLIC_SESSION
        };
        *info = Some(SessionInfo {
            slot_id: self.sessions.slot(session)?,
            state,
            flags: flags.bits(),
        });
        Ok(())
    }

    fn lock_keys(&mut self, keys: &[ObjectHandle]) -> Result<(), Rv> {
        self.require_init()?;
        if keys.is_empty() {
            return Err(Rv::ArgumentsBad);
        }
        for key in keys {
            self.locks.lock_key(*key);
        }
        info!("Locked {} keys", keys.len());
        Ok(())
    }

    fn lock_services(&mut self, functions: &[u32]) -> Result<(), Rv> {
        self.require_init()?;
        if functions.is_empty() {
            return Err(Rv::ArgumentsBad);
        }
        for function in functions {
            self.locks.lock_function(FunctionId::strip_cluster(*function));
        }
        info!("Locked {} functions", functions.len());
        Ok(())
    }
}

impl<C: CryptoProvider, T: ExternalToken, N: NvmStorage> KmsEntry for Kms<C, T, N> {
    fn dispatch(&mut self, function_id: u32, request: Request<'_, '_>) -> Rv {
        let id = FunctionId::strip_cluster(function_id);
        if !(FIRST_ID..LAST_ID).contains(&id) {
            warn!("Function {function_id:#x} out of range");
            return Rv::FunctionFailed;
        }
        let checked = black_box(id);
        if checked < FIRST_ID || checked >= LAST_ID {
            return Rv::FunctionFailed;
        }
        let Ok(function) = FunctionId::try_from(id) else {
            return Rv::FunctionFailed;
        };

        if self.locks.is_function_locked(id) {
            warn!("{function:?} is locked");
            return Rv::FunctionFailed;
        }
        if black_box(self.locks.function_bits()) >> id & 1 != 0 {
            return Rv::FunctionFailed;
        }

        if request.function() != function {
            debug!("{:?} request for {function:?}", request.function());
            return Rv::ArgumentsBad;
        }
        self.handle(request)
    }
}
