//! Cryptographic operations, key derivation and generation

use secure_engine_kms_interface::{
    attribute, class, key_type, FunctionId, ObjectHandle, Rv, SessionHandle,
};

use super::{lookup, Kms};
use crate::crypto::{is_length_probe, CryptoProvider, Mechanism};
use crate::ext_token::ExternalToken;
use crate::objects::{self, Attribute, ObjectRange};
use crate::session::{SessionState, KEY_NOT_KNOWN};
use crate::store::NvmStorage;

/// Derived key length when the template has no `VALUE_LEN`
const DERIVED_DEFAULT_LEN: usize = 32;
const DERIVED_MAX_LEN: usize = 64;
const PUBLIC_MAX_LEN: usize = 97;
const PRIVATE_MAX_LEN: usize = 48;

/// Whether the operation step yielding `rv` ended the operation
fn terminates(rv: Rv, has_output: bool, final_step: bool) -> bool {
    if final_step {
        !is_length_probe(rv, has_output)
    } else {
        rv != Rv::Ok && rv != Rv::BufferTooSmall
    }
}

impl<C: CryptoProvider, T: ExternalToken, N: NvmStorage> Kms<C, T, N> {
    /// Back to idle when the step yielding `rv` ended the operation
    fn conclude(&mut self, session: SessionHandle, rv: Rv, ended: bool) -> Rv {
        if ended {
            self.sessions.reset(session);
            self.crypto.release(session);
        }
        rv
    }

    pub(super) fn crypt_init(
        &mut self,
        session: SessionHandle,
        mechanism: Option<Mechanism<'_>>,
        key: ObjectHandle,
        state: SessionState,
    ) -> Result<(), Rv> {
        let mechanism = mechanism.ok_or(Rv::MechanismInvalid)?;
        self.require_session(session)?;
        if self.layout().classify(key) == ObjectRange::Unknown {
            return Err(Rv::ObjectHandleInvalid);
        }
        self.require_idle(session)?;
        let object = lookup(&self.store, &self.locks, key).ok_or(Rv::KeyHandleInvalid)?;
        let rv = match state {
            SessionState::Encrypting => self.crypto.encrypt_init(session, &mechanism, &object),
            _ => self.crypto.decrypt_init(session, &mechanism, &object),
        };
        rv.into_result()?;
        self.sessions.set_state(session, state, key)
    }

    /// Key of the operation in progress, unless it got locked since the operation started
    fn operation_key(&mut self, session: SessionHandle, state: SessionState) -> Result<ObjectHandle, Rv> {
        self.require_state(session, state)?;
        let key = self.sessions.key(session)?;
        if key != KEY_NOT_KNOWN && self.key_locked(key) {
            warn!("Key {key} got locked during an operation");
            self.conclude(session, Rv::KeyHandleInvalid, true);
            return Err(Rv::KeyHandleInvalid);
        }
        Ok(key)
    }

    pub(super) fn encrypt(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
        final_step: bool,
    ) -> Rv {
        if let Err(rv) = self.operation_key(session, SessionState::Encrypting) {
            return rv;
        }
        let has_output = output.is_some();
        let rv = if final_step {
            self.crypto.encrypt(session, data, output, len)
        } else {
            self.crypto.encrypt_update(session, data, output, len)
        };
        self.conclude(session, rv, terminates(rv, has_output, final_step))
    }

    pub(super) fn encrypt_final(
        &mut self,
        session: SessionHandle,
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        if let Err(rv) = self.operation_key(session, SessionState::Encrypting) {
            return rv;
        }
        let has_output = output.is_some();
        let rv = self.crypto.encrypt_final(session, output, len);
        self.conclude(session, rv, terminates(rv, has_output, true))
    }

    pub(super) fn decrypt(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
        final_step: bool,
    ) -> Rv {
        if let Err(rv) = self.operation_key(session, SessionState::Decrypting) {
            return rv;
        }
        let has_output = output.is_some();
        let rv = if final_step {
            self.crypto.decrypt(session, data, output, len)
        } else {
            self.crypto.decrypt_update(session, data, output, len)
        };
        self.conclude(session, rv, terminates(rv, has_output, final_step))
    }

    pub(super) fn decrypt_final(
        &mut self,
        session: SessionHandle,
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        if let Err(rv) = self.operation_key(session, SessionState::Decrypting) {
            return rv;
        }
        let has_output = output.is_some();
        let rv = self.crypto.decrypt_final(session, output, len);
        self.conclude(session, rv, terminates(rv, has_output, true))
    }

    pub(super) fn digest_init(
        &mut self,
        session: SessionHandle,
        mechanism: Option<Mechanism<'_>>,
    ) -> Result<(), Rv> {
        let mechanism = mechanism.ok_or(Rv::MechanismInvalid)?;
        self.require_session(session)?;
        self.require_idle(session)?;
        self.crypto.digest_init(session, &mechanism).into_result()?;
        self.sessions
            .set_state(session, SessionState::Digesting, KEY_NOT_KNOWN)
    }

    pub(super) fn digest(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        if let Err(rv) = self.require_state(session, SessionState::Digesting) {
            return rv;
        }
        let has_output = output.is_some();
        let rv = self.crypto.digest(session, data, output, len);
        self.conclude(session, rv, terminates(rv, has_output, true))
    }

    pub(super) fn digest_update(&mut self, session: SessionHandle, data: &[u8]) -> Rv {
        if let Err(rv) = self.require_state(session, SessionState::Digesting) {
            return rv;
        }
        let rv = self.crypto.digest_update(session, data);
        self.conclude(session, rv, terminates(rv, true, false))
    }

    pub(super) fn digest_final(
        &mut self,
        session: SessionHandle,
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        if let Err(rv) = self.require_state(session, SessionState::Digesting) {
            return rv;
        }
        let has_output = output.is_some();
        let rv = self.crypto.digest_final(session, output, len);
        self.conclude(session, rv, terminates(rv, has_output, true))
    }

    pub(super) fn sign_verify_init(
        &mut self,
        session: SessionHandle,
        mechanism: Option<Mechanism<'_>>,
        key: ObjectHandle,
        state: SessionState,
    ) -> Result<(), Rv> {
        let mechanism = mechanism.ok_or(Rv::MechanismInvalid)?;
        self.require_session(session)?;
        self.require_idle(session)?;
        if self.key_locked(key) {
            return Err(Rv::KeyHandleInvalid);
        }
        let signing = state == SessionState::Signing;
        let range = self.layout().classify(key);
        let rv = if range.is_external() {
            let function = if signing {
                FunctionId::SignInit
            } else {
                FunctionId::VerifyInit
            };
            let external = self.token_session(function, session)?;
            if signing {
                self.token.sign_init(external, &mechanism, key)
            } else {
                self.token.verify_init(external, &mechanism, key)
            }
        } else if range.is_local() {
            let object = lookup(&self.store, &self.locks, key).ok_or(Rv::KeyHandleInvalid)?;
            if signing {
                self.crypto.sign_init(session, &mechanism, &object)
            } else {
                self.crypto.verify_init(session, &mechanism, &object)
            }
        } else {
            return Err(Rv::ObjectHandleInvalid);
        };
        rv.into_result()?;
        self.sessions.set_state(session, state, key)
    }

    pub(super) fn sign(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        signature: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        let key = match self.operation_key(session, SessionState::Signing) {
            Ok(key) => key,
            Err(rv) => return rv,
        };
        let has_output = signature.is_some();
        let rv = if self.layout().classify(key).is_external() {
            match self.token_session(FunctionId::Sign, session) {
                Ok(external) => self.token.sign(external, data, signature, len),
                Err(rv) => rv,
            }
        } else {
            self.crypto.sign(session, data, signature, len)
        };
        self.conclude(session, rv, terminates(rv, has_output, true))
    }

    pub(super) fn verify(&mut self, session: SessionHandle, data: &[u8], signature: &[u8]) -> Rv {
        let key = match self.operation_key(session, SessionState::Verifying) {
            Ok(key) => key,
            Err(rv) => return rv,
        };
        let rv = if self.layout().classify(key).is_external() {
            match self.token_session(FunctionId::Verify, session) {
                Ok(external) => self.token.verify(external, data, signature),
                Err(rv) => rv,
            }
        } else {
            self.crypto.verify(session, data, signature)
        };
        self.conclude(session, rv, true)
    }

    pub(super) fn derive_key(
        &mut self,
        session: SessionHandle,
        mechanism: Option<Mechanism<'_>>,
        base_key: ObjectHandle,
        template: &[Attribute<'_>],
        key: &mut ObjectHandle,
    ) -> Result<(), Rv> {
        let mechanism = mechanism.ok_or(Rv::MechanismInvalid)?;
        self.require_session(session)?;
        if self.key_locked(base_key) {
            return Err(Rv::KeyHandleInvalid);
        }
        let range = self.layout().classify(base_key);
        if range.is_external() {
            let external = self.token_session(FunctionId::DeriveKey, session)?;
            *key = self
                .token
                .derive_key(external, &mechanism, base_key, template)?;
            return Ok(());
        }
        if !range.is_local() {
            return Err(Rv::ObjectHandleInvalid);
        }

        let value_len = match objects::find(template, attribute::VALUE_LEN) {
            None => DERIVED_DEFAULT_LEN,
            Some(value) => value
                .try_into()
                .map(u32::from_le_bytes)
                .map_err(|_| Rv::AttributeValueInvalid)? as usize,
        };
        if value_len == 0 || value_len > DERIVED_MAX_LEN {
            return Err(Rv::AttributeValueInvalid);
        }
        let mut value = [0; DERIVED_MAX_LEN];
        let base = lookup(&self.store, &self.locks, base_key).ok_or(Rv::KeyHandleInvalid)?;
        let len = self
            .crypto
            .derive_key(&mechanism, &base, &mut value[..value_len])?;

        let secret = class::SECRET_KEY.to_le_bytes();
        let generic = key_type::GENERIC_SECRET.to_le_bytes();
        let range = self.target_range(template);
        *key = self.store_object(
            range,
            &[
                &[Attribute::new(attribute::VALUE, &value[..len])],
                template,
                &[
                    Attribute::new(attribute::CLASS, &secret),
                    Attribute::new(attribute::KEY_TYPE, &generic),
                ],
            ],
        )?;
        debug!("Derived key {key} from {base_key}");
        Ok(())
    }

    pub(super) fn generate_key_pair(
        &mut self,
        session: SessionHandle,
        mechanism: Option<Mechanism<'_>>,
        public_template: &[Attribute<'_>],
        private_template: &[Attribute<'_>],
        public_key: &mut ObjectHandle,
        private_key: &mut ObjectHandle,
    ) -> Result<(), Rv> {
        let mechanism = mechanism.ok_or(Rv::MechanismInvalid)?;
        self.require_session(session)?;
        if let Ok(external) = self.token_session(FunctionId::GenerateKeyPair, session) {
            (*public_key, *private_key) = self.token.generate_key_pair(
                external,
                &mechanism,
                public_template,
                private_template,
            )?;
            return Ok(());
        }

        let mut public = [0; PUBLIC_MAX_LEN];
        let mut private = [0; PRIVATE_MAX_LEN];
        let (public_len, private_len) =
            self.crypto
                .generate_key_pair(&mechanism, &mut public, &mut private)?;

        let ec = key_type::EC.to_le_bytes();
        let public_class = class::PUBLIC_KEY.to_le_bytes();
        let private_class = class::PRIVATE_KEY.to_le_bytes();

        let range = self.target_range(public_template);
        let public_handle = self.store_object(
            range,
            &[
                &[Attribute::new(attribute::EC_POINT, &public[..public_len])],
                public_template,
                &[
                    Attribute::new(attribute::CLASS, &public_class),
                    Attribute::new(attribute::KEY_TYPE, &ec),
                ],
            ],
        )?;
        let range = self.target_range(private_template);
        let private_handle = self.store_object(
            range,
            &[
                &[Attribute::new(attribute::VALUE, &private[..private_len])],
                private_template,
                &[
                    Attribute::new(attribute::CLASS, &private_class),
                    Attribute::new(attribute::KEY_TYPE, &ec),
                ],
            ],
        );
        match private_handle {
            Ok(private_handle) => {
                *public_key = public_handle;
                *private_key = private_handle;
                debug!("Generated key pair {public_handle}/{private_handle}");
                Ok(())
            }
            Err(rv) => {
                self.store.remove(public_handle).ok();
                Err(rv)
            }
        }
    }

    pub(super) fn generate_random(
        &mut self,
        session: SessionHandle,
        output: &mut [u8],
    ) -> Result<(), Rv> {
        self.require_session(session)?;
        let external = self.token_session(FunctionId::GenerateRandom, session)?;
        self.token.generate_random(external, output).into_result()
    }
}
