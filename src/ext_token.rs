//! Optional second key management implementation, such as a discrete secure element
//!
//! Objects in the `ExtToken*` ranges live on the token. The dispatcher only calls a method after
//! [`ExternalToken::implements`] reported the matching function, so every method defaults to
//! `FunctionNotSupported`.

use secure_engine_kms_interface::{
    FunctionId, MechanismInfo, MechanismType, ObjectHandle, Rv, SessionFlags, SlotId,
};

use crate::crypto::Mechanism;
use crate::objects::{Attribute, AttributeRequest};

/// Sessions are designated by the token's own handles
pub type ExternalSession = u32;

pub trait ExternalToken {
    /// Whether the token's function table has an entry for `function`
    fn implements(&self, function: FunctionId) -> bool;

    fn initialize(&mut self) -> Rv {
        Rv::FunctionNotSupported
    }

    fn finalize(&mut self) -> Rv {
        Rv::FunctionNotSupported
    }

    fn get_mechanism_info(
        &mut self,
        _slot: SlotId,
        _mechanism: MechanismType,
    ) -> Result<MechanismInfo, Rv> {
        Err(Rv::FunctionNotSupported)
    }

    /// `notify` tells whether events should be reported back through
    /// [`Kms::notify_from_token`](crate::Kms::notify_from_token)
    fn open_session(
        &mut self,
        _slot: SlotId,
        _flags: SessionFlags,
        _notify: bool,
    ) -> Result<ExternalSession, Rv> {
        Err(Rv::FunctionNotSupported)
    }

    fn close_session(&mut self, _session: ExternalSession) -> Rv {
        Rv::FunctionNotSupported
    }

    fn create_object(
        &mut self,
        _session: ExternalSession,
        _template: &[Attribute<'_>],
    ) -> Result<ObjectHandle, Rv> {
        Err(Rv::FunctionNotSupported)
    }

    fn destroy_object(&mut self, _session: ExternalSession, _object: ObjectHandle) -> Rv {
        Rv::FunctionNotSupported
    }

    fn get_attribute_value(
        &mut self,
        _session: ExternalSession,
        _object: ObjectHandle,
        _template: &mut [AttributeRequest<'_>],
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn set_attribute_value(
        &mut self,
        _session: ExternalSession,
        _object: ObjectHandle,
        _template: &[Attribute<'_>],
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn find_objects_init(&mut self, _session: ExternalSession, _template: &[Attribute<'_>]) -> Rv {
        Rv::FunctionNotSupported
    }

    fn find_objects(
        &mut self,
        _session: ExternalSession,
        _objects: &mut [ObjectHandle],
    ) -> Result<usize, Rv> {
        Err(Rv::FunctionNotSupported)
    }

    fn find_objects_final(&mut self, _session: ExternalSession) -> Rv {
        Rv::FunctionNotSupported
    }

    fn sign_init(
        &mut self,
        _session: ExternalSession,
        _mechanism: &Mechanism<'_>,
        _key: ObjectHandle,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn sign(
        &mut self,
        _session: ExternalSession,
        _data: &[u8],
        _signature: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn verify_init(
        &mut self,
        _session: ExternalSession,
        _mechanism: &Mechanism<'_>,
        _key: ObjectHandle,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn verify(&mut self, _session: ExternalSession, _data: &[u8], _signature: &[u8]) -> Rv {
        Rv::FunctionNotSupported
    }

    fn derive_key(
        &mut self,
        _session: ExternalSession,
        _mechanism: &Mechanism<'_>,
        _base_key: ObjectHandle,
        _template: &[Attribute<'_>],
    ) -> Result<ObjectHandle, Rv> {
        Err(Rv::FunctionNotSupported)
    }

    /// Returns the public and private key handles
    fn generate_key_pair(
        &mut self,
        _session: ExternalSession,
        _mechanism: &Mechanism<'_>,
        _public_template: &[Attribute<'_>],
        _private_template: &[Attribute<'_>],
    ) -> Result<(ObjectHandle, ObjectHandle), Rv> {
        Err(Rv::FunctionNotSupported)
    }

    fn generate_random(&mut self, _session: ExternalSession, _output: &mut [u8]) -> Rv {
        Rv::FunctionNotSupported
    }
}

/// Configuration without an external token
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExternalToken;

impl ExternalToken for NoExternalToken {
    fn implements(&self, _function: FunctionId) -> bool {
        false
    }
}
