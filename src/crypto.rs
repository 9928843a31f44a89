//! Cryptographic operations on local objects
//!
//! The dispatcher only decides whether and on which key an operation runs. The arithmetic is done
//! by a [`CryptoProvider`], which keeps one operation context per session.

use secure_engine_kms_interface::{MechanismInfo, MechanismType, Rv, SessionHandle};

use crate::objects::ObjectView;

mod ecdsa_der;
mod software;

pub use software::SoftwareCrypto;
pub(crate) use software::{secret_value, verifying_key};

/// Mechanism and its parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mechanism<'a> {
    pub kind: MechanismType,
    pub parameter: &'a [u8],
}

impl<'a> Mechanism<'a> {
    pub const fn new(kind: MechanismType) -> Self {
        Self {
            kind,
            parameter: &[],
        }
    }

    pub const fn with_parameter(kind: MechanismType, parameter: &'a [u8]) -> Self {
        Self { kind, parameter }
    }
}

/// Deliver `result` following the PKCS#11 output convention
///
/// Without `output` only the length is reported. A short `output` yields `BufferTooSmall` with the
/// required length in `len`.
pub fn write_output(result: &[u8], output: Option<&mut [u8]>, len: &mut usize) -> Rv {
    *len = result.len();
    match output {
        None => Rv::Ok,
        Some(output) if output.len() < result.len() => Rv::BufferTooSmall,
        Some(output) => {
            output[..result.len()].copy_from_slice(result);
            Rv::Ok
        }
    }
}

/// Whether a call returning `rv` expects to be repeated with a real output buffer
pub fn is_length_probe(rv: Rv, has_output: bool) -> bool {
    rv == Rv::BufferTooSmall || (rv == Rv::Ok && !has_output)
}

/// Every method defaults to `FunctionNotSupported`.
pub trait CryptoProvider {
    fn mechanism_info(&self, _mechanism: MechanismType) -> Option<MechanismInfo> {
        None
    }

    fn encrypt_init(
        &mut self,
        _session: SessionHandle,
        _mechanism: &Mechanism<'_>,
        _key: &ObjectView<'_>,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn encrypt(
        &mut self,
        _session: SessionHandle,
        _data: &[u8],
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn encrypt_update(
        &mut self,
        _session: SessionHandle,
        _data: &[u8],
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn encrypt_final(
        &mut self,
        _session: SessionHandle,
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn decrypt_init(
        &mut self,
        _session: SessionHandle,
        _mechanism: &Mechanism<'_>,
        _key: &ObjectView<'_>,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn decrypt(
        &mut self,
        _session: SessionHandle,
        _data: &[u8],
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn decrypt_update(
        &mut self,
        _session: SessionHandle,
        _data: &[u8],
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn decrypt_final(
        &mut self,
        _session: SessionHandle,
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn digest_init(&mut self, _session: SessionHandle, _mechanism: &Mechanism<'_>) -> Rv {
        Rv::FunctionNotSupported
    }

    fn digest(
        &mut self,
        _session: SessionHandle,
        _data: &[u8],
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn digest_update(&mut self, _session: SessionHandle, _data: &[u8]) -> Rv {
        Rv::FunctionNotSupported
    }

    fn digest_final(
        &mut self,
        _session: SessionHandle,
        _output: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn sign_init(
        &mut self,
        _session: SessionHandle,
        _mechanism: &Mechanism<'_>,
        _key: &ObjectView<'_>,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn sign(
        &mut self,
        _session: SessionHandle,
        _data: &[u8],
        _signature: Option<&mut [u8]>,
        _len: &mut usize,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn verify_init(
        &mut self,
        _session: SessionHandle,
        _mechanism: &Mechanism<'_>,
        _key: &ObjectView<'_>,
    ) -> Rv {
        Rv::FunctionNotSupported
    }

    fn verify(&mut self, _session: SessionHandle, _data: &[u8], _signature: &[u8]) -> Rv {
        Rv::FunctionNotSupported
    }

    /// Derive `output.len()` bytes of key material from `base`
    fn derive_key(
        &mut self,
        _mechanism: &Mechanism<'_>,
        _base: &ObjectView<'_>,
        _output: &mut [u8],
    ) -> Result<usize, Rv> {
        Err(Rv::FunctionNotSupported)
    }

    /// Generate a key pair, returning the lengths of the public point and of the private value
    fn generate_key_pair(
        &mut self,
        _mechanism: &Mechanism<'_>,
        _public: &mut [u8],
        _private: &mut [u8],
    ) -> Result<(usize, usize), Rv> {
        Err(Rv::FunctionNotSupported)
    }

    /// Drop the operation context of `session`
    fn release(&mut self, _session: SessionHandle) {}
}
