//! Software implementation of the mechanisms used by the KMS

use chacha20poly1305::{aead, AeadInPlace, ChaCha20Poly1305, KeyInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use secure_engine_kms_interface::{
    attribute, mechanism, MechanismFlags, MechanismInfo, MechanismType, Rv, SessionHandle,
};
use sha2::{Digest, Sha256};

use super::ecdsa_der::raw_signature;
use super::{write_output, CryptoProvider, Mechanism};
use crate::config::{BLOB_MAX_LEN, SESSIONS_MAX};
use crate::objects::ObjectView;

const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const DIGEST_LEN: usize = 32;
const SCALAR_LEN: usize = 32;
const HMAC_KEY_MAX: usize = 64;
/// Uncompressed SEC1 point
const POINT_LEN: usize = 65;

type HmacSha256 = Hmac<Sha256>;
type KeyBytes = heapless::Vec<u8, HMAC_KEY_MAX>;
type Scratch = heapless::Vec<u8, { BLOB_MAX_LEN + TAG_LEN }>;

const MECHANISMS: &[(MechanismType, u32, u32, MechanismFlags)] = &[
    (mechanism::SHA256, 0, 0, MechanismFlags::DIGEST),
    (
        mechanism::SHA256_HMAC,
        16,
        64,
        MechanismFlags::SIGN.union(MechanismFlags::VERIFY),
    ),
    (
        mechanism::ECDSA,
        256,
        256,
        MechanismFlags::SIGN.union(MechanismFlags::VERIFY),
    ),
    (
        mechanism::ECDSA_SHA256,
        256,
        256,
        MechanismFlags::SIGN.union(MechanismFlags::VERIFY),
    ),
    (
        mechanism::EC_KEY_PAIR_GEN,
        256,
        256,
        MechanismFlags::GENERATE_KEY_PAIR,
    ),
    (mechanism::ECDH1_DERIVE, 256, 256, MechanismFlags::DERIVE),
    (mechanism::HKDF_DERIVE, 16, 64, MechanismFlags::DERIVE),
    (
        mechanism::CHACHA20_POLY1305,
        32,
        32,
        MechanismFlags::ENCRYPT.union(MechanismFlags::DECRYPT),
    ),
];

enum Operation {
    Digest(Sha256),
    EcdsaSign { prehashed: bool, key: SigningKey },
    EcdsaVerify { prehashed: bool, key: VerifyingKey },
    HmacSign(KeyBytes),
    HmacVerify(KeyBytes),
    Encrypt { key: [u8; 32], nonce: [u8; NONCE_LEN] },
    Decrypt { key: [u8; 32], nonce: [u8; NONCE_LEN] },
}

/// Mechanisms implemented with the RustCrypto crates
///
/// `ChaCha20Poly1305` takes the 12 byte nonce as mechanism parameter and appends the tag to the
/// ciphertext. EC keys are P-256: private keys carry their scalar as `VALUE`, public keys their
/// uncompressed point as `EC_POINT`, raw or wrapped in a DER octet string.
pub struct SoftwareCrypto<R> {
    rng: R,
    operations: [Option<Operation>; SESSIONS_MAX],
}

impl<R: RngCore + CryptoRng> SoftwareCrypto<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            operations: Default::default(),
        }
    }

    fn slot(&mut self, session: SessionHandle) -> Result<&mut Option<Operation>, Rv> {
        (session as usize)
            .checked_sub(1)
            .and_then(|idx| self.operations.get_mut(idx))
            .ok_or(Rv::SessionHandleInvalid)
    }

    fn start(&mut self, session: SessionHandle, operation: Result<Operation, Rv>) -> Rv {
        let operation = match operation {
            Ok(operation) => operation,
            Err(rv) => return rv,
        };
        match self.slot(session) {
            Ok(slot @ None) => {
                *slot = Some(operation);
                Rv::Ok
            }
            Ok(Some(_)) => Rv::OperationActive,
            Err(rv) => rv,
        }
    }

    /// Take the context of a one-shot operation, it is put back by `finish`
    fn take(&mut self, session: SessionHandle) -> Result<Operation, Rv> {
        self.slot(session)?
            .take()
            .ok_or(Rv::OperationNotInitialized)
    }

    /// Put the context back if the caller is only probing the output length
    fn finish(&mut self, session: SessionHandle, operation: Operation, rv: Rv, probe: bool) -> Rv {
        if (rv == Rv::Ok && probe) || rv == Rv::BufferTooSmall {
            if let Ok(slot) = self.slot(session) {
                *slot = Some(operation);
            }
        }
        rv
    }

    fn crypt(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
        encrypt: bool,
    ) -> Rv {
        let operation = match self.take(session) {
            Ok(operation) => operation,
            Err(rv) => return rv,
        };
        let probe = output.is_none();
        let rv = match (&operation, encrypt) {
            (Operation::Encrypt { key, nonce }, true) => seal(key, nonce, data, output, len),
            (Operation::Decrypt { key, nonce }, false) => open(key, nonce, data, output, len),
            _ => Rv::OperationNotInitialized,
        };
        self.finish(session, operation, rv, probe)
    }
}

fn seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    data: &[u8],
    output: Option<&mut [u8]>,
    len: &mut usize,
) -> Rv {
    let required = data.len() + TAG_LEN;
    *len = required;
    let mut buffer = match Scratch::from_slice(data) {
        Ok(buffer) => buffer,
        Err(_) => return Rv::DataLenRange,
    };
    let Some(output) = output else {
        return Rv::Ok;
    };
    if output.len() < required {
        return Rv::BufferTooSmall;
    }
    let cipher = ChaCha20Poly1305::new(key.into());
    let tag = match cipher.encrypt_in_place_detached(nonce.into(), &[], &mut buffer) {
        Ok(tag) => tag,
        Err(aead::Error) => return Rv::FunctionFailed,
    };
    output[..data.len()].copy_from_slice(&buffer);
    output[data.len()..required].copy_from_slice(&tag);
    Rv::Ok
}

fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    data: &[u8],
    output: Option<&mut [u8]>,
    len: &mut usize,
) -> Rv {
    let Some(plain_len) = data.len().checked_sub(TAG_LEN) else {
        return Rv::EncryptedDataInvalid;
    };
    let (ciphertext, tag) = data.split_at(plain_len);
    let mut buffer = match Scratch::from_slice(ciphertext) {
        Ok(buffer) => buffer,
        Err(_) => return Rv::DataLenRange,
    };
    let cipher = ChaCha20Poly1305::new(key.into());
    if cipher
        .decrypt_in_place_detached(nonce.into(), &[], &mut buffer, tag.into())
        .is_err()
    {
        debug!("Authentication tag mismatch");
        return Rv::EncryptedDataInvalid;
    }
    write_output(&buffer, output, len)
}

pub(crate) fn secret_value<'a>(key: &ObjectView<'a>) -> Result<&'a [u8], Rv> {
    key.attribute(attribute::VALUE).ok_or(Rv::KeyHandleInvalid)
}

fn signing_key(key: &ObjectView<'_>) -> Result<SigningKey, Rv> {
    SigningKey::from_slice(secret_value(key)?).map_err(|_err| {
        debug!("Invalid EC private key: {_err:?}");
        Rv::KeyHandleInvalid
    })
}

pub(crate) fn verifying_key(key: &ObjectView<'_>) -> Result<VerifyingKey, Rv> {
    let point = key.attribute(attribute::EC_POINT).ok_or(Rv::KeyHandleInvalid)?;
    // DER OCTET STRING wrapping of the point
    let point = match point {
        [0x04, 0x41, inner @ ..] if inner.len() == POINT_LEN => inner,
        point => point,
    };
    VerifyingKey::from_sec1_bytes(point).map_err(|_err| {
        debug!("Invalid EC public key: {_err:?}");
        Rv::KeyHandleInvalid
    })
}

fn chacha_context(
    mechanism: &Mechanism<'_>,
    key: &ObjectView<'_>,
) -> Result<([u8; 32], [u8; NONCE_LEN]), Rv> {
    if mechanism.kind != mechanism::CHACHA20_POLY1305 {
        return Err(Rv::MechanismInvalid);
    }
    let nonce = mechanism
        .parameter
        .try_into()
        .map_err(|_| Rv::ArgumentsBad)?;
    let key = secret_value(key)?
        .try_into()
        .map_err(|_| Rv::KeyHandleInvalid)?;
    Ok((key, nonce))
}

fn hmac_key(key: &ObjectView<'_>) -> Result<KeyBytes, Rv> {
    KeyBytes::from_slice(secret_value(key)?).map_err(|_| Rv::KeyHandleInvalid)
}

impl<R: RngCore + CryptoRng> CryptoProvider for SoftwareCrypto<R> {
    fn mechanism_info(&self, mechanism: MechanismType) -> Option<MechanismInfo> {
        MECHANISMS
            .iter()
            .find(|(kind, ..)| *kind == mechanism)
            .map(|(_, min, max, flags)| MechanismInfo::new(*min, *max, *flags))
    }

    fn encrypt_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: &ObjectView<'_>,
    ) -> Rv {
        let operation = chacha_context(mechanism, key).map(|(key, nonce)| Operation::Encrypt { key, nonce });
        self.start(session, operation)
    }

    fn encrypt(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        self.crypt(session, data, output, len, true)
    }

    fn decrypt_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: &ObjectView<'_>,
    ) -> Rv {
        let operation = chacha_context(mechanism, key).map(|(key, nonce)| Operation::Decrypt { key, nonce });
        self.start(session, operation)
    }

    fn decrypt(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        self.crypt(session, data, output, len, false)
    }

    fn digest_init(&mut self, session: SessionHandle, mechanism: &Mechanism<'_>) -> Rv {
        let operation = match mechanism.kind {
            mechanism::SHA256 => Ok(Operation::Digest(Sha256::new())),
            _ => Err(Rv::MechanismInvalid),
        };
        self.start(session, operation)
    }

    fn digest(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        let operation = match self.take(session) {
            Ok(operation) => operation,
            Err(rv) => return rv,
        };
        let probe = output.is_none();
        let rv = match &operation {
            Operation::Digest(hasher) => {
                let digest = hasher.clone().chain_update(data).finalize();
                write_output(&digest, output, len)
            }
            _ => Rv::OperationNotInitialized,
        };
        self.finish(session, operation, rv, probe)
    }

    fn digest_update(&mut self, session: SessionHandle, data: &[u8]) -> Rv {
        match self.slot(session) {
            Ok(Some(Operation::Digest(hasher))) => {
                hasher.update(data);
                Rv::Ok
            }
            Ok(_) => Rv::OperationNotInitialized,
            Err(rv) => rv,
        }
    }

    fn digest_final(
        &mut self,
        session: SessionHandle,
        output: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        self.digest(session, &[], output, len)
    }

    fn sign_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: &ObjectView<'_>,
    ) -> Rv {
        let operation = match mechanism.kind {
            mechanism::ECDSA | mechanism::ECDSA_SHA256 => {
                signing_key(key).map(|key| Operation::EcdsaSign {
                    prehashed: mechanism.kind == mechanism::ECDSA,
                    key,
                })
            }
            mechanism::SHA256_HMAC => hmac_key(key).map(Operation::HmacSign),
            _ => Err(Rv::MechanismInvalid),
        };
        self.start(session, operation)
    }

    fn sign(
        &mut self,
        session: SessionHandle,
        data: &[u8],
        signature: Option<&mut [u8]>,
        len: &mut usize,
    ) -> Rv {
        let operation = match self.take(session) {
            Ok(operation) => operation,
            Err(rv) => return rv,
        };
        let probe = signature.is_none();
        let rv = match &operation {
            Operation::EcdsaSign { .. } if probe => {
                *len = 2 * SCALAR_LEN;
                Rv::Ok
            }
            Operation::EcdsaSign { prehashed, key } => {
                let signed: Result<Signature, _> = if *prehashed {
                    key.sign_prehash(data)
                } else {
                    key.try_sign(data)
                };
                match signed {
                    Ok(signed) => write_output(&signed.to_bytes(), signature, len),
                    Err(_err) => {
                        debug!("ECDSA signature failed: {_err:?}");
                        Rv::DataInvalid
                    }
                }
            }
            Operation::HmacSign(key) => match <HmacSha256 as Mac>::new_from_slice(key) {
                Ok(mac) => write_output(&mac.chain_update(data).finalize().into_bytes(), signature, len),
                Err(_) => Rv::KeyHandleInvalid,
            },
            _ => Rv::OperationNotInitialized,
        };
        self.finish(session, operation, rv, probe)
    }

    fn verify_init(
        &mut self,
        session: SessionHandle,
        mechanism: &Mechanism<'_>,
        key: &ObjectView<'_>,
    ) -> Rv {
        let operation = match mechanism.kind {
            mechanism::ECDSA | mechanism::ECDSA_SHA256 => {
                verifying_key(key).map(|key| Operation::EcdsaVerify {
                    prehashed: mechanism.kind == mechanism::ECDSA,
                    key,
                })
            }
            mechanism::SHA256_HMAC => hmac_key(key).map(Operation::HmacVerify),
            _ => Err(Rv::MechanismInvalid),
        };
        self.start(session, operation)
    }

    fn verify(&mut self, session: SessionHandle, data: &[u8], signature: &[u8]) -> Rv {
        let operation = match self.take(session) {
            Ok(operation) => operation,
            Err(rv) => return rv,
        };
        match operation {
            Operation::EcdsaVerify { prehashed, key } => {
                let Some(signature) = raw_signature(signature)
                    .and_then(|raw| Signature::from_slice(&raw).ok())
                else {
                    return Rv::SignatureInvalid;
                };
                let verified = if prehashed {
                    key.verify_prehash(data, &signature)
                } else {
                    key.verify(data, &signature)
                };
                match verified {
                    Ok(()) => Rv::Ok,
                    Err(_) => Rv::SignatureInvalid,
                }
            }
            Operation::HmacVerify(key) => match <HmacSha256 as Mac>::new_from_slice(&key) {
                Ok(mac) => match mac.chain_update(data).verify_slice(signature) {
                    Ok(()) => Rv::Ok,
                    Err(_) => Rv::SignatureInvalid,
                },
                Err(_) => Rv::KeyHandleInvalid,
            },
            _ => Rv::OperationNotInitialized,
        }
    }

    fn derive_key(
        &mut self,
        mechanism: &Mechanism<'_>,
        base: &ObjectView<'_>,
        output: &mut [u8],
    ) -> Result<usize, Rv> {
        match mechanism.kind {
            mechanism::HKDF_DERIVE => {
                let hkdf = Hkdf::<Sha256>::new(None, secret_value(base)?);
                hkdf.expand(mechanism.parameter, output)
                    .map_err(|_| Rv::DataLenRange)?;
                Ok(output.len())
            }
            mechanism::ECDH1_DERIVE => {
                let secret = signing_key(base)?;
                let peer = p256::PublicKey::from_sec1_bytes(mechanism.parameter)
                    .map_err(|_| Rv::ArgumentsBad)?;
                let shared =
                    p256::ecdh::diffie_hellman(secret.as_nonzero_scalar(), peer.as_affine());
                let shared = shared.raw_secret_bytes();
                let len = output.len().min(shared.len());
                output[..len].copy_from_slice(&shared[..len]);
                Ok(len)
            }
            _ => Err(Rv::MechanismInvalid),
        }
    }

    fn generate_key_pair(
        &mut self,
        mechanism: &Mechanism<'_>,
        public: &mut [u8],
        private: &mut [u8],
    ) -> Result<(usize, usize), Rv> {
        if mechanism.kind != mechanism::EC_KEY_PAIR_GEN {
            return Err(Rv::MechanismInvalid);
        }
        if public.len() < POINT_LEN || private.len() < SCALAR_LEN {
            return Err(Rv::BufferTooSmall);
        }
        let key = SigningKey::random(&mut self.rng);
        let point = key.verifying_key().to_encoded_point(false);
        public[..POINT_LEN].copy_from_slice(point.as_bytes());
        private[..SCALAR_LEN].copy_from_slice(&key.to_bytes());
        Ok((POINT_LEN, SCALAR_LEN))
    }

    fn release(&mut self, session: SessionHandle) {
        if let Ok(slot) = self.slot(session) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectBuilder;
    use crate::testing::TestRng;
    use hex_literal::hex;
    use secure_engine_kms_interface::{class, key_type};

    fn key_object(attributes: &[(u32, &[u8])]) -> heapless::Vec<u8, 256> {
        let mut builder = ObjectBuilder::<256>::new(5).unwrap();
        for (kind, value) in attributes {
            builder.push(*kind, value).unwrap();
        }
        builder.finish()
    }

    fn crypto() -> SoftwareCrypto<TestRng> {
        SoftwareCrypto::new(TestRng::default())
    }

    #[test]
    fn sha256_digest() {
        let mut crypto = crypto();
        let mechanism = Mechanism::new(mechanism::SHA256);
        assert_eq!(crypto.digest_init(1, &mechanism), Rv::Ok);
        assert_eq!(crypto.digest_init(1, &mechanism), Rv::OperationActive);

        let mut len = 0;
        assert_eq!(crypto.digest(1, b"abc", None, &mut len), Rv::Ok);
        assert_eq!(len, DIGEST_LEN);
        let mut out = [0; DIGEST_LEN];
        assert_eq!(crypto.digest(1, b"abc", Some(&mut out), &mut len), Rv::Ok);
        assert_eq!(
            out,
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            crypto.digest(1, b"abc", Some(&mut out), &mut len),
            Rv::OperationNotInitialized
        );

        assert_eq!(crypto.digest_init(2, &mechanism), Rv::Ok);
        assert_eq!(crypto.digest_update(2, b"a"), Rv::Ok);
        assert_eq!(crypto.digest_update(2, b"bc"), Rv::Ok);
        let mut streamed = [0; DIGEST_LEN];
        assert_eq!(crypto.digest_final(2, Some(&mut streamed), &mut len), Rv::Ok);
        assert_eq!(streamed, out);

        assert_eq!(
            crypto.digest_init(1, &Mechanism::new(mechanism::AES_ECB)),
            Rv::MechanismInvalid
        );
        assert_eq!(crypto.digest_init(6, &mechanism), Rv::SessionHandleInvalid);
    }

    #[test]
    fn ecdsa_roundtrip() {
        let mut crypto = crypto();
        let mut public = [0; POINT_LEN];
        let mut private = [0; SCALAR_LEN];
        let lens = crypto
            .generate_key_pair(
                &Mechanism::new(mechanism::EC_KEY_PAIR_GEN),
                &mut public,
                &mut private,
            )
            .unwrap();
        assert_eq!(lens, (POINT_LEN, SCALAR_LEN));

        let class = class::PRIVATE_KEY.to_le_bytes();
        let ec = key_type::EC.to_le_bytes();
        let private = key_object(&[
            (attribute::CLASS, &class),
            (attribute::KEY_TYPE, &ec),
            (attribute::VALUE, &private),
        ]);
        let public = key_object(&[(attribute::EC_POINT, &public)]);
        let private = ObjectView::parse(&private).unwrap();
        let public = ObjectView::parse(&public).unwrap();

        let mechanism = Mechanism::new(mechanism::ECDSA_SHA256);
        assert_eq!(crypto.sign_init(1, &mechanism, &private), Rv::Ok);
        let mut len = 0;
        assert_eq!(crypto.sign(1, b"message", None, &mut len), Rv::Ok);
        assert_eq!(len, 64);
        let mut short = [0; 10];
        assert_eq!(
            crypto.sign(1, b"message", Some(&mut short), &mut len),
            Rv::BufferTooSmall
        );
        let mut signature = [0; 64];
        assert_eq!(
            crypto.sign(1, b"message", Some(&mut signature), &mut len),
            Rv::Ok
        );

        assert_eq!(crypto.verify_init(1, &mechanism, &public), Rv::Ok);
        assert_eq!(crypto.verify(1, b"message", &signature), Rv::Ok);
        assert_eq!(crypto.verify_init(1, &mechanism, &public), Rv::Ok);
        assert_eq!(crypto.verify(1, b"massage", &signature), Rv::SignatureInvalid);
        assert_eq!(crypto.verify(1, b"message", &signature), Rv::OperationNotInitialized);

        let prehashed = Mechanism::new(mechanism::ECDSA);
        let digest = Sha256::digest(b"message");
        assert_eq!(crypto.verify_init(2, &prehashed, &public), Rv::Ok);
        assert_eq!(crypto.verify(2, &digest, &signature), Rv::Ok);

        assert_eq!(
            crypto.sign_init(1, &mechanism, &public),
            Rv::KeyHandleInvalid
        );
    }

    #[test]
    fn hmac_sign_verify() {
        let mut crypto = crypto();
        let key = key_object(&[(attribute::VALUE, b"key")]);
        let key = ObjectView::parse(&key).unwrap();
        let mechanism = Mechanism::new(mechanism::SHA256_HMAC);

        assert_eq!(crypto.sign_init(3, &mechanism, &key), Rv::Ok);
        let mut mac = [0; 32];
        let mut len = 0;
        assert_eq!(
            crypto.sign(
                3,
                b"The quick brown fox jumps over the lazy dog",
                Some(&mut mac),
                &mut len
            ),
            Rv::Ok
        );
        assert_eq!(
            mac,
            hex!("f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8")
        );

        assert_eq!(crypto.verify_init(3, &mechanism, &key), Rv::Ok);
        assert_eq!(
            crypto.verify(3, b"The quick brown fox jumps over the lazy dog", &mac),
            Rv::Ok
        );
        assert_eq!(crypto.verify_init(3, &mechanism, &key), Rv::Ok);
        assert_eq!(crypto.verify(3, b"other", &mac), Rv::SignatureInvalid);
    }

    #[test]
    fn chacha_roundtrip() {
        let mut crypto = crypto();
        let key = key_object(&[(attribute::VALUE, &[0x11; 32])]);
        let key = ObjectView::parse(&key).unwrap();
        let nonce = [0x22; NONCE_LEN];
        let mechanism = Mechanism::with_parameter(mechanism::CHACHA20_POLY1305, &nonce);

        assert_eq!(crypto.encrypt_init(1, &mechanism, &key), Rv::Ok);
        let mut len = 0;
        assert_eq!(crypto.encrypt(1, b"secret", None, &mut len), Rv::Ok);
        assert_eq!(len, 6 + TAG_LEN);
        let mut sealed = [0; 6 + TAG_LEN];
        assert_eq!(crypto.encrypt(1, b"secret", Some(&mut sealed), &mut len), Rv::Ok);

        assert_eq!(crypto.decrypt_init(1, &mechanism, &key), Rv::Ok);
        let mut opened = [0; 6];
        assert_eq!(crypto.decrypt(1, &sealed, Some(&mut opened), &mut len), Rv::Ok);
        assert_eq!(&opened, b"secret");

        sealed[0] ^= 1;
        assert_eq!(crypto.decrypt_init(1, &mechanism, &key), Rv::Ok);
        assert_eq!(
            crypto.decrypt(1, &sealed, Some(&mut opened), &mut len),
            Rv::EncryptedDataInvalid
        );

        assert_eq!(
            crypto.encrypt_init(1, &Mechanism::new(mechanism::CHACHA20_POLY1305), &key),
            Rv::ArgumentsBad
        );
        let mut out = [0; 32];
        assert_eq!(
            crypto.encrypt_update(1, b"x", Some(&mut out), &mut len),
            Rv::FunctionNotSupported
        );
    }

    #[test]
    fn hkdf_derivation() {
        let mut crypto = crypto();
        let base = key_object(&[(attribute::VALUE, &[0x0b; 22])]);
        let base = ObjectView::parse(&base).unwrap();
        let mut okm = [0; 42];
        let len = crypto
            .derive_key(
                &Mechanism::with_parameter(mechanism::HKDF_DERIVE, b"info"),
                &base,
                &mut okm,
            )
            .unwrap();
        assert_eq!(len, 42);
        let mut expected = [0; 42];
        Hkdf::<Sha256>::new(None, &[0x0b; 22])
            .expand(b"info", &mut expected)
            .unwrap();
        assert_eq!(okm, expected);

        assert_eq!(
            crypto.derive_key(&Mechanism::new(mechanism::SHA256), &base, &mut okm),
            Err(Rv::MechanismInvalid)
        );
    }

    #[test]
    fn mechanism_table() {
        let crypto = crypto();
        let info = crypto.mechanism_info(mechanism::ECDSA_SHA256).unwrap();
        assert!(info.flags().contains(MechanismFlags::SIGN));
        assert_eq!(info.max_key_size, 256);
        assert!(crypto.mechanism_info(mechanism::AES_GCM).is_none());
    }
}
