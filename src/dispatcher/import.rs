//! Installation of encrypted and signed object blobs into the NVM static range

use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::Signature;
use secure_engine_kms_interface::Rv;
use sha2::{Digest, Sha256};

use super::{lookup, Kms};
use crate::config::BLOB_MAX_LEN;
use crate::crypto::{secret_value, verifying_key, CryptoProvider};
use crate::ext_token::ExternalToken;
use crate::objects::{ObjectRange, ObjectView};
use crate::store::NvmStorage;

pub const BLOB_HEADER_LEN: usize = 320;
/// `"KMSB"`
pub const BLOB_MAGIC: u32 = 0x424D_534B;

const SIGNED_LEN: usize = 128;
const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const MAX_OBJECTS: usize = 16;

/// Fixed size header preceding an encrypted blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader<'a> {
    pub protocol_version: u16,
    pub version: u16,
    /// Plaintext length, the payload carries the authentication tag on top
    pub size: u32,
    /// SHA-256 of the plaintext
    pub digest: &'a [u8; 32],
    pub iv: &'a [u8; 16],
    signed: &'a [u8; SIGNED_LEN],
    signature: &'a [u8; 64],
}

impl<'a> BlobHeader<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Rv> {
        let bytes: &[u8; BLOB_HEADER_LEN] = bytes.try_into().map_err(|_| Rv::ArgumentsBad)?;
        let field = move |range: core::ops::Range<usize>| &bytes[range];
        if u32::from_le_bytes(array(field(0..4))?) != BLOB_MAGIC {
            debug!("Blob header magic mismatch");
            return Err(Rv::DataInvalid);
        }
        Ok(Self {
            protocol_version: u16::from_le_bytes(array(field(4..6))?),
            version: u16::from_le_bytes(array(field(6..8))?),
            size: u32::from_le_bytes(array(field(8..12))?),
            digest: array_ref(field(20..52))?,
            iv: array_ref(field(84..100))?,
            signed: array_ref(field(0..SIGNED_LEN))?,
            signature: array_ref(field(128..192))?,
        })
    }
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], Rv> {
    bytes.try_into().map_err(|_| Rv::DataInvalid)
}

fn array_ref<const N: usize>(bytes: &[u8]) -> Result<&[u8; N], Rv> {
    bytes.try_into().map_err(|_| Rv::DataInvalid)
}

impl<C: CryptoProvider, T: ExternalToken, N: NvmStorage> Kms<C, T, N> {
    /// Check the header signature with the embedded verification key
    ///
    /// `prehashed` selects the second, independent form of the check.
    fn authenticate_header(&self, header: &BlobHeader<'_>, prehashed: bool) -> Result<(), Rv> {
        let keys = self.blob_keys.ok_or(Rv::FunctionNotSupported)?;
        let key = lookup(&self.store, &self.locks, keys.verify).ok_or(Rv::KeyHandleInvalid)?;
        let key = verifying_key(&key)?;
        let signature = Signature::from_slice(header.signature).map_err(|_err| {
            debug!("Malformed header signature: {_err:?}");
            Rv::SignatureInvalid
        })?;
        let verified = if prehashed {
            key.verify_prehash(&Sha256::digest(header.signed), &signature)
        } else {
            key.verify(header.signed, &signature)
        };
        verified.map_err(|_| {
            warn!("Blob header authentication failed");
            Rv::SignatureInvalid
        })
    }

    pub(super) fn import_blob(&mut self, header: &[u8], blob: &[u8]) -> Result<(), Rv> {
        self.require_init()?;
        if self.sessions.open_count() != 0 {
            return Err(Rv::OperationActive);
        }
        let keys = self.blob_keys.ok_or(Rv::FunctionNotSupported)?;
        let header = BlobHeader::parse(header)?;
        self.authenticate_header(&header, false)?;

        let size = header.size as usize;
        if size > BLOB_MAX_LEN || blob.len() != size + TAG_LEN {
            return Err(Rv::DataLenRange);
        }
        let (ciphertext, tag) = blob.split_at(size);
        let mut plaintext = heapless::Vec::<u8, BLOB_MAX_LEN>::from_slice(ciphertext)
            .map_err(|_| Rv::DataLenRange)?;
        let key = lookup(&self.store, &self.locks, keys.decrypt).ok_or(Rv::KeyHandleInvalid)?;
        let cipher =
            ChaCha20Poly1305::new_from_slice(secret_value(&key)?).map_err(|_| Rv::KeyHandleInvalid)?;
        cipher
            .decrypt_in_place_detached(
                header.iv[..NONCE_LEN].into(),
                &[],
                &mut plaintext,
                tag.into(),
            )
            .map_err(|_| {
                warn!("Blob payload authentication failed");
                Rv::EncryptedDataInvalid
            })?;

        if Sha256::digest(&plaintext).as_slice() != header.digest {
            warn!("Blob digest mismatch");
            return Err(Rv::SignatureInvalid);
        }
        self.authenticate_header(&header, true)?;

        let mut objects = heapless::Vec::<&[u8], MAX_OBJECTS>::new();
        let mut rest = &plaintext[..];
        while !rest.is_empty() {
            let (object, len) = ObjectView::parse_prefix(rest).map_err(|_err| {
                debug!("Malformed object at {}: {_err:?}", plaintext.len() - rest.len());
                Rv::DataInvalid
            })?;
            if self.layout().classify(object.handle()) != ObjectRange::NvmStatic {
                warn!("Blob object {} outside of the static range", object.handle());
                return Err(Rv::DataInvalid);
            }
            let (blob, tail) = rest.split_at(len);
            objects.push(blob).map_err(|_| Rv::DataLenRange)?;
            rest = tail;
        }

        self.store.install_all(&objects)?;
        debug!("Installed {} objects", objects.len());
        info!("Imported blob version {}", header.version);
        Ok(())
    }
}
