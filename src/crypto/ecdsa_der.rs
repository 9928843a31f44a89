use der::asn1::UintRef;
use der::{Decode, Reader};

/// Length of a raw `r || s` P-256 signature
pub const RAW_SIGNATURE_LEN: usize = 64;
const FIELD_LEN: usize = RAW_SIGNATURE_LEN / 2;

pub struct DerSignature<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

impl<'a> DerSignature<'a> {
    /// Decode the `r` and `s` components of a DER-encoded ECDSA signature.
    pub fn from_der(der_bytes: &'a [u8]) -> der::Result<Self> {
        let mut reader = der::SliceReader::new(der_bytes)?;
        let header = der::Header::decode(&mut reader)?;
        header.tag.assert_eq(der::Tag::Sequence)?;

        let ret = reader.read_nested(header.length, |reader| {
            let r = UintRef::decode(reader)?;
            let s = UintRef::decode(reader)?;
            Ok(DerSignature { r, s })
        })?;

        reader.finish(ret)
    }

    /// Fixed size `r || s`, `None` if a component does not fit the P-256 field
    pub fn to_raw(&self) -> Option<[u8; RAW_SIGNATURE_LEN]> {
        let mut raw = [0; RAW_SIGNATURE_LEN];
        for (component, field) in [self.r, self.s].iter().zip(raw.chunks_exact_mut(FIELD_LEN)) {
            let bytes = component.as_bytes();
            let begin = FIELD_LEN.checked_sub(bytes.len())?;
            field[begin..].copy_from_slice(bytes);
        }
        Some(raw)
    }
}

/// Accept a signature either raw or DER encoded
pub fn raw_signature(signature: &[u8]) -> Option<[u8; RAW_SIGNATURE_LEN]> {
    if let Ok(raw) = signature.try_into() {
        return Some(raw);
    }
    DerSignature::from_der(signature)
        .ok()
        .and_then(|signature| signature.to_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn short_components_are_padded() {
        // SEQUENCE { INTEGER 0x01, INTEGER 0x00ff (leading zero stripped by UintRef) }
        let der = hex!("3007 020101 020200ff");
        let raw = raw_signature(&der).unwrap();
        assert_eq!(raw[31], 0x01);
        assert!(raw[..31].iter().all(|b| *b == 0));
        assert_eq!(raw[63], 0xff);
        assert!(raw[32..63].iter().all(|b| *b == 0));
    }

    #[test]
    fn raw_passthrough() {
        let raw = [0x42; RAW_SIGNATURE_LEN];
        assert_eq!(raw_signature(&raw), Some(raw));
        assert_eq!(raw_signature(&raw[..63]), None);
        assert_eq!(raw_signature(&hex!("3003 020101")), None);
    }
}
