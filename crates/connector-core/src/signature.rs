//! Raw ECDSA signatures returned by the Flow app.
//!
//! Flow expects signatures as the 64-byte concatenation `r || s`. The device
//! returns them in one of two layouts depending on the app release:
//!
//! - **Compact + DER** (newer apps): `r || s || v` (65 bytes) followed by the
//!   DER encoding of the same signature.
//! - **DER only** (older apps): `SEQUENCE { INTEGER r, INTEGER s }`.
//!
//! The layout is chosen from the app version via [`SignatureEncoding::for_app`],
//! never guessed from the response bytes.
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::signature::{RawSignature, SignatureEncoding};
//! use flow_ledger_connector_core::version::Version;
//!
//! let threshold = Version::new(0, 9, 0);
//! let encoding = SignatureEncoding::for_app(Version::new(1, 2, 0), threshold);
//! assert_eq!(encoding, SignatureEncoding::Compact);
//!
//! let mut response = vec![0x11; 32];
//! response.extend_from_slice(&[0x22; 32]);
//! response.push(0x01);
//! let signature = encoding.decode(&response).unwrap();
//! assert_eq!(signature.r(), &[0x11; 32]);
//! ```

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::crypto::parse_der_signature;
use crate::error::{Error, Result};
use crate::version::Version;

/// A 64-byte `r || s` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    r: [u8; 32],
    s: [u8; 32],
}

impl RawSignature {
    /// The length of a raw signature in bytes.
    pub const BYTE_LEN: usize = 64;

    /// The length of a compact `r || s || v` signature.
    pub const COMPACT_LEN: usize = 65;

    /// Creates a signature from its components.
    #[must_use]
    pub const fn new(r: [u8; 32], s: [u8; 32]) -> Self {
        Self { r, s }
    }

    /// Creates a signature from a 64-byte `r || s` slice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the slice is not 64 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::BYTE_LEN {
            return Err(Error::InvalidSignature(format!(
                "expected {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            )));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(Self::new(r, s))
    }

    /// Creates a signature from the compact `r || s || v` form, dropping `v`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the slice is not 65 bytes long.
    pub fn from_compact(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::COMPACT_LEN {
            return Err(Error::InvalidSignature(format!(
                "compact signature must be {} bytes, got {}",
                Self::COMPACT_LEN,
                bytes.len()
            )));
        }
        Self::from_bytes(&bytes[..Self::BYTE_LEN])
    }

    /// Creates a signature from its DER encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the DER encoding is malformed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (r, s) = parse_der_signature(der)?;
        Ok(Self::new(r, s))
    }

    /// Returns the R component.
    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// Returns the S component.
    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Serializes the signature to `r || s`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Returns the signature as lowercase hex without prefix, the form FCL
    /// expects in a composite signature.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Display for RawSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for RawSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RawSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

/// Layout of the signature in a `SIGN` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Compact `r || s || v` followed by DER; decoded from the compact part.
    Compact,
    /// DER only.
    Der,
}

impl SignatureEncoding {
    /// Selects the layout produced by an app of the given version.
    #[must_use]
    pub fn for_app(version: Version, compact_since: Version) -> Self {
        if version >= compact_since {
            Self::Compact
        } else {
            Self::Der
        }
    }

    /// Decodes a `SIGN` response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the response does not match the
    /// layout.
    pub fn decode(self, response: &[u8]) -> Result<RawSignature> {
        match self {
            Self::Compact => {
                let compact = response.get(..RawSignature::COMPACT_LEN).ok_or_else(|| {
                    Error::InvalidSignature(format!(
                        "response of {} bytes is too short for a compact signature",
                        response.len()
                    ))
                })?;
                RawSignature::from_compact(compact)
            }
            Self::Der => RawSignature::from_der(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der(r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut out = vec![0x30, (r.len() + s.len() + 4) as u8, 0x02, r.len() as u8];
        out.extend_from_slice(r);
        out.extend_from_slice(&[0x02, s.len() as u8]);
        out.extend_from_slice(s);
        out
    }

    #[test]
    fn from_compact_strips_recovery_byte() {
        let mut compact = vec![0xaa; 32];
        compact.extend_from_slice(&[0xbb; 32]);
        compact.push(0x01);

        let signature = RawSignature::from_compact(&compact).unwrap();
        assert_eq!(signature.to_bytes().as_slice(), &compact[..64]);
        assert!(RawSignature::from_compact(&compact[..64]).is_err());
    }

    #[test]
    fn from_der_left_pads_short_components() {
        let signature = RawSignature::from_der(&der(&[0x01, 0x02], &[0x7f; 31])).unwrap();
        let bytes = signature.to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..30], &[0u8; 30]);
        assert_eq!(&bytes[30..32], &[0x01, 0x02]);
        assert_eq!(bytes[32], 0x00);
        assert_eq!(&bytes[33..], &[0x7f; 31]);
    }

    #[test]
    fn from_der_strips_sign_padding() {
        let mut r = vec![0x00];
        r.extend_from_slice(&[0x90; 32]);
        let signature = RawSignature::from_der(&der(&r, &[0x01; 32])).unwrap();
        assert_eq!(signature.r(), &[0x90; 32]);
        assert_eq!(signature.s(), &[0x01; 32]);
    }

    #[test]
    fn encoding_follows_app_version() {
        let threshold = Version::new(0, 9, 0);
        assert_eq!(
            SignatureEncoding::for_app(Version::new(0, 9, 0), threshold),
            SignatureEncoding::Compact
        );
        assert_eq!(
            SignatureEncoding::for_app(Version::new(0, 8, 1), threshold),
            SignatureEncoding::Der
        );
    }

    #[test]
    fn compact_decoder_ignores_trailing_der() {
        let mut response = vec![0x11; 32];
        response.extend_from_slice(&[0x22; 32]);
        response.push(0x00);
        response.extend_from_slice(&der(&[0x11; 32], &[0x22; 32]));

        let signature = SignatureEncoding::Compact.decode(&response).unwrap();
        assert_eq!(signature.r(), &[0x11; 32]);
        assert_eq!(signature.s(), &[0x22; 32]);
    }

    #[test]
    fn decoders_agree_on_the_same_signature() {
        let der_bytes = der(&[0x33; 32], &[0x44; 32]);
        let mut compact = vec![0x33; 32];
        compact.extend_from_slice(&[0x44; 32]);
        compact.push(0x01);

        assert_eq!(
            SignatureEncoding::Der.decode(&der_bytes).unwrap(),
            SignatureEncoding::Compact.decode(&compact).unwrap()
        );
    }

    #[test]
    fn compact_decoder_rejects_short_response() {
        assert!(matches!(
            SignatureEncoding::Compact.decode(&[0u8; 10]),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn hex_and_serde() {
        let signature = RawSignature::new([0x01; 32], [0x02; 32]);
        assert_eq!(signature.to_hex().len(), 128);

        let json = serde_json::to_string(&signature).unwrap();
        let back: RawSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signature);
    }
}
