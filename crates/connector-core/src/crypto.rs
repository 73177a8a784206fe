//! Key material and crypto options.
//!
//! The Flow app signs with either ECDSA P-256 or ECDSA secp256k1, hashing
//! with SHA2-256 or SHA3-256. The pair is sent to the device packed in a
//! `u16` ("crypto options"):
//!
//! ```text
//! | Signature algorithm (high byte) | Hash algorithm (low byte) |
//! ```
//!
//! The device returns public keys in SEC1 uncompressed form
//! (`0x04 || x || y`); Flow stores them as the raw 64-byte `x || y`.
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::crypto::{CryptoOptions, HashAlgorithm, SignatureAlgorithm};
//!
//! let options = CryptoOptions::default();
//! assert_eq!(options.to_u16(), 0x0201);
//! assert_eq!(options.signature_algorithm, SignatureAlgorithm::EcdsaP256);
//! assert_eq!(options.hash_algorithm, HashAlgorithm::Sha2_256);
//! ```

use core::fmt;
use core::str::FromStr;

use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// Signature algorithms supported by the Flow app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// ECDSA over NIST P-256.
    #[default]
    #[serde(rename = "ECDSA_P256")]
    EcdsaP256,
    /// ECDSA over secp256k1.
    #[serde(rename = "ECDSA_secp256k1")]
    EcdsaSecp256k1,
}

impl SignatureAlgorithm {
    /// Returns the device code of the algorithm.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::EcdsaP256 => 0x02,
            Self::EcdsaSecp256k1 => 0x03,
        }
    }

    /// Returns the algorithm name used by Flow services.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ECDSA_P256",
            Self::EcdsaSecp256k1 => "ECDSA_secp256k1",
        }
    }

    /// Looks up an algorithm by device code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] for an unknown code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x02 => Ok(Self::EcdsaP256),
            0x03 => Ok(Self::EcdsaSecp256k1),
            _ => Err(Error::MalformedResponse(format!(
                "unknown signature algorithm {code:#04x}"
            ))),
        }
    }
}

/// Hash algorithms supported by the Flow app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA2-256.
    #[default]
    #[serde(rename = "SHA2_256")]
    Sha2_256,
    /// SHA3-256.
    #[serde(rename = "SHA3_256")]
    Sha3_256,
}

impl HashAlgorithm {
    /// Returns the device code of the algorithm.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Sha2_256 => 0x01,
            Self::Sha3_256 => 0x03,
        }
    }

    /// Returns the algorithm name used by Flow services.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha2_256 => "SHA2_256",
            Self::Sha3_256 => "SHA3_256",
        }
    }

    /// Looks up an algorithm by device code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] for an unknown code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(Self::Sha2_256),
            0x03 => Ok(Self::Sha3_256),
            _ => Err(Error::MalformedResponse(format!(
                "unknown hash algorithm {code:#04x}"
            ))),
        }
    }
}

/// Signature and hash algorithm pair sent with every key operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CryptoOptions {
    /// Signature algorithm.
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
    /// Hash algorithm.
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

impl CryptoOptions {
    /// Creates options from an algorithm pair.
    #[must_use]
    pub const fn new(signature_algorithm: SignatureAlgorithm, hash_algorithm: HashAlgorithm) -> Self {
        Self {
            signature_algorithm,
            hash_algorithm,
        }
    }

    /// Packs the options as `(signature << 8) | hash`.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        ((self.signature_algorithm.code() as u16) << 8) | self.hash_algorithm.code() as u16
    }

    /// Unpacks options from their `u16` form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if either code is unknown.
    pub fn from_u16(value: u16) -> Result<Self> {
        let [signature, hash] = value.to_be_bytes();
        Ok(Self::new(
            SignatureAlgorithm::from_code(signature)?,
            HashAlgorithm::from_code(hash)?,
        ))
    }

    /// Serializes the options for the device (little-endian).
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.to_u16().to_le_bytes()
    }
}

/// A raw 64-byte public key (`x || y`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPublicKey([u8; 64]);

impl RawPublicKey {
    /// Length of the raw key in bytes.
    pub const BYTE_LEN: usize = 64;

    /// Length of the SEC1 uncompressed encoding returned by the device.
    pub const DEVICE_LEN: usize = 65;

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if `bytes` is not 64 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::BYTE_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Converts the device's uncompressed SEC1 encoding to a raw key.
    ///
    /// P-256 keys are also checked to be valid curve points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] on a wrong length, a missing `0x04`
    /// tag or a point that is not on the curve.
    pub fn from_device(encoded: &[u8], algorithm: SignatureAlgorithm) -> Result<Self> {
        if encoded.len() != Self::DEVICE_LEN {
            return Err(Error::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                Self::DEVICE_LEN,
                encoded.len()
            )));
        }
        if encoded[0] != 0x04 {
            return Err(Error::InvalidPublicKey(format!(
                "expected uncompressed point tag 0x04, got {:#04x}",
                encoded[0]
            )));
        }

        if algorithm == SignatureAlgorithm::EcdsaP256 {
            VerifyingKey::from_sec1_bytes(encoded)
                .map_err(|_| Error::InvalidPublicKey("point is not on P-256".to_string()))?;
        }

        Self::from_slice(&encoded[1..])
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Returns the key as lowercase hex without prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RawPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawPublicKey").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for RawPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for RawPublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        Self::from_slice(&hex::decode(s)?)
    }
}

impl Serialize for RawPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RawPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Parses a DER-encoded ECDSA signature into raw `(r, s)` components.
///
/// Components are left-padded to 32 bytes; the sign-padding zero DER adds to
/// integers with the high bit set is dropped.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if the DER encoding is malformed.
///
/// # Example
///
/// ```
/// use flow_ledger_connector_core::crypto::parse_der_signature;
///
/// // r = 1, s = 2
/// let der = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02];
/// let (r, s) = parse_der_signature(&der).unwrap();
/// assert_eq!(r[31], 1);
/// assert_eq!(s[31], 2);
/// ```
pub fn parse_der_signature(der: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    if der.len() < 8 {
        return Err(Error::InvalidSignature("DER too short".to_string()));
    }
    if der[0] != 0x30 {
        return Err(Error::InvalidSignature("invalid DER sequence tag".to_string()));
    }
    if usize::from(der[1]) + 2 > der.len() {
        return Err(Error::InvalidSignature("sequence length overflow".to_string()));
    }

    let (r, rest) = read_integer(&der[2..], "r")?;
    let (s, _) = read_integer(rest, "s")?;
    Ok((to_fixed_bytes(r)?, to_fixed_bytes(s)?))
}

/// Reads one DER `INTEGER`, returning its content and the remaining input.
fn read_integer<'a>(input: &'a [u8], name: &str) -> Result<(&'a [u8], &'a [u8])> {
    match input {
        [0x02, len, rest @ ..] if usize::from(*len) <= rest.len() => {
            Ok(rest.split_at(usize::from(*len)))
        }
        [0x02, ..] => Err(Error::InvalidSignature(format!("{name} length overflow"))),
        _ => Err(Error::InvalidSignature(format!("invalid {name} tag"))),
    }
}

/// Converts variable-length integer bytes to a fixed 32-byte array.
fn to_fixed_bytes(bytes: &[u8]) -> Result<[u8; 32]> {
    let bytes = match bytes {
        [0x00, rest @ ..] => rest,
        _ => bytes,
    };
    if bytes.len() > 32 {
        return Err(Error::InvalidSignature("integer too large".to_string()));
    }

    let mut result = [0u8; 32];
    result[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::SigningKey;

    use super::*;

    fn device_key() -> Vec<u8> {
        let signing_key = SigningKey::from_slice(&[0x11; 32]).unwrap();
        signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn options_pack_and_unpack() {
        let options = CryptoOptions::new(SignatureAlgorithm::EcdsaSecp256k1, HashAlgorithm::Sha3_256);
        assert_eq!(options.to_u16(), 0x0303);
        assert_eq!(options.to_le_bytes(), [0x03, 0x03]);
        assert_eq!(CryptoOptions::from_u16(0x0303).unwrap(), options);

        assert_eq!(CryptoOptions::default().to_le_bytes(), [0x01, 0x02]);
        assert!(CryptoOptions::from_u16(0x0909).is_err());
    }

    #[test]
    fn options_serde_names() {
        let options: CryptoOptions = serde_json::from_str(
            r#"{"signature_algorithm":"ECDSA_secp256k1","hash_algorithm":"SHA3_256"}"#,
        )
        .unwrap();
        assert_eq!(options.signature_algorithm.name(), "ECDSA_secp256k1");
        assert_eq!(options.hash_algorithm.name(), "SHA3_256");
    }

    #[test]
    fn public_key_from_device() {
        let encoded = device_key();
        let key = RawPublicKey::from_device(&encoded, SignatureAlgorithm::EcdsaP256).unwrap();
        assert_eq!(key.as_bytes().as_slice(), &encoded[1..]);
    }

    #[test]
    fn public_key_rejects_bad_encodings() {
        let mut encoded = device_key();
        assert!(RawPublicKey::from_device(&encoded[..64], SignatureAlgorithm::EcdsaP256).is_err());

        encoded[0] = 0x02;
        assert!(RawPublicKey::from_device(&encoded, SignatureAlgorithm::EcdsaP256).is_err());

        let mut off_curve = [0x04; 65];
        off_curve[64] = 0x05;
        assert!(matches!(
            RawPublicKey::from_device(&off_curve, SignatureAlgorithm::EcdsaP256),
            Err(Error::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let key = RawPublicKey::from_device(&device_key(), SignatureAlgorithm::EcdsaP256).unwrap();
        let parsed: RawPublicKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("abcd".parse::<RawPublicKey>().is_err());
    }

    #[test]
    fn parse_der_signature_with_leading_zero() {
        // r has its high bit set so DER prefixes it with 0x00.
        let mut der = vec![0x30, 0x26, 0x02, 0x21, 0x00];
        der.extend_from_slice(&[0x80; 32]);
        der.extend_from_slice(&[0x02, 0x01, 0x07]);
        let (r, s) = parse_der_signature(&der).unwrap();
        assert_eq!(r, [0x80; 32]);
        assert_eq!(s[31], 0x07);
        assert!(s[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn parse_der_signature_invalid() {
        assert!(parse_der_signature(&[0x30, 0x06, 0x02]).is_err());
        assert!(parse_der_signature(&[0x31, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]).is_err());
        assert!(parse_der_signature(&[0x30, 0x06, 0x02, 0x09, 0x01, 0x02, 0x01, 0x02]).is_err());
        assert!(parse_der_signature(&[0x30, 0x06, 0x02, 0x01, 0x01, 0x04, 0x01, 0x02]).is_err());
    }
}
