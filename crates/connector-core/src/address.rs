//! Flow account addresses.
//!
//! A Flow address is 8 bytes. FCL passes addresses around both with and
//! without the `0x` prefix, so [`FlowAddress`] parses either form and offers
//! both renderings:
//!
//! - [`FlowAddress::with_prefix`] / [`Display`](core::fmt::Display): `0xf8d6e0586b0a20c7`
//! - [`FlowAddress::sans_prefix`]: `f8d6e0586b0a20c7`
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::FlowAddress;
//!
//! let with: FlowAddress = "0xf8d6e0586b0a20c7".parse().unwrap();
//! let sans: FlowAddress = "f8d6e0586b0a20c7".parse().unwrap();
//! assert_eq!(with, sans);
//! assert_eq!(with.sans_prefix(), "f8d6e0586b0a20c7");
//! ```

use core::fmt;
use core::str::FromStr;

use alloy_primitives::FixedBytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// A Flow account address (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FlowAddress(FixedBytes<8>);

impl FlowAddress {
    /// The length of a Flow address in bytes.
    pub const BYTE_LEN: usize = 8;

    /// Creates an address from its 8 raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(FixedBytes::new(bytes))
    }

    /// Returns the all-zero address, which the device uses for a cleared slot.
    #[must_use]
    pub const fn zero() -> Self {
        Self(FixedBytes::ZERO)
    }

    /// Checks if this is the all-zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Creates an address from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignable`] if the slice is not 8 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::BYTE_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidSignable(format!(
                "address must be {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(bytes))
    }

    /// Returns the raw address bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Returns the address as `0x`-prefixed lowercase hex.
    #[must_use]
    pub fn with_prefix(&self) -> String {
        format!("0x{}", self.sans_prefix())
    }

    /// Returns the address as lowercase hex without the `0x` prefix.
    #[must_use]
    pub fn sans_prefix(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for FlowAddress {
    type Err = Error;

    /// Parses a hex address, with or without `0x`.
    ///
    /// Short addresses are left-padded with zeros, matching how FCL
    /// normalizes addresses such as `0x01`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() || s.len() > Self::BYTE_LEN * 2 {
            return Err(Error::InvalidSignable(format!("invalid Flow address {s:?}")));
        }

        let padded = format!("{s:0>16}");
        let mut bytes = [0u8; Self::BYTE_LEN];
        hex::decode_to_slice(padded, &mut bytes)?;
        Ok(Self::new(bytes))
    }
}

impl fmt::Display for FlowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 8]> for FlowAddress {
    fn from(bytes: [u8; 8]) -> Self {
        Self::new(bytes)
    }
}

impl Serialize for FlowAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.with_prefix())
    }
}

impl<'de> Deserialize<'de> for FlowAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
