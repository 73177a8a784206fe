//! Derivation paths for Flow keys held on the device.
//!
//! Keys are addressed by a five-component path
//! `m/44'/{coin_type}'/{account}'/0/{key}`. The coin type depends on the
//! network (see [`Network::coin_type`]). One additional fixed path,
//! `m/44'/1'/769/0/0`, was used by earlier connector releases; accounts on it
//! are reported as legacy accounts.
//!
//! # Wire Format
//!
//! The device receives a path as five little-endian `u32` values (20 bytes),
//! with bit 31 set on hardened components.
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::config::Network;
//! use flow_ledger_connector_core::path::DerivationPath;
//!
//! let path = DerivationPath::derive(Network::Mainnet, 0, 1).unwrap();
//! assert_eq!(path.to_string(), "m/44'/539'/0'/0/1");
//! assert!(DerivationPath::legacy().is_legacy());
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::config::Network;
use crate::error::{Error, Result};

/// Bit marking a hardened path component.
pub const HARDENED: u32 = 0x8000_0000;

/// BIP-44 purpose component.
const PURPOSE: u32 = 44;

/// Key scheme used as the (unhardened) account component of the legacy path.
const LEGACY_SCHEME: u32 = 0x301;

/// A five-component key derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    components: [u32; 5],
}

impl DerivationPath {
    /// Length of the serialized path in bytes.
    pub const BYTE_LEN: usize = 20;

    /// The legacy path `m/44'/1'/769/0/0`.
    const LEGACY: Self = Self {
        components: [PURPOSE | HARDENED, 1 | HARDENED, LEGACY_SCHEME, 0, 0],
    };

    /// Path written to a slot when it is cleared: `m/0/0/0/0/0`.
    pub const CLEAR: Self = Self {
        components: [0; 5],
    };

    /// Derives the path for `(account_index, key_index)` on `network`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `account_index` cannot be hardened
    /// (it is `2^31` or larger) or `key_index` does not fit in 31 bits.
    pub fn derive(network: Network, account_index: u32, key_index: u32) -> Result<Self> {
        if account_index & HARDENED != 0 {
            return Err(Error::Config(format!(
                "account index {account_index} is out of range"
            )));
        }
        if key_index & HARDENED != 0 {
            return Err(Error::Config(format!("key index {key_index} is out of range")));
        }

        Ok(Self {
            components: [
                PURPOSE | HARDENED,
                network.coin_type() | HARDENED,
                account_index | HARDENED,
                0,
                key_index,
            ],
        })
    }

    /// Returns the fixed legacy path.
    #[must_use]
    pub const fn legacy() -> Self {
        Self::LEGACY
    }

    /// Checks if this is the legacy path.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        *self == Self::LEGACY
    }

    /// Creates a path from raw components.
    #[must_use]
    pub const fn from_components(components: [u32; 5]) -> Self {
        Self { components }
    }

    /// Returns the raw components.
    #[must_use]
    pub const fn components(&self) -> [u32; 5] {
        self.components
    }

    /// Serializes the path for the device.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];
        for (chunk, component) in bytes.chunks_exact_mut(4).zip(self.components) {
            chunk.copy_from_slice(&component.to_le_bytes());
        }
        bytes
    }

    /// Parses a path from its 20-byte device serialization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if `bytes` is not 20 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::BYTE_LEN {
            return Err(Error::MalformedResponse(format!(
                "derivation path must be {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            )));
        }

        let mut components = [0u32; 5];
        for (component, chunk) in components.iter_mut().zip(bytes.chunks_exact(4)) {
            *component = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self { components })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for component in self.components {
            if component & HARDENED == 0 {
                write!(f, "/{component}")?;
            } else {
                write!(f, "/{}'", component & !HARDENED)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix("m/")
            .ok_or_else(|| Error::Config(format!("path {s:?} must start with \"m/\"")))?;

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 5 {
            return Err(Error::Config(format!(
                "path {s:?} must have 5 components, got {}",
                parts.len()
            )));
        }

        let mut components = [0u32; 5];
        for (component, part) in components.iter_mut().zip(parts) {
            let (digits, hardened) = part
                .strip_suffix('\'')
                .map_or((part, false), |digits| (digits, true));
            let value: u32 = digits
                .parse()
                .map_err(|_| Error::Config(format!("invalid path component {part:?}")))?;
            if value & HARDENED != 0 {
                return Err(Error::Config(format!("path component {part:?} is out of range")));
            }
            *component = if hardened { value | HARDENED } else { value };
        }

        Ok(Self { components })
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
