//! Flow app version handling.
//!
//! The Flow app reports its version through the `GET VERSION` command. The
//! connector compares it against a configured minimum and uses it to select
//! the signature decoder (see [`crate::signature::SignatureEncoding`]).
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::version::Version;
//!
//! let installed: Version = "1.2.0".parse().unwrap();
//! assert!(installed >= Version::new(1, 0, 0));
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::{Error, Result};

/// A `major.minor.patch` version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
    /// Patch version.
    pub patch: u16,
}

impl Version {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().strip_prefix('v').unwrap_or(s.trim());
        let mut parts = s.split('.');
        let mut next = |name: &str| -> Result<u16> {
            parts
                .next()
                .ok_or_else(|| Error::Config(format!("version {s:?} is missing the {name} part")))?
                .parse()
                .map_err(|_| Error::Config(format!("version {s:?} has a non-numeric {name} part")))
        };

        let version = Self::new(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(Error::Config(format!("version {s:?} has too many parts")));
        }
        Ok(version)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// The answer to a `GET VERSION` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppVersion {
    /// The app version number.
    pub version: Version,

    /// Whether the app runs in test mode.
    pub test_mode: bool,

    /// Whether the device reports itself as locked.
    pub device_locked: bool,

    /// Device target identifier, when the app reports one.
    pub target_id: Option<[u8; 4]>,
}

impl AppVersion {
    /// Parses the response data of a `GET VERSION` command.
    ///
    /// Four layouts exist across app generations:
    ///
    /// | Length | Layout |
    /// |--------|--------|
    /// | 4  | `mode, major, minor, patch` (1 byte each) |
    /// | 7  | `mode, major, minor, patch` (2-byte big-endian numbers) |
    /// | 9  | 1-byte numbers, `locked`, `target_id(4)` |
    /// | 12 | 2-byte numbers, `locked`, `target_id(4)` |
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] for any other length.
    pub fn from_response(data: &[u8]) -> Result<Self> {
        let wide = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        let target = |i: usize| Some([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        let (version, device_locked, target_id) = match data.len() {
            4 => (
                Version::new(data[1].into(), data[2].into(), data[3].into()),
                false,
                None,
            ),
            7 => (Version::new(wide(1), wide(3), wide(5)), false, None),
            9 => (
                Version::new(data[1].into(), data[2].into(), data[3].into()),
                data[4] == 1,
                target(5),
            ),
            12 => (
                Version::new(wide(1), wide(3), wide(5)),
                data[7] == 1,
                target(8),
            ),
            len => {
                return Err(Error::MalformedResponse(format!(
                    "unexpected version response length {len}"
                )));
            }
        };

        Ok(Self {
            version,
            test_mode: data[0] != 0,
            device_locked,
            target_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let version: Version = "1.2.0".parse().unwrap();
        assert_eq!(version, Version::new(1, 2, 0));
        assert_eq!(version.to_string(), "1.2.0");

        assert_eq!("v0.9.3".parse::<Version>().unwrap(), Version::new(0, 9, 3));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("1.2".parse::<Version>(), Err(Error::Config(_))));
        assert!(matches!("1.x.0".parse::<Version>(), Err(Error::Config(_))));
        assert!(matches!("1.2.3.4".parse::<Version>(), Err(Error::Config(_))));
    }

    #[test]
    fn ordering() {
        assert!(Version::new(1, 2, 0) >= Version::new(1, 0, 0));
        assert!(Version::new(0, 10, 0) > Version::new(0, 9, 9));
        assert!(Version::new(0, 8, 1) < Version::new(0, 9, 0));
    }

    #[test]
    fn short_response() {
        let app = AppVersion::from_response(&[0x00, 0x00, 0x09, 0x03]).unwrap();
        assert_eq!(app.version, Version::new(0, 9, 3));
        assert!(!app.test_mode);
        assert!(!app.device_locked);
        assert_eq!(app.target_id, None);
    }

    #[test]
    fn long_response_with_lock_flag() {
        let data = [
            0x01, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x01, 0x33, 0x00, 0x00, 0x04,
        ];
        let app = AppVersion::from_response(&data).unwrap();
        assert_eq!(app.version, Version::new(1, 2, 0));
        assert!(app.test_mode);
        assert!(app.device_locked);
        assert_eq!(app.target_id, Some([0x33, 0x00, 0x00, 0x04]));
    }

    #[test]
    fn nine_byte_response() {
        let data = [0x00, 0x01, 0x02, 0x00, 0x00, 0x31, 0x10, 0x00, 0x04];
        let app = AppVersion::from_response(&data).unwrap();
        assert_eq!(app.version, Version::new(1, 2, 0));
        assert!(!app.device_locked);
        assert_eq!(app.target_id, Some([0x31, 0x10, 0x00, 0x04]));
    }

    #[test]
    fn unexpected_length() {
        let result = AppVersion::from_response(&[0x00, 0x01]);
        assert!(matches!(result, Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn serde_as_string() {
        let version = Version::new(0, 9, 0);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"0.9.0\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }
}
