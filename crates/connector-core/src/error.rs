//! Error types for the Flow Ledger connector.
//!
//! This module provides a single error type [`enum@Error`] that covers every
//! failure mode of the connector core: talking to the device, discovering
//! accounts, building messages to sign and driving the session controller.
//!
//! # Error Categories
//!
//! - **Transport errors**: the device could not be reached or the user denied
//!   access. Recoverable by reconnecting.
//! - **Device errors**: the Flow app answered with a status word other than
//!   `0x9000`. The status code is always kept on the error value.
//! - **Session errors**: version mismatch, address mismatch, undetermined
//!   signer role.
//! - **Input errors**: malformed signables, keys, signatures and configuration.
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::Error;
//!
//! let err = Error::device(0x6985);
//! assert_eq!(err.to_string(), "device error 0x6985: Conditions not satisfied");
//! assert_eq!(err.device_code(), Some(0x6985));
//! ```

use core::result::Result as CoreResult;

use hex::FromHexError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::address::FlowAddress;
use crate::ledger::status;
use crate::version::Version;

/// The main error type for the Flow Ledger connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Device and Transport Errors
    // =========================================================================
    /// The transport could not be acquired or failed mid-exchange.
    ///
    /// Covers a disconnected or locked device, a closed Flow app and the user
    /// denying the browser permission prompt.
    #[error("transport error: {0}")]
    Transport(String),

    /// The Flow app reported a status word other than "no error".
    #[error("device error {code:#06x}: {message}")]
    Device {
        /// Raw status word returned by the device.
        code: u16,
        /// Human-readable description of the status word.
        message: String,
    },

    /// The installed Flow app is older than the required minimum.
    #[error("Flow app version {installed} is below the required {required}")]
    VersionMismatch {
        /// Version reported by the device.
        installed: Version,
        /// Minimum version this connector supports.
        required: Version,
    },

    /// An APDU command could not be built.
    #[error("APDU error: {0}")]
    Apdu(String),

    /// The device answered with bytes that do not match the command layout.
    #[error("malformed device response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The address known to the device disagrees with the expected address.
    #[error("address mismatch: expected {expected}, found {}", display_found(.found))]
    AddressMismatch {
        /// Address the in-progress request expects.
        expected: FlowAddress,
        /// Address actually selected or stored on the device.
        found: Option<FlowAddress>,
    },

    /// The address is neither a payload nor an envelope signer.
    #[error("could not determine whether to produce a payload or envelope signature")]
    SignerRoleUndetermined,

    /// The device key is not registered on the account.
    #[error("key is not registered on account {0}")]
    KeyNotFound(FlowAddress),

    /// An event arrived in a state that cannot handle it.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Unrecognized network or invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The public key is malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The signature is malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The signable payload is malformed or inconsistent.
    #[error("invalid signable: {0}")]
    InvalidSignable(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// The address registry or ledger-state service failed.
    #[error("registry error: {0}")]
    Registry(String),

    /// The host channel failed to deliver or receive a message.
    #[error("host channel error: {0}")]
    Channel(String),

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),
}

#[expect(clippy::ref_option, reason = "called from the thiserror format arguments")]
fn display_found(found: &Option<FlowAddress>) -> String {
    found.map_or_else(|| "no address".to_string(), |address| address.to_string())
}

impl Error {
    /// Builds a [`Error::Device`] from a raw status word.
    #[must_use]
    pub fn device(code: u16) -> Self {
        Self::Device {
            code,
            message: status::message(code).to_string(),
        }
    }

    /// Returns the device status word carried by this error, if any.
    #[must_use]
    pub const fn device_code(&self) -> Option<u16> {
        match self {
            Self::Device { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the user can recover by reconnecting the device.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Device { .. } | Self::AddressMismatch { .. }
        )
    }
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Self::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Registry(err.to_string())
    }
}

/// A specialized [`Result`] type for connector operations.
pub type Result<T> = CoreResult<T, Error>;

#[cfg(test)]
mod tests {
    use serde_json::{Value, from_str};

    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Transport("no device selected".to_string());
        assert_eq!(err.to_string(), "transport error: no device selected");

        let err = Error::device(0x6e00);
        assert_eq!(
            err.to_string(),
            "device error 0x6e00: App does not seem to be open"
        );

        let err = Error::VersionMismatch {
            installed: Version::new(0, 8, 1),
            required: Version::new(0, 9, 0),
        };
        assert_eq!(
            err.to_string(),
            "Flow app version 0.8.1 is below the required 0.9.0"
        );
    }

    #[test]
    fn address_mismatch_display() {
        let expected: FlowAddress = "0xf8d6e0586b0a20c7".parse().unwrap();
        let err = Error::AddressMismatch {
            expected,
            found: None,
        };
        assert_eq!(
            err.to_string(),
            "address mismatch: expected 0xf8d6e0586b0a20c7, found no address"
        );
    }

    #[test]
    fn device_code_is_kept() {
        assert_eq!(Error::device(0x6986).device_code(), Some(0x6986));
        assert_eq!(Error::Config("x".to_string()).device_code(), None);
    }

    #[test]
    fn recoverability() {
        assert!(Error::Transport(String::new()).is_recoverable());
        assert!(Error::device(0x6985).is_recoverable());
        assert!(!Error::Config(String::new()).is_recoverable());
        assert!(
            !Error::VersionMismatch {
                installed: Version::new(0, 1, 0),
                required: Version::new(0, 9, 0),
            }
            .is_recoverable()
        );
    }

    #[test]
    fn from_hex_error() {
        let hex_err = FromHexError::InvalidHexCharacter { c: 'g', index: 0 };
        let err: Error = hex_err.into();
        assert!(matches!(err, Error::HexDecodeFailed(_)));
    }

    #[test]
    fn from_json_error() {
        let json_err = from_str::<Value>("not valid json{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::JsonError(_)));
    }
}
