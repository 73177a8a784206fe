//! APDU command and response types.
//!
//! Ledger apps speak short-form ISO 7816-4 APDUs. The length byte is always
//! present, even when the command carries no data.
//!
//! # APDU Command Structure
//!
//! ```text
//! | CLA | INS | P1 | P2 | Lc | Data |
//! |-----|-----|----|----|----|------|
//! | 1B  | 1B  | 1B | 1B | 1B | Var  |
//! ```
//!
//! # APDU Response Structure
//!
//! ```text
//! | Data | SW1 | SW2 |
//! |------|-----|-----|
//! | Var  | 1B  | 1B  |
//! ```
//!
//! # Example
//!
//! ```
//! use flow_ledger_connector_core::ledger::{Apdu, ApduResponse};
//!
//! let apdu = Apdu::new(0x33, 0x00, 0x00, 0x00, vec![]).unwrap();
//! assert_eq!(apdu.to_bytes(), vec![0x33, 0x00, 0x00, 0x00, 0x00]);
//!
//! let response = ApduResponse::from_bytes(vec![0x00, 0x00, 0x09, 0x00, 0x90, 0x00]).unwrap();
//! assert!(response.is_success());
//! ```

use crate::error::{Error, Result};
use crate::ledger::status;

/// An APDU command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Class byte.
    cla: u8,

    /// Instruction byte.
    ins: u8,

    /// Parameter 1.
    p1: u8,

    /// Parameter 2.
    p2: u8,

    /// Command data.
    data: Vec<u8>,
}

impl Apdu {
    /// Maximum short APDU data length.
    pub const MAX_DATA: usize = 255;

    /// Creates a new APDU command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Apdu`] if `data` is longer than [`Apdu::MAX_DATA`].
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > Self::MAX_DATA {
            return Err(Error::Apdu(format!(
                "command data is {} bytes, at most {} fit in one APDU",
                data.len(),
                Self::MAX_DATA
            )));
        }

        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    /// Returns the class byte.
    #[must_use]
    pub const fn cla(&self) -> u8 {
        self.cla
    }

    /// Returns the instruction byte.
    #[must_use]
    pub const fn ins(&self) -> u8 {
        self.ins
    }

    /// Returns parameter 1.
    #[must_use]
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Returns parameter 2.
    #[must_use]
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Returns the command data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serializes the APDU to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        // Length was checked in `new`.
        bytes.push(self.data.len() as u8);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// An APDU response from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data.
    data: Vec<u8>,

    /// Status word.
    status_word: u16,
}

impl ApduResponse {
    /// Creates a response from raw bytes (data followed by SW1 SW2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if fewer than 2 bytes are given.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::MalformedResponse(format!(
                "APDU response must be at least 2 bytes, got {}",
                bytes.len()
            )));
        }

        let sw = bytes.split_off(bytes.len() - 2);
        Ok(Self {
            data: bytes,
            status_word: u16::from_be_bytes([sw[0], sw[1]]),
        })
    }

    /// Creates a response from data and a status word.
    #[must_use]
    pub const fn new(data: Vec<u8>, status_word: u16) -> Self {
        Self { data, status_word }
    }

    /// Returns the response data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the response and returns the data.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the status word.
    #[must_use]
    pub const fn status_word(&self) -> u16 {
        self.status_word
    }

    /// Checks if the response indicates success (`SW = 0x9000`).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_word == status::NO_ERROR
    }

    /// Serializes the response back to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.data.clone();
        bytes.extend_from_slice(&self.status_word.to_be_bytes());
        bytes
    }

    /// Checks the status word and returns the data on success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] carrying the status word otherwise.
    pub fn check(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Error::device(self.status_word))
        }
    }
}
