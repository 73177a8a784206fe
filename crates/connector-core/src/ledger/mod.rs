//! Ledger Flow app communication module.
//!
//! This module provides low-level communication with a Ledger device running
//! the Flow app:
//!
//! - [`apdu`]: APDU command/response types and encoding
//! - [`app`]: Flow app commands and response parsing
//! - [`framing`]: HID packet framing for USB transports
//! - [`status`]: status words and their descriptions
//!
//! # Transport Abstraction
//!
//! The [`Transport`] trait abstracts over the channel carrying APDUs (WebUSB
//! in the browser, an emulator bridge, a test double). A [`Connector`] opens
//! a fresh transport per operation; [`DeviceSession`](crate::session::DeviceSession)
//! closes it when the operation ends.
//!
//! Futures are not `Send`: the connector runs on the single-threaded browser
//! executor.

pub mod apdu;
pub mod app;
pub mod framing;
pub mod status;

#[cfg(test)]
pub(crate) mod mock;

pub use apdu::{Apdu, ApduResponse};
pub use app::{FlowApp, SignKind, SlotEntry};

use async_trait::async_trait;

use crate::error::Result;

/// A transport carrying APDUs to the device.
#[async_trait(?Send)]
pub trait Transport {
    /// Sends an APDU command and receives its response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if communication
    /// fails. A non-success status word is not an error at this level.
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse>;

    /// Releases the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be released cleanly.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports to the device.
#[async_trait(?Send)]
pub trait Connector {
    /// Opens a new transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if no device is
    /// reachable or the user denied access.
    async fn open(&self) -> Result<Box<dyn Transport>>;
}
