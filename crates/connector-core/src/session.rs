//! Device session management.
//!
//! A [`DeviceSession`] owns the [`Connector`] and performs each device
//! operation on a freshly opened transport:
//!
//! 1. open a transport
//! 2. probe the app version (stateful operations only)
//! 3. run the command
//! 4. close the transport, whatever the outcome
//!
//! All methods take `&mut self`, so at most one exchange is in flight.
//!
//! # Example
//!
//! ```ignore
//! use flow_ledger_connector_core::session::DeviceSession;
//!
//! let mut session = DeviceSession::new(connector, Version::new(0, 9, 0));
//! let version = session.open().await?;
//! let (key, address) = session
//!     .get_address_and_public_key(&DerivationPath::legacy(), CryptoOptions::default())
//!     .await?;
//! ```

use core::fmt;

use tracing::{debug, warn};

use crate::address::FlowAddress;
use crate::crypto::{CryptoOptions, RawPublicKey};
use crate::error::{Error, Result};
use crate::ledger::{Connector, FlowApp, SignKind, SlotEntry, status};
use crate::path::DerivationPath;
use crate::signature::{RawSignature, SignatureEncoding};
use crate::version::{AppVersion, Version};

/// Sequential access to the device.
pub struct DeviceSession {
    /// Opens a transport per operation.
    connector: Box<dyn Connector>,

    /// First app version returning compact signatures.
    compact_signature_since: Version,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("compact_signature_since", &self.compact_signature_since)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Creates a session over `connector`.
    #[must_use]
    pub fn new(connector: Box<dyn Connector>, compact_signature_since: Version) -> Self {
        Self {
            connector,
            compact_signature_since,
        }
    }

    /// Opens a transport and wraps it.
    async fn acquire(&self) -> Result<FlowApp> {
        let transport = self.connector.open().await?;
        Ok(FlowApp::new(transport))
    }

    /// Closes `app` and passes `result` through.
    ///
    /// A close failure is logged; it never replaces the operation's outcome.
    async fn release<T>(app: FlowApp, result: Result<T>) -> Result<T> {
        if let Err(err) = app.close().await {
            warn!(%err, "failed to close device transport");
        }
        result
    }

    /// Reads the app version and refuses to continue on a locked device.
    async fn probe(app: &mut FlowApp) -> Result<AppVersion> {
        let version = app.get_version().await?;
        debug!(
            version = %version.version,
            locked = version.device_locked,
            test_mode = version.test_mode,
            "probed Flow app"
        );
        if version.device_locked {
            return Err(Error::device(status::DEVICE_LOCKED));
        }
        Ok(version)
    }

    /// Connects to the device and returns the app version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if no transport can be opened and
    /// [`Error::Device`] if the app does not answer or the device is locked.
    pub async fn open(&mut self) -> Result<AppVersion> {
        let mut app = self.acquire().await?;
        let result = Self::probe(&mut app).await;
        Self::release(app, result).await
    }

    /// Reads the app version without the lock check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Device`].
    pub async fn get_version(&mut self) -> Result<AppVersion> {
        let mut app = self.acquire().await?;
        let result = app.get_version().await;
        Self::release(app, result).await
    }

    /// Reads the public key at `path` and the address the app reports for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`], [`Error::Device`] or
    /// [`Error::InvalidPublicKey`].
    pub async fn get_address_and_public_key(
        &mut self,
        path: &DerivationPath,
        options: CryptoOptions,
    ) -> Result<(RawPublicKey, Option<FlowAddress>)> {
        self.public_key(path, options, false).await
    }

    /// Like [`get_address_and_public_key`](Self::get_address_and_public_key),
    /// but the device displays the key for the user to verify.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`], [`Error::Device`] or
    /// [`Error::InvalidPublicKey`].
    pub async fn show_address_and_public_key(
        &mut self,
        path: &DerivationPath,
        options: CryptoOptions,
    ) -> Result<(RawPublicKey, Option<FlowAddress>)> {
        self.public_key(path, options, true).await
    }

    async fn public_key(
        &mut self,
        path: &DerivationPath,
        options: CryptoOptions,
        show: bool,
    ) -> Result<(RawPublicKey, Option<FlowAddress>)> {
        let mut app = self.acquire().await?;
        let result = async {
            Self::probe(&mut app).await?;
            app.get_address_and_public_key(path, options, show).await
        }
        .await;
        Self::release(app, result).await
    }

    /// Reads the full contents of `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Device`]; an empty slot is
    /// `Ok(None)`.
    pub async fn get_slot(&mut self, slot: u8) -> Result<Option<SlotEntry>> {
        let mut app = self.acquire().await?;
        let result = async {
            Self::probe(&mut app).await?;
            app.get_slot(slot).await
        }
        .await;
        Self::release(app, result).await
    }

    /// Reads the address stored in `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Device`]; an empty slot is
    /// `Ok(None)`.
    pub async fn get_stored_address(&mut self, slot: u8) -> Result<Option<FlowAddress>> {
        Ok(self.get_slot(slot).await?.map(|entry| entry.address))
    }

    /// Stores `address` with its key path in `slot`. The user confirms on the
    /// device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Device`], including the user
    /// rejecting the write.
    pub async fn set_stored_address(
        &mut self,
        slot: u8,
        address: FlowAddress,
        path: DerivationPath,
        options: CryptoOptions,
    ) -> Result<()> {
        let entry = SlotEntry {
            address,
            path,
            options,
        };
        let mut app = self.acquire().await?;
        let result = async {
            Self::probe(&mut app).await?;
            app.set_slot(slot, entry).await
        }
        .await;
        Self::release(app, result).await
    }

    /// Clears `slot` by writing the zero address with the clear path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] or [`Error::Device`].
    pub async fn clear_stored_address(&mut self, slot: u8) -> Result<()> {
        self.set_stored_address(
            slot,
            FlowAddress::zero(),
            DerivationPath::CLEAR,
            CryptoOptions::default(),
        )
        .await
    }

    /// Signs `message` with the key at `path`.
    ///
    /// The signature layout is chosen from the probed app version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`], [`Error::Device`] (including the user
    /// rejecting) or [`Error::InvalidSignature`].
    pub async fn sign(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
        options: CryptoOptions,
        kind: SignKind,
    ) -> Result<RawSignature> {
        let compact_since = self.compact_signature_since;
        let mut app = self.acquire().await?;
        let result = async {
            let version = Self::probe(&mut app).await?;
            let encoding = SignatureEncoding::for_app(version.version, compact_since);
            debug!(?encoding, len = message.len(), "signing");
            app.sign(path, message, options, kind, encoding).await
        }
        .await;
        Self::release(app, result).await
    }
}
