//! Flow app commands.
//!
//! [`FlowApp`] wraps one open [`Transport`] and speaks the Flow app's command
//! set. It does not manage the transport's lifetime; see
//! [`DeviceSession`](crate::session::DeviceSession) for that.
//!
//! # Command Set
//!
//! | INS  | Command | Request data | Response data |
//! |------|---------|--------------|---------------|
//! | 0x00 | GET VERSION | - | see [`AppVersion::from_response`] |
//! | 0x01 | GET PUBKEY | path(20) options(2) | pubkey(65) address(16 ASCII hex, optional) |
//! | 0x02 | SIGN | chunked, see [`FlowApp::sign`] | signature |
//! | 0x11 | GET SLOT | - (slot in P1) | address(8) path(20) options(2) |
//! | 0x12 | SET SLOT | slot(1) address(8) path(20) options(2) | - |

use core::fmt;

use tracing::debug;

use super::Transport;
use super::apdu::Apdu;
use super::status;
use crate::address::FlowAddress;
use crate::crypto::{CryptoOptions, RawPublicKey};
use crate::error::{Error, Result};
use crate::path::DerivationPath;
use crate::signature::{RawSignature, SignatureEncoding};
use crate::version::AppVersion;

/// Class byte of the Flow app.
pub const CLA: u8 = 0x33;

/// Largest message chunk sent in one `SIGN` command.
pub const CHUNK_SIZE: usize = 250;

/// Flow app instruction codes.
mod ins {
    /// `GET VERSION` instruction.
    pub(super) const GET_VERSION: u8 = 0x00;

    /// `GET PUBKEY` instruction.
    pub(super) const GET_PUBKEY: u8 = 0x01;

    /// `SIGN` instruction.
    pub(super) const SIGN: u8 = 0x02;

    /// `GET SLOT` instruction.
    pub(super) const GET_SLOT: u8 = 0x11;

    /// `SET SLOT` instruction.
    pub(super) const SET_SLOT: u8 = 0x12;
}

/// `SIGN` chunk markers (P1).
mod chunk {
    pub(super) const INIT: u8 = 0x00;
    pub(super) const ADD: u8 = 0x01;
    pub(super) const LAST: u8 = 0x02;
}

/// What the device is asked to sign (P2 of `SIGN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignKind {
    /// An encoded transaction payload or envelope.
    Transaction,
    /// An arbitrary user message.
    Message,
}

impl SignKind {
    const fn p2(self) -> u8 {
        match self {
            Self::Transaction => 0x00,
            Self::Message => 0x01,
        }
    }
}

/// Contents of a device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Address stored in the slot.
    pub address: FlowAddress,
    /// Path of the key used with the address.
    pub path: DerivationPath,
    /// Algorithms of the key.
    pub options: CryptoOptions,
}

impl SlotEntry {
    /// Length of the serialized entry.
    pub(crate) const BYTE_LEN: usize = FlowAddress::BYTE_LEN + DerivationPath::BYTE_LEN + 2;

    pub(crate) fn to_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::BYTE_LEN);
        bytes.extend_from_slice(self.address.as_slice());
        bytes.extend_from_slice(&self.path.to_bytes());
        bytes.extend_from_slice(&self.options.to_le_bytes());
        bytes
    }

    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != Self::BYTE_LEN {
            return Err(Error::MalformedResponse(format!(
                "slot entry must be {} bytes, got {}",
                Self::BYTE_LEN,
                data.len()
            )));
        }

        let (address, rest) = data.split_at(FlowAddress::BYTE_LEN);
        let (path, options) = rest.split_at(DerivationPath::BYTE_LEN);
        Ok(Self {
            address: FlowAddress::from_slice(address)
                .map_err(|e| Error::MalformedResponse(e.to_string()))?,
            path: DerivationPath::from_bytes(path)?,
            options: CryptoOptions::from_u16(u16::from_le_bytes([options[0], options[1]]))?,
        })
    }
}

/// An open connection to the Flow app.
pub struct FlowApp {
    /// The underlying transport.
    transport: Box<dyn Transport>,
}

impl fmt::Debug for FlowApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowApp").finish_non_exhaustive()
    }
}

impl FlowApp {
    /// Wraps an open transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Closes the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Sends one command and returns the response data on `0x9000`.
    async fn send(&mut self, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Vec<u8>> {
        let apdu = Apdu::new(CLA, ins, p1, p2, data)?;
        let response = self.transport.exchange(&apdu).await?;
        debug!(
            ins,
            p1,
            status = response.status_word(),
            len = response.data().len(),
            "device exchange"
        );
        response.check()
    }

    /// Reads the app version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on a non-success status word and
    /// [`Error::MalformedResponse`] on an unknown layout.
    pub async fn get_version(&mut self) -> Result<AppVersion> {
        let data = self.send(ins::GET_VERSION, 0, 0, Vec::new()).await?;
        AppVersion::from_response(&data)
    }

    /// Reads the public key at `path` and the address the app associates with
    /// it, if any.
    ///
    /// With `show` set the device displays the key for the user to confirm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on a non-success status word and
    /// [`Error::InvalidPublicKey`] if the key is malformed.
    pub async fn get_address_and_public_key(
        &mut self,
        path: &DerivationPath,
        options: CryptoOptions,
        show: bool,
    ) -> Result<(RawPublicKey, Option<FlowAddress>)> {
        let mut data = path.to_bytes().to_vec();
        data.extend_from_slice(&options.to_le_bytes());

        let response = self.send(ins::GET_PUBKEY, u8::from(show), 0, data).await?;
        parse_public_key_response(&response, options)
    }

    /// Reads a slot. An empty slot yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on any status word other than success or
    /// "empty buffer".
    pub async fn get_slot(&mut self, slot: u8) -> Result<Option<SlotEntry>> {
        match self.send(ins::GET_SLOT, slot, 0, Vec::new()).await {
            Ok(data) => {
                let entry = SlotEntry::from_bytes(&data)?;
                Ok((!entry.address.is_zero()).then_some(entry))
            }
            Err(err) if err.device_code() == Some(status::EMPTY_BUFFER) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Writes a slot. The user confirms on the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] on a non-success status word, including the
    /// user rejecting the write.
    pub async fn set_slot(&mut self, slot: u8, entry: SlotEntry) -> Result<()> {
        let mut data = Vec::with_capacity(1 + SlotEntry::BYTE_LEN);
        data.push(slot);
        data.extend_from_slice(&entry.to_bytes());
        self.send(ins::SET_SLOT, 0, 0, data).await?;
        Ok(())
    }

    /// Signs `message` with the key at `path`.
    ///
    /// The first command carries the path and options; the message follows
    /// in chunks of at most [`CHUNK_SIZE`] bytes, the final one marked as
    /// last. The signature is taken from the final response and decoded
    /// according to `encoding`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignable`] for an empty message,
    /// [`Error::Device`] if the user rejects or the app fails, and
    /// [`Error::InvalidSignature`] if the response cannot be decoded.
    pub async fn sign(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
        options: CryptoOptions,
        kind: SignKind,
        encoding: SignatureEncoding,
    ) -> Result<RawSignature> {
        if message.is_empty() {
            return Err(Error::InvalidSignable("nothing to sign".to_string()));
        }

        let mut init = path.to_bytes().to_vec();
        init.extend_from_slice(&options.to_le_bytes());
        self.send(ins::SIGN, chunk::INIT, kind.p2(), init).await?;

        let chunks: Vec<&[u8]> = message.chunks(CHUNK_SIZE).collect();
        let last = chunks.len() - 1;
        let mut response = Vec::new();
        for (i, part) in chunks.into_iter().enumerate() {
            let p1 = if i == last { chunk::LAST } else { chunk::ADD };
            response = self.send(ins::SIGN, p1, kind.p2(), part.to_vec()).await?;
        }

        encoding.decode(&response)
    }
}

/// Splits a `GET PUBKEY` response into key and optional address.
///
/// The address follows the key as 16 ASCII hex characters. It is absent on
/// apps that do not track addresses, and all zeros when none is stored.
fn parse_public_key_response(
    data: &[u8],
    options: CryptoOptions,
) -> Result<(RawPublicKey, Option<FlowAddress>)> {
    let key_bytes = data.get(..RawPublicKey::DEVICE_LEN).ok_or_else(|| {
        Error::MalformedResponse(format!(
            "public key response of {} bytes is too short",
            data.len()
        ))
    })?;
    let public_key = RawPublicKey::from_device(key_bytes, options.signature_algorithm)?;

    let address = data
        .get(RawPublicKey::DEVICE_LEN..RawPublicKey::DEVICE_LEN + FlowAddress::BYTE_LEN * 2)
        .and_then(|ascii| core::str::from_utf8(ascii).ok())
        .and_then(|text| text.parse::<FlowAddress>().ok())
        .filter(|address| !address.is_zero());

    Ok((public_key, address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::ledger::mock::MockDevice;
    use crate::version::Version;

    fn app(device: &MockDevice) -> FlowApp {
        FlowApp::new(device.transport())
    }

    #[test]
    fn slot_entry_layout() {
        let entry = SlotEntry {
            address: "0xf8d6e0586b0a20c7".parse().unwrap(),
            path: DerivationPath::legacy(),
            options: CryptoOptions::default(),
        };
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 30);
        assert_eq!(&bytes[..8], entry.address.as_slice());
        assert_eq!(&bytes[28..], &[0x01, 0x02]);
        assert_eq!(SlotEntry::from_bytes(&bytes).unwrap(), entry);
    }

    #[test]
    fn public_key_response_without_address() {
        let key = MockDevice::device_key(&DerivationPath::legacy());
        let (public_key, address) =
            parse_public_key_response(&key, CryptoOptions::default()).unwrap();
        assert_eq!(public_key.as_bytes().as_slice(), &key[1..]);
        assert_eq!(address, None);
    }

    #[test]
    fn public_key_response_with_address() {
        let mut data = MockDevice::device_key(&DerivationPath::legacy());
        data.extend_from_slice(b"f8d6e0586b0a20c7");
        let (_, address) = parse_public_key_response(&data, CryptoOptions::default()).unwrap();
        assert_eq!(address, Some("0xf8d6e0586b0a20c7".parse().unwrap()));

        let mut zeros = MockDevice::device_key(&DerivationPath::legacy());
        zeros.extend_from_slice(b"0000000000000000");
        let (_, address) = parse_public_key_response(&zeros, CryptoOptions::default()).unwrap();
        assert_eq!(address, None);
    }

    #[test]
    fn public_key_response_too_short() {
        assert!(matches!(
            parse_public_key_response(&[0x04; 10], CryptoOptions::default()),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn get_version_command() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        let version = app(&device).get_version().await.unwrap();
        assert_eq!(version.version, Version::new(1, 2, 0));

        let sent = device.sent();
        assert_eq!(sent[0].to_bytes(), vec![CLA, 0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn get_pubkey_command_layout() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        let path = DerivationPath::derive(Network::Mainnet, 0, 0).unwrap();
        app(&device)
            .get_address_and_public_key(&path, CryptoOptions::default(), true)
            .await
            .unwrap();

        let sent = device.sent();
        assert_eq!(sent[0].ins(), 0x01);
        assert_eq!(sent[0].p1(), 0x01);
        assert_eq!(&sent[0].data()[..20], &path.to_bytes());
        assert_eq!(&sent[0].data()[20..], &[0x01, 0x02]);
    }

    #[tokio::test]
    async fn empty_slot_is_none() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        assert_eq!(app(&device).get_slot(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_slot() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        let entry = SlotEntry {
            address: "0x01".parse().unwrap(),
            path: DerivationPath::legacy(),
            options: CryptoOptions::default(),
        };

        let mut app = app(&device);
        app.set_slot(0, entry).await.unwrap();
        assert_eq!(app.get_slot(0).await.unwrap(), Some(entry));
        assert_eq!(device.sent()[0].data()[0], 0);
    }

    #[tokio::test]
    async fn sign_sends_chunks() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        let message = vec![0x5a; 600];
        let path = DerivationPath::legacy();

        app(&device)
            .sign(
                &path,
                &message,
                CryptoOptions::default(),
                SignKind::Transaction,
                SignatureEncoding::Compact,
            )
            .await
            .unwrap();

        let sent = device.sent();
        let p1s: Vec<u8> = sent.iter().map(Apdu::p1).collect();
        assert_eq!(p1s, vec![chunk::INIT, chunk::ADD, chunk::ADD, chunk::LAST]);
        assert_eq!(sent[0].data().len(), 22);
        assert_eq!(sent[1].data().len(), 250);
        assert_eq!(sent[3].data().len(), 100);
        assert_eq!(device.signed_messages(), vec![message]);
    }

    #[tokio::test]
    async fn sign_message_kind_sets_p2() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        app(&device)
            .sign(
                &DerivationPath::legacy(),
                b"hello",
                CryptoOptions::default(),
                SignKind::Message,
                SignatureEncoding::Compact,
            )
            .await
            .unwrap();

        assert!(device.sent().iter().all(|apdu| apdu.p2() == 0x01));
    }

    #[tokio::test]
    async fn sign_rejection_is_device_error() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        device.fail_command(0x02, status::TRANSACTION_REJECTED);

        let result = app(&device)
            .sign(
                &DerivationPath::legacy(),
                b"payload",
                CryptoOptions::default(),
                SignKind::Transaction,
                SignatureEncoding::Compact,
            )
            .await;
        assert_eq!(
            result.unwrap_err().device_code(),
            Some(status::TRANSACTION_REJECTED)
        );
    }

    #[tokio::test]
    async fn sign_rejects_empty_message() {
        let device = MockDevice::new(Version::new(1, 2, 0));
        let result = app(&device)
            .sign(
                &DerivationPath::legacy(),
                &[],
                CryptoOptions::default(),
                SignKind::Message,
                SignatureEncoding::Der,
            )
            .await;
        assert!(matches!(result, Err(Error::InvalidSignable(_))));
        assert!(device.sent().is_empty());
    }
}
