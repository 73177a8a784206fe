//! In-memory Flow app used by the unit tests.
//!
//! Emulates the command set of [`FlowApp`](super::FlowApp): version, keys per
//! path, one slot table, chunked signing. Commands can be made to fail with a
//! chosen status word, and every command and transport open/close is
//! recorded.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use p256::ecdsa::SigningKey;

use super::app::SlotEntry;
use super::{Apdu, ApduResponse, Connector, Transport, status};
use crate::address::FlowAddress;
use crate::crypto::{RawPublicKey, SignatureAlgorithm};
use crate::error::{Error, Result};
use crate::path::DerivationPath;
use crate::signature::RawSignature;
use crate::version::Version;

/// First app version answering `SIGN` with compact and DER signatures.
const COMPACT_SINCE: Version = Version::new(0, 9, 0);

#[derive(Debug, Default)]
struct State {
    version: Version,
    locked: bool,
    fail_open: bool,
    addresses: HashMap<DerivationPath, FlowAddress>,
    slots: HashMap<u8, SlotEntry>,
    failures: HashMap<u8, u16>,
    sent: Vec<Apdu>,
    sign_buffer: Vec<u8>,
    signed: Vec<Vec<u8>>,
    opens: usize,
    closes: usize,
}

/// A shared handle to the emulated device.
#[derive(Debug, Clone)]
pub(crate) struct MockDevice {
    state: Rc<RefCell<State>>,
}

impl MockDevice {
    /// The signature every `SIGN` returns.
    pub(crate) const SIGNATURE: RawSignature = RawSignature::new([0x11; 32], [0x22; 32]);

    pub(crate) fn new(version: Version) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                version,
                ..State::default()
            })),
        }
    }

    /// The uncompressed P-256 key the device holds at `path`.
    pub(crate) fn device_key(path: &DerivationPath) -> Vec<u8> {
        let mut scalar = [0x11u8; 32];
        scalar[12..].copy_from_slice(&path.to_bytes());
        let signing_key = SigningKey::from_slice(&scalar).unwrap();
        signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// The raw key the device holds at `path`.
    pub(crate) fn public_key(path: &DerivationPath) -> RawPublicKey {
        RawPublicKey::from_device(&Self::device_key(path), SignatureAlgorithm::EcdsaP256).unwrap()
    }

    pub(crate) fn transport(&self) -> Box<dyn Transport> {
        Box::new(MockTransport {
            state: Rc::clone(&self.state),
        })
    }

    pub(crate) fn set_locked(&self, locked: bool) {
        self.state.borrow_mut().locked = locked;
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.state.borrow_mut().fail_open = fail;
    }

    /// Makes `GET PUBKEY` at `path` report `address`.
    pub(crate) fn set_device_address(&self, path: DerivationPath, address: FlowAddress) {
        self.state.borrow_mut().addresses.insert(path, address);
    }

    pub(crate) fn set_slot(&self, slot: u8, entry: SlotEntry) {
        self.state.borrow_mut().slots.insert(slot, entry);
    }

    pub(crate) fn slot(&self, slot: u8) -> Option<SlotEntry> {
        self.state.borrow().slots.get(&slot).copied()
    }

    /// Makes every command with instruction `ins` answer `code`.
    pub(crate) fn fail_command(&self, ins: u8, code: u16) {
        self.state.borrow_mut().failures.insert(ins, code);
    }

    pub(crate) fn sent(&self) -> Vec<Apdu> {
        self.state.borrow().sent.clone()
    }

    /// Number of commands sent with instruction `ins`.
    pub(crate) fn count(&self, ins: u8) -> usize {
        self.state
            .borrow()
            .sent
            .iter()
            .filter(|apdu| apdu.ins() == ins)
            .count()
    }

    pub(crate) fn signed_messages(&self) -> Vec<Vec<u8>> {
        self.state.borrow().signed.clone()
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.borrow().opens
    }

    pub(crate) fn closes(&self) -> usize {
        self.state.borrow().closes
    }
}

#[async_trait(?Send)]
impl Connector for MockDevice {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        let mut state = self.state.borrow_mut();
        if state.fail_open {
            return Err(Error::Transport("no device connected".to_string()));
        }
        state.opens += 1;
        drop(state);
        Ok(self.transport())
    }
}

struct MockTransport {
    state: Rc<RefCell<State>>,
}

#[async_trait(?Send)]
impl Transport for MockTransport {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        let mut state = self.state.borrow_mut();
        state.sent.push(apdu.clone());

        if let Some(code) = state.failures.get(&apdu.ins()).copied() {
            return Ok(ApduResponse::new(Vec::new(), code));
        }

        let response = match apdu.ins() {
            0x00 => ApduResponse::new(version_response(&state), status::NO_ERROR),
            0x01 => {
                let path = DerivationPath::from_bytes(&apdu.data()[..20])?;
                let mut data = MockDevice::device_key(&path);
                if let Some(address) = state.addresses.get(&path) {
                    data.extend_from_slice(address.sans_prefix().as_bytes());
                }
                ApduResponse::new(data, status::NO_ERROR)
            }
            0x02 => sign(&mut state, apdu),
            0x11 => match state.slots.get(&apdu.p1()) {
                Some(entry) => ApduResponse::new(entry.to_bytes(), status::NO_ERROR),
                None => ApduResponse::new(Vec::new(), status::EMPTY_BUFFER),
            },
            0x12 => {
                let slot = apdu.data()[0];
                let entry = SlotEntry::from_bytes(&apdu.data()[1..])?;
                if entry.address.is_zero() {
                    state.slots.remove(&slot);
                } else {
                    state.slots.insert(slot, entry);
                }
                ApduResponse::new(Vec::new(), status::NO_ERROR)
            }
            _ => ApduResponse::new(Vec::new(), 0x6d00),
        };
        Ok(response)
    }

    async fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }
}

fn version_response(state: &State) -> Vec<u8> {
    let mut data = vec![0x00];
    for part in [state.version.major, state.version.minor, state.version.patch] {
        data.extend_from_slice(&part.to_be_bytes());
    }
    data.push(u8::from(state.locked));
    data.extend_from_slice(&[0x33, 0x00, 0x00, 0x04]);
    data
}

fn sign(state: &mut State, apdu: &Apdu) -> ApduResponse {
    match apdu.p1() {
        0x00 => {
            state.sign_buffer.clear();
            ApduResponse::new(Vec::new(), status::NO_ERROR)
        }
        0x01 => {
            state.sign_buffer.extend_from_slice(apdu.data());
            ApduResponse::new(Vec::new(), status::NO_ERROR)
        }
        _ => {
            state.sign_buffer.extend_from_slice(apdu.data());
            let message = std::mem::take(&mut state.sign_buffer);
            state.signed.push(message);

            let signature = MockDevice::SIGNATURE;
            let mut der = vec![0x30, 0x44, 0x02, 0x20];
            der.extend_from_slice(signature.r());
            der.extend_from_slice(&[0x02, 0x20]);
            der.extend_from_slice(signature.s());

            let data = if state.version >= COMPACT_SINCE {
                let mut data = signature.to_bytes().to_vec();
                data.push(0x01);
                data.extend_from_slice(&der);
                data
            } else {
                der
            };
            ApduResponse::new(data, status::NO_ERROR)
        }
    }
}
