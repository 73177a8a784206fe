//! Signer role resolution.
//!
//! A Flow transaction is signed in two layers. Proposer and authorizers sign
//! the payload; the payer signs the envelope, which includes the payload
//! signatures:
//!
//! ```text
//! payload signers  = (authorizers + proposer) - payer
//! envelope signers = payer
//! ```
//!
//! An account that is neither does not sign the request at all.

use crate::address::FlowAddress;
use crate::encode::{
    DOMAIN_TAG_LEN, encode_transaction_envelope, encode_transaction_payload, encode_user_message,
};
use crate::error::{Error, Result};
use crate::ledger::SignKind;
use crate::signable::{Signable, Voucher};

/// What an account must sign for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerRole {
    /// The transaction payload.
    Payload,
    /// The transaction envelope.
    Envelope,
    /// A user message.
    Message,
    /// Nothing; the account is not a signer.
    None,
}

/// Bytes to submit to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageToSign {
    /// The message.
    pub bytes: Vec<u8>,
    /// How the device should treat it.
    pub kind: SignKind,
}

/// Returns whether `address` signs the payload of `voucher`.
#[must_use]
pub fn is_payload_signer(voucher: &Voucher, address: &FlowAddress) -> bool {
    let signs = voucher.authorizers.contains(address) || voucher.proposer() == address;
    signs && voucher.payer != *address
}

/// Returns whether `address` signs the envelope of `voucher`.
#[must_use]
pub fn is_envelope_signer(voucher: &Voucher, address: &FlowAddress) -> bool {
    voucher.payer == *address
}

/// Determines the role of `address` for `signable`.
#[must_use]
pub fn classify(signable: &Signable, address: &FlowAddress) -> SignerRole {
    match signable {
        Signable::Transaction(voucher) if is_payload_signer(voucher, address) => {
            SignerRole::Payload
        }
        Signable::Transaction(voucher) if is_envelope_signer(voucher, address) => {
            SignerRole::Envelope
        }
        Signable::Transaction(_) => SignerRole::None,
        Signable::Message(message) => match message.address {
            Some(expected) if expected != *address => SignerRole::None,
            _ => SignerRole::Message,
        },
    }
}

/// Builds the bytes the device signs for `signable` in `role`.
///
/// User messages are submitted without their domain tag; the device adds it.
///
/// # Errors
///
/// Returns [`Error::SignerRoleUndetermined`] for [`SignerRole::None`],
/// [`Error::InvalidSignable`] if the role does not fit the signable, and the
/// encoding errors of [`crate::encode`].
pub fn build_message_to_sign(signable: &Signable, role: SignerRole) -> Result<MessageToSign> {
    let (bytes, kind) = match (signable, role) {
        (_, SignerRole::None) => return Err(Error::SignerRoleUndetermined),
        (Signable::Transaction(voucher), SignerRole::Payload) => {
            (encode_transaction_payload(voucher)?, SignKind::Transaction)
        }
        (Signable::Transaction(voucher), SignerRole::Envelope) => {
            (encode_transaction_envelope(voucher)?, SignKind::Transaction)
        }
        (Signable::Message(message), SignerRole::Message) => {
            let mut encoded = encode_user_message(&message.message);
            encoded.drain(..DOMAIN_TAG_LEN);
            (encoded, SignKind::Message)
        }
        (Signable::Transaction(_), SignerRole::Message) => {
            return Err(Error::InvalidSignable(
                "a transaction cannot be signed as a message".to_string(),
            ));
        }
        (Signable::Message(_), SignerRole::Payload | SignerRole::Envelope) => {
            return Err(Error::InvalidSignable(
                "a message has no payload or envelope".to_string(),
            ));
        }
    };
    Ok(MessageToSign { bytes, kind })
}
