//! Canonical Flow message encodings.
//!
//! Transactions are signed over RLP-encoded payload or envelope fields,
//! prefixed with a 32-byte domain tag:
//!
//! ```text
//! payload  = TRANSACTION_DOMAIN_TAG || RLP([script, [arg...], ref_block,
//!            compute_limit, proposer, key_id, sequence_num, payer, [authorizer...]])
//! envelope = TRANSACTION_DOMAIN_TAG || RLP([payload fields, [[signer_index, key_id, sig]...]])
//! ```
//!
//! Arguments are their JSON-Cadence text, addresses their 8 raw bytes and
//! the reference block id is left-padded to 32 bytes. In the envelope,
//! `signer_index` is the position of the signing address in the list
//! `proposer, payer, authorizers...` with duplicates removed, and signatures
//! are ordered by `(signer_index, key_id)`.
//!
//! User messages are `USER_DOMAIN_TAG || message`.

use alloy_rlp::Encodable;

use crate::address::FlowAddress;
use crate::error::{Error, Result};
use crate::signable::Voucher;

/// Length of a domain tag.
pub const DOMAIN_TAG_LEN: usize = 32;

/// Domain tag of transaction payloads and envelopes.
pub const TRANSACTION_DOMAIN_TAG: [u8; DOMAIN_TAG_LEN] = domain_tag(b"FLOW-V0.0-transaction");

/// Domain tag of user messages.
pub const USER_DOMAIN_TAG: [u8; DOMAIN_TAG_LEN] = domain_tag(b"FLOW-V0.0-user");

/// Right-pads `tag` with zeros.
const fn domain_tag(tag: &[u8]) -> [u8; DOMAIN_TAG_LEN] {
    let mut out = [0u8; DOMAIN_TAG_LEN];
    let mut i = 0;
    while i < tag.len() {
        out[i] = tag[i];
        i += 1;
    }
    out
}

/// Encodes the bytes a payload signer signs.
///
/// # Errors
///
/// Returns [`Error::InvalidSignable`] for a malformed reference block id and
/// [`Error::JsonError`] if an argument cannot be serialized.
pub fn encode_transaction_payload(voucher: &Voucher) -> Result<Vec<u8>> {
    let mut out = TRANSACTION_DOMAIN_TAG.to_vec();
    encode_payload(voucher, &mut out)?;
    Ok(out)
}

/// Encodes the bytes the payer signs.
///
/// # Errors
///
/// Returns [`Error::InvalidSignable`] if a payload signature is missing,
/// malformed or made by an account that is not a signer, plus the errors of
/// [`encode_transaction_payload`].
pub fn encode_transaction_envelope(voucher: &Voucher) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    encode_payload(voucher, &mut payload)?;
    let signatures = payload_signatures(voucher)?;

    let mut out = TRANSACTION_DOMAIN_TAG.to_vec();
    encode_rlp_list(&mut out, |out| {
        out.extend_from_slice(&payload);
        encode_rlp_list(out, |out| {
            for (signer_index, key_id, sig) in &signatures {
                encode_rlp_list(out, |out| {
                    signer_index.encode(out);
                    key_id.encode(out);
                    sig.as_slice().encode(out);
                });
            }
        });
    });
    Ok(out)
}

/// Encodes a user message with its domain tag.
#[must_use]
pub fn encode_user_message(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOMAIN_TAG_LEN + message.len());
    out.extend_from_slice(&USER_DOMAIN_TAG);
    out.extend_from_slice(message);
    out
}

/// Encodes the payload field list.
fn encode_payload(voucher: &Voucher, out: &mut Vec<u8>) -> Result<()> {
    let ref_block = ref_block(&voucher.ref_block)?;
    let arguments = voucher
        .arguments
        .iter()
        .map(serde_json::to_vec)
        .collect::<core::result::Result<Vec<_>, _>>()?;

    encode_rlp_list(out, |out| {
        voucher.cadence.as_bytes().encode(out);
        encode_rlp_list(out, |out| {
            for argument in &arguments {
                argument.as_slice().encode(out);
            }
        });
        ref_block.as_slice().encode(out);
        voucher.compute_limit.encode(out);
        encode_address(&voucher.proposal_key.address, out);
        voucher.proposal_key.key_id.encode(out);
        voucher.proposal_key.sequence_num.encode(out);
        encode_address(&voucher.payer, out);
        encode_rlp_list(out, |out| {
            for authorizer in &voucher.authorizers {
                encode_address(authorizer, out);
            }
        });
    });
    Ok(())
}

/// Decodes the reference block id, left-padded to 32 bytes.
fn ref_block(hex_id: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_id.strip_prefix("0x").unwrap_or(hex_id))?;
    if bytes.len() > 32 {
        return Err(Error::InvalidSignable(format!(
            "reference block id has {} bytes",
            bytes.len()
        )));
    }
    let mut id = [0u8; 32];
    id[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(id)
}

/// Resolves payload signatures to sorted `(signer_index, key_id, sig)`.
fn payload_signatures(voucher: &Voucher) -> Result<Vec<(u64, u32, Vec<u8>)>> {
    let mut signers: Vec<FlowAddress> = Vec::new();
    let ordered = core::iter::once(&voucher.proposal_key.address)
        .chain(core::iter::once(&voucher.payer))
        .chain(&voucher.authorizers);
    for address in ordered {
        if !signers.contains(address) {
            signers.push(*address);
        }
    }

    let mut signatures = voucher
        .payload_sigs
        .iter()
        .map(|payload_sig| {
            let signer_index = signers
                .iter()
                .position(|signer| *signer == payload_sig.address)
                .ok_or_else(|| {
                    Error::InvalidSignable(format!(
                        "payload signature by {} who is not a signer",
                        payload_sig.address
                    ))
                })?;
            let sig = payload_sig.sig.as_deref().ok_or_else(|| {
                Error::InvalidSignable(format!(
                    "payload signature by {} is missing",
                    payload_sig.address
                ))
            })?;
            let sig = hex::decode(sig.strip_prefix("0x").unwrap_or(sig))?;
            Ok((signer_index as u64, payload_sig.key_id, sig))
        })
        .collect::<Result<Vec<_>>>()?;

    signatures.sort_by_key(|(signer_index, key_id, _)| (*signer_index, *key_id));
    Ok(signatures)
}

fn encode_address(address: &FlowAddress, out: &mut Vec<u8>) {
    address.as_slice().encode(out);
}

/// Encodes an RLP list header followed by the items written by `f`.
fn encode_rlp_list<F>(out: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut content = Vec::new();
    f(&mut content);

    let header = alloy_rlp::Header {
        list: true,
        payload_length: content.len(),
    };
    header.encode(out);
    out.extend_from_slice(&content);
}
