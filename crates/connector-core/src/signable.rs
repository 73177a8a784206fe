//! Signing requests as FCL delivers them.
//!
//! FCL hands the wallet a "signable". For transactions it carries a voucher,
//! the canonical description of the transaction:
//!
//! ```json
//! {
//!   "voucher": {
//!     "cadence": "transaction { ... }",
//!     "refBlock": "f0e4c2f7...",
//!     "computeLimit": 9999,
//!     "arguments": [{"type": "String", "value": "foo"}],
//!     "proposalKey": {"address": "01", "keyId": 4, "sequenceNum": 10},
//!     "payer": "02",
//!     "authorizers": ["01"],
//!     "payloadSigs": [{"address": "01", "keyId": 4, "sig": "f7225388..."}]
//!   }
//! }
//! ```
//!
//! For user messages it carries the hex-encoded message instead:
//! `{"message": "666f6f", "addr": "0x01"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::FlowAddress;
use crate::error::{Error, Result};

/// The proposal key of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalKey {
    /// The proposer account.
    pub address: FlowAddress,
    /// Key index on the proposer account.
    pub key_id: u32,
    /// Expected sequence number of the key.
    pub sequence_num: u64,
}

/// A signature collected for the transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSignature {
    /// The signing account.
    pub address: FlowAddress,
    /// Key index on the signing account.
    pub key_id: u32,
    /// Hex-encoded signature; `None` while still pending.
    #[serde(default)]
    pub sig: Option<String>,
}

/// A transaction voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    /// Cadence source of the transaction.
    pub cadence: String,
    /// Hex-encoded reference block id.
    pub ref_block: String,
    /// Computation limit.
    pub compute_limit: u64,
    /// JSON-Cadence encoded arguments.
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// The proposal key.
    pub proposal_key: ProposalKey,
    /// The payer account.
    pub payer: FlowAddress,
    /// The authorizer accounts.
    #[serde(default)]
    pub authorizers: Vec<FlowAddress>,
    /// Signatures collected over the payload so far.
    #[serde(default)]
    pub payload_sigs: Vec<PayloadSignature>,
}

impl Voucher {
    /// The proposer account.
    #[must_use]
    pub const fn proposer(&self) -> &FlowAddress {
        &self.proposal_key.address
    }
}

/// An arbitrary message a user is asked to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    /// Message bytes, without any domain tag.
    pub message: Vec<u8>,
    /// Account FCL expects to sign, when given.
    pub address: Option<FlowAddress>,
}

/// A signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signable {
    /// A transaction payload or envelope.
    Transaction(Box<Voucher>),
    /// A user message.
    Message(UserMessage),
}

/// Fields of the FCL signable object the connector reads.
#[derive(Deserialize)]
struct SignableWire {
    #[serde(default)]
    voucher: Option<Voucher>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    addr: Option<FlowAddress>,
}

impl Signable {
    /// Parses an FCL signable from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] for invalid JSON and
    /// [`Error::InvalidSignable`] if the object has neither a voucher nor a
    /// message.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Parses an FCL signable from a JSON value.
    ///
    /// A voucher takes precedence: transaction signables carry a `message`
    /// too (the encoded payload), which is ignored.
    ///
    /// # Errors
    ///
    /// See [`Signable::from_json`].
    pub fn from_value(value: Value) -> Result<Self> {
        let wire: SignableWire = serde_json::from_value(value)?;
        if let Some(voucher) = wire.voucher {
            return Ok(Self::Transaction(Box::new(voucher)));
        }

        let message = wire
            .message
            .ok_or_else(|| Error::InvalidSignable("neither voucher nor message".to_string()))?;
        let message = hex::decode(message.strip_prefix("0x").unwrap_or(&message))?;
        Ok(Self::Message(UserMessage {
            message,
            address: wire.addr,
        }))
    }

    /// The voucher of a transaction signable.
    #[must_use]
    pub fn voucher(&self) -> Option<&Voucher> {
        match self {
            Self::Transaction(voucher) => Some(voucher),
            Self::Message(_) => None,
        }
    }
}
