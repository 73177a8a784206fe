//! Messages exchanged with the FCL host page.
//!
//! The connector runs in a view (iframe or popup) opened by FCL. The view
//! announces itself, FCL answers with the signable, and the view replies
//! with a polling response:
//!
//! ```text
//! view                               FCL
//!  │ ── FCL:VIEW:READY ─────────────► │
//!  │ ◄── FCL:VIEW:READY:RESPONSE ──── │  body = signable
//!  │ ── FCL:VIEW:RESPONSE ──────────► │  APPROVED { CompositeSignature } | DECLINED { reason }
//! ```
//!
//! Older FCL versions deliver the signable as a JSON-RPC `fcl:sign` request
//! instead and expect a JSON-RPC reply carrying the same result.
//!
//! [`HostChannel`] is the transport; the message types here only define the
//! wire form.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::address::FlowAddress;
use crate::config::Network;
use crate::error::{Error, Result};
use crate::signable::Signable;
use crate::signature::RawSignature;

/// Message types on the wire.
pub mod message_type {
    /// The view is ready to receive a request.
    pub const READY: &str = "FCL:VIEW:READY";
    /// FCL delivers the request.
    pub const READY_RESPONSE: &str = "FCL:VIEW:READY:RESPONSE";
    /// The view answers the request.
    pub const RESPONSE: &str = "FCL:VIEW:RESPONSE";
    /// Either side closes the view.
    pub const CLOSE: &str = "FCL:VIEW:CLOSE";
    /// Authentication result.
    pub const CHALLENGE_RESPONSE: &str = "FCL::CHALLENGE::RESPONSE";
    /// The user cancelled authentication.
    pub const CHALLENGE_CANCEL: &str = "FCL::CHALLENGE::CANCEL";
    /// JSON-RPC method of sign requests.
    pub const RPC_SIGN: &str = "fcl:sign";
}

/// Version of the FCL object formats produced here.
const FCL_VERSION: &str = "1.0.0";

/// A signature attributed to an account key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSignature {
    /// The signing account.
    pub addr: FlowAddress,
    /// Index of the key on the account.
    pub key_id: u32,
    /// Hex-encoded `r || s`.
    pub signature: String,
}

impl CompositeSignature {
    /// Attributes `signature` to key `key_id` of `addr`.
    #[must_use]
    pub fn new(addr: FlowAddress, key_id: u32, signature: &RawSignature) -> Self {
        Self {
            addr,
            key_id,
            signature: signature.to_hex(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "f_type": "CompositeSignature",
            "f_vsn": FCL_VERSION,
            "addr": self.addr,
            "keyId": self.key_id,
            "signature": self.signature,
        })
    }
}

/// Outcome of a request as reported to FCL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollingResponse {
    /// The request was signed.
    Approved(CompositeSignature),
    /// The request was not signed.
    Declined {
        /// Human-readable cause.
        reason: String,
    },
}

impl PollingResponse {
    /// A decline with `reason`.
    #[must_use]
    pub fn decline(reason: impl Into<String>) -> Self {
        Self::Declined {
            reason: reason.into(),
        }
    }

    /// The `FCL:VIEW:RESPONSE` body.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Approved(signature) => json!({
                "f_type": "PollingResponse",
                "f_vsn": FCL_VERSION,
                "status": "APPROVED",
                "reason": null,
                "data": signature.to_json(),
            }),
            Self::Declined { reason } => json!({
                "f_type": "PollingResponse",
                "f_vsn": FCL_VERSION,
                "status": "DECLINED",
                "reason": reason,
                "data": null,
            }),
        }
    }

    /// The JSON-RPC `result` object.
    #[must_use]
    pub fn to_rpc_result(&self) -> Value {
        match self {
            Self::Approved(signature) => json!({
                "status": "APPROVED",
                "reason": null,
                "compositeSignature": signature,
            }),
            Self::Declined { reason } => json!({
                "status": "DECLINED",
                "reason": reason,
            }),
        }
    }
}

/// A service advertised to FCL after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Service {
    /// Transaction authorization through the connector view.
    #[serde(rename_all = "camelCase")]
    Authz {
        /// How FCL reaches the service.
        method: String,
        /// Service id.
        id: String,
        /// The authorizing account.
        addr: FlowAddress,
        /// Key index on the account.
        key_id: u32,
        /// URL of the authorization view.
        endpoint: String,
        /// Parameters FCL passes back to the view.
        params: Value,
    },
    /// Re-authentication through the connector view.
    Authn {
        /// Provider account; unset for the connector.
        addr: Option<FlowAddress>,
        /// Provider id.
        pid: FlowAddress,
        /// Service id.
        id: String,
        /// Display name.
        name: String,
        /// URL of the authentication view.
        authn: String,
        /// Icon URL.
        icon: String,
    },
}

/// The authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthnResponse {
    /// The authenticated account.
    pub addr: FlowAddress,
    /// Services the account offers.
    pub services: Vec<Service>,
}

impl AuthnResponse {
    /// Builds the response for key `key_id` of `address`, with the view
    /// hosted at `origin`.
    #[must_use]
    pub fn new(address: FlowAddress, key_id: u32, origin: &str, network: Network) -> Self {
        let base = format!("{}/{network}", origin.trim_end_matches('/'));
        Self {
            addr: address,
            services: vec![
                Service::Authz {
                    method: "IFRAME/RPC".to_string(),
                    id: "fcl-ledger-authz".to_string(),
                    addr: address,
                    key_id,
                    endpoint: format!("{base}/authz"),
                    params: json!({ "address": address, "keyId": key_id }),
                },
                Service::Authn {
                    addr: None,
                    pid: address,
                    id: "fcl-ledger-authn".to_string(),
                    name: "Flow Ledger".to_string(),
                    authn: format!("{base}/authn"),
                    icon: String::new(),
                },
            ],
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "type": message_type::CHALLENGE_RESPONSE,
            "addr": self.addr,
            "paddr": null,
            "hks": null,
            "code": null,
            "services": self.services,
        })
    }
}

/// A message from the connector to FCL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Readiness handshake.
    Ready,
    /// Answer to a request delivered through the handshake.
    Response(PollingResponse),
    /// Answer to a JSON-RPC request.
    RpcResponse {
        /// Id of the request.
        id: Value,
        /// The outcome.
        response: PollingResponse,
    },
    /// Authentication result.
    Authenticated(AuthnResponse),
    /// The user cancelled authentication.
    Cancel,
    /// The view is closing.
    Close,
}

impl Outgoing {
    /// Renders the message as posted to the host page.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Ready => json!({ "type": message_type::READY }),
            Self::Response(response) => {
                let mut message = response.to_json();
                message["type"] = json!(message_type::RESPONSE);
                message
            }
            Self::RpcResponse { id, response } => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": response.to_rpc_result(),
            }),
            Self::Authenticated(response) => response.to_json(),
            Self::Cancel => json!({ "type": message_type::CHALLENGE_CANCEL }),
            Self::Close => json!({ "type": message_type::CLOSE }),
        }
    }
}

/// A message from FCL to the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A request to sign.
    SignRequest {
        /// What to sign.
        signable: Signable,
        /// JSON-RPC id when the request came as `fcl:sign`.
        rpc_id: Option<Value>,
    },
    /// FCL closed the view.
    Close,
}

impl Incoming {
    /// Parses a message posted by the host page.
    ///
    /// Messages of other types are not for the connector and yield
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignable`] or [`Error::JsonError`] if a sign
    /// request carries a malformed signable.
    pub fn from_json(message: &Value) -> Result<Option<Self>> {
        if message["jsonrpc"] == "2.0" && message["method"] == message_type::RPC_SIGN {
            let signable = message["params"]
                .get(0)
                .cloned()
                .ok_or_else(|| Error::InvalidSignable("fcl:sign without params".to_string()))?;
            return Ok(Some(Self::SignRequest {
                signable: Signable::from_value(signable)?,
                rpc_id: Some(message["id"].clone()),
            }));
        }

        match message["type"].as_str() {
            Some(message_type::READY_RESPONSE) => Ok(Some(Self::SignRequest {
                signable: Signable::from_value(message["body"].clone())?,
                rpc_id: None,
            })),
            Some(message_type::CLOSE) => Ok(Some(Self::Close)),
            _ => Ok(None),
        }
    }
}

/// Two-way channel to the FCL host page.
#[async_trait(?Send)]
pub trait HostChannel {
    /// Posts `message` to the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the message cannot be delivered.
    async fn send(&mut self, message: Outgoing) -> Result<()>;

    /// Waits for the next message addressed to the connector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the channel is closed.
    async fn receive(&mut self) -> Result<Incoming>;
}
