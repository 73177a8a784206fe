//! HTTP clients for the address registry and the Flow Access REST API.
//!
//! # Registry Endpoints
//!
//! - `GET {registry}/accounts?publicKey={hex}` returns `{ "address": ... }`,
//!   or 404 when the key is unknown.
//! - `POST {registry}/accounts` with
//!   `{ "publicKey", "signatureAlgorithm", "hashAlgorithm" }` creates an
//!   account and returns `{ "address": ... }`.
//!
//! # Access Endpoint
//!
//! - `GET {access}/v1/accounts/{address}?expand=keys` returns the balance (a
//!   decimal string of 10^-8 FLOW) and the account keys.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, de};
use tracing::debug;

use super::{AccountState, AddressRegistry};
use crate::address::FlowAddress;
use crate::amount::Amount;
use crate::crypto::{CryptoOptions, RawPublicKey};
use crate::error::{Error, Result};

/// Registry response carrying an address.
#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: Option<FlowAddress>,
}

/// Registry request creating an account.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountRequest<'a> {
    public_key: String,
    signature_algorithm: &'a str,
    hash_algorithm: &'a str,
}

/// Address registry over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAddressRegistry {
    client: Client,
    base_url: String,
}

impl HttpAddressRegistry {
    /// Creates a registry client for `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn accounts_url(&self) -> String {
        format!("{}/accounts", self.base_url)
    }
}

#[async_trait(?Send)]
impl AddressRegistry for HttpAddressRegistry {
    async fn lookup(&self, public_key: &RawPublicKey) -> Result<Option<FlowAddress>> {
        let url = format!("{}?publicKey={}", self.accounts_url(), public_key.to_hex());
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(%public_key, "key unknown to registry");
            return Ok(None);
        }

        let body: AddressResponse = response.error_for_status()?.json().await?;
        Ok(body.address)
    }

    async fn create(
        &self,
        public_key: &RawPublicKey,
        options: CryptoOptions,
    ) -> Result<FlowAddress> {
        let request = CreateAccountRequest {
            public_key: public_key.to_hex(),
            signature_algorithm: options.signature_algorithm.name(),
            hash_algorithm: options.hash_algorithm.name(),
        };

        let body: AddressResponse = self
            .client
            .post(self.accounts_url())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.address
            .ok_or_else(|| Error::Registry("registry returned no address".to_string()))
    }
}

/// An account as returned by the Access REST API.
#[derive(Debug, Deserialize)]
struct AccountResponse {
    balance: Amount,
    #[serde(default)]
    keys: Vec<AccountKey>,
}

/// One key of an account.
#[derive(Debug, Deserialize)]
struct AccountKey {
    #[serde(deserialize_with = "number_from_string")]
    index: u32,
    public_key: String,
    #[serde(default)]
    revoked: bool,
}

/// The REST API renders integers as strings.
fn number_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> core::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Text(String),
        Value(u32),
    }

    match Number::deserialize(deserializer)? {
        Number::Text(text) => text.parse().map_err(de::Error::custom),
        Number::Value(value) => Ok(value),
    }
}

impl AccountResponse {
    /// Finds the non-revoked key matching `public_key`.
    fn key_index(&self, public_key: &RawPublicKey) -> Option<u32> {
        let wanted = public_key.to_hex();
        self.keys
            .iter()
            .filter(|key| !key.revoked)
            .find(|key| {
                let hex = key.public_key.strip_prefix("0x").unwrap_or(&key.public_key);
                hex.eq_ignore_ascii_case(&wanted)
            })
            .map(|key| key.index)
    }
}

/// Flow account state over the Access REST API.
#[derive(Debug, Clone)]
pub struct HttpAccountState {
    client: Client,
    access_node: String,
}

impl HttpAccountState {
    /// Creates a client for the access node at `access_node`.
    #[must_use]
    pub fn new(access_node: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            access_node: access_node.into().trim_end_matches('/').to_string(),
        }
    }

    async fn account(&self, address: &FlowAddress) -> Result<AccountResponse> {
        let url = format!(
            "{}/v1/accounts/{}?expand=keys",
            self.access_node,
            address.sans_prefix()
        );
        Ok(self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait(?Send)]
impl AccountState for HttpAccountState {
    async fn balance(&self, address: &FlowAddress) -> Result<Amount> {
        Ok(self.account(address).await?.balance)
    }

    async fn key_index(
        &self,
        address: &FlowAddress,
        public_key: &RawPublicKey,
    ) -> Result<Option<u32>> {
        Ok(self.account(address).await?.key_index(public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock::MockDevice;
    use crate::path::DerivationPath;

    #[test]
    fn create_request_body() {
        let key = MockDevice::public_key(&DerivationPath::legacy());
        let request = CreateAccountRequest {
            public_key: key.to_hex(),
            signature_algorithm: "ECDSA_P256",
            hash_algorithm: "SHA3_256",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["publicKey"], key.to_hex());
        assert_eq!(json["signatureAlgorithm"], "ECDSA_P256");
        assert_eq!(json["hashAlgorithm"], "SHA3_256");
    }

    #[test]
    fn address_response_may_be_empty() {
        let body: AddressResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(body.address, None);

        let body: AddressResponse =
            serde_json::from_str(r#"{"address":"f8d6e0586b0a20c7"}"#).unwrap();
        assert_eq!(body.address, Some("0xf8d6e0586b0a20c7".parse().unwrap()));
    }

    #[test]
    fn account_key_lookup_skips_revoked() {
        let key = MockDevice::public_key(&DerivationPath::legacy());
        let json = format!(
            r#"{{
                "address": "f8d6e0586b0a20c7",
                "balance": "100001000",
                "keys": [
                    {{"index": "0", "public_key": "0x{hex}", "revoked": true}},
                    {{"index": "3", "public_key": "0x{upper}", "revoked": false}}
                ]
            }}"#,
            hex = key.to_hex(),
            upper = key.to_hex().to_uppercase(),
        );

        let account: AccountResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(account.balance, Amount::from_units(100_001_000));
        assert_eq!(account.key_index(&key), Some(3));

        let other = MockDevice::public_key(&DerivationPath::CLEAR);
        assert_eq!(account.key_index(&other), None);
    }
}
