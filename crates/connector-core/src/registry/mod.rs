//! Off-device collaborators: the address registry and the Flow ledger state.
//!
//! The device only knows keys. Which account a key belongs to is answered by
//! an [`AddressRegistry`]; balances and key indices come from an
//! [`AccountState`] backed by a Flow access node.
//!
//! HTTP implementations of both live in [`http`] behind the `http` feature.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpAccountState, HttpAddressRegistry};

use async_trait::async_trait;

use crate::address::FlowAddress;
use crate::amount::Amount;
use crate::crypto::{CryptoOptions, RawPublicKey};
use crate::error::Result;

/// Maps public keys to Flow addresses.
#[async_trait(?Send)]
pub trait AddressRegistry {
    /// Looks up the address holding `public_key`. Unknown keys yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`](crate::Error::Registry) if the service fails.
    async fn lookup(&self, public_key: &RawPublicKey) -> Result<Option<FlowAddress>>;

    /// Creates a new account holding `public_key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`](crate::Error::Registry) if the service fails.
    async fn create(&self, public_key: &RawPublicKey, options: CryptoOptions)
    -> Result<FlowAddress>;
}

/// Read access to on-chain account state.
#[async_trait(?Send)]
pub trait AccountState {
    /// Returns the FLOW balance of `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`](crate::Error::Registry) if the lookup fails.
    async fn balance(&self, address: &FlowAddress) -> Result<Amount>;

    /// Returns the index of the non-revoked key `public_key` on `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`](crate::Error::Registry) if the lookup fails.
    async fn key_index(
        &self,
        address: &FlowAddress,
        public_key: &RawPublicKey,
    ) -> Result<Option<u32>>;
}
