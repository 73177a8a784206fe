//! Account discovery.
//!
//! The device holds one key per derivation path. [`AccountDiscoveryEngine`]
//! walks the paths `m/44'/{coin}'/{account}'/0/{key}` and asks the address
//! registry which of the keys belong to an account:
//!
//! ```text
//! legacy path ──► account 0: key 0, key 1, ... ──► account 1: key 0, ...
//!                     └─ max_key_gap misses ──┘        └─ ... ─┘
//!                 stop after max_account_gap accounts without a hit
//! ```
//!
//! Every key costs one device round-trip, so the scan is strictly
//! sequential. Balances are fetched afterwards, concurrently, since they do
//! not touch the device.

use core::fmt;
use std::collections::{BTreeSet, HashSet};

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::FlowAddress;
use crate::amount::Amount;
use crate::config::{DiscoveryConfig, Network};
use crate::crypto::{CryptoOptions, RawPublicKey};
use crate::error::{Error, Result};
use crate::path::DerivationPath;
use crate::registry::{AccountState, AddressRegistry};
use crate::session::DeviceSession;

/// Where an account's key sits on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AccountKind {
    /// The key at the fixed legacy path.
    Legacy,
    /// A key at a derived path.
    #[serde(rename_all = "camelCase")]
    Derived {
        /// Account component of the path.
        account_index: u32,
        /// Key component of the path.
        key_index: u32,
    },
}

/// A device key together with the account it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAccount {
    /// The account address, once the registry resolved it.
    pub address: Option<FlowAddress>,
    /// The device key.
    pub public_key: RawPublicKey,
    /// Path of the key on the device.
    pub path: DerivationPath,
    /// Legacy or derived.
    pub kind: AccountKind,
    /// FLOW balance at discovery time.
    pub balance: Amount,
}

impl DeviceAccount {
    /// Account index of a derived account.
    #[must_use]
    pub const fn account_index(&self) -> Option<u32> {
        match self.kind {
            AccountKind::Legacy => None,
            AccountKind::Derived { account_index, .. } => Some(account_index),
        }
    }

    /// Key index of a derived account.
    #[must_use]
    pub const fn key_index(&self) -> Option<u32> {
        match self.kind {
            AccountKind::Legacy => None,
            AccountKind::Derived { key_index, .. } => Some(key_index),
        }
    }

    /// Whether the key sits at the legacy path.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self.kind, AccountKind::Legacy)
    }
}

/// Gap-limited search for device accounts.
pub struct AccountDiscoveryEngine<'a> {
    registry: &'a dyn AddressRegistry,
    state: &'a dyn AccountState,
    config: DiscoveryConfig,
    options: CryptoOptions,
}

impl fmt::Debug for AccountDiscoveryEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountDiscoveryEngine")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> AccountDiscoveryEngine<'a> {
    /// Creates an engine resolving keys through `registry` and balances
    /// through `state`.
    #[must_use]
    pub const fn new(
        registry: &'a dyn AddressRegistry,
        state: &'a dyn AccountState,
        config: DiscoveryConfig,
        options: CryptoOptions,
    ) -> Self {
        Self {
            registry,
            state,
            config,
            options,
        }
    }

    /// Discovers the accounts held by the device.
    ///
    /// `known_accounts` are accounts from an earlier scan; a key matching one
    /// of them reuses its address instead of asking the registry again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid gap limits and any device or
    /// transport error raised while scanning derived paths. Failures on the
    /// legacy path other than transport errors only mean "no legacy
    /// account".
    pub async fn discover(
        &self,
        session: &mut DeviceSession,
        network: Network,
        known_accounts: &[DeviceAccount],
    ) -> Result<Vec<DeviceAccount>> {
        self.config.validate()?;

        let mut accounts = Vec::new();
        if let Some(legacy) = self.discover_legacy(session, known_accounts).await? {
            accounts.push(legacy);
        }
        self.scan(session, network, known_accounts, &mut accounts)
            .await?;

        let mut seen = HashSet::new();
        accounts.retain(|account| seen.insert(account.path));

        self.fetch_balances(&mut accounts).await;
        info!(count = accounts.len(), %network, "account discovery finished");
        Ok(accounts)
    }

    async fn discover_legacy(
        &self,
        session: &mut DeviceSession,
        known_accounts: &[DeviceAccount],
    ) -> Result<Option<DeviceAccount>> {
        let path = DerivationPath::legacy();
        let (public_key, device_address) =
            match session.get_address_and_public_key(&path, self.options).await {
                Ok(found) => found,
                Err(err @ Error::Transport(_)) => return Err(err),
                Err(err) => {
                    warn!(%err, "legacy key unavailable");
                    return Ok(None);
                }
            };

        let address = match device_address {
            Some(address) => Some(address),
            None => self.resolve(&public_key, known_accounts).await,
        };
        Ok(address.map(|address| {
            info!(%address, "found legacy account");
            DeviceAccount {
                address: Some(address),
                public_key,
                path,
                kind: AccountKind::Legacy,
                balance: Amount::ZERO,
            }
        }))
    }

    async fn scan(
        &self,
        session: &mut DeviceSession,
        network: Network,
        known_accounts: &[DeviceAccount],
        accounts: &mut Vec<DeviceAccount>,
    ) -> Result<()> {
        let DiscoveryConfig {
            max_account_gap,
            max_key_gap,
        } = self.config;

        let mut account_index = 0;
        let mut key_index = 0;
        let mut account_gap = 0;
        let mut key_gap = 0;
        let mut account_hits = 0;

        while account_gap < max_account_gap {
            let path = DerivationPath::derive(network, account_index, key_index)?;
            let (public_key, device_address) = session
                .get_address_and_public_key(&path, self.options)
                .await?;

            let address = match device_address {
                Some(address) => Some(address),
                None => self.resolve(&public_key, known_accounts).await,
            };

            if let Some(address) = address {
                info!(%address, %path, "found account");
                accounts.push(DeviceAccount {
                    address: Some(address),
                    public_key,
                    path,
                    kind: AccountKind::Derived {
                        account_index,
                        key_index,
                    },
                    balance: Amount::ZERO,
                });
                account_hits += 1;
                account_gap = 0;
                key_gap = 0;
            } else {
                debug!(%path, "no account");
                key_gap += 1;
            }

            if key_gap >= max_key_gap {
                if account_hits == 0 {
                    account_gap += 1;
                }
                account_index += 1;
                key_index = 0;
                key_gap = 0;
                account_hits = 0;
            } else {
                key_index += 1;
            }
        }
        Ok(())
    }

    /// Finds the address of `public_key`, first among `known_accounts`, then
    /// in the registry. A registry failure counts as "no address".
    async fn resolve(
        &self,
        public_key: &RawPublicKey,
        known_accounts: &[DeviceAccount],
    ) -> Option<FlowAddress> {
        let known = known_accounts
            .iter()
            .find(|account| account.public_key == *public_key)
            .and_then(|account| account.address);
        if known.is_some() {
            return known;
        }

        match self.registry.lookup(public_key).await {
            Ok(address) => address.filter(|address| !address.is_zero()),
            Err(err) => {
                warn!(%err, %public_key, "registry lookup failed");
                None
            }
        }
    }

    async fn fetch_balances(&self, accounts: &mut [DeviceAccount]) {
        let lookups = accounts.iter().map(|account| async move {
            let address = account.address?;
            match self.state.balance(&address).await {
                Ok(balance) => Some(balance),
                Err(err) => {
                    warn!(%err, %address, "balance lookup failed");
                    None
                }
            }
        });

        let balances = join_all(lookups).await;
        for (account, balance) in accounts.iter_mut().zip(balances) {
            account.balance = balance.unwrap_or_default();
        }
    }
}

/// Smallest index not in `used`.
fn smallest_unused(used: impl Iterator<Item = u32>) -> u32 {
    let used: BTreeSet<u32> = used.collect();
    (0..).find(|index| !used.contains(index)).unwrap_or_default()
}

/// Path of the first account index no derived account uses yet, key 0.
///
/// # Errors
///
/// Returns [`Error::Config`] if the index cannot be hardened.
pub fn next_available_account_path(
    network: Network,
    accounts: &[DeviceAccount],
) -> Result<DerivationPath> {
    let account_index = smallest_unused(accounts.iter().filter_map(DeviceAccount::account_index));
    DerivationPath::derive(network, account_index, 0)
}

/// Path of the first unused key index within `account_index`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the index cannot be hardened.
pub fn next_available_account_key_path(
    network: Network,
    accounts: &[DeviceAccount],
    account_index: u32,
) -> Result<DerivationPath> {
    let key_index = smallest_unused(
        accounts
            .iter()
            .filter(|account| account.account_index() == Some(account_index))
            .filter_map(DeviceAccount::key_index),
    );
    DerivationPath::derive(network, account_index, key_index)
}
