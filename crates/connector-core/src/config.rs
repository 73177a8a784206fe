//! Connector configuration.
//!
//! All settings have defaults. A host page can override them with a TOML
//! document:
//!
//! ```
//! use flow_ledger_connector_core::config::{ConnectorConfig, Network};
//!
//! let config = ConnectorConfig::from_toml_str(
//!     r#"
//!     network = "mainnet"
//!     registry_url = "https://registry.example.org"
//!
//!     [discovery]
//!     max_key_gap = 3
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.network, Network::Mainnet);
//! assert_eq!(config.discovery.max_key_gap, 3);
//! assert_eq!(config.discovery.max_account_gap, 1);
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::crypto::CryptoOptions;
use crate::error::{Error, Result};
use crate::version::Version;

/// A Flow network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// Flow mainnet.
    Mainnet,
    /// Flow testnet.
    #[default]
    Testnet,
    /// A local emulator.
    Emulator,
}

impl Network {
    /// Returns the BIP-44 coin type used in derivation paths.
    #[must_use]
    pub const fn coin_type(self) -> u32 {
        match self {
            Self::Mainnet => 539,
            Self::Testnet | Self::Emulator => 1,
        }
    }

    /// Returns the default Flow Access REST endpoint.
    #[must_use]
    pub const fn default_access_node(self) -> &'static str {
        match self {
            Self::Mainnet => "https://rest-mainnet.onflow.org",
            Self::Testnet => "https://rest-testnet.onflow.org",
            Self::Emulator => "http://localhost:8888",
        }
    }

    /// Returns the canonical network name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Emulator => "emulator",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "emulator" | "local" => Ok(Self::Emulator),
            other => Err(Error::Config(format!("unknown network {other:?}"))),
        }
    }
}

impl Serialize for Network {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Gap limits for account discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Consecutive account indices without any hit before the scan stops.
    pub max_account_gap: u32,
    /// Consecutive key indices without a hit before moving to the next account.
    pub max_key_gap: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_account_gap: 1,
            max_key_gap: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Checks that both gap limits are at least 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] otherwise.
    pub fn validate(&self) -> Result<()> {
        if self.max_account_gap == 0 {
            return Err(Error::Config("max_account_gap must be at least 1".to_string()));
        }
        if self.max_key_gap == 0 {
            return Err(Error::Config("max_key_gap must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Top-level connector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Network the connector works on.
    pub network: Network,

    /// Base URL of the address registry service.
    pub registry_url: String,

    /// Flow Access REST endpoint; the network default when unset.
    pub access_node: Option<String>,

    /// Device slot holding the selected account.
    pub slot: u8,

    /// Oldest Flow app version the connector accepts.
    pub min_app_version: Version,

    /// First Flow app version returning compact signatures.
    pub compact_signature_since: Version,

    /// Algorithms used for key operations.
    pub crypto: CryptoOptions,

    /// Discovery gap limits.
    pub discovery: DiscoveryConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            registry_url: "http://localhost:8081".to_string(),
            access_node: None,
            slot: 0,
            min_app_version: Version::new(0, 9, 0),
            compact_signature_since: Version::new(0, 9, 0),
            crypto: CryptoOptions::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl ConnectorConfig {
    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a syntax error, an unknown field or an
    /// invalid value.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks value constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on an invalid value.
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        if self.registry_url.trim().is_empty() {
            return Err(Error::Config("registry_url must not be empty".to_string()));
        }
        Ok(())
    }

    /// Returns the Flow Access REST endpoint in effect.
    #[must_use]
    pub fn access_node(&self) -> &str {
        self.access_node
            .as_deref()
            .unwrap_or_else(|| self.network.default_access_node())
    }
}
