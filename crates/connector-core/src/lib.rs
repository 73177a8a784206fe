//! Flow Ledger Connector Core Library
//!
//! This crate implements the device-facing half of a Flow wallet connector
//! for Ledger hardware wallets running the Flow app. It talks to the device,
//! finds the Flow accounts its keys control and produces the signatures FCL
//! asks for.
//!
//! # Overview
//!
//! The device is the only holder of private keys. This library provides:
//!
//! - **Device Session**: sequential APDU exchanges with the Flow app, one
//!   transport per operation
//! - **Account Discovery**: gap-limited search of derivation paths, resolving
//!   keys to addresses through an address registry
//! - **Signer Roles**: payload/envelope classification and the canonical Flow
//!   encodings to sign
//! - **Session Controller**: the state machine tying discovery, selection and
//!   signing to the FCL host channel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 AuthSessionController (FSM)                  │
//! ├──────────────────┬──────────────────┬───────────────────────┤
//! │ AccountDiscovery │  SignerRole      │  HostChannel          │
//! │ Engine           │  Resolver        │  (FCL messages)       │
//! ├──────────────────┴──────────────────┼───────────────────────┤
//! │   DeviceSession   │  PathDeriver    │  AddressRegistry /    │
//! │  ┌──────┐ ┌─────┐ │                 │  AccountState         │
//! │  │ APDU │ │ HID │ │                 │  (HTTP, optional)     │
//! │  └──────┘ └─────┘ │                 │                       │
//! ├─────────────────────────────────────┴───────────────────────┤
//! │              Transport Layer (WebUSB / HID)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## Deriving Paths
//!
//! ```rust
//! use flow_ledger_connector_core::config::Network;
//! use flow_ledger_connector_core::path::DerivationPath;
//!
//! let path = DerivationPath::derive(Network::Testnet, 0, 0).unwrap();
//! assert_eq!(path.to_string(), "m/44'/1'/0'/0/0");
//! ```
//!
//! ## Classifying a Signer
//!
//! ```rust
//! use flow_ledger_connector_core::{FlowAddress, Signable, SignerRole, classify};
//!
//! let signable = Signable::from_json(r#"{
//!     "voucher": {
//!         "cadence": "transaction {}",
//!         "refBlock": "00",
//!         "computeLimit": 100,
//!         "arguments": [],
//!         "proposalKey": {"address": "0x01", "keyId": 0, "sequenceNum": 0},
//!         "payer": "0x02",
//!         "authorizers": ["0x01"],
//!         "payloadSigs": []
//!     }
//! }"#).unwrap();
//!
//! let payer: FlowAddress = "0x02".parse().unwrap();
//! assert_eq!(classify(&signable, &payer), SignerRole::Envelope);
//! ```
//!
//! ## Loading Configuration
//!
//! ```rust
//! use flow_ledger_connector_core::ConnectorConfig;
//!
//! let config = ConnectorConfig::from_toml_str(r#"
//!     network = "mainnet"
//!
//!     [discovery]
//!     max_key_gap = 10
//! "#).unwrap();
//! assert_eq!(config.discovery.max_key_gap, 10);
//! ```
//!
//! # Device Integration
//!
//! The library is transport-agnostic. Implement [`ledger::Connector`] and
//! [`ledger::Transport`] for your platform; [`ledger::framing`] provides the
//! HID packet framing Ledger devices use over USB:
//!
//! - **Browser**: WebUSB (see `flow-ledger-connector-wasm`)
//! - **Tests**: in-memory mocks
//!
//! # Feature Flags
//!
//! - `http`: [`reqwest`](https://docs.rs/reqwest)-backed clients for the
//!   address registry and the Flow Access REST API.

// Modules
pub mod address;
pub mod amount;
pub mod channel;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod discovery;
pub mod encode;
pub mod error;
pub mod ledger;
pub mod path;
pub mod registry;
pub mod session;
pub mod signable;
pub mod signature;
pub mod signer;
pub mod version;

// Re-exports for convenience
pub use address::FlowAddress;
pub use amount::Amount;
pub use channel::{CompositeSignature, HostChannel, Incoming, Outgoing, PollingResponse};
pub use config::{ConnectorConfig, DiscoveryConfig, Network};
pub use controller::{AuthSessionController, Event, SessionState};
pub use crypto::{CryptoOptions, HashAlgorithm, RawPublicKey, SignatureAlgorithm};
pub use discovery::{AccountDiscoveryEngine, AccountKind, DeviceAccount};
pub use error::{Error, Result};
pub use path::DerivationPath;
pub use session::DeviceSession;
pub use signable::{Signable, Voucher};
pub use signature::RawSignature;
pub use signer::{SignerRole, build_message_to_sign, classify};
pub use version::{AppVersion, Version};
