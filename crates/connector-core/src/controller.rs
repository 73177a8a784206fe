//! The authentication and signing state machine.
//!
//! [`AuthSessionController`] drives both user-facing flows:
//!
//! ```text
//!            Start                     discovery done          select / create
//! Idle ──► Connecting ──► Discovering ──► AwaitingSelection ──► Verified
//!              │                                                   │ SignRequest
//!              ▼                                                   ▼
//!           Errored ◄───────────── any failure ───────────────  Signing
//!                                                                  │
//!                                                  Approved ◄──────┴──────► Declined
//! ```
//!
//! `Declined` and `Errored` recover through `Start`; `Disconnect` returns to
//! `Idle` from anywhere. Event handlers only fail for events the current
//! state cannot accept ([`Error::InvalidState`]); device, registry and
//! channel failures become `Errored` or `Declined` states instead. A signing
//! request always gets an answer on the host channel; only the device
//! refusing it leaves the session `Declined`, a lost transport leaves it
//! `Errored`.

use core::fmt;

use serde_json::Value;
use tracing::{info, warn};

use crate::address::FlowAddress;
use crate::amount::Amount;
use crate::channel::{
    AuthnResponse, CompositeSignature, HostChannel, Incoming, Outgoing, PollingResponse,
};
use crate::config::ConnectorConfig;
use crate::discovery::{
    AccountDiscoveryEngine, AccountKind, DeviceAccount, next_available_account_path,
};
use crate::error::{Error, Result};
use crate::ledger::Connector;
use crate::path::HARDENED;
use crate::registry::{AccountState, AddressRegistry};
use crate::session::DeviceSession;
use crate::signable::Signable;
use crate::signer::{SignerRole, build_message_to_sign, classify};
use crate::version::AppVersion;

/// State of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started yet.
    Idle,
    /// Probing the device.
    Connecting,
    /// Scanning the device for accounts.
    Discovering,
    /// Waiting for the user to pick or create an account.
    AwaitingSelection,
    /// An account is selected and stored on the device.
    Verified,
    /// Waiting for the device signature.
    Signing,
    /// The last request was signed.
    Approved(CompositeSignature),
    /// The last request was not signed.
    Declined(Error),
    /// The flow failed.
    Errored(Error),
}

impl SessionState {
    /// Short name of the state.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::AwaitingSelection => "awaitingSelection",
            Self::Verified => "verified",
            Self::Signing => "signing",
            Self::Approved(_) => "approved",
            Self::Declined(_) => "declined",
            Self::Errored(_) => "errored",
        }
    }
}

/// Inputs of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The user starts (or restarts) the flow.
    Start,
    /// The user picks the discovered account at this index.
    SelectAccount(usize),
    /// The user asks for a new account.
    CreateAccount,
    /// The host asks for a signature.
    SignRequest {
        /// What to sign.
        signable: Signable,
        /// JSON-RPC id to answer with, if any.
        rpc_id: Option<Value>,
    },
    /// The host cleared the active account.
    Disconnect,
}

/// The account requests are signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAccount {
    /// The discovered account.
    pub account: DeviceAccount,
    /// The account's address.
    pub address: FlowAddress,
    /// Index of the device key on the account.
    pub key_id: u32,
}

/// Callback seeing every state transition.
pub type Observer = Box<dyn FnMut(&SessionState)>;

/// Coordinates device session, discovery and signing.
pub struct AuthSessionController {
    config: ConnectorConfig,
    session: DeviceSession,
    registry: Box<dyn AddressRegistry>,
    ledger: Box<dyn AccountState>,
    channel: Box<dyn HostChannel>,
    state: SessionState,
    app_version: Option<AppVersion>,
    accounts: Vec<DeviceAccount>,
    selected: Option<SelectedAccount>,
    target_address: Option<FlowAddress>,
    observer: Option<Observer>,
}

impl fmt::Debug for AuthSessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSessionController")
            .field("state", &self.state)
            .field("accounts", &self.accounts.len())
            .field("selected", &self.selected.as_ref().map(|s| s.address))
            .field("target_address", &self.target_address)
            .finish_non_exhaustive()
    }
}

impl AuthSessionController {
    /// Creates an idle controller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn new(
        config: ConnectorConfig,
        connector: Box<dyn Connector>,
        registry: Box<dyn AddressRegistry>,
        ledger: Box<dyn AccountState>,
        channel: Box<dyn HostChannel>,
    ) -> Result<Self> {
        config.validate()?;
        let session = DeviceSession::new(connector, config.compact_signature_since);
        Ok(Self {
            config,
            session,
            registry,
            ledger,
            channel,
            state: SessionState::Idle,
            app_version: None,
            accounts: Vec::new(),
            selected: None,
            target_address: None,
            observer: None,
        })
    }

    /// Expects requests to be signed by `address` (re-authentication).
    #[must_use]
    pub fn with_target_address(mut self, address: FlowAddress) -> Self {
        self.target_address = Some(address);
        self
    }

    /// Installs a callback invoked after every state transition.
    pub fn set_observer(&mut self, observer: impl FnMut(&SessionState) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Accounts found by the last discovery.
    #[must_use]
    pub fn accounts(&self) -> &[DeviceAccount] {
        &self.accounts
    }

    /// The selected account.
    #[must_use]
    pub const fn selected(&self) -> Option<&SelectedAccount> {
        self.selected.as_ref()
    }

    /// Version of the Flow app found by the last `Start`.
    #[must_use]
    pub const fn app_version(&self) -> Option<&AppVersion> {
        self.app_version.as_ref()
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = self.state.name(), to = next.name(), "session state");
        self.state = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.state);
        }
    }

    fn fail(&mut self, err: Error) {
        warn!(%err, "session failed");
        self.transition(SessionState::Errored(err));
    }

    fn invalid(&self, event: &str) -> Error {
        Error::InvalidState(format!("cannot {event} while {}", self.state.name()))
    }

    /// Feeds `event` to the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the current state does not accept
    /// `event`.
    pub async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Start => self.start().await,
            Event::SelectAccount(index) => self.select_account(index).await,
            Event::CreateAccount => self.create_account().await,
            Event::SignRequest { signable, rpc_id } => self.sign(signable, rpc_id).await,
            Event::Disconnect => {
                self.disconnect();
                Ok(())
            }
        }
    }

    /// Connects to the device and discovers its accounts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless idle, declined or errored.
    pub async fn start(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Idle | SessionState::Declined(_) | SessionState::Errored(_)
        ) {
            return Err(self.invalid("start"));
        }

        self.transition(SessionState::Connecting);
        let version = match self.session.open().await {
            Ok(version) => version,
            Err(err) => {
                self.fail(err);
                return Ok(());
            }
        };
        self.app_version = Some(version);

        let required = self.config.min_app_version;
        if version.version < required {
            self.fail(Error::VersionMismatch {
                installed: version.version,
                required,
            });
            return Ok(());
        }

        self.transition(SessionState::Discovering);
        match self.discover().await {
            Ok(accounts) => self.accounts = accounts,
            Err(err) => {
                self.fail(err);
                return Ok(());
            }
        }
        self.transition(SessionState::AwaitingSelection);

        if let Some(target) = self.target_address {
            let index = self
                .accounts
                .iter()
                .position(|account| account.address == Some(target));
            match index {
                Some(index) => return self.select_account(index).await,
                None => warn!(%target, "expected account not found on device"),
            }
        }
        Ok(())
    }

    async fn discover(&mut self) -> Result<Vec<DeviceAccount>> {
        let engine = AccountDiscoveryEngine::new(
            self.registry.as_ref(),
            self.ledger.as_ref(),
            self.config.discovery,
            self.config.crypto,
        );
        engine
            .discover(&mut self.session, self.config.network, &self.accounts)
            .await
    }

    /// Selects the discovered account at `index` and stores it on the device.
    ///
    /// The device slot is only written when it holds a different account;
    /// the user confirms the write on the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless awaiting a selection or
    /// verified, or if there is no resolved account at `index`.
    pub async fn select_account(&mut self, index: usize) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::AwaitingSelection | SessionState::Verified
        ) {
            return Err(self.invalid("select an account"));
        }
        let account = self
            .accounts
            .get(index)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("no account at index {index}")))?;
        let address = account
            .address
            .ok_or_else(|| Error::InvalidState(format!("account at index {index} has no address")))?;

        match self.verify(&account, address).await {
            Ok(key_id) => {
                info!(%address, key_id, path = %account.path, "account selected");
                self.selected = Some(SelectedAccount {
                    account,
                    address,
                    key_id,
                });
                self.transition(SessionState::Verified);
            }
            Err(err) => self.fail(err),
        }
        Ok(())
    }

    /// Resolves the key index of `account` and makes the device slot point
    /// at it.
    async fn verify(&mut self, account: &DeviceAccount, address: FlowAddress) -> Result<u32> {
        let key_id = self
            .ledger
            .key_index(&address, &account.public_key)
            .await?
            .ok_or(Error::KeyNotFound(address))?;

        let slot = self.config.slot;
        let stored = self.session.get_slot(slot).await?;
        let matches = stored.is_some_and(|entry| entry.address == address && entry.path == account.path);
        if !matches {
            info!(
                slot,
                %address,
                stored = ?stored.map(|entry| entry.address),
                "storing account on device"
            );
            self.session
                .set_stored_address(slot, address, account.path, self.config.crypto)
                .await?;
        }
        Ok(key_id)
    }

    /// Creates an account for the next unused device key and selects it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless awaiting a selection.
    pub async fn create_account(&mut self) -> Result<()> {
        if self.state != SessionState::AwaitingSelection {
            return Err(self.invalid("create an account"));
        }

        match self.issue_account().await {
            Ok(index) => self.select_account(index).await,
            Err(err) => {
                self.fail(err);
                Ok(())
            }
        }
    }

    /// Issues an account and returns its index among the discovered ones.
    async fn issue_account(&mut self) -> Result<usize> {
        let network = self.config.network;
        let options = self.config.crypto;
        let path = next_available_account_path(network, &self.accounts)?;
        let (public_key, _) = self
            .session
            .get_address_and_public_key(&path, options)
            .await?;
        let address = self.registry.create(&public_key, options).await?;
        info!(%address, %path, "account created");

        self.transition(SessionState::Discovering);
        let mut accounts = self.discover().await?;
        let index = match accounts
            .iter()
            .position(|account| account.address == Some(address))
        {
            Some(index) => index,
            None => {
                let [_, _, account_index, _, key_index] = path.components();
                accounts.push(DeviceAccount {
                    address: Some(address),
                    public_key,
                    path,
                    kind: AccountKind::Derived {
                        account_index: account_index & !HARDENED,
                        key_index,
                    },
                    balance: Amount::ZERO,
                });
                accounts.len() - 1
            }
        };
        self.accounts = accounts;
        self.transition(SessionState::AwaitingSelection);
        Ok(index)
    }

    /// Signs `signable` with the selected account and answers the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless verified or approved.
    pub async fn sign(&mut self, signable: Signable, rpc_id: Option<Value>) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Verified | SessionState::Approved(_)
        ) {
            return Err(self.invalid("sign"));
        }
        let Some(selected) = self.selected.clone() else {
            return Err(self.invalid("sign without an account"));
        };

        self.transition(SessionState::Signing);
        let outcome = self.produce_signature(&signable, &selected).await;
        let (response, next) = match outcome {
            Ok(signature) => (
                PollingResponse::Approved(signature.clone()),
                SessionState::Approved(signature),
            ),
            Err(err) => {
                warn!(%err, "request declined");
                let response = PollingResponse::decline(err.to_string());
                // a lost device is a session fault, not a refusal
                if matches!(err, Error::Transport(_)) {
                    (response, SessionState::Errored(err))
                } else {
                    (response, SessionState::Declined(err))
                }
            }
        };

        let reply = match rpc_id {
            Some(id) => Outgoing::RpcResponse { id, response },
            None => Outgoing::Response(response),
        };
        match self.channel.send(reply).await {
            Ok(()) => self.transition(next),
            Err(err) => self.fail(err),
        }
        Ok(())
    }

    async fn produce_signature(
        &mut self,
        signable: &Signable,
        selected: &SelectedAccount,
    ) -> Result<CompositeSignature> {
        let address = selected.address;
        let role = classify(signable, &address);
        info!(%address, ?role, "signer role");
        if role == SignerRole::None {
            return Err(match self.target_address {
                Some(expected) => Error::AddressMismatch {
                    expected,
                    found: Some(address),
                },
                None => Error::SignerRoleUndetermined,
            });
        }
        if let Some(expected) = self.target_address.filter(|target| *target != address) {
            return Err(Error::AddressMismatch {
                expected,
                found: Some(address),
            });
        }

        let message = build_message_to_sign(signable, role)?;
        let signature = self
            .session
            .sign(
                &selected.account.path,
                &message.bytes,
                self.config.crypto,
                message.kind,
            )
            .await?;
        Ok(CompositeSignature::new(address, selected.key_id, &signature))
    }

    /// Clears all session data and returns to `Idle`.
    pub fn disconnect(&mut self) {
        self.accounts.clear();
        self.selected = None;
        self.app_version = None;
        self.transition(SessionState::Idle);
    }

    /// Tells the host the view is ready for a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the message cannot be sent.
    pub async fn announce_ready(&mut self) -> Result<()> {
        self.channel.send(Outgoing::Ready).await
    }

    /// Waits for the next sign request from the host.
    ///
    /// Returns `None` when the host closes the view; the session is then
    /// disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the channel fails, or a parse error of
    /// the incoming signable.
    pub async fn next_request(&mut self) -> Result<Option<Event>> {
        match self.channel.receive().await? {
            Incoming::SignRequest { signable, rpc_id } => {
                Ok(Some(Event::SignRequest { signable, rpc_id }))
            }
            Incoming::Close => {
                self.disconnect();
                Ok(None)
            }
        }
    }

    /// The authentication response for the selected account, with the
    /// connector views hosted at `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no account is selected.
    pub fn authentication_response(&self, origin: &str) -> Result<AuthnResponse> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| self.invalid("authenticate without an account"))?;
        Ok(AuthnResponse::new(
            selected.address,
            selected.key_id,
            origin,
            self.config.network,
        ))
    }

    /// Sends the authentication response to the host.
    ///
    /// # Errors
    ///
    /// See [`authentication_response`](Self::authentication_response); also
    /// [`Error::Channel`].
    pub async fn authenticate(&mut self, origin: &str) -> Result<()> {
        let response = self.authentication_response(origin)?;
        self.channel.send(Outgoing::Authenticated(response)).await
    }

    /// Tells the host the user cancelled, and disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the message cannot be sent.
    pub async fn cancel(&mut self) -> Result<()> {
        self.disconnect();
        self.channel.send(Outgoing::Cancel).await
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::channel::mock::MockChannel;
    use crate::config::{DiscoveryConfig, Network};
    use crate::crypto::CryptoOptions;
    use crate::encode::encode_transaction_envelope;
    use crate::ledger::SlotEntry;
    use crate::ledger::mock::MockDevice;
    use crate::path::DerivationPath;
    use crate::registry::mock::MockRegistry;
    use crate::signable::fixtures::{address, voucher};
    use crate::version::Version;

    const SIGN: u8 = 0x02;
    const SET_SLOT: u8 = 0x12;

    struct Harness {
        device: MockDevice,
        registry: MockRegistry,
        channel: MockChannel,
        states: Rc<RefCell<Vec<&'static str>>>,
        controller: AuthSessionController,
    }

    fn config() -> ConnectorConfig {
        ConnectorConfig {
            network: Network::Testnet,
            min_app_version: Version::new(1, 0, 0),
            discovery: DiscoveryConfig {
                max_account_gap: 1,
                max_key_gap: 2,
            },
            ..ConnectorConfig::default()
        }
    }

    fn harness(version: Version) -> Harness {
        let device = MockDevice::new(version);
        let registry = MockRegistry::new();
        let channel = MockChannel::default();
        let mut controller = AuthSessionController::new(
            config(),
            Box::new(device.clone()),
            Box::new(registry.clone()),
            Box::new(registry.clone()),
            Box::new(channel.clone()),
        )
        .unwrap();

        let states = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&states);
        controller.set_observer(move |state| seen.borrow_mut().push(state.name()));

        Harness {
            device,
            registry,
            channel,
            states,
            controller,
        }
    }

    /// A device whose legacy key belongs to account `0x01`, key 3.
    fn legacy_harness() -> Harness {
        let h = harness(Version::new(1, 2, 0));
        let legacy = DerivationPath::legacy();
        h.device.set_device_address(legacy, address(1));
        h.registry
            .register(MockDevice::public_key(&legacy), address(1));
        h.registry.set_key_index(address(1), Some(3));
        h
    }

    fn transaction(authorizer: FlowAddress, payer: FlowAddress) -> Signable {
        Signable::Transaction(Box::new(voucher(authorizer, payer)))
    }

    #[tokio::test]
    async fn payer_signs_envelope_end_to_end() {
        let mut h = legacy_harness();

        h.controller.handle(Event::Start).await.unwrap();
        assert_eq!(
            *h.states.borrow(),
            vec!["connecting", "discovering", "awaitingSelection"]
        );
        let account = &h.controller.accounts()[0];
        assert!(account.is_legacy());
        assert_eq!(account.address, Some(address(1)));

        h.controller.handle(Event::SelectAccount(0)).await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::Verified);
        assert_eq!(
            h.device.slot(0),
            Some(SlotEntry {
                address: address(1),
                path: DerivationPath::legacy(),
                options: CryptoOptions::default(),
            })
        );

        let signable = transaction(address(0xa), address(1));
        h.controller
            .handle(Event::SignRequest {
                signable: signable.clone(),
                rpc_id: None,
            })
            .await
            .unwrap();

        let expected = CompositeSignature::new(address(1), 3, &MockDevice::SIGNATURE);
        assert_eq!(h.controller.state(), &SessionState::Approved(expected.clone()));
        assert_eq!(
            h.device.signed_messages(),
            vec![encode_transaction_envelope(signable.voucher().unwrap()).unwrap()]
        );
        assert_eq!(
            h.channel.sent(),
            vec![Outgoing::Response(PollingResponse::Approved(expected))]
        );
    }

    #[tokio::test]
    async fn non_signer_is_declined_without_signing() {
        let mut h = legacy_harness();
        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();

        h.controller
            .sign(transaction(address(0xa), address(0xb)), Some(json!(1)))
            .await
            .unwrap();

        assert_eq!(
            h.controller.state(),
            &SessionState::Declined(Error::SignerRoleUndetermined)
        );
        assert_eq!(h.device.count(SIGN), 0);
        assert_eq!(
            h.channel.sent(),
            vec![Outgoing::RpcResponse {
                id: json!(1),
                response: PollingResponse::decline(
                    "could not determine whether to produce a payload or envelope signature"
                ),
            }]
        );
    }

    #[tokio::test]
    async fn outdated_app_is_version_mismatch() {
        let mut h = harness(Version::new(0, 9, 5));
        h.controller.start().await.unwrap();

        assert_eq!(
            h.controller.state(),
            &SessionState::Errored(Error::VersionMismatch {
                installed: Version::new(0, 9, 5),
                required: Version::new(1, 0, 0),
            })
        );
        assert_eq!(*h.states.borrow(), vec!["connecting", "errored"]);
    }

    #[tokio::test]
    async fn transport_failure_is_recoverable() {
        let mut h = legacy_harness();
        h.device.set_fail_open(true);

        h.controller.start().await.unwrap();
        assert!(matches!(
            h.controller.state(),
            SessionState::Errored(Error::Transport(_))
        ));

        h.device.set_fail_open(false);
        h.controller.start().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::AwaitingSelection);
    }

    #[tokio::test]
    async fn target_address_is_selected_automatically() {
        let h = legacy_harness();
        let mut controller = h.controller.with_target_address(address(1));

        controller.start().await.unwrap();
        assert_eq!(controller.state(), &SessionState::Verified);
        assert_eq!(controller.selected().map(|s| s.key_id), Some(3));
    }

    #[tokio::test]
    async fn missing_target_waits_for_selection() {
        let h = legacy_harness();
        let mut controller = h.controller.with_target_address(address(9));

        controller.start().await.unwrap();
        assert_eq!(controller.state(), &SessionState::AwaitingSelection);
    }

    #[tokio::test]
    async fn matching_slot_is_not_rewritten() {
        let mut h = legacy_harness();
        h.device.set_slot(
            0,
            SlotEntry {
                address: address(1),
                path: DerivationPath::legacy(),
                options: CryptoOptions::default(),
            },
        );

        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();

        assert_eq!(h.controller.state(), &SessionState::Verified);
        assert_eq!(h.device.count(SET_SLOT), 0);
    }

    #[tokio::test]
    async fn unknown_key_is_errored() {
        let mut h = legacy_harness();
        h.registry.set_key_index(address(1), None);

        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();

        assert_eq!(
            h.controller.state(),
            &SessionState::Errored(Error::KeyNotFound(address(1)))
        );
        assert!(h.controller.selected().is_none());
    }

    #[tokio::test]
    async fn create_account_selects_new_account() {
        let mut h = harness(Version::new(1, 2, 0));
        h.controller.start().await.unwrap();
        assert!(h.controller.accounts().is_empty());

        h.controller.handle(Event::CreateAccount).await.unwrap();

        let path = DerivationPath::derive(Network::Testnet, 0, 0).unwrap();
        assert_eq!(h.registry.created(), vec![MockDevice::public_key(&path)]);
        assert_eq!(h.controller.state(), &SessionState::Verified);
        let selected = h.controller.selected().unwrap();
        assert_eq!(selected.account.path, path);
        assert_eq!(selected.key_id, 0);
        assert_eq!(h.device.slot(0).map(|entry| entry.path), Some(path));
        assert!(h.states.borrow().ends_with(&[
            "discovering",
            "awaitingSelection",
            "discovering",
            "awaitingSelection",
            "verified",
        ]));
    }

    #[tokio::test]
    async fn device_rejection_declines_and_allows_restart() {
        let mut h = legacy_harness();
        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();
        h.device.fail_command(SIGN, 0x6986);

        h.controller
            .sign(transaction(address(1), address(0xb)), None)
            .await
            .unwrap();

        let SessionState::Declined(err) = h.controller.state() else {
            panic!("expected a decline");
        };
        assert_eq!(err.device_code(), Some(0x6986));
        assert!(matches!(
            h.channel.sent().as_slice(),
            [Outgoing::Response(PollingResponse::Declined { .. })]
        ));

        assert!(h.controller.start().await.is_ok());
    }

    #[tokio::test]
    async fn unplugged_device_errors_signing() {
        let mut h = legacy_harness();
        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();
        h.device.set_fail_open(true);

        h.controller
            .sign(transaction(address(1), address(0xb)), None)
            .await
            .unwrap();

        assert!(matches!(
            h.controller.state(),
            SessionState::Errored(Error::Transport(_))
        ));
        assert!(matches!(
            h.channel.sent().as_slice(),
            [Outgoing::Response(PollingResponse::Declined { .. })]
        ));
        assert_eq!(h.device.count(SIGN), 0);

        h.device.set_fail_open(false);
        h.controller.start().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::AwaitingSelection);
    }

    #[tokio::test]
    async fn foreign_target_address_is_mismatch() {
        let h = legacy_harness();
        // the host expects an account this device does not hold
        let mut controller = h.controller.with_target_address(address(2));
        controller.start().await.unwrap();
        assert_eq!(controller.state(), &SessionState::AwaitingSelection);
        controller.select_account(0).await.unwrap();

        controller
            .sign(transaction(address(1), address(0xb)), None)
            .await
            .unwrap();

        assert_eq!(
            controller.state(),
            &SessionState::Declined(Error::AddressMismatch {
                expected: address(2),
                found: Some(address(1)),
            })
        );
        assert_eq!(h.device.count(SIGN), 0);
    }

    #[tokio::test]
    async fn expected_account_outside_transaction_is_mismatch() {
        let h = legacy_harness();
        let mut controller = h.controller.with_target_address(address(1));
        controller.start().await.unwrap();
        assert_eq!(controller.state(), &SessionState::Verified);

        controller
            .sign(transaction(address(0xa), address(0xb)), None)
            .await
            .unwrap();

        assert_eq!(
            controller.state(),
            &SessionState::Declined(Error::AddressMismatch {
                expected: address(1),
                found: Some(address(1)),
            })
        );
        assert_eq!(h.device.count(SIGN), 0);
    }

    #[tokio::test]
    async fn requests_from_the_channel() {
        let mut h = legacy_harness();
        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();
        h.controller.announce_ready().await.unwrap();

        h.channel.push(Incoming::SignRequest {
            signable: transaction(address(1), address(0xb)),
            rpc_id: None,
        });
        h.channel.push(Incoming::Close);

        let event = h.controller.next_request().await.unwrap().unwrap();
        h.controller.handle(event).await.unwrap();
        assert!(matches!(h.controller.state(), SessionState::Approved(_)));
        assert_eq!(h.channel.sent()[0], Outgoing::Ready);

        assert_eq!(h.controller.next_request().await.unwrap(), None);
        assert_eq!(h.controller.state(), &SessionState::Idle);
        assert!(h.controller.accounts().is_empty());
    }

    #[tokio::test]
    async fn approved_session_signs_again() {
        let mut h = legacy_harness();
        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();

        for _ in 0..2 {
            h.controller
                .sign(transaction(address(1), address(0xb)), None)
                .await
                .unwrap();
        }
        assert_eq!(h.device.signed_messages().len(), 2);
    }

    #[tokio::test]
    async fn events_outside_their_state_are_rejected() {
        let mut h = harness(Version::new(1, 2, 0));

        assert!(matches!(
            h.controller.select_account(0).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            h.controller
                .sign(transaction(address(1), address(2)), None)
                .await,
            Err(Error::InvalidState(_))
        ));
        assert!(h.controller.authentication_response("https://x").is_err());

        h.controller.start().await.unwrap();
        assert!(matches!(
            h.controller.start().await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            h.controller.select_account(5).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn authenticate_and_cancel() {
        let mut h = legacy_harness();
        h.controller.start().await.unwrap();
        h.controller.select_account(0).await.unwrap();

        h.controller.authenticate("https://ledger.example").await.unwrap();
        let sent = h.channel.sent();
        let Outgoing::Authenticated(response) = &sent[0] else {
            panic!("expected an authentication response");
        };
        assert_eq!(response.addr, address(1));

        h.controller.cancel().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::Idle);
        assert_eq!(h.channel.sent()[1], Outgoing::Cancel);
    }
}
