//! Flow Ledger connector handle for browser use.
//!
//! This module wraps the session controller into a JavaScript class. The
//! page drives it from user gestures (connect, pick an account) and lets it
//! serve FCL sign requests over `postMessage`.
//!
//! # Example
//!
//! ```ignore
//! use flow_ledger_connector_wasm::connector::FlowLedgerConnector;
//!
//! let mut connector = FlowLedgerConnector::new(None, None)?;
//! connector.start().await?;
//! connector.select_account(0).await?;
//! connector.serve().await?;
//! ```

use std::fmt;

use flow_ledger_connector_core::controller::SessionState;
use flow_ledger_connector_core::registry::http::{HttpAccountState, HttpAddressRegistry};
use flow_ledger_connector_core::{
    AuthSessionController, ConnectorConfig, Error as CoreError, Event, FlowAddress,
};
use tracing::{info, warn};
use wasm_bindgen::prelude::*;

use crate::channel::PostMessageChannel;
use crate::error::{WasmError, WasmResult};
use crate::transport::WebUsbConnector;

/// A Flow wallet connector backed by a Ledger device.
///
/// # Thread Safety
///
/// This type is not thread-safe and should only be used from the main thread
/// in a browser environment.
#[wasm_bindgen]
pub struct FlowLedgerConnector {
    /// The session state machine.
    controller: AuthSessionController,

    /// Origin serving the connector views.
    origin: String,
}

impl fmt::Debug for FlowLedgerConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowLedgerConnector")
            .field("controller", &self.controller)
            .field("origin", &self.origin)
            .finish()
    }
}

#[wasm_bindgen]
impl FlowLedgerConnector {
    /// Creates a connector.
    ///
    /// # Arguments
    ///
    /// * `config` - TOML configuration; defaults apply when absent
    /// * `target_address` - account FCL expects, when re-authenticating
    ///
    /// # Errors
    ///
    /// - If the configuration or address is invalid
    /// - If the page has no FCL window to answer
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: Option<String>,
        target_address: Option<String>,
    ) -> Result<FlowLedgerConnector, JsValue> {
        Self::new_internal(config.as_deref(), target_address.as_deref()).map_err(JsValue::from)
    }

    /// Internal constructor.
    fn new_internal(config: Option<&str>, target_address: Option<&str>) -> WasmResult<Self> {
        let config = match config {
            Some(source) => ConnectorConfig::from_toml_str(source)?,
            None => ConnectorConfig::default(),
        };
        let target_address = target_address
            .map(str::parse::<FlowAddress>)
            .transpose()?;

        let origin = web_sys::window()
            .ok_or(WasmError::NoHostWindow)?
            .location()
            .origin()?;
        let registry = HttpAddressRegistry::new(config.registry_url.as_str());
        let ledger = HttpAccountState::new(config.access_node());
        let channel = PostMessageChannel::new()?;

        info!(network = %config.network, %origin, "connector created");
        let mut controller = AuthSessionController::new(
            config,
            Box::new(WebUsbConnector),
            Box::new(registry),
            Box::new(ledger),
            Box::new(channel),
        )?;
        if let Some(address) = target_address {
            controller = controller.with_target_address(address);
        }

        Ok(Self { controller, origin })
    }

    /// Registers `callback(state, error)`, called on every state change.
    ///
    /// `error` is the failure message in the `declined` and `errored`
    /// states, `undefined` otherwise.
    #[wasm_bindgen(js_name = "onStateChange")]
    pub fn on_state_change(&mut self, callback: js_sys::Function) {
        self.controller.set_observer(move |state| {
            let error = state_error(state).map_or(JsValue::UNDEFINED, JsValue::from);
            if let Err(err) = callback.call2(&JsValue::NULL, &JsValue::from_str(state.name()), &error)
            {
                warn!(?err, "state callback failed");
            }
        });
    }

    /// Connects to the device and discovers its accounts.
    ///
    /// Must be called in response to a user gesture the first time, so the
    /// browser can show its device picker.
    ///
    /// # Errors
    ///
    /// If a session is already running. Device failures are reported
    /// through the state.
    #[wasm_bindgen]
    pub async fn start(&mut self) -> Result<(), JsValue> {
        self.handle(Event::Start).await.map_err(JsValue::from)
    }

    /// Selects the discovered account at `index`.
    ///
    /// # Errors
    ///
    /// If discovery has not finished.
    #[wasm_bindgen(js_name = "selectAccount")]
    pub async fn select_account(&mut self, index: usize) -> Result<(), JsValue> {
        self.handle(Event::SelectAccount(index))
            .await
            .map_err(JsValue::from)
    }

    /// Creates a new account for the next unused device key and selects it.
    ///
    /// # Errors
    ///
    /// If discovery has not finished.
    #[wasm_bindgen(js_name = "createAccount")]
    pub async fn create_account(&mut self) -> Result<(), JsValue> {
        self.handle(Event::CreateAccount)
            .await
            .map_err(JsValue::from)
    }

    /// Announces the view to FCL and answers its sign requests until FCL
    /// closes the view.
    ///
    /// # Errors
    ///
    /// If the host channel fails or a request is malformed.
    #[wasm_bindgen]
    pub async fn serve(&mut self) -> Result<(), JsValue> {
        self.serve_internal().await.map_err(JsValue::from)
    }

    /// Internal request loop.
    async fn serve_internal(&mut self) -> WasmResult<()> {
        self.controller.announce_ready().await?;
        while let Some(event) = self.controller.next_request().await? {
            self.handle(event).await?;
        }
        Ok(())
    }

    /// Sends the authentication response for the selected account.
    ///
    /// # Errors
    ///
    /// If no account is selected or the host channel fails.
    #[wasm_bindgen]
    pub async fn authenticate(&mut self) -> Result<(), JsValue> {
        let origin = self.origin.clone();
        self.controller
            .authenticate(&origin)
            .await
            .map_err(|e| JsValue::from(WasmError::from(e)))
    }

    /// Tells FCL the user cancelled.
    ///
    /// # Errors
    ///
    /// If the host channel fails.
    #[wasm_bindgen]
    pub async fn cancel(&mut self) -> Result<(), JsValue> {
        self.controller
            .cancel()
            .await
            .map_err(|e| JsValue::from(WasmError::from(e)))
    }

    /// Forgets discovered accounts and the selection.
    #[wasm_bindgen]
    pub fn disconnect(&mut self) {
        self.controller.disconnect();
    }

    /// The current state name.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        self.controller.state().name().to_string()
    }

    /// The failure message of the `declined` and `errored` states.
    #[wasm_bindgen]
    pub fn error(&self) -> Option<String> {
        state_error(self.controller.state())
    }

    /// Discovered accounts as a JSON array.
    ///
    /// # Errors
    ///
    /// If serialization fails.
    #[wasm_bindgen]
    pub fn accounts(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.controller.accounts())
            .map_err(|e| JsValue::from(WasmError::from(CoreError::from(e))))
    }

    /// Address of the selected account.
    #[wasm_bindgen(js_name = "selectedAddress")]
    pub fn selected_address(&self) -> Option<String> {
        self.controller
            .selected()
            .map(|selected| selected.address.to_string())
    }

    /// Version of the Flow app on the device.
    #[wasm_bindgen(js_name = "appVersion")]
    pub fn app_version(&self) -> Option<String> {
        self.controller
            .app_version()
            .map(|app| app.version.to_string())
    }
}

impl FlowLedgerConnector {
    async fn handle(&mut self, event: Event) -> WasmResult<()> {
        Ok(self.controller.handle(event).await?)
    }
}

/// The failure message carried by `state`.
fn state_error(state: &SessionState) -> Option<String> {
    match state {
        SessionState::Declined(err) | SessionState::Errored(err) => Some(err.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_errors() {
        assert_eq!(state_error(&SessionState::Idle), None);
        assert_eq!(
            state_error(&SessionState::Declined(CoreError::SignerRoleUndetermined)).as_deref(),
            Some("could not determine whether to produce a payload or envelope signature")
        );
        assert_eq!(
            state_error(&SessionState::Errored(CoreError::Transport("unplugged".to_string())))
                .as_deref(),
            Some("transport error: unplugged")
        );
    }
}
