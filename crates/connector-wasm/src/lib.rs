//! Flow Ledger Connector WASM Library
//!
//! This crate provides WebAssembly bindings for the Flow Ledger connector,
//! letting an FCL wallet view sign Flow transactions and messages with the
//! Flow app on a Ledger device.
//!
//! # Browser Support
//!
//! This library requires WebUSB, which is only supported in Chromium-based
//! browsers (Chrome, Edge, Opera, Brave). Firefox and Safari do not support
//! WebUSB.
//!
//! # Security Requirements
//!
//! - HTTPS context required (WebUSB security requirement)
//! - User gesture required for the first device connection
//! - The view must be opened by FCL (popup or iframe) to receive requests
//!
//! # Quick Start
//!
//! ```javascript
//! import init, { FlowLedgerConnector } from 'flow-ledger-connector-wasm';
//!
//! await init();
//!
//! const connector = new FlowLedgerConnector(`network = "testnet"`);
//! connector.onStateChange((state, error) => render(state, error));
//!
//! // On a click: find the accounts of the device
//! await connector.start();
//! const accounts = JSON.parse(connector.accounts());
//!
//! // The user picks one; it is stored on the device
//! await connector.selectAccount(0);
//!
//! // Authentication view
//! await connector.authenticate();
//!
//! // Authorization view: answer FCL until it closes the view
//! await connector.serve();
//! ```
//!
//! # API Reference
//!
//! ## [`FlowLedgerConnector`]
//!
//! - [`new(config?, targetAddress?)`](FlowLedgerConnector::new) - Create a connector
//! - [`start()`](FlowLedgerConnector::start) - Connect and discover accounts
//! - [`selectAccount(index)`](FlowLedgerConnector::select_account) - Select a discovered account
//! - [`createAccount()`](FlowLedgerConnector::create_account) - Create an account for a new key
//! - [`serve()`](FlowLedgerConnector::serve) - Answer FCL sign requests
//! - [`authenticate()`](FlowLedgerConnector::authenticate) - Send the authentication response
//! - [`cancel()`](FlowLedgerConnector::cancel) - Report a user cancellation
//! - [`disconnect()`](FlowLedgerConnector::disconnect) - Forget the session
//! - [`state()`](FlowLedgerConnector::state), [`error()`](FlowLedgerConnector::error),
//!   [`accounts()`](FlowLedgerConnector::accounts) - Inspect the session

pub mod channel;
pub mod connector;
pub mod error;
pub mod logging;
pub mod transport;

pub use channel::PostMessageChannel;
pub use connector::FlowLedgerConnector;
pub use error::{WasmError, WasmResult};
pub use transport::{WebUsbConnector, WebUsbTransport};

use tracing::Level;
use wasm_bindgen::prelude::*;

/// Initializes the WASM module.
///
/// Routes `tracing` output to the browser console. Called automatically when
/// the module is loaded.
#[wasm_bindgen(start)]
pub fn init() {
    logging::init(Level::INFO);
}

/// Checks if WebUSB is supported in the current browser.
///
/// # Example
///
/// ```javascript
/// if (!isWebUsbSupported()) {
///     alert("WebUSB is not supported. Please use Chrome, Edge, or another Chromium browser.");
/// }
/// ```
#[wasm_bindgen(js_name = "isWebUsbSupported")]
pub fn is_webusb_supported() -> bool {
    web_sys::window().is_some_and(|window| {
        let navigator: web_sys::Navigator = window.navigator();
        js_sys::Reflect::has(&navigator, &JsValue::from_str("usb")).unwrap_or(false)
    })
}

/// Returns the library version.
#[wasm_bindgen(js_name = "getVersion")]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
