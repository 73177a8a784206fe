//! JavaScript-friendly error types for WASM bindings.
//!
//! All errors convert to [`JsValue`] (a JavaScript `Error`), so they can be
//! returned from exported functions and rejected promises. Errors raised by
//! the browser side of a core trait (USB transfers, the host window) convert
//! into the matching core error instead, so the session controller sees
//! them as transport or channel failures.
//!
//! # Example
//!
//! ```ignore
//! use flow_ledger_connector_wasm::error::WasmError;
//!
//! async fn connect() -> Result<(), WasmError> {
//!     Err(WasmError::DeviceNotFound)
//! }
//! ```

use std::{error, fmt};

use flow_ledger_connector_core::error::Error as CoreError;
use js_sys::Error as JsError;
use wasm_bindgen::prelude::*;

/// Error type for WASM operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WasmError {
    /// WebUSB is not available in this browser.
    WebUsbNotSupported,

    /// No Ledger device was found or selected by the user.
    DeviceNotFound,

    /// Failed to open the USB device.
    DeviceOpenFailed(String),

    /// Failed to claim the USB interface.
    InterfaceClaimFailed(String),

    /// USB communication error.
    UsbError(String),

    /// There is no FCL window to talk to.
    NoHostWindow,

    /// The host sent something that is not a JSON message.
    InvalidMessage(String),

    /// Core library error.
    CoreError(CoreError),

    /// JavaScript error from a browser API.
    JsError(String),
}

impl fmt::Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebUsbNotSupported => {
                write!(f, "WebUSB is not supported in this browser")
            }
            Self::DeviceNotFound => {
                write!(f, "No Ledger device found")
            }
            Self::DeviceOpenFailed(msg) => {
                write!(f, "Failed to open device: {msg}")
            }
            Self::InterfaceClaimFailed(msg) => {
                write!(f, "Failed to claim interface: {msg}")
            }
            Self::UsbError(msg) => {
                write!(f, "USB error: {msg}")
            }
            Self::NoHostWindow => {
                write!(f, "No opener or parent window to answer")
            }
            Self::InvalidMessage(msg) => {
                write!(f, "Invalid host message: {msg}")
            }
            Self::CoreError(err) => {
                write!(f, "{err}")
            }
            Self::JsError(msg) => {
                write!(f, "JavaScript error: {msg}")
            }
        }
    }
}

impl error::Error for WasmError {}

impl From<WasmError> for JsValue {
    fn from(error: WasmError) -> Self {
        JsError::new(&error.to_string()).into()
    }
}

impl From<CoreError> for WasmError {
    fn from(error: CoreError) -> Self {
        Self::CoreError(error)
    }
}

impl From<JsValue> for WasmError {
    fn from(value: JsValue) -> Self {
        let msg = if let Some(s) = value.as_string() {
            s
        } else if let Some(err) = value.dyn_ref::<JsError>() {
            err.message().into()
        } else {
            format!("{value:?}")
        };
        Self::JsError(msg)
    }
}

impl From<WasmError> for CoreError {
    fn from(error: WasmError) -> Self {
        match error {
            WasmError::CoreError(err) => err,
            WasmError::NoHostWindow | WasmError::InvalidMessage(_) => {
                Self::Channel(error.to_string())
            }
            WasmError::WebUsbNotSupported
            | WasmError::DeviceNotFound
            | WasmError::DeviceOpenFailed(_)
            | WasmError::InterfaceClaimFailed(_)
            | WasmError::UsbError(_)
            | WasmError::JsError(_) => Self::Transport(error.to_string()),
        }
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;
