//! `postMessage` channel to the FCL host page.
//!
//! The connector view is opened by FCL either as a popup (the host is
//! `window.opener`) or an iframe (the host is `window.parent`). Messages are
//! posted as structured JSON objects; anything the host sends that is not a
//! connector message is skipped.

use std::fmt;

use async_trait::async_trait;
use flow_ledger_connector_core::channel::{HostChannel, Incoming, Outgoing};
use flow_ledger_connector_core::error::Result;
use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver};
use serde_json::Value;
use tracing::debug;
use wasm_bindgen::prelude::*;
use web_sys::{MessageEvent, Window};

use crate::error::{WasmError, WasmResult};

/// Target origin of posted messages.
const TARGET_ORIGIN: &str = "*";

/// Host channel over `window.postMessage`.
pub struct PostMessageChannel {
    window: Window,
    host: Window,
    receiver: UnboundedReceiver<Value>,
    listener: Closure<dyn FnMut(MessageEvent)>,
}

impl fmt::Debug for PostMessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostMessageChannel").finish_non_exhaustive()
    }
}

impl PostMessageChannel {
    /// Starts listening for host messages.
    ///
    /// # Errors
    ///
    /// Returns [`WasmError::NoHostWindow`] if the view has neither an opener
    /// nor a parent.
    pub fn new() -> WasmResult<Self> {
        let window = web_sys::window().ok_or(WasmError::NoHostWindow)?;
        let host = host_window(&window)?;

        let (sender, receiver) = mpsc::unbounded();
        let listener = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            match message_from_js(&event.data()) {
                Ok(message) => {
                    // the receiver only goes away with the channel
                    let _ = sender.unbounded_send(message);
                }
                Err(err) => debug!(%err, "ignoring host message"),
            }
        });
        window.add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())?;

        Ok(Self {
            window,
            host,
            receiver,
            listener,
        })
    }

    fn post(&self, message: &Outgoing) -> WasmResult<()> {
        let text = message.to_json().to_string();
        let value = js_sys::JSON::parse(&text)?;
        self.host.post_message(&value, TARGET_ORIGIN)?;
        Ok(())
    }
}

impl Drop for PostMessageChannel {
    fn drop(&mut self) {
        let _ = self.window.remove_event_listener_with_callback(
            "message",
            self.listener.as_ref().unchecked_ref(),
        );
    }
}

#[async_trait(?Send)]
impl HostChannel for PostMessageChannel {
    async fn send(&mut self, message: Outgoing) -> Result<()> {
        debug!(?message, "posting to host");
        Ok(self.post(&message)?)
    }

    async fn receive(&mut self) -> Result<Incoming> {
        loop {
            let message = self
                .receiver
                .next()
                .await
                .ok_or(WasmError::NoHostWindow)?;
            if let Some(incoming) = Incoming::from_json(&message)? {
                return Ok(incoming);
            }
        }
    }
}

/// The window that opened this view, or the page embedding it.
fn host_window(window: &Window) -> WasmResult<Window> {
    let opener = window.opener()?;
    if !opener.is_null() && !opener.is_undefined() {
        return opener.dyn_into::<Window>().map_err(WasmError::from);
    }

    let parent = window.parent()?.ok_or(WasmError::NoHostWindow)?;
    let is_top = AsRef::<JsValue>::as_ref(&parent) == AsRef::<JsValue>::as_ref(window);
    if is_top {
        return Err(WasmError::NoHostWindow);
    }
    Ok(parent)
}

/// Converts the data of a message event to JSON.
fn message_from_js(data: &JsValue) -> WasmResult<Value> {
    let text = match data.as_string() {
        Some(text) => text,
        None => js_sys::JSON::stringify(data)?.into(),
    };
    parse_message(&text)
}

/// Parses a host message.
fn parse_message(text: &str) -> WasmResult<Value> {
    let message: Value =
        serde_json::from_str(text).map_err(|e| WasmError::InvalidMessage(e.to_string()))?;
    if message.is_object() {
        Ok(message)
    } else {
        Err(WasmError::InvalidMessage(format!("expected an object, got {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ready_response() {
        let message = parse_message(
            r#"{"type": "FCL:VIEW:READY:RESPONSE", "body": {"message": "666f6f"}}"#,
        )
        .unwrap();

        let Some(Incoming::SignRequest { signable, rpc_id }) =
            Incoming::from_json(&message).unwrap()
        else {
            panic!("expected a sign request");
        };
        assert!(signable.voucher().is_none());
        assert_eq!(rpc_id, None);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            parse_message("\"FCL:VIEW:READY\""),
            Err(WasmError::InvalidMessage(_))
        ));
        assert!(matches!(
            parse_message("not json"),
            Err(WasmError::InvalidMessage(_))
        ));
    }

    #[test]
    fn unrelated_messages_are_skipped() {
        let message = parse_message(r#"{"type": "webpackOk"}"#).unwrap();
        assert_eq!(Incoming::from_json(&message).unwrap(), None);
    }
}
