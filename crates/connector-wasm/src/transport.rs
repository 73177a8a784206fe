//! WebUSB transport for Ledger communication.
//!
//! This module implements the core [`Transport`] and [`Connector`] traits
//! on top of the WebUSB API. APDUs travel in 64-byte HID packets over the
//! vendor interface of the device (see
//! [`framing`](flow_ledger_connector_core::ledger::framing)).
//!
//! # Browser Support
//!
//! WebUSB is only supported in Chromium-based browsers (Chrome, Edge, Opera).
//! Firefox and Safari do not support WebUSB.
//!
//! # Security
//!
//! WebUSB requires a secure context (HTTPS) and a user gesture for the first
//! device selection. Later connections reuse the device the user granted.
//!
//! # Example
//!
//! ```ignore
//! use flow_ledger_connector_wasm::transport::WebUsbConnector;
//!
//! // Each operation opens and releases its own transport
//! let session = DeviceSession::new(Box::new(WebUsbConnector), compact_since);
//! ```

use std::fmt;

use async_trait::async_trait;
use flow_ledger_connector_core::error::Result;
use flow_ledger_connector_core::ledger::framing::{self, CHANNEL, PACKET_SIZE, ResponseAssembler};
use flow_ledger_connector_core::ledger::{Apdu, ApduResponse, Connector, Transport};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{UsbDevice, UsbEndpoint, UsbInterface};

use crate::error::{WasmError, WasmResult};

/// Ledger USB vendor ID.
const LEDGER_VENDOR_ID: u16 = 0x2c97;

/// Vendor-specific interface class carrying APDUs.
const LEDGER_INTERFACE_CLASS: u8 = 0xFF;

/// USB configuration holding the APDU interface.
const LEDGER_CONFIGURATION: u8 = 1;

/// WebUSB transport to a Ledger device.
pub struct WebUsbTransport {
    /// The USB device handle.
    device: UsbDevice,

    /// The vendor interface number.
    interface_number: u8,

    /// The interrupt-out endpoint.
    endpoint_out: u8,

    /// The interrupt-in endpoint.
    endpoint_in: u8,

    /// Whether the device is currently connected.
    connected: bool,
}

impl fmt::Debug for WebUsbTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebUsbTransport")
            .field("interface_number", &self.interface_number)
            .field("endpoint_out", &self.endpoint_out)
            .field("endpoint_in", &self.endpoint_in)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl WebUsbTransport {
    /// Opens the Ledger device, asking the user to pick one if none was
    /// granted yet.
    ///
    /// # Errors
    ///
    /// - [`WasmError::WebUsbNotSupported`] if WebUSB is not available
    /// - [`WasmError::DeviceNotFound`] if no device was selected
    /// - [`WasmError::DeviceOpenFailed`] if the device could not be opened
    /// - [`WasmError::InterfaceClaimFailed`] if the device is used elsewhere
    pub async fn open() -> WasmResult<Self> {
        let device = match Self::granted_device().await? {
            Some(device) => device,
            None => Self::request_device().await?,
        };

        JsFuture::from(device.open())
            .await
            .map_err(|e| WasmError::DeviceOpenFailed(format!("{e:?}")))?;

        if device.configuration().is_none() {
            JsFuture::from(device.select_configuration(LEDGER_CONFIGURATION))
                .await
                .map_err(|e| WasmError::DeviceOpenFailed(format!("config: {e:?}")))?;
        }

        let (interface_number, endpoint_out, endpoint_in) = Self::find_interface(&device)?;

        JsFuture::from(device.claim_interface(interface_number))
            .await
            .map_err(|e| WasmError::InterfaceClaimFailed(format!("{e:?}")))?;

        debug!(interface_number, endpoint_out, endpoint_in, "ledger opened");
        Ok(Self {
            device,
            interface_number,
            endpoint_out,
            endpoint_in,
            connected: true,
        })
    }

    fn usb() -> WasmResult<web_sys::Usb> {
        let window = web_sys::window().ok_or(WasmError::WebUsbNotSupported)?;
        Ok(window.navigator().usb())
    }

    /// Returns a Ledger the user already granted access to.
    async fn granted_device() -> WasmResult<Option<UsbDevice>> {
        let devices = JsFuture::from(Self::usb()?.get_devices()).await?;
        let devices: js_sys::Array = devices.unchecked_into();
        Ok(devices
            .iter()
            .map(|device| device.unchecked_into::<UsbDevice>())
            .find(|device| device.vendor_id() == LEDGER_VENDOR_ID))
    }

    /// Shows the browser device picker filtered to Ledger devices.
    async fn request_device() -> WasmResult<UsbDevice> {
        let filter = web_sys::UsbDeviceFilter::new();
        filter.set_vendor_id(LEDGER_VENDOR_ID);

        let filters = [filter];

        let options = web_sys::UsbDeviceRequestOptions::new(&filters);
        let device: UsbDevice = JsFuture::from(Self::usb()?.request_device(&options))
            .await
            .map_err(|_| WasmError::DeviceNotFound)?
            .unchecked_into();
        Ok(device)
    }

    /// Finds the vendor interface and its endpoints.
    fn find_interface(device: &UsbDevice) -> WasmResult<(u8, u8, u8)> {
        let config = device
            .configuration()
            .ok_or_else(|| WasmError::DeviceOpenFailed("no configuration".to_string()))?;

        let interfaces = config.interfaces();
        for i in 0..interfaces.length() {
            let interface: UsbInterface = interfaces.get(i).unchecked_into();
            let alternates = interface.alternates();

            for j in 0..alternates.length() {
                let alt: web_sys::UsbAlternateInterface = alternates.get(j).unchecked_into();
                if alt.interface_class() != LEDGER_INTERFACE_CLASS {
                    continue;
                }

                let endpoints = alt.endpoints();
                let mut endpoint_out = None;
                let mut endpoint_in = None;
                for k in 0..endpoints.length() {
                    let ep: UsbEndpoint = endpoints.get(k).unchecked_into();
                    match ep.direction() {
                        web_sys::UsbDirection::Out => endpoint_out = Some(ep.endpoint_number()),
                        web_sys::UsbDirection::In => endpoint_in = Some(ep.endpoint_number()),
                        _ => {}
                    }
                }

                if let (Some(out), Some(inp)) = (endpoint_out, endpoint_in) {
                    return Ok((interface.interface_number(), out, inp));
                }
            }
        }

        Err(WasmError::DeviceOpenFailed(
            "Ledger APDU interface not found".to_string(),
        ))
    }

    /// Sends one packet to the device.
    async fn send_packet(&self, packet: &[u8; PACKET_SIZE]) -> WasmResult<()> {
        let mut data = packet.to_vec();
        let promise = self
            .device
            .transfer_out_with_u8_slice(self.endpoint_out, &mut data)
            .map_err(|e| WasmError::UsbError(format!("transfer_out: {e:?}")))?;

        let result = JsFuture::from(promise)
            .await
            .map_err(|e| WasmError::UsbError(format!("transfer_out: {e:?}")))?;

        let transfer: web_sys::UsbOutTransferResult = result.unchecked_into();
        if transfer.status() != web_sys::UsbTransferStatus::Ok {
            return Err(WasmError::UsbError(format!(
                "transfer status: {:?}",
                transfer.status()
            )));
        }
        Ok(())
    }

    /// Receives one packet from the device.
    async fn receive_packet(&self) -> WasmResult<Vec<u8>> {
        let promise = self
            .device
            .transfer_in(self.endpoint_in, PACKET_SIZE as u32);

        let result = JsFuture::from(promise)
            .await
            .map_err(|e| WasmError::UsbError(format!("transfer_in: {e:?}")))?;

        let transfer: web_sys::UsbInTransferResult = result.unchecked_into();
        if transfer.status() != web_sys::UsbTransferStatus::Ok {
            return Err(WasmError::UsbError(format!(
                "transfer status: {:?}",
                transfer.status()
            )));
        }

        Ok(transfer.data().map_or_else(Vec::new, |data_view| {
            (0..data_view.byte_length())
                .map(|i| data_view.get_uint8(i))
                .collect()
        }))
    }

    /// Transmits an APDU and reassembles its response.
    pub async fn transmit(&mut self, apdu: &Apdu) -> WasmResult<ApduResponse> {
        if !self.connected {
            return Err(WasmError::UsbError("transport is closed".to_string()));
        }

        for packet in framing::wrap_command(CHANNEL, &apdu.to_bytes())? {
            self.send_packet(&packet).await?;
        }

        let mut assembler = ResponseAssembler::new(CHANNEL);
        loop {
            let packet = self.receive_packet().await?;
            if let Some(response) = assembler.push(&packet)? {
                return Ok(ApduResponse::from_bytes(response)?);
            }
        }
    }

    /// Releases the interface and closes the device.
    pub async fn release(&mut self) -> WasmResult<()> {
        if self.connected {
            self.connected = false;
            JsFuture::from(self.device.release_interface(self.interface_number)).await?;
            JsFuture::from(self.device.close()).await?;
        }
        Ok(())
    }

    /// Checks if the transport is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }
}

#[async_trait(?Send)]
impl Transport for WebUsbTransport {
    async fn exchange(&mut self, apdu: &Apdu) -> Result<ApduResponse> {
        Ok(self.transmit(apdu).await?)
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(err) = self.release().await {
            warn!(%err, "ledger release failed");
            return Err(err.into());
        }
        Ok(())
    }
}

/// Opens a [`WebUsbTransport`] per device operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebUsbConnector;

#[async_trait(?Send)]
impl Connector for WebUsbConnector {
    async fn open(&self) -> Result<Box<dyn Transport>> {
        let transport = WebUsbTransport::open().await?;
        Ok(Box::new(transport))
    }
}
