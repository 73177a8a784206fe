//! Ledger HID packet framing.
//!
//! USB and HID transports cannot carry an APDU in one transfer. Commands are
//! split into fixed-size packets and responses are reassembled from them.
//!
//! # Packet Structure
//!
//! ```text
//! | Channel | Tag  | Sequence | Length (first packet only) | Payload |
//! |---------|------|----------|----------------------------|---------|
//! | 2B BE   | 0x05 | 2B BE    | 2B BE                      | Var     |
//! ```
//!
//! Every packet is zero-padded to [`PACKET_SIZE`].

use crate::error::{Error, Result};

/// Size of one HID packet.
pub const PACKET_SIZE: usize = 64;

/// Channel identifier used by Ledger devices.
pub const CHANNEL: u16 = 0x0101;

/// Tag marking an APDU packet.
const TAG_APDU: u8 = 0x05;

/// Header length: channel, tag and sequence.
const HEADER_LEN: usize = 5;

/// Splits a serialized APDU into padded packets.
///
/// # Errors
///
/// Returns [`Error::Apdu`] if the APDU is longer than `u16::MAX` bytes.
pub fn wrap_command(channel: u16, apdu: &[u8]) -> Result<Vec<[u8; PACKET_SIZE]>> {
    let total = u16::try_from(apdu.len())
        .map_err(|_| Error::Apdu(format!("APDU of {} bytes cannot be framed", apdu.len())))?;

    let mut payload = Vec::with_capacity(apdu.len() + 2);
    payload.extend_from_slice(&total.to_be_bytes());
    payload.extend_from_slice(apdu);

    let packets = payload
        .chunks(PACKET_SIZE - HEADER_LEN)
        .zip(0u16..)
        .map(|(chunk, sequence)| {
            let mut packet = [0u8; PACKET_SIZE];
            packet[..2].copy_from_slice(&channel.to_be_bytes());
            packet[2] = TAG_APDU;
            packet[3..5].copy_from_slice(&sequence.to_be_bytes());
            packet[HEADER_LEN..HEADER_LEN + chunk.len()].copy_from_slice(chunk);
            packet
        })
        .collect();

    Ok(packets)
}

/// Reassembles a response from packets read one at a time.
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    channel: u16,
    sequence: u16,
    expected: Option<usize>,
    buffer: Vec<u8>,
}

impl ResponseAssembler {
    /// Creates an assembler expecting packets on `channel`.
    #[must_use]
    pub const fn new(channel: u16) -> Self {
        Self {
            channel,
            sequence: 0,
            expected: None,
            buffer: Vec::new(),
        }
    }

    /// Feeds one packet.
    ///
    /// Returns the full response (data and status word) once the announced
    /// length has been received, `None` while more packets are needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a wrong channel, tag or sequence number.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>> {
        if packet.len() < HEADER_LEN {
            return Err(Error::Transport(format!(
                "packet of {} bytes is shorter than its header",
                packet.len()
            )));
        }

        let channel = u16::from_be_bytes([packet[0], packet[1]]);
        if channel != self.channel {
            return Err(Error::Transport(format!("unexpected channel {channel:#06x}")));
        }
        if packet[2] != TAG_APDU {
            return Err(Error::Transport(format!("unexpected tag {:#04x}", packet[2])));
        }
        let sequence = u16::from_be_bytes([packet[3], packet[4]]);
        if sequence != self.sequence {
            return Err(Error::Transport(format!(
                "packet sequence {sequence} out of order, expected {}",
                self.sequence
            )));
        }

        let mut payload = &packet[HEADER_LEN..];
        let expected = match self.expected {
            Some(expected) => expected,
            None => {
                if payload.len() < 2 {
                    return Err(Error::Transport(
                        "first packet is missing the response length".to_string(),
                    ));
                }
                let expected = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
                payload = &payload[2..];
                self.expected = Some(expected);
                expected
            }
        };

        let take = payload.len().min(expected - self.buffer.len());
        self.buffer.extend_from_slice(&payload[..take]);
        self.sequence = self.sequence.wrapping_add(1);

        if self.buffer.len() == expected {
            Ok(Some(core::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }
}
