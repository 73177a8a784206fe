//! Status words returned by the Flow app.
//!
//! Every response ends with a two-byte status word. `0x9000` means success;
//! anything else is turned into [`Error::Device`](crate::Error::Device) with
//! the description from [`message`].

/// Command completed successfully.
pub const NO_ERROR: u16 = 0x9000;

/// The requested buffer (slot) is empty.
pub const EMPTY_BUFFER: u16 = 0x6982;

/// The device is locked.
pub const DEVICE_LOCKED: u16 = 0x5515;

/// The user rejected the operation on the device.
pub const TRANSACTION_REJECTED: u16 = 0x6986;

/// The Flow app is not open.
pub const APP_NOT_OPEN: u16 = 0x6e00;

/// Returns the human-readable description of a status word.
#[must_use]
pub const fn message(code: u16) -> &'static str {
    match code {
        0x0001 => "U2F: Unknown",
        0x0002 => "U2F: Bad request",
        0x0003 => "U2F: Configuration unsupported",
        0x0004 => "U2F: Device Ineligible",
        0x0005 => "U2F: Timeout",
        0x000e => "Timeout",
        NO_ERROR => "No errors",
        0x9001 => "Device is busy",
        0x6802 => "Error deriving keys",
        0x6400 => "Execution Error",
        0x6700 => "Wrong Length",
        EMPTY_BUFFER => "Empty Buffer",
        0x6983 => "Output buffer too small",
        0x6984 => "Data is invalid",
        0x6985 => "Conditions not satisfied",
        TRANSACTION_REJECTED => "Transaction rejected",
        0x6a80 => "Bad key handle",
        0x6b00 => "Invalid P1/P2",
        0x6d00 => "Instruction not supported",
        APP_NOT_OPEN => "App does not seem to be open",
        0x6f00 => "Unknown error",
        0x6f01 => "Sign/verify error",
        DEVICE_LOCKED => "Device is locked",
        _ => "Unknown Status Code",
    }
}
