//! BTC100 wire protocol.
//!
//! Commands are a single ASCII letter, an optional decimal argument, and a
//! newline. The instrument answers with an echo line, an `ACK` line and, for
//! queries, a value line, all terminated by `\r\n`:
//!
//! ```text
//! host   ?K\n
//! device ?K\r\nACK\r\n00003\r\n
//! ```
//!
//! Replies carry no length field, so they are taken apart by line rather
//! than by byte offset.

use std::fmt;

/// Command letters. Upper and lower case are distinct commands.
pub mod cmds {
    /// Switch scan output to ASCII (five digits per pixel, NUL at the end)
    pub const ASCII_MODE: u8 = b'a';
    /// Switch scan output to the binary delta encoding
    pub const BINARY_MODE: u8 = b'b';
    /// Query a setting; followed by the setting key
    pub const QUERY: u8 = b'?';
    /// Trigger a scan
    pub const SCAN: u8 = b'S';
    /// Number of spectra averaged per scan
    pub const AVERAGE: u8 = b'A';
    /// Integration time in milliseconds
    pub const INTEGRATION: u8 = b'I';
    /// Reset the instrument
    pub const RESET: u8 = b'Q';
}

/// Setting keys understood by [`cmds::QUERY`].
pub mod keys {
    /// Serial baud-rate code, see [`InstrumentBaud`](super::InstrumentBaud)
    pub const BAUD: u8 = b'K';
}

pub const LINE_END: u8 = b'\n';

/// Marks the end of an ASCII scan.
pub const SCAN_TERMINATOR: u8 = 0x00;

/// Capacity of the per-exchange reply frame.
pub const REPLY_CAPACITY: usize = 64;

/// Acknowledgment line sent after the echo of every accepted command.
pub const ACK: &[u8] = b"ACK";

/// Echo and acknowledgment preceding scan data: `S\r\nACK\r\n`.
pub const SCAN_PREAMBLE_LEN: usize = 8;

/// Mode command: the mode letter and a newline.
pub fn mode_command(mode: u8) -> [u8; 2] {
    [mode, LINE_END]
}

/// Query command: `?`, the setting key and a newline.
pub fn query_command(key: u8) -> [u8; 3] {
    [cmds::QUERY, key, LINE_END]
}

/// Command with a decimal argument, e.g. `A4\n`.
pub fn value_command(cmd: u8, value: u32) -> Vec<u8> {
    let mut bytes = vec![cmd];
    bytes.extend_from_slice(value.to_string().as_bytes());
    bytes.push(LINE_END);
    bytes
}

/// Non-empty lines of a reply, with `\r` and `\n` both treated as breaks.
pub fn reply_lines(reply: &[u8]) -> impl Iterator<Item = &[u8]> {
    reply
        .split(|&b| b == b'\r' || b == b'\n')
        .filter(|line| !line.is_empty())
}

/// Whether the reply contains an `ACK` line.
pub fn is_acknowledged(reply: &[u8]) -> bool {
    reply_lines(reply).any(|line| line == ACK)
}

/// Extract the decimal value from a query reply.
///
/// The value is the leading run of digits on the first line after `ACK`.
/// Returns `None` when there is no `ACK`, no following line, no digits, or
/// the number does not fit in a `u32`.
pub fn parse_setting(reply: &[u8]) -> Option<u32> {
    let mut lines = reply_lines(reply).skip_while(|line| *line != ACK);
    lines.next()?;
    let token = lines.next()?;
    let digits = token.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&token[..digits]).ok()?.parse().ok()
}

/// Baud-rate codes reported and accepted by the instrument's `K` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentBaud {
    B115200 = 0,
    B38400 = 1,
    B19200 = 2,
    B9600 = 3,
    B4800 = 4,
    B2400 = 5,
    B1200 = 6,
    B600 = 7,
}

impl InstrumentBaud {
    const ALL: [InstrumentBaud; 8] = [
        InstrumentBaud::B115200,
        InstrumentBaud::B38400,
        InstrumentBaud::B19200,
        InstrumentBaud::B9600,
        InstrumentBaud::B4800,
        InstrumentBaud::B2400,
        InstrumentBaud::B1200,
        InstrumentBaud::B600,
    ];

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.code() == code)
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Line rate in bits per second.
    pub fn rate(self) -> u32 {
        match self {
            InstrumentBaud::B115200 => 115_200,
            InstrumentBaud::B38400 => 38_400,
            InstrumentBaud::B19200 => 19_200,
            InstrumentBaud::B9600 => 9_600,
            InstrumentBaud::B4800 => 4_800,
            InstrumentBaud::B2400 => 2_400,
            InstrumentBaud::B1200 => 1_200,
            InstrumentBaud::B600 => 600,
        }
    }
}

impl fmt::Display for InstrumentBaud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} baud", self.rate())
    }
}
