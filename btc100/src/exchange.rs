//! Command exchange: one command, one settle interval, one bounded reply.
//!
//! The instrument has no response-ready signal, so after each command the
//! host waits before reading. The wait is either a fixed interval (the
//! instrument's documented two seconds) followed by one read, or a poll for
//! readable data followed by reads until the line goes quiet.

use crate::error::{Error, Result};
use crate::protocol::{self, cmds, REPLY_CAPACITY};
use crate::session::{read_once, Port};
use crate::tracing::prelude::*;
use std::fmt;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

/// Silence that ends a reply gathered in [`Settle::UntilReadable`] mode.
///
/// The echo and the acknowledgment can arrive as separate bursts a few
/// milliseconds apart.
pub const REPLY_QUIET_GAP: Duration = Duration::from_millis(100);

/// Shortest integration time the instrument accepts, in milliseconds.
pub const INTEGRATION_MS_MIN: u32 = 50;
/// Longest integration time the instrument accepts, in milliseconds.
pub const INTEGRATION_MS_MAX: u32 = 65_000;

/// How to wait between sending a command and reading its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Sleep for the whole interval
    Fixed(Duration),
    /// Start reading as soon as reply data is readable and keep reading
    /// until the line is quiet for [`REPLY_QUIET_GAP`], all within the limit
    UntilReadable(Duration),
}

impl Default for Settle {
    fn default() -> Self {
        Settle::Fixed(Duration::from_secs(2))
    }
}

/// Raw bytes of one reply, at most [`REPLY_CAPACITY`] long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply(Vec<u8>);

impl Reply {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_acknowledged(&self) -> bool {
        protocol::is_acknowledged(&self.0)
    }

    /// Decimal value following the acknowledgment, if any.
    pub fn setting(&self) -> Option<u32> {
        protocol::parse_setting(&self.0)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Acquisition settings applied through an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentSettings {
    /// Spectra averaged per scan
    pub averaging: u32,
    /// Integration time per spectrum in milliseconds
    pub integration_ms: u32,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            averaging: 1,
            integration_ms: INTEGRATION_MS_MIN,
        }
    }
}

impl InstrumentSettings {
    /// Time the instrument needs before scan data starts flowing.
    ///
    /// Long exposures delay the first byte past any sensible read timeout,
    /// so callers wait this long before triggering the scan. Delays of a
    /// second or less are covered by the read timeout and come back as zero.
    pub fn exposure_delay(&self) -> Duration {
        let secs = 3.0 * f64::from(self.averaging) * f64::from(self.integration_ms) / 500.0;
        if secs > 1.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Request/response exchange over a borrowed port.
pub struct CommandExchange<'p, P: Port> {
    port: &'p mut P,
    settle: Settle,
    settings: InstrumentSettings,
}

impl<'p, P: Port> CommandExchange<'p, P> {
    pub fn new(port: &'p mut P, settle: Settle) -> Self {
        Self {
            port,
            settle,
            settings: InstrumentSettings::default(),
        }
    }

    /// Send a mode letter and return whatever the instrument answered.
    ///
    /// Short and empty replies are accepted.
    pub fn send_mode(&mut self, mode: u8) -> Result<Reply> {
        let reply = self.transact(&protocol::mode_command(mode))?;
        self.check_ack(mode, &reply);
        Ok(reply)
    }

    /// Query a numeric setting by key.
    pub fn query_setting(&mut self, key: u8) -> Result<u32> {
        let command = protocol::query_command(key);
        let reply = self.transact(&command)?;
        reply.setting().ok_or_else(|| Error::MalformedReply {
            command: command_name(&command),
            reply: reply.to_string(),
        })
    }

    /// Set the number of spectra averaged per scan.
    pub fn set_averaging(&mut self, count: u32) -> Result<Reply> {
        if count == 0 {
            return Err(Error::Config("averaging count must be at least 1".into()));
        }
        let reply = self.transact(&protocol::value_command(cmds::AVERAGE, count))?;
        self.check_ack(cmds::AVERAGE, &reply);
        self.settings.averaging = count;
        Ok(reply)
    }

    /// Set the integration time, clamped to what the instrument accepts.
    ///
    /// Returns the value actually sent.
    pub fn set_integration(&mut self, ms: u32) -> Result<u32> {
        let ms = ms.clamp(INTEGRATION_MS_MIN, INTEGRATION_MS_MAX);
        let reply = self.transact(&protocol::value_command(cmds::INTEGRATION, ms))?;
        self.check_ack(cmds::INTEGRATION, &reply);
        self.settings.integration_ms = ms;
        Ok(ms)
    }

    /// Reset the instrument to its power-on settings.
    pub fn reset(&mut self) -> Result<Reply> {
        let reply = self.transact(&protocol::mode_command(cmds::RESET))?;
        self.settings = InstrumentSettings::default();
        Ok(reply)
    }

    pub fn settings(&self) -> InstrumentSettings {
        self.settings
    }

    fn transact(&mut self, command: &[u8]) -> Result<Reply> {
        self.port.write_all(command)?;
        self.port.flush()?;
        trace!("Sent {}.", hex::encode(command));

        let mut frame = [0u8; REPLY_CAPACITY];
        let n = match self.settle {
            Settle::Fixed(interval) => {
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
                read_once(&mut *self.port, &mut frame)?
            }
            Settle::UntilReadable(limit) => self.gather(limit, &mut frame)?,
        };

        let reply = Reply(frame[..n].to_vec());
        debug!("Reply to {:?}: {} bytes [{}]", command_name(command), n, reply);
        Ok(reply)
    }

    // Fill `frame` from the bursts of one reply. Stops when the frame is full,
    // a read comes back empty, the line stays quiet for REPLY_QUIET_GAP, or
    // the limit runs out.
    fn gather(&mut self, limit: Duration, frame: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + limit;
        if !self.port.wait_readable(limit)? {
            debug!("Nothing to read after {:?}.", limit);
        }

        let mut filled = 0;
        loop {
            let n = read_once(&mut *self.port, &mut frame[filled..])?;
            filled += n;
            if n == 0 || filled == frame.len() {
                break;
            }

            let gap = REPLY_QUIET_GAP.min(deadline.saturating_duration_since(Instant::now()));
            if gap.is_zero() || !self.port.wait_readable(gap)? {
                break;
            }
        }
        Ok(filled)
    }

    fn check_ack(&self, letter: u8, reply: &Reply) {
        if !reply.is_acknowledged() {
            warn!(
                "No ACK for '{}' ({} bytes: [{}]).",
                char::from(letter),
                reply.len(),
                reply
            );
        }
    }
}

fn command_name(command: &[u8]) -> String {
    let body = command.strip_suffix(&[protocol::LINE_END]).unwrap_or(command);
    String::from_utf8_lossy(body).into_owned()
}
