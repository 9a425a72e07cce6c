//! Port session: the open serial line to the instrument.
//!
//! A [`Session`] only exists once the device has been opened and its line
//! settings committed. Everything above this module talks to the instrument
//! through the [`Port`] trait, so the exchange and scan logic can run
//! against a scripted port in tests.

use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{self, BaudRate, SetArg, SpecialCharacterIndices};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Byte stream to the instrument.
pub trait Port: Read + Write {
    /// Block until input is available or `timeout` elapses.
    ///
    /// Returns `true` if input is ready.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;
}

// The termios speed constants are symbolic (B9600 is 13 on Linux), so logical
// rates are only ever converted through this table.
const SPEED_TABLE: [(u32, BaudRate); 9] = [
    (600, BaudRate::B600),
    (1_200, BaudRate::B1200),
    (2_400, BaudRate::B2400),
    (4_800, BaudRate::B4800),
    (9_600, BaudRate::B9600),
    (19_200, BaudRate::B19200),
    (38_400, BaudRate::B38400),
    (57_600, BaudRate::B57600),
    (115_200, BaudRate::B115200),
];

/// A line speed as both logical rate and platform code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Speed {
    rate: u32,
    code: BaudRate,
}

impl Speed {
    /// Look up the platform code for a logical rate.
    pub fn from_rate(rate: u32) -> Result<Self> {
        SPEED_TABLE
            .iter()
            .find(|(r, _)| *r == rate)
            .map(|&(rate, code)| Speed { rate, code })
            .ok_or(Error::UnsupportedBaud(rate))
    }

    /// Look up the logical rate for a platform code.
    pub fn from_code(code: BaudRate) -> Option<Self> {
        SPEED_TABLE
            .iter()
            .find(|(_, c)| *c == code)
            .map(|&(rate, code)| Speed { rate, code })
    }

    /// Bits per second.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn code(&self) -> BaudRate {
        self.code
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} baud", self.rate)
    }
}

/// Line settings applied when a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettings {
    /// Logical baud rate, must appear in the speed table
    pub baud_rate: u32,
    /// Put the line in raw mode with a read timeout instead of only
    /// changing the speed
    pub raw: bool,
    /// How long a read waits for the first byte in raw mode
    pub read_timeout: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9_600,
            raw: true,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl LineSettings {
    // VTIME counts deciseconds in a single byte. Zero would turn every read
    // into a non-blocking poll.
    fn vtime(&self) -> u8 {
        let deciseconds = self.read_timeout.as_millis().div_ceil(100);
        deciseconds.clamp(1, u8::MAX as u128) as u8
    }
}

/// Open serial connection to the instrument.
#[derive(Debug)]
pub struct Session {
    port: File,
    path: PathBuf,
    input_speed: Speed,
    output_speed: Speed,
}

impl Session {
    /// Open `path` and commit `line` to it.
    pub fn open(path: impl AsRef<Path>, line: &LineSettings) -> Result<Self> {
        let path = path.as_ref();
        let speed = Speed::from_rate(line.baud_rate)?;

        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(path)
            .map_err(|source| Error::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Opened {}.", path.display());

        let mut tty = termios::tcgetattr(&port).map_err(Error::ConfigQuery)?;
        debug!(
            "Current line speed: input {}, output {}.",
            describe(termios::cfgetispeed(&tty)),
            describe(termios::cfgetospeed(&tty)),
        );

        if line.raw {
            termios::cfmakeraw(&mut tty);
            tty.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
            tty.control_chars[SpecialCharacterIndices::VTIME as usize] = line.vtime();
        }
        termios::cfsetispeed(&mut tty, speed.code()).map_err(Error::ConfigApply)?;
        termios::cfsetospeed(&mut tty, speed.code()).map_err(Error::ConfigApply)?;

        // Applied immediately; pending input and output are left alone.
        termios::tcsetattr(&port, SetArg::TCSANOW, &tty).map_err(Error::ConfigApply)?;

        // tcsetattr reports success if any part of the change took effect.
        let applied = termios::tcgetattr(&port).map_err(Error::ConfigQuery)?;
        let input_speed = applied_speed("input", speed, termios::cfgetispeed(&applied))?;
        let output_speed = applied_speed("output", speed, termios::cfgetospeed(&applied))?;
        info!("Configured {} for {}.", path.display(), speed);

        Ok(Self {
            port,
            path: path.to_path_buf(),
            input_speed,
            output_speed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Input speed last committed to the device.
    pub fn input_speed(&self) -> Speed {
        self.input_speed
    }

    /// Output speed last committed to the device.
    pub fn output_speed(&self) -> Speed {
        self.output_speed
    }
}

/// One read call, with interrupted reads retried and read timeouts reported
/// as zero bytes.
pub(crate) fn read_once<P: Read + ?Sized>(port: &mut P, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match port.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Ok(0)
            }
            other => return other,
        }
    }
}

fn applied_speed(direction: &str, requested: Speed, code: BaudRate) -> Result<Speed> {
    match Speed::from_code(code) {
        Some(speed) if speed == requested => Ok(speed),
        _ => {
            warn!(
                "Requested {} speed {}, device reports {}.",
                direction,
                requested,
                describe(code)
            );
            Err(Error::ConfigApply(nix::Error::EINVAL))
        }
    }
}

fn describe(code: BaudRate) -> String {
    Speed::from_code(code)
        .map(|speed| speed.to_string())
        .unwrap_or_else(|| format!("{:?}", code))
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Port for Session {
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut fds = [PollFd::new(self.port.as_fd(), PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
        let ready = poll(&mut fds, timeout)?;
        Ok(ready > 0)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Closing {}.", self.path.display());
    }
}
