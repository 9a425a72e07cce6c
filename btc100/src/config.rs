//! Configuration management for btc100.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! environment variables. The scan binary applies its command-line flags
//! last. Every section may be omitted from the file.
//!
//! ```toml
//! [device]
//! path = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [exchange]
//! settle = "until-readable"
//! settle_ms = 2000
//!
//! [scan]
//! output = "spectrum"
//! timeout_secs = 60
//! ```

use crate::error::{Error, Result};
use crate::exchange::Settle;
use crate::scan::{MultiByteReads, ScanOptions, SCAN_CAPACITY};
use crate::session::{LineSettings, Speed};
use crate::tracing::prelude::*;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// File read by [`Config::load`] when present in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "btc100.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Serial line
    pub device: DeviceConfig,

    /// Command/reply timing
    pub exchange: ExchangeConfig,

    /// Scan loop and output files
    pub scan: ScanConfig,

    /// Acquisition settings sent before scanning
    pub instrument: InstrumentConfig,
}

/// Serial line configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Device node of the instrument
    pub path: PathBuf,

    /// Line rate in bits per second
    pub baud_rate: u32,

    /// Raw line discipline with a read timeout
    pub raw: bool,

    /// Read timeout in raw mode, rounded up to tenths of a second
    pub read_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 9_600,
            raw: true,
            read_timeout_ms: 1_000,
        }
    }
}

impl DeviceConfig {
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            raw: self.raw,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettleMode {
    #[default]
    Fixed,
    UntilReadable,
}

/// Command/reply timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeConfig {
    pub settle: SettleMode,

    /// Settle interval, or the longest wait for `until-readable`
    pub settle_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            settle: SettleMode::Fixed,
            settle_ms: 2_000,
        }
    }
}

impl ExchangeConfig {
    pub fn settle(&self) -> Settle {
        let interval = Duration::from_millis(self.settle_ms);
        match self.settle {
            SettleMode::Fixed => Settle::Fixed(interval),
            SettleMode::UntilReadable => Settle::UntilReadable(interval),
        }
    }
}

/// Scan output encoding selected on the instrument before scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    #[default]
    Ascii,
    Binary,
}

/// Scan loop and output files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Raw dump of the received bytes
    pub output: PathBuf,

    /// Decoded pixel values, one per line
    pub values: Option<PathBuf>,

    pub encoding: Encoding,

    /// Scan buffer capacity in bytes
    pub capacity: usize,

    /// Consecutive empty reads before giving up; 0 for no limit
    pub max_empty_reads: u32,

    /// Overall scan time limit in seconds; 0 for no limit
    pub timeout_secs: u64,

    /// Keep the NUL terminator in the raw dump
    pub keep_terminator: bool,

    pub multibyte_reads: MultiByteReads,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let options = ScanOptions::default();
        Self {
            output: PathBuf::from("spectrum"),
            values: None,
            encoding: Encoding::Ascii,
            capacity: options.capacity,
            max_empty_reads: options.max_empty_reads.unwrap_or(0),
            timeout_secs: options.timeout.map_or(0, |t| t.as_secs()),
            keep_terminator: options.keep_terminator,
            multibyte_reads: options.multibyte_reads,
        }
    }
}

impl ScanConfig {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            capacity: self.capacity,
            max_empty_reads: (self.max_empty_reads > 0).then_some(self.max_empty_reads),
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            keep_terminator: self.keep_terminator,
            multibyte_reads: self.multibyte_reads,
        }
    }
}

/// Acquisition settings. Unset values are left as the instrument has them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstrumentConfig {
    /// Spectra averaged per scan
    pub averaging: Option<u32>,

    /// Integration time in milliseconds (50 to 65000)
    pub integration_ms: Option<u32>,
}

impl Config {
    /// Load defaults, then [`DEFAULT_CONFIG_FILE`] if it exists, then the
    /// environment.
    pub fn load() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        let mut config = if path.exists() {
            Self::read_file(path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load a specific file, which must exist, then the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::read_file(path.as_ref())?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}.", path.display());
        Ok(config)
    }

    /// Override settings from `BTC100_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_parse::<PathBuf>("BTC100_DEVICE")? {
            self.device.path = path;
        }
        if let Some(baud_rate) = env_parse("BTC100_BAUD")? {
            self.device.baud_rate = baud_rate;
        }
        if let Some(settle_ms) = env_parse("BTC100_SETTLE_MS")? {
            self.exchange.settle_ms = settle_ms;
        }
        if let Some(output) = env_parse::<PathBuf>("BTC100_OUTPUT")? {
            self.scan.output = output;
        }
        if let Some(timeout_secs) = env_parse("BTC100_SCAN_TIMEOUT_SECS")? {
            self.scan.timeout_secs = timeout_secs;
        }
        Ok(())
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        Speed::from_rate(self.device.baud_rate)?;
        if self.scan.capacity == 0 {
            return Err(Error::Config("scan.capacity must be greater than 0".into()));
        }
        if self.instrument.averaging == Some(0) {
            return Err(Error::Config("instrument.averaging must be at least 1".into()));
        }
        if self.scan.max_empty_reads == 0 && self.scan.timeout_secs == 0 {
            warn!("Scan has no read or time limit; a silent instrument will hang it.");
        }
        Ok(())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e))),
        Err(_) => Ok(None),
    }
}
