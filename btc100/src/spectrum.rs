//! Decoding raw scan dumps into pixel values.
//!
//! In ASCII mode every pixel is five decimal digits and `\r\n`, with a NUL
//! after the last one. In binary mode each byte is a signed difference from
//! the previous pixel, except `0x80`, which introduces the next pixel as an
//! absolute big-endian 16-bit value. The binary stream has no terminator;
//! it is complete after [`PIXELS`]` + 1` values, the first of which is
//! discarded.

use crate::error::{Error, Result};
use crate::protocol::{self, SCAN_PREAMBLE_LEN, SCAN_TERMINATOR};
use crate::tracing::prelude::*;
use std::fmt::Write as _;
use std::path::Path;

/// Pixels in one spectrum.
pub const PIXELS: usize = 2048;

/// Escape byte of the binary delta encoding.
const ABSOLUTE_FLAG: u8 = 0x80;

/// Decoded pixel values of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spectrum {
    values: Vec<u16>,
}

impl Spectrum {
    pub fn from_values(values: Vec<u16>) -> Self {
        Self { values }
    }

    /// Decode an ASCII-mode dump.
    ///
    /// The echo and `ACK` lines the instrument sends before the data are
    /// skipped if present, as is the trailing NUL.
    pub fn from_ascii(raw: &[u8]) -> Result<Self> {
        let end = raw
            .iter()
            .rposition(|&b| b != SCAN_TERMINATOR)
            .map_or(0, |i| i + 1);

        let mut values = Vec::with_capacity(PIXELS);
        for line in protocol::reply_lines(&raw[..end]) {
            if line.iter().all(u8::is_ascii_digit) {
                let value = std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse::<u16>().ok())
                    .ok_or_else(|| {
                        Error::Protocol(format!(
                            "pixel {} out of range: {}",
                            values.len(),
                            String::from_utf8_lossy(line)
                        ))
                    })?;
                values.push(value);
            } else if values.is_empty() && is_preamble(line) {
                continue;
            } else {
                return Err(Error::Protocol(format!(
                    "unexpected line after pixel {}: {:?}",
                    values.len(),
                    String::from_utf8_lossy(line)
                )));
            }
        }

        check_count(values.len());
        Ok(Self { values })
    }

    /// Decode a binary-mode dump, including its echo and `ACK` preamble.
    pub fn from_binary(raw: &[u8]) -> Result<Self> {
        let mut decoder = DeltaDecoder::new();
        for &byte in raw {
            if decoder.is_complete() {
                break;
            }
            decoder.push(byte);
        }
        decoder.finish()
    }

    pub fn values(&self) -> &[u16] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> Option<u16> {
        self.values.iter().copied().min()
    }

    pub fn max(&self) -> Option<u16> {
        self.values.iter().copied().max()
    }

    /// Index and value of the brightest pixel (the first one on ties).
    pub fn peak(&self) -> Option<(usize, u16)> {
        self.values
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
    }

    /// Values as text, one zero-padded five-digit value per line.
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.values.len() * 6);
        for value in &self.values {
            let _ = writeln!(text, "{:05}", value);
        }
        text
    }

    /// Write [`Spectrum::to_text`] to `path`, replacing any existing file.
    pub fn write_values(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_text())?;
        debug!("Wrote {} values to {}.", self.len(), path.as_ref().display());
        Ok(())
    }
}

fn is_preamble(line: &[u8]) -> bool {
    line == [protocol::cmds::SCAN] || line == protocol::ACK
}

fn check_count(count: usize) {
    if count != PIXELS {
        warn!("Spectrum has {} pixels, expected {}.", count, PIXELS);
    }
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    Delta,
    High,
    Low(u8),
}

/// Incremental decoder for the binary delta encoding.
#[derive(Debug)]
pub struct DeltaDecoder {
    preamble: usize,
    pending: Pending,
    current: u16,
    values: Vec<u16>,
}

impl Default for DeltaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaDecoder {
    /// Decoder that first skips the scan echo and `ACK`.
    pub fn new() -> Self {
        Self {
            preamble: SCAN_PREAMBLE_LEN,
            pending: Pending::Delta,
            current: 0,
            values: Vec::with_capacity(PIXELS + 1),
        }
    }

    pub fn push(&mut self, byte: u8) {
        if self.preamble > 0 {
            self.preamble -= 1;
            return;
        }
        match self.pending {
            Pending::Delta if byte == ABSOLUTE_FLAG => self.pending = Pending::High,
            Pending::Delta => {
                self.current = self.current.wrapping_add_signed(i16::from(byte as i8));
                self.values.push(self.current);
            }
            Pending::High => self.pending = Pending::Low(byte),
            Pending::Low(high) => {
                self.current = u16::from_be_bytes([high, byte]);
                self.values.push(self.current);
                self.pending = Pending::Delta;
            }
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.is_complete() {
                break;
            }
            self.push(byte);
        }
    }

    /// Values decoded so far, including the discarded first one.
    pub fn decoded(&self) -> usize {
        self.values.len()
    }

    pub fn is_complete(&self) -> bool {
        self.values.len() > PIXELS
    }

    pub fn finish(self) -> Result<Spectrum> {
        if !self.is_complete() {
            return Err(Error::Protocol(format!(
                "binary scan ended after {} of {} values",
                self.values.len(),
                PIXELS + 1
            )));
        }
        Ok(Spectrum {
            values: self.values[1..=PIXELS].to_vec(),
        })
    }
}
