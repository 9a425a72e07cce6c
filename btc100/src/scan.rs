//! Scan acquisition.
//!
//! A scan is triggered with `S` and then read back one small read at a time.
//! In ASCII mode the instrument ends the scan with a NUL byte; in binary
//! mode the end is found by decoding the stream as it arrives. Everything
//! received, including the echo and acknowledgment, goes into a bounded
//! [`ScanBuffer`] in arrival order.

use crate::error::{Error, Result};
use crate::protocol::{self, cmds, REPLY_CAPACITY, SCAN_TERMINATOR};
use crate::session::{read_once, Port};
use crate::spectrum::{DeltaDecoder, Spectrum};
use crate::tracing::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Default scan buffer capacity. An ASCII scan is a little over 14 KiB.
pub const SCAN_CAPACITY: usize = 16 * 1024;

/// What to do with a read that returns more than one byte.
///
/// The instrument normally delivers one byte per read, so larger reads are
/// counted as anomalies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultiByteReads {
    /// Log and keep the data
    #[default]
    Accept,
    /// Abort the scan with a protocol error
    Reject,
}

/// Fixed-capacity accumulator for the bytes of one scan.
#[derive(Debug)]
pub struct ScanBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ScanBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `bytes` in order.
    ///
    /// Fails without appending anything if the bytes do not all fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(Error::BufferOverflow {
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Limits and policies of the scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Scan buffer capacity in bytes
    pub capacity: usize,
    /// Give up after this many consecutive empty reads
    pub max_empty_reads: Option<u32>,
    /// Give up when the whole scan takes longer than this
    pub timeout: Option<Duration>,
    /// Keep the NUL terminator at the end of ASCII scans
    pub keep_terminator: bool,
    pub multibyte_reads: MultiByteReads,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            capacity: SCAN_CAPACITY,
            max_empty_reads: Some(30),
            timeout: Some(Duration::from_secs(120)),
            keep_terminator: true,
            multibyte_reads: MultiByteReads::Accept,
        }
    }
}

/// Raw bytes of a completed scan. Immutable once assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    data: Vec<u8>,
    reads: usize,
    anomalies: usize,
}

impl Scan {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads that returned data.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Reads that returned more than one byte.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    /// Write the bytes verbatim to `path`, creating or truncating it.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.data)?;
        info!("Saved {} bytes to {}.", self.data.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ReadStats {
    reads: usize,
    anomalies: usize,
}

/// Drives one scan over a borrowed port.
pub struct ScanReader<'p, P: Port> {
    port: &'p mut P,
    options: ScanOptions,
}

impl<'p, P: Port> ScanReader<'p, P> {
    pub fn new(port: &'p mut P, options: ScanOptions) -> Self {
        Self { port, options }
    }

    /// Acquire an ASCII-mode scan, ending at the NUL terminator.
    pub fn acquire(&mut self) -> Result<Scan> {
        self.trigger()?;

        let mut buffer = ScanBuffer::with_capacity(self.options.capacity);
        let stats = self.collect(&mut buffer, |chunk| chunk.last() == Some(&SCAN_TERMINATOR))?;

        let mut data = buffer.into_bytes();
        if !self.options.keep_terminator && data.last() == Some(&SCAN_TERMINATOR) {
            data.pop();
        }
        Ok(self.finish(data, stats))
    }

    /// Acquire a binary-mode scan, ending once the full spectrum decodes.
    ///
    /// The instrument must already be in binary mode. Returns the raw bytes
    /// together with the spectrum decoded while reading.
    pub fn acquire_binary(&mut self) -> Result<(Scan, Spectrum)> {
        self.trigger()?;

        let mut buffer = ScanBuffer::with_capacity(self.options.capacity);
        let mut decoder = DeltaDecoder::new();
        let stats = self.collect(&mut buffer, |chunk| {
            decoder.extend(chunk);
            decoder.is_complete()
        })?;

        let spectrum = decoder.finish()?;
        Ok((self.finish(buffer.into_bytes(), stats), spectrum))
    }

    /// Acquire an ASCII-mode scan and persist it to `path`.
    pub fn scan(&mut self, path: impl AsRef<Path>) -> Result<Scan> {
        let scan = self.acquire()?;
        scan.persist(path)?;
        Ok(scan)
    }

    fn trigger(&mut self) -> Result<()> {
        info!("Begin scan.");
        self.port.write_all(&protocol::mode_command(cmds::SCAN))?;
        self.port.flush()?;
        Ok(())
    }

    fn collect(
        &mut self,
        buffer: &mut ScanBuffer,
        mut done: impl FnMut(&[u8]) -> bool,
    ) -> Result<ReadStats> {
        let started = Instant::now();
        let mut frame = [0u8; REPLY_CAPACITY];
        let mut empty_reads = 0u32;
        let mut stats = ReadStats::default();

        loop {
            let n = read_once(&mut *self.port, &mut frame).map_err(Error::ScanIo)?;
            if n == 0 {
                empty_reads += 1;
                if self.options.max_empty_reads.is_some_and(|max| empty_reads > max) {
                    return Err(Error::Timeout {
                        elapsed: started.elapsed(),
                        empty_reads,
                    });
                }
            } else {
                let chunk = &frame[..n];
                if n > 1 {
                    stats.anomalies += 1;
                    if self.options.multibyte_reads == MultiByteReads::Reject {
                        return Err(Error::Protocol(format!(
                            "read returned {} bytes at offset {}",
                            n,
                            buffer.len()
                        )));
                    }
                    debug!("Read returned {} bytes at once.", n);
                }
                buffer.append(chunk)?;
                trace!("Got {}.", hex::encode(chunk));
                stats.reads += 1;
                empty_reads = 0;
                if done(chunk) {
                    break;
                }
            }

            if let Some(limit) = self.options.timeout {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    return Err(Error::Timeout {
                        elapsed,
                        empty_reads,
                    });
                }
            }
        }

        Ok(stats)
    }

    fn finish(&self, data: Vec<u8>, stats: ReadStats) -> Scan {
        if stats.anomalies > 0 {
            warn!("{} of {} reads returned more than one byte.", stats.anomalies, stats.reads);
        }
        info!("Scan gave {} bytes.", data.len());
        Scan {
            data,
            reads: stats.reads,
            anomalies: stats.anomalies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_port::{Event, MockPort};
    use crate::spectrum::PIXELS;
    use std::io;

    fn unbounded() -> ScanOptions {
        ScanOptions {
            max_empty_reads: None,
            timeout: None,
            ..ScanOptions::default()
        }
    }

    #[test]
    fn test_single_byte_reads_until_terminator() {
        let mut port = MockPort::new();
        port.push_read(&[0x41]).push_read(&[0x42]).push_read(&[0x00]);

        let scan = ScanReader::new(&mut port, unbounded()).acquire().unwrap();

        assert_eq!(scan.as_bytes(), &[0x41, 0x42, 0x00]);
        assert_eq!(scan.reads(), 3);
        assert_eq!(scan.anomalies(), 0);
        assert_eq!(port.written(), b"S\n");
        assert_eq!(
            port.events,
            vec![
                Event::Write(b"S\n".to_vec()),
                Event::Read(1),
                Event::Read(1),
                Event::Read(1),
            ]
        );
    }

    #[test]
    fn test_empty_reads_keep_order() {
        let mut port = MockPort::new();
        port.push_empty(2)
            .push_read(&[0x41])
            .push_empty(3)
            .push_read(&[0x42])
            .push_error(io::ErrorKind::TimedOut)
            .push_read(&[0x00]);

        let scan = ScanReader::new(&mut port, unbounded()).acquire().unwrap();

        assert_eq!(scan.as_bytes(), &[0x41, 0x42, 0x00]);
        assert_eq!(scan.reads(), 3);
    }

    #[test]
    fn test_nul_inside_chunk_does_not_terminate() {
        let mut port = MockPort::new();
        port.push_read(&[0x00, 0x41]).push_read(&[0x00]);

        let scan = ScanReader::new(&mut port, unbounded()).acquire().unwrap();

        assert_eq!(scan.as_bytes(), &[0x00, 0x41, 0x00]);
        assert_eq!(scan.anomalies(), 1);
    }

    #[test]
    fn test_terminator_can_be_dropped() {
        let mut port = MockPort::new();
        port.push_read(b"12\r\n\0");

        let options = ScanOptions {
            keep_terminator: false,
            ..unbounded()
        };
        let scan = ScanReader::new(&mut port, options).acquire().unwrap();

        assert_eq!(scan.as_bytes(), b"12\r\n");
    }

    #[test]
    fn test_multibyte_reads_rejected_when_strict() {
        let mut port = MockPort::new();
        port.push_read(&[0x41]).push_read(&[0x42, 0x00]);

        let options = ScanOptions {
            multibyte_reads: MultiByteReads::Reject,
            ..unbounded()
        };
        let err = ScanReader::new(&mut port, options).acquire().unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_buffer_overflow() {
        let mut port = MockPort::new();
        for byte in 1..=5u8 {
            port.push_read(&[byte]);
        }

        let options = ScanOptions {
            capacity: 4,
            ..unbounded()
        };
        let err = ScanReader::new(&mut port, options).acquire().unwrap_err();

        assert!(matches!(err, Error::BufferOverflow { capacity: 4 }));
    }

    #[test]
    fn test_buffer_append_is_all_or_nothing() {
        let mut buffer = ScanBuffer::with_capacity(4);
        buffer.append(&[1, 2, 3]).unwrap();

        assert!(matches!(
            buffer.append(&[4, 5]),
            Err(Error::BufferOverflow { capacity: 4 })
        ));
        assert_eq!(buffer.as_bytes(), &[1, 2, 3]);

        buffer.append(&[4]).unwrap();
        assert_eq!(buffer.remaining(), 0);
        assert!(buffer.append(&[5]).is_err());
        assert_eq!(buffer.len(), buffer.capacity());
    }

    #[test]
    fn test_silent_instrument_times_out() {
        let mut port = MockPort::new();
        port.push_read(&[0x41]);

        let options = ScanOptions {
            max_empty_reads: Some(5),
            ..unbounded()
        };
        let err = ScanReader::new(&mut port, options).acquire().unwrap_err();

        assert!(matches!(err, Error::Timeout { empty_reads: 6, .. }));
    }

    #[test]
    fn test_wall_clock_timeout() {
        let mut port = MockPort::new();

        let options = ScanOptions {
            timeout: Some(Duration::ZERO),
            ..unbounded()
        };
        let err = ScanReader::new(&mut port, options).acquire().unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_read_error_aborts() {
        let mut port = MockPort::new();
        port.push_read(&[0x41]).push_error(io::ErrorKind::BrokenPipe);

        let err = ScanReader::new(&mut port, unbounded()).acquire().unwrap_err();

        assert!(matches!(err, Error::ScanIo(_)));
    }

    #[test]
    fn test_persisted_file_matches_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectrum");
        std::fs::write(&path, b"stale contents that are longer").unwrap();

        let payload: Vec<u8> = (0u8..=255).filter(|&b| b != 0).chain([0]).collect();
        let mut port = MockPort::new();
        for byte in &payload {
            port.push_read(&[*byte]);
        }

        let scan = ScanReader::new(&mut port, unbounded()).scan(&path).unwrap();

        assert_eq!(scan.as_bytes(), payload.as_slice());
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[test]
    fn test_binary_scan_stops_when_decoded() {
        let mut raw = b"S\r\nACK\r\n".to_vec();
        raw.extend_from_slice(&[0x80, 0x00, 0x10]);
        raw.extend(std::iter::repeat(0x02).take(PIXELS));

        let mut port = MockPort::new();
        for chunk in raw.chunks(1) {
            port.push_read(chunk);
        }
        port.push_read(&[0xEE]);

        let (scan, spectrum) = ScanReader::new(&mut port, unbounded())
            .acquire_binary()
            .unwrap();

        assert_eq!(scan.as_bytes(), raw.as_slice());
        assert_eq!(spectrum.len(), PIXELS);
        assert_eq!(spectrum.values()[0], 0x12);
        assert_eq!(Spectrum::from_binary(scan.as_bytes()).unwrap(), spectrum);
    }
}
