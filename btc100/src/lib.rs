//! Host-side driver for the B&W Tek BTC100 serial spectrometer.
//!
//! The instrument speaks a small textual protocol over a serial line:
//! single-letter commands, echoed and acknowledged, and a streamed scan that
//! ends with a NUL byte. A run opens a [`session::Session`], uses a
//! [`exchange::CommandExchange`] to select the output mode and read
//! settings, and then a [`scan::ScanReader`] to collect and persist a scan.

pub mod config;
pub mod error;
pub mod exchange;
pub mod protocol;
pub mod scan;
pub mod session;
pub mod spectrum;
pub mod tracing;

#[cfg(test)]
mod mock_port;
