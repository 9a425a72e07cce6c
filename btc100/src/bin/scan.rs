//! Acquire one scan from a BTC100 spectrometer.
//!
//! Opens the serial line, selects the output mode, reads the instrument's
//! baud setting, optionally applies averaging and integration time, and
//! saves the raw scan. Any error ends the run with a failure status.

use anyhow::{Context, Result};
use btc100::config::{Config, Encoding};
use btc100::exchange::CommandExchange;
use btc100::protocol::{cmds, keys, InstrumentBaud};
use btc100::scan::ScanReader;
use btc100::session::Session;
use btc100::spectrum::Spectrum;
use btc100::tracing::{self, prelude::*};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

#[derive(Debug, Parser)]
#[command(name = "btc100-scan", version, about)]
struct Args {
    /// Serial device of the instrument [default: /dev/ttyUSB0]
    device: Option<PathBuf>,

    /// Configuration file [default: ./btc100.toml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw scan output file [default: spectrum]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write decoded pixel values to this file
    #[arg(long)]
    values: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing::init_journald_or_stdout();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };
    if let Some(device) = args.device {
        config.device.path = device;
    }
    if let Some(output) = args.output {
        config.scan.output = output;
    }
    if args.values.is_some() {
        config.scan.values = args.values;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args)?;

    let mut session = Session::open(&config.device.path, &config.device.line_settings())?;
    info!(
        "Line speed: input {}, output {}.",
        session.input_speed(),
        session.output_speed()
    );

    let mut exchange = CommandExchange::new(&mut session, config.exchange.settle());
    let mode = match config.scan.encoding {
        Encoding::Ascii => cmds::ASCII_MODE,
        Encoding::Binary => cmds::BINARY_MODE,
    };
    exchange.send_mode(mode)?;

    let code = exchange.query_setting(keys::BAUD)?;
    match InstrumentBaud::from_code(code) {
        Some(baud) => info!("Instrument baud setting {} ({}).", code, baud),
        None => warn!("Instrument reports unknown baud setting {}.", code),
    }

    if let Some(count) = config.instrument.averaging {
        exchange.set_averaging(count)?;
        info!("Averaging {} spectra.", count);
    }
    if let Some(ms) = config.instrument.integration_ms {
        let applied = exchange.set_integration(ms)?;
        info!("Integration time {} ms.", applied);
    }

    let delay = exchange.settings().exposure_delay();
    if !delay.is_zero() {
        info!("Waiting {:?} for the exposure.", delay);
        thread::sleep(delay);
    }

    let mut reader = ScanReader::new(&mut session, config.scan.options());
    let (scan, decoded) = match config.scan.encoding {
        Encoding::Ascii => (reader.acquire()?, None),
        Encoding::Binary => {
            let (scan, spectrum) = reader.acquire_binary()?;
            (scan, Some(spectrum))
        }
    };
    scan.persist(&config.scan.output)
        .with_context(|| format!("saving scan to {}", config.scan.output.display()))?;

    if let Some(path) = &config.scan.values {
        let spectrum = match decoded {
            Some(spectrum) => spectrum,
            None => Spectrum::from_ascii(scan.as_bytes())?,
        };
        spectrum
            .write_values(path)
            .with_context(|| format!("saving values to {}", path.display()))?;
        info!("Wrote {} pixel values to {}.", spectrum.len(), path.display());
    }

    Ok(())
}
