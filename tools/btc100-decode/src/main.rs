//! Decode a raw BTC100 scan dump.
//!
//! Reads a file written by `btc100-scan`, prints a short summary of the
//! spectrum and optionally writes the pixel values as text.

use anyhow::{Context, Result};
use btc100::spectrum::{Spectrum, PIXELS};
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "btc100-decode", version, about)]
struct Args {
    /// Raw scan dump
    input: PathBuf,

    /// The dump was taken in binary (delta encoded) mode
    #[arg(long)]
    binary: bool,

    /// Write the pixel values to this file, one per line
    #[arg(long)]
    values: Option<PathBuf>,
}

fn main() -> Result<()> {
    btc100::tracing::init_journald_or_stdout();
    let args = Args::parse();

    let raw = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let spectrum = decode(&raw, args.binary)
        .with_context(|| format!("decoding {}", args.input.display()))?;

    println!("{}", summary(&args.input, raw.len(), &spectrum));

    if let Some(path) = &args.values {
        spectrum
            .write_values(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("values: {}", path.display());
    }

    Ok(())
}

fn decode(raw: &[u8], binary: bool) -> btc100::error::Result<Spectrum> {
    if binary {
        Spectrum::from_binary(raw)
    } else {
        Spectrum::from_ascii(raw)
    }
}

fn summary(path: &Path, raw_len: usize, spectrum: &Spectrum) -> String {
    let count = format!("{} pixels", spectrum.len());
    let count = if spectrum.len() == PIXELS {
        count.green()
    } else {
        count.red()
    };

    let mut text = format!("{}: {} bytes, {}", path.display(), raw_len, count);
    if let (Some(min), Some(max), Some((at, _))) = (spectrum.min(), spectrum.max(), spectrum.peak()) {
        text.push_str(&format!(", min {}, max {} at pixel {}", min, max, at));
    }
    text
}
