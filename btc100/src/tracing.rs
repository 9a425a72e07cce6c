//! Logging for the btc100 binaries.
//!
//! `btc100-scan` and `btc100-decode` call [`init_journald_or_stdout`] once,
//! before touching the serial line. Library code logs through
//! `use crate::tracing::prelude::*` and the usual `trace!()` .. `error!()`
//! macros. Levels follow a fixed split: `info` for each acquisition step,
//! `debug` for line settings and reply contents, `trace` for raw bytes.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Journal entries are tagged with this identifier so `journalctl -t btc100`
/// collects every run regardless of which binary produced it.
pub const SYSLOG_IDENTIFIER: &str = "btc100";

/// Install the global subscriber.
///
/// When started by systemd (`JOURNAL_STREAM` is set) events go to the
/// journal; otherwise they go to stdout, filtered by `RUST_LOG`.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => {
                let layer = layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string());
                tracing_subscriber::registry().with(layer).init();
            }
            Err(e) => {
                use_stdout();
                error!("Failed to initialize journald logging, using stdout: {}.", e);
            }
        }
    } else {
        use_stdout();
    }
}

// Default level INFO, so an operator sees open, mode, query and scan steps
// without setting RUST_LOG.
fn use_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Local time to the millisecond. Settle intervals and stalled scans show up
// as gaps between lines, so whole seconds are too coarse.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", stamp)
    }
}
