use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

/// Target dispatched chains log their report lines under; the JSON layer
/// filters on it.
pub const CHAIN_EVENT_TARGET: &str = "chain";

fn rolling(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .with_context(|| format!("log file `{}` has no parent directory", path.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("log file `{}` has no file name", path.display()))?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, name))
}

/// Wire up file-based logging under `root`:
///
/// - `log_file` gets the plain rolling text log for `info!`/`warn!`/`error!`.
/// - `event_file` gets newline-delimited JSON, one line per dispatched
///   chain (events with target `chain`).
/// - `log_level` is an `EnvFilter` directive (e.g. `"info"`).
pub fn init_tracing(root: PathBuf, log_file: String, event_file: String, log_level: String) -> Result<()> {
    let env_filter = EnvFilter::new(log_level);

    let txt_appender = rolling(&root.join(&log_file))?;
    let txt_layer = fmt::Layer::default()
        .with_writer(txt_appender)
        .with_ansi(false);

    let json_appender = rolling(&root.join(&event_file))?;
    let json_layer = fmt::layer()
        .json()
        .with_writer(json_appender)
        .with_target(true)
        .with_filter(EnvFilter::new(format!("{CHAIN_EVENT_TARGET}=info")));

    Registry::default()
        .with(env_filter)
        .with(txt_layer)
        .with(json_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(())
}
