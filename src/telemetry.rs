//! Logging setup: human-readable console output plus a plain-text failure
//! log that only receives WARN and above.

use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_FILTER: &str = "ordersync=info";

/// Keeps the failure log open; flushes it to disk when dropped
pub struct LogGuard {
    file: Arc<File>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
    }
}

/// Open (append) the failure log
pub fn open_log_file(path: &Path) -> anyhow::Result<Arc<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    Ok(Arc::new(file))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `default_filter` for the console. The failure log
/// ignores `RUST_LOG`.
pub fn init(default_filter: &str, log_file: &Path) -> anyhow::Result<LogGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let file = open_log_file(log_file)?;

    let console = fmt::layer().with_target(true).with_filter(env_filter);
    let failures = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file.clone())
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(console)
        .with(failures)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(LogGuard { file })
}
