use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs the global subscriber: a pretty stdout layer, plus a
/// daily-rolling newline-delimited JSON log when a directory is given.
pub fn init_tracing(log_level: &str, log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_thread_names(true);

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "voxflow.json");
            let file_layer = fmt::layer().json().with_writer(appender).with_ansi(false);
            Registry::default()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
        }
        None => {
            Registry::default()
                .with(env_filter)
                .with(stdout_layer)
                .try_init()
                .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
        }
    }
    Ok(())
}
