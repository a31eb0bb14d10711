//! Console and rotating file logs
//!
//! Files go to `<log_dir>/place_clusters.YYYY-MM-DD.log`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,place_clusters=debug";

pub fn init_logging(log_dir: &str) -> Result<()> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        std::fs::create_dir_all(log_path)
            .with_context(|| format!("Failed to create log directory {}", log_dir))?;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "place_clusters.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Logging lasts as long as the process
    std::mem::forget(guard);

    // RUST_LOG wins over the default
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logging already initialized")?;

    tracing::info!("Logging initialized. Log directory: {}", log_dir);
    Ok(())
}
