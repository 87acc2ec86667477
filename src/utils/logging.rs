use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use std::path::PathBuf;
use std::fs;

/// Build the filter: `RUST_LOG` first, then the crate level, then `warn` for dependencies
fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let crate_level = if verbose { "courier=debug" } else { "courier=info" };

    Ok(EnvFilter::from_default_env()
        .add_directive(crate_level.parse()?)
        .add_directive("warn".parse()?))
}

/// Initialize the logging system
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = env_filter(verbose)?;

    // Task spans report their duration when they close
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    // If a log file is specified, create a file logger as well
    if let Some(log_file) = log_file {
        // Create parent directory if necessary
        if let Some(parent) = log_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}
