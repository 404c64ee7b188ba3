//! Logging setup.
//!
//! Logs go to stderr by default. Only warnings are shown there unless
//! `--verbose` is given, so the progress bar stays readable. With
//! `--log-file`, logs are written to that file at `info` instead. `RUST_LOG`
//! overrides either default.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// Default filter directive for the given output.
fn default_directive(to_file: bool, verbose: bool) -> &'static str {
    match (to_file, verbose) {
        (_, true) => "segfetch=debug",
        (true, false) => "segfetch=info",
        (false, false) => "segfetch=warn",
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(log_file: Option<&Path>, verbose: bool) -> Result<Option<WorkerGuard>, CliError> {
    let directive = default_directive(log_file.is_some(), verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| CliError::Config(format!("Failed to initialize logging: {}", e)))?;
        return Ok(None);
    };

    let file_name = path.file_name().ok_or_else(|| {
        CliError::Config(format!("Invalid log file path: {}", path.display()))
    })?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory).map_err(|e| {
        CliError::Config(format!(
            "Failed to create log directory {}: {}",
            directory.display(),
            e
        ))
    })?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| CliError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(Some(guard))
}
