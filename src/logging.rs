//! Tracing setup for the command-line front end
//!
//! Human-readable events go to stderr so `--json` output on stdout stays
//! clean. When a log file is configured, events are also written there as
//! JSON lines.

use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, else from `level`, else `info`
pub fn build_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directive = if verbose { "debug" } else { level };
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(level: &str, verbose: bool, file: Option<&Path>) {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = file.and_then(|path| {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Warning: Failed to create log directory: {e}");
                return None;
            }
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(handle) => Some(fmt::layer().json().with_writer(std::sync::Mutex::new(handle))),
            Err(e) => {
                eprintln!("Warning: Failed to open log file {}: {e}", path.display());
                None
            }
        }
    });

    let _ = tracing_subscriber::registry()
        .with(build_filter(level, verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}
