//! Log output for the dispatcher.
//!
//! The daemon writes one JSON object per line to
//! `{dir}/campaign-dispatch.log.YYYY-MM-DD` and mirrors the same events to
//! stderr. Event fields are flattened into the top-level object, so the
//! dispatch fields (`campaign_id`, `contact`, `item_id`, `kind`, `error`)
//! can be filtered on directly. One-shot subcommands only log to stderr.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// File name prefix of the rotated log files.
const LOG_FILE_PREFIX: &str = "campaign-dispatch.log";

const FALLBACK_LEVEL: &str = "info";

/// Keeps the background log writer alive. Drop it last: dropping flushes
/// buffered lines to the current log file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the daemon subscriber used by `start`.
///
/// # Errors
///
/// Fails if `config.dir` cannot be created or a global subscriber is
/// already installed.
pub fn init_production(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(&config.dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            config.dir.display()
        )
    })?;

    let (writer, guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX),
    );

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(writer);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install a stderr-only subscriber for `revive` and `ready`. A second call
/// in the same process is a no-op.
pub fn init_cli(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter(level: &str) -> EnvFilter {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), level);
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

/// `RUST_LOG` wins over the configured level; blank values fall through.
fn filter_directive(rust_log: Option<String>, level: &str) -> String {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .or_else(|| (!level.trim().is_empty()).then(|| level.trim().to_owned()))
        .unwrap_or_else(|| FALLBACK_LEVEL.to_owned())
}
