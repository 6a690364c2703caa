//! Logging setup.

use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the log filter: the configured level wins over `RUST_LOG`, which
/// wins over the `info` default.
pub fn filter(level: Option<&str>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber.
///
/// Logs go to stdout and, when `log_file` is set, to that file as well.
/// Keep the returned guard alive for the lifetime of the process so the
/// file writer flushes on exit.
pub fn init(level: Option<&str>, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::new(Rfc3339))
        .compact();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(UtcTime::new(Rfc3339))
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter(level))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_wins() {
        assert_eq!(filter(Some("debug")).to_string(), "debug");
    }
}
