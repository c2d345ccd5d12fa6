use super::config::{LogConfig, LogFormat, RotationPolicy};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "qc.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Process-wide tracing subscriber; keep it alive for the program's lifetime
pub struct LoggerImpl {
    _guard: Option<WorkerGuard>,
}

impl LoggerImpl {
    /// Install the global subscriber described by `config`.
    ///
    /// File output is always JSON; console output follows `config.format`.
    pub fn init(config: &LogConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = || {
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy()
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if let Some(ref log_dir) = config.log_dir {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
            let removed = prune_expired_logs(log_dir, config.retention_days)?;

            let file_appender = match config.rotation {
                RotationPolicy::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
                RotationPolicy::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
                RotationPolicy::Never => rolling::never(log_dir, LOG_FILE_PREFIX),
            };
            let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_filter(env_filter())
                    .boxed(),
            );

            if removed > 0 {
                tracing::debug!(removed, "pruned expired log files");
            }
        }

        if config.enable_stdout {
            let console_layer = match config.format {
                LogFormat::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_target(true)
                    .with_filter(env_filter())
                    .boxed(),
                LogFormat::Pretty => tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(env_filter())
                    .boxed(),
            };
            layers.push(console_layer);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .context("a global tracing subscriber is already installed")?;

        tracing::info!(
            level = %config.level,
            format = config.format.as_str(),
            file_output = config.log_dir.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

/// Delete rolled log files older than `retention_days`. Returns how many were removed.
pub fn prune_expired_logs(log_dir: &Path, retention_days: u32) -> Result<usize> {
    if retention_days == 0 || !log_dir.exists() {
        return Ok(0);
    }
    let max_age = Duration::from_secs(u64::from(retention_days) * 24 * 3600);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(log_dir).context("failed to read log directory")? {
        let entry = entry?;
        let is_log = entry
            .file_name()
            .to_string_lossy()
            .starts_with(LOG_FILE_PREFIX);
        if !is_log {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let expired = now
            .duration_since(modified)
            .is_ok_and(|age| age > max_age);
        if expired {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_prune_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qc.log.2024-01-01"), "{}").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        assert_eq!(prune_expired_logs(dir.path(), 30).unwrap(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_prune_disabled_or_missing_dir() {
        assert_eq!(prune_expired_logs(Path::new("/nonexistent/qc-logs"), 7).unwrap(), 0);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_expired_logs(dir.path(), 0).unwrap(), 0);
    }
}
