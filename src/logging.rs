use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Bot tokens (`123456789:AA...`), whether bare or embedded in `/bot<token>/` URLs
static BOT_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{6,12}:[A-Za-z0-9_\-]{30,}").unwrap());

/// Bearer credentials in error text
static BEARER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Bearer\s+[A-Za-z0-9._\-]{10,}").unwrap());

/// Initialize structured logging.
///
/// Console output goes to stderr; when `log_file` is set a daily-rolling JSON
/// file is written next to it. Keep the returned guard alive for the life of
/// the process or buffered file output is lost.
pub fn init_logging(log_level: Option<&str>, log_file: Option<&Path>, format: &str) -> Result<Option<WorkerGuard>> {
    // Set up environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.unwrap_or("info")))
        .map_err(|e| anyhow::anyhow!("Failed to create log filter: {}", e))?;

    let console_layer = if format == "json" {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    };

    let registry = Registry::default().with(env_filter).with(console_layer);

    let guard = if let Some(log_path) = log_file {
        let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = log_path
            .file_name()
            .map_or_else(|| "media-ingest.log".into(), |n| n.to_string_lossy().into_owned());
        let file_appender = rolling::daily(directory, file_name);
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false)
            .with_target(true)
            .json();

        registry
            .with(file_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;
        Some(guard)
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;
        None
    };

    info!(format, "Logging system initialized");
    Ok(guard)
}

/// Replace credentials in `text` with `[REDACTED]`
#[must_use]
pub fn redact_secrets(text: &str) -> Cow<'_, str> {
    let without_tokens = BOT_TOKEN.replace_all(text, "[REDACTED]");
    if BEARER.is_match(&without_tokens) {
        Cow::Owned(BEARER.replace_all(&without_tokens, "Bearer [REDACTED]").into_owned())
    } else {
        without_tokens
    }
}

/// Performance timing utilities
pub struct OperationTimer {
    operation: String,
    start: std::time::Instant,
}

impl OperationTimer {
    #[must_use]
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: std::time::Instant::now(),
        }
    }

    /// Log the elapsed time and return it in milliseconds
    pub fn finish(self) -> u128 {
        let elapsed = self.start.elapsed();
        let duration = elapsed.as_millis();
        crate::metrics::record_operation_duration(&self.operation, elapsed.as_secs_f64());
        tracing::info!(operation = %self.operation, duration_ms = duration as u64, "Operation completed");
        duration
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let duration = self.start.elapsed().as_millis();
            tracing::debug!(operation = %self.operation, duration_ms = duration as u64, "Operation finished");
        }
    }
}
