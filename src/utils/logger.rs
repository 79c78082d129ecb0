use crate::common::model::LogConfig;
use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use time::UtcOffset;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

// Hold the non-blocking writer guard to keep the background logging thread alive
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

// Logger initialization flag
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_APP_LOG_LEVEL: &str = "info,rotacrawl=debug,hyper=warn,reqwest=warn,h2=warn";

/// Logger configuration structure
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use rotacrawl::utils::logger::LoggerConfig;
///
/// let config = LoggerConfig::new()
///     .with_level("debug")
///     .with_file_path(PathBuf::from("./logs/worker.log"))
///     .with_console(true);
/// assert_eq!(config.level, "debug");
/// ```
#[derive(Debug)]
pub struct LoggerConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Optional file path for log output, rotated daily
    pub file_path: Option<PathBuf>,
    /// Whether to enable console output
    pub enable_console: bool,
    /// Whether to use JSON format for logs
    pub json_format: bool,
}

impl LoggerConfig {
    /// Create a new logger configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    /// Set the file path for log output
    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    /// Practical worker defaults: console plus `logs/rotacrawl.<name>.*.log`.
    pub fn for_app(name: &str) -> Self {
        Self {
            level: DEFAULT_APP_LOG_LEVEL.to_string(),
            file_path: Some(PathBuf::from("logs").join(format!("rotacrawl.{name}"))),
            enable_console: true,
            json_format: false,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            enable_console: true,
            json_format: false,
        }
    }
}

impl From<&LogConfig> for LoggerConfig {
    fn from(config: &LogConfig) -> Self {
        Self {
            level: config.level.clone(),
            file_path: config.file_path.as_ref().map(PathBuf::from),
            enable_console: config.console,
            json_format: config.json,
        }
    }
}

pub fn is_logging_disabled() -> bool {
    let value = env::var("DISABLE_LOGS")
        .or_else(|_| env::var("ROTACRAWL_DISABLE_LOGS"))
        .unwrap_or_default();
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Initialize logger with sensible defaults and env overrides.
/// Returns Ok(true) if enabled, Ok(false) if disabled by env.
pub fn init_app_logger(name: &str) -> Result<bool, Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        return Ok(false);
    }
    init_logger(LoggerConfig::for_app(name))?;
    Ok(true)
}

/// Initialize and configure tracing logger
pub fn init_logger(config: LoggerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        // Mark initialized to avoid repeated attempts when logging is disabled.
        let _ = LOGGER_INITIALIZED.swap(true, Ordering::SeqCst);
        return Ok(());
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    // bridge log crate
    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let default_level = config.level.to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, Rfc3339);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console {
        if config.json_format {
            layers.push(fmt::layer().json().with_timer(timer.clone()).boxed());
        } else {
            layers.push(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_timer(timer.clone())
                    .boxed(),
            );
        }
    }

    if let Some(file_path) = config.file_path {
        let directory = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&directory)?;
        let file_path_prefix = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "rotacrawl".to_string());
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_path_prefix)
            .filename_suffix("log")
            .build(&directory)?;

        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        };
        layers.push(layer);
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_file_path(PathBuf::from("./test.log"))
            .with_console(false);

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("./test.log")));
        assert!(!config.enable_console);
        assert!(!config.json_format);
    }

    #[test]
    fn test_from_log_section() {
        let section = LogConfig {
            level: "warn".to_string(),
            file_path: Some("logs/worker".to_string()),
            console: false,
            json: false,
        };
        let config = LoggerConfig::from(&section);
        assert_eq!(config.level, "warn");
        assert_eq!(config.file_path, Some(PathBuf::from("logs/worker")));
        assert!(!config.enable_console);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggerConfig::new()
            .with_level("info")
            .with_console(false)
            .with_file_path(dir.path().join("worker"));
        assert!(init_logger(config).is_ok());
        // second call must be a no-op rather than a panic
        assert!(init_logger(LoggerConfig::new()).is_ok());
        log::info!("logger initialised");
    }
}
