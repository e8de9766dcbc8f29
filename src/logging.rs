//! Structured logging for Hesperus
//!
//! One tracing subscriber per process: a level filter, an optional console
//! layer and a daily rolling file next to the configured log path. Components
//! log through [`StructuredLogger`], which prefixes every event with a
//! `component=...` field (plus the caller for command handling).

use crate::config::LoggingConfig;
use crate::error::{HesperusError, Result};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set to any value to keep logs on the console only
pub const DISABLE_FILE_LOG_ENV: &str = "HESPERUS_DISABLE_FILE_LOG";

/// Outcome of the first `init_logging` call, shared by later calls
static INIT: OnceCell<std::result::Result<(), String>> = OnceCell::new();

// Dropping the guard stops the background writer
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Install the global subscriber described by `config`.
///
/// Only the first call does any work; later calls return its result.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT.get_or_init(|| install(config).map_err(|e| e.to_string()))
        .clone()
        .map_err(HesperusError::config)
}

fn install(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hesperus={},tokio_modbus=warn", level)));

    let file_logging = !cfg!(test) && std::env::var_os(DISABLE_FILE_LOG_ENV).is_none();
    let file = if file_logging {
        Some(file_layer(config, level)?)
    } else {
        None
    };
    // Without a file there must be somewhere to write to
    let console = (config.console_output || file.is_none())
        .then(|| output_layer(std::io::stdout, config.json_format, true, level));

    tracing_subscriber::registry()
        .with(filter)
        .with(file)
        .with(console)
        .try_init()
        .map_err(|e| HesperusError::config(format!("Logging already configured: {}", e)))?;

    if file_logging {
        tracing::info!(
            "Logging at {} to {} (console: {})",
            level,
            log_directory(&config.file).display(),
            config.console_output
        );
    } else {
        tracing::info!("Logging at {} to the console only", level);
    }
    Ok(())
}

fn output_layer<S, W>(writer: W, json: bool, ansi: bool, level: Level) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    let threshold = LevelFilter::from_level(level);
    if json {
        layer.json().with_filter(threshold).boxed()
    } else {
        layer.with_filter(threshold).boxed()
    }
}

fn file_layer<S>(config: &LoggingConfig, level: Level) -> Result<BoxedLayer<S>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let directory = log_directory(&config.file);
    let appender = rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("hesperus")
        .filename_suffix("log")
        .max_log_files(config.backup_count.max(1) as usize)
        .build(&directory)
        .map_err(|e| {
            HesperusError::io(format!(
                "Cannot log to {}: {}",
                directory.display(),
                e
            ))
        })?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    if FILE_GUARD.set(guard).is_err() {
        eprintln!("hesperus: log file writer was already installed");
    }
    Ok(output_layer(writer, config.json_format, false, level))
}

/// Directory receiving the rolling files: the parent of a path that names a
/// file, or the path itself.
fn log_directory(file: &str) -> PathBuf {
    let path = Path::new(file);
    match (path.extension(), path.parent()) {
        (Some(_), Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        (Some(_), _) => PathBuf::from("."),
        (None, _) => path.to_path_buf(),
    }
}

/// Parse a configured level name; `WARNING` is accepted for `WARN`
pub fn parse_log_level(name: &str) -> Result<Level> {
    let upper = name.trim().to_ascii_uppercase();
    let canonical = if upper == "WARNING" { "WARN" } else { upper.as_str() };
    canonical
        .parse::<Level>()
        .map_err(|_| HesperusError::config(format!("Invalid log level: {}", name)))
}

/// Fields attached to every line a logger emits
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g. "charger", "modes", "web")
    pub component: String,

    /// Caller a command originated from
    pub caller: Option<String>,

    /// Additional fields, emitted in key order
    pub extra_fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            caller: None,
            extra_fields: BTreeMap::new(),
        }
    }

    pub fn with_caller(self, caller: &str) -> Self {
        Self {
            caller: Some(caller.to_string()),
            ..self
        }
    }

    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Component-tagged front end over the `tracing` macros
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context: LogContext,
    /// `component=..,caller=..` rendered once
    prefix: String,
}

macro_rules! level_method {
    ($name:ident, $mac:ident) => {
        pub fn $name(&self, message: &str) {
            tracing::$mac!(fields = %self.prefix, "{}", message);
        }
    };
}

impl StructuredLogger {
    pub fn new(context: LogContext) -> Self {
        let prefix = std::iter::once(format!("component={}", context.component))
            .chain(context.caller.iter().map(|c| format!("caller={}", c)))
            .chain(context.extra_fields.iter().map(|(k, v)| format!("{}={}", k, v)))
            .collect::<Vec<_>>()
            .join(",");
        Self { context, prefix }
    }

    level_method!(trace, trace);
    level_method!(debug, debug);
    level_method!(info, info);
    level_method!(warn, warn);
    level_method!(error, error);

    /// Component this logger reports for
    pub fn component(&self) -> &str {
        &self.context.component
    }
}

/// Logger for a component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

/// Logger carrying a caller and extra fields
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level(" info ").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("chatty").is_err());
    }

    #[test]
    fn prefix_lists_component_caller_then_fields() {
        let logger = get_logger_with_context(
            LogContext::new("commands")
                .with_caller("alice")
                .with_field("mode", "AUTO".to_string()),
        );
        assert_eq!(logger.prefix, "component=commands,caller=alice,mode=AUTO");
    }

    #[test]
    fn log_directory_of_a_file_path_is_its_parent() {
        assert_eq!(log_directory("/var/log/hesperus.log"), PathBuf::from("/var/log"));
        assert_eq!(log_directory("hesperus.log"), PathBuf::from("."));
        assert_eq!(log_directory("/var/log/hesperus"), PathBuf::from("/var/log/hesperus"));
    }

    #[test]
    fn logging_after_init() {
        init_logging(&LoggingConfig::default()).ok();
        let logger = get_logger("charger");
        assert_eq!(logger.component(), "charger");
        logger.info("setpoint 8A");
        logger.debug("soc cached");
    }
}
