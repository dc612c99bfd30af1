//! Default podinit logger

use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

pub static PODINIT_LOGGER: OnceCell<PodinitLogger> = OnceCell::new();
pub static LOG_FILE: OnceCell<Option<File>> = OnceCell::new();
const LOG_LEVEL_ENV_NAME: &str = "PODINIT_LOG_LEVEL";
const LOG_FORMAT_TEXT: &str = "text";
const LOG_FORMAT_JSON: &str = "json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// If in debug mode, default level is debug to get maximum logging
#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";

/// Outside debug builds every request is still worth a line
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize the logger, must be called before accessing the logger.
/// An explicit `log_level` wins over the `PODINIT_LOG_LEVEL` environment
/// variable.
pub fn init(
    log_file: Option<PathBuf>,
    log_format: Option<String>,
    log_level: Option<String>,
) -> Result<()> {
    let level = detect_log_level(log_level).context("failed to parse log level")?;
    let format = detect_log_format(log_format.as_deref())?;
    let file = log_file
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {path:?}"))
        })
        .transpose()?;
    if LOG_FILE.set(file).is_err() {
        bail!("logger already initialized");
    }

    let logger = PODINIT_LOGGER.get_or_init(|| PodinitLogger::new(level.to_level(), format));
    log::set_logger(logger)
        .map(|()| log::set_max_level(level))
        .map_err(|e| anyhow!("failed to install logger: {e}"))?;

    Ok(())
}

pub fn detect_log_format(log_format: Option<&str>) -> Result<LogFormat> {
    match log_format {
        None | Some(LOG_FORMAT_TEXT) => Ok(LogFormat::Text),
        Some(LOG_FORMAT_JSON) => Ok(LogFormat::Json),
        Some(unknown) => bail!("unknown log format: {}", unknown),
    }
}

fn detect_log_level(explicit: Option<String>) -> Result<LevelFilter> {
    let filter: Cow<str> = if let Some(level) = explicit {
        level.into()
    } else if let Ok(level) = std::env::var(LOG_LEVEL_ENV_NAME) {
        level.into()
    } else {
        DEFAULT_LOG_LEVEL.into()
    };
    LevelFilter::from_str(filter.as_ref()).map_err(|e| anyhow!("{e}: {filter:?}"))
}

pub struct PodinitLogger {
    /// Indicates level up to which logs are to be printed
    level: Option<log::Level>,
    format: LogFormat,
}

impl PodinitLogger {
    pub fn new(level: Option<log::Level>, format: LogFormat) -> Self {
        Self { level, format }
    }

    fn log_file(&self) -> Option<&File> {
        LOG_FILE.get().and_then(Option::as_ref)
    }
}

impl Log for PodinitLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if let Some(level) = self.level {
            metadata.level() <= level
        } else {
            false
        }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_msg = match self.format {
                LogFormat::Text => text_format(record),
                LogFormat::Json => json_format(record),
            };
            // if log file is set, write to it, else write to stderr
            if let Some(mut log_file) = self.log_file() {
                let _ = writeln!(log_file, "{}", log_msg);
            } else {
                let _ = writeln!(stderr(), "{}", log_msg);
            }
        }
    }

    fn flush(&self) {
        let _ = match self.log_file() {
            Some(mut log_file) => log_file.flush(),
            None => stderr().flush(),
        };
    }
}

fn json_format(record: &Record) -> String {
    serde_json::json!({
        "level": record.level().to_string(),
        "time": chrono::Local::now().to_rfc3339(),
        "target": record.target(),
        "message": record.args().to_string(),
    })
    .to_string()
}

fn text_format(record: &Record) -> String {
    match (record.file(), record.line()) {
        (Some(file), Some(line)) => format!(
            "[{} {}:{}] {} {}",
            record.level(),
            file,
            line,
            chrono::Local::now().to_rfc3339(),
            record.args()
        ),
        (_, _) => format!(
            "[{}] {} {}",
            record.level(),
            chrono::Local::now().to_rfc3339(),
            record.args()
        ),
    }
}
