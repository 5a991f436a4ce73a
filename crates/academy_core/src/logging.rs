//! Process-wide file logging.
//!
//! Events are single `event=... module=... status=...` lines. They carry ids,
//! counts and durations; field values and free-text search terms stay out.
//!
//! # Invariants
//! - At most one backend is started per process.
//! - A second start with the same level and directory is a no-op; any other
//!   combination is refused.

use crate::config::LoggingConfig;
use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, LogSpecification, Logger, LoggerHandle,
    Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Once;

const LOG_BASENAME: &str = "academy";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ROTATED: usize = 5;
const PANIC_PAYLOAD_LIMIT: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: Once = Once::new();

#[derive(Debug)]
pub enum LoggingError {
    /// Not one of `trace|debug|info|warn|error`.
    Level(String),
    /// Empty or relative log directory.
    Dir(PathBuf),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Backend(FlexiLoggerError),
    /// Logging already runs with a different level or directory.
    AlreadyActive { level: LevelFilter, dir: PathBuf },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Level(raw) => write!(
                f,
                "unsupported log level `{raw}`; expected trace|debug|info|warn|error"
            ),
            Self::Dir(path) => write!(
                f,
                "log dir must be a non-empty absolute path, got `{}`",
                path.display()
            ),
            Self::Io { path, source } => {
                write!(f, "cannot create log dir `{}`: {source}", path.display())
            }
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::AlreadyActive { level, dir } => write!(
                f,
                "logging already active at level {level} in `{}`",
                dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            Self::Level(_) | Self::Dir(_) | Self::AlreadyActive { .. } => None,
        }
    }
}

struct ActiveLogger {
    level: LevelFilter,
    dir: PathBuf,
    _handle: LoggerHandle,
}

impl ActiveLogger {
    fn start(level: LevelFilter, dir: &Path) -> Result<Self, LoggingError> {
        std::fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let spec = LogSpecification::builder().default(level).build();
        let handle = Logger::with(spec)
            .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEEP_ROTATED),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(LoggingError::Backend)?;

        install_panic_hook();
        info!(
            "event=core_init module=core status=ok level={level} version={} log_dir={}",
            env!("CARGO_PKG_VERSION"),
            dir.display()
        );
        Ok(Self {
            level,
            dir: dir.to_path_buf(),
            _handle: handle,
        })
    }
}

/// Starts logging from the `[logging]` section.
///
/// Returns `Ok(false)` and does nothing when no directory is configured.
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<bool, LoggingError> {
    match config.dir.as_deref() {
        Some(dir) => init_logging(&config.level, dir).map(|()| true),
        None => Ok(false),
    }
}

/// Starts rolling file logs under `dir` at `level`.
pub fn init_logging(level: &str, dir: &Path) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    if dir.as_os_str().is_empty() || !dir.is_absolute() {
        return Err(LoggingError::Dir(dir.to_path_buf()));
    }

    let active = ACTIVE.get_or_try_init(|| ActiveLogger::start(level, dir))?;
    if active.level != level || active.dir != dir {
        return Err(LoggingError::AlreadyActive {
            level: active.level,
            dir: active.dir.clone(),
        });
    }
    Ok(())
}

/// Level and directory of the running backend, if any.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Case-insensitive; `warning` is accepted for `warn`. `off` is rejected.
pub(crate) fn parse_level(raw: &str) -> Result<LevelFilter, LoggingError> {
    let lowered = raw.trim().to_ascii_lowercase();
    let name = if lowered == "warning" { "warn" } else { lowered.as_str() };
    match name.parse::<LevelFilter>() {
        Ok(LevelFilter::Off) | Err(_) => Err(LoggingError::Level(raw.trim().to_string())),
        Ok(level) => Ok(level),
    }
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let chained = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info.location().map_or_else(
                || "unknown".to_string(),
                |loc| format!("{}:{}", loc.file(), loc.line()),
            );
            error!(
                "event=panic_captured module=core status=error location={location} payload={}",
                one_line(panic_payload(info.payload()), PANIC_PAYLOAD_LIMIT)
            );
            chained(info);
        }));
    });
}

fn panic_payload(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Replaces line breaks and cuts at `limit` chars, marking the cut with `...`.
fn one_line(value: &str, limit: usize) -> String {
    let mut line = value
        .chars()
        .take(limit)
        .map(|c| if matches!(c, '\n' | '\r') { ' ' } else { c })
        .collect::<String>();
    if value.chars().nth(limit).is_some() {
        line.push_str("...");
    }
    line
}
