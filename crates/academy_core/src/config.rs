//! Core configuration loaded from TOML.
//!
//! # Responsibility
//! - Hold tunables for search paging, identifier generation, storage and logging.
//! - Reject configurations that would break paging or identifier invariants.
//!
//! # Invariants
//! - `search.max_limit` never exceeds [`HARD_MAX_PAGE_SIZE`].
//! - Every section has a usable default, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Upper bound on any page size, regardless of configuration.
pub const HARD_MAX_PAGE_SIZE: u32 = 200;

const MAX_SEQUENCE_WIDTH: usize = 12;

/// Configuration load/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Root configuration.
///
/// ```toml
/// [search]
/// default_limit = 20
/// max_limit = 200
///
/// [identifiers]
/// max_attempts = 3
/// student_prefix = "S"
///
/// [logging]
/// level = "info"
/// dir = "/var/log/academy"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub search: SearchConfig,
    pub identifiers: IdentifierConfig,
    pub db: DbConfig,
    pub logging: LoggingConfig,
}

/// Paging limits for search calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Page size used when a query does not set one.
    pub default_limit: u32,
    /// Largest page size a caller may request.
    pub max_limit: u32,
    /// Longest accepted free-text input, in characters.
    pub max_free_text_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: HARD_MAX_PAGE_SIZE,
            max_free_text_chars: 100,
        }
    }
}

/// Human-facing identifier generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentifierConfig {
    /// Sequence candidates tried before switching to the fallback form.
    pub max_attempts: u32,
    /// Zero-padded digit count of sequenced identifiers.
    pub sequence_width: usize,
    pub student_prefix: String,
    pub class_prefix: String,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            sequence_width: 6,
            student_prefix: "S".to_string(),
            class_prefix: "C".to_string(),
        }
    }
}

/// SQLite connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    pub busy_timeout_ms: u64,
    /// Journal file databases in WAL mode.
    pub wal: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

/// File logging settings. Logging stays off when `dir` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

impl CoreConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let search = &self.search;
        if search.max_limit == 0 || search.max_limit > HARD_MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "search.max_limit must be within 1..={HARD_MAX_PAGE_SIZE}, got {}",
                search.max_limit
            )));
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            return Err(ConfigError::Invalid(format!(
                "search.default_limit must be within 1..={}, got {}",
                search.max_limit, search.default_limit
            )));
        }
        if search.max_free_text_chars == 0 {
            return Err(ConfigError::Invalid(
                "search.max_free_text_chars must be positive".to_string(),
            ));
        }

        let ids = &self.identifiers;
        if ids.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "identifiers.max_attempts must be at least 1".to_string(),
            ));
        }
        if ids.sequence_width == 0 || ids.sequence_width > MAX_SEQUENCE_WIDTH {
            return Err(ConfigError::Invalid(format!(
                "identifiers.sequence_width must be within 1..={MAX_SEQUENCE_WIDTH}, got {}",
                ids.sequence_width
            )));
        }
        for (key, prefix) in [
            ("student_prefix", &ids.student_prefix),
            ("class_prefix", &ids.class_prefix),
        ] {
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid(format!(
                    "identifiers.{key} must be non-empty ASCII alphanumeric, got `{prefix}`"
                )));
            }
        }

        crate::logging::parse_level(&self.logging.level)
            .map_err(|err| ConfigError::Invalid(format!("logging.level: {err}")))?;
        Ok(())
    }
}
