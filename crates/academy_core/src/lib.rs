//! Search-and-mutate data-access layer for academy records.
//! Students and classes are listed through cursor-paginated search and
//! changed through version-guarded updates.

pub mod cancel;
pub mod config;
pub mod db;
pub mod enrich;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use cancel::{CallContext, CancelToken, Interrupted};
pub use config::{ConfigError, CoreConfig};
pub use enrich::{Enriched, Enrichment, ResultEnricher};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, LoggingError,
};
pub use model::entity::EntityKind;
pub use model::patch::Patch;
pub use model::query::{FilterValue, Page, SearchQuery, SortOrder, SortSpec};
pub use model::record::{FieldValue, Record, RecordId, TenantId, Version};
pub use model::validation::ValidationError;
pub use repo::{RecordStore, SqliteRecordStore, StoreError, StoreResult};
pub use search::{CursorCodec, SearchCoordinator, SearchError, SearchResult};
pub use service::{
    ClassService, ConcurrencyGuard, GeneratedIdentifier, IdentifierGenerator, IdentifierSource,
    NewClass, NewStudent, ServiceError, ServiceResult, StudentService, VersionConflict,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
