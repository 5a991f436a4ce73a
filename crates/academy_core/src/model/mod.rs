//! Domain model shared by the search and update paths.
//!
//! # Responsibility
//! - Define tenant-scoped records and their typed attribute values.
//! - Describe per-entity schemas (what may be filtered, sorted, written).
//! - Define search queries, pages, patches and client-facing validation errors.
//!
//! # Invariants
//! - Every record is identified by a stable `RecordId` within one tenant.
//! - `version` is only ever advanced by the store's write path.
//! - Deletion is a soft status flip, never a physical delete.

pub mod entity;
pub mod patch;
pub mod query;
pub mod record;
pub mod validation;
