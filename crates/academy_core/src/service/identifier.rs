//! Human-facing identifier generation.
//!
//! # Responsibility
//! - Hand out tenant-unique codes such as `S000042` from a store sequence.
//! - Degrade to a `timestamp + random suffix` code when the sequence path
//!   fails or keeps colliding.
//!
//! # Invariants
//! - `generate` never fails.
//! - Fallback codes are collision-resistant, not guaranteed unique; the store's
//!   unique constraint on the identifier column is the backstop.

use crate::config::IdentifierConfig;
use crate::model::entity::EntityKind;
use crate::model::record::{now_millis, TenantId};
use crate::repo::RecordStore;
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;

const FALLBACK_SUFFIX_LEN: usize = 6;

/// Why the fallback form was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The sequence or uniqueness check failed.
    StoreUnavailable,
    /// Every sequenced candidate was already taken.
    Exhausted,
}

impl FallbackReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::StoreUnavailable => "store_unavailable",
            Self::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierSource {
    Sequence,
    Fallback(FallbackReason),
}

/// Generated code and how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedIdentifier {
    pub value: String,
    pub source: IdentifierSource,
}

impl GeneratedIdentifier {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, IdentifierSource::Fallback(_))
    }
}

pub struct IdentifierGenerator<'a> {
    store: &'a dyn RecordStore,
    config: &'a IdentifierConfig,
}

impl<'a> IdentifierGenerator<'a> {
    pub fn new(store: &'a dyn RecordStore, config: &'a IdentifierConfig) -> Self {
        Self { store, config }
    }

    /// Produces an identifier for a new `kind` record in `tenant_id`.
    pub fn generate(&self, kind: EntityKind, tenant_id: TenantId) -> GeneratedIdentifier {
        let prefix = self.prefix(kind);
        for attempt in 1..=self.config.max_attempts {
            let sequence = match self.store.next_sequence(tenant_id, kind.as_str()) {
                Ok(sequence) => sequence,
                Err(err) => {
                    return self.fallback(kind, FallbackReason::StoreUnavailable, &err.to_string())
                }
            };
            let candidate = format!("{prefix}{sequence:0width$}", width = self.config.sequence_width);

            match self.store.identifier_taken(kind, tenant_id, &candidate) {
                Ok(false) => {
                    return GeneratedIdentifier {
                        value: candidate,
                        source: IdentifierSource::Sequence,
                    }
                }
                Ok(true) => {
                    debug!(
                        "event=identifier_collision module=service status=degraded kind={} attempt={attempt}",
                        kind.as_str()
                    );
                }
                Err(err) => {
                    return self.fallback(kind, FallbackReason::StoreUnavailable, &err.to_string())
                }
            }
        }

        self.fallback(kind, FallbackReason::Exhausted, "sequence candidates taken")
    }

    fn prefix(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Student => &self.config.student_prefix,
            EntityKind::Class => &self.config.class_prefix,
        }
    }

    fn fallback(&self, kind: EntityKind, reason: FallbackReason, detail: &str) -> GeneratedIdentifier {
        warn!(
            "event=identifier_fallback module=service status=degraded kind={} reason={} error={detail}",
            kind.as_str(),
            reason.as_str()
        );
        GeneratedIdentifier {
            value: fallback_identifier(self.prefix(kind), now_millis()),
            source: IdentifierSource::Fallback(reason),
        }
    }
}

/// `{prefix}-{base36 millis}-{random alphanumerics}`.
fn fallback_identifier(prefix: &str, now_ms: i64) -> String {
    let suffix = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FALLBACK_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("{prefix}-{}-{suffix}", to_base36(now_ms.unsigned_abs()))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{fallback_identifier, to_base36};

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn fallback_identifier_has_prefix_time_and_suffix() {
        let value = fallback_identifier("S", 1_700_000_000_000);
        let parts = value.split('-').collect::<Vec<_>>();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "S");
        assert_eq!(parts[1], to_base36(1_700_000_000_000));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|ch| ch.is_ascii_alphanumeric()));
    }

    #[test]
    fn fallback_identifiers_differ() {
        let first = fallback_identifier("C", 42);
        let second = fallback_identifier("C", 42);
        assert_ne!(first, second);
    }
}
