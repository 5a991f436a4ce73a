//! Opaque pagination tokens.
//!
//! A token is URL-safe unpadded base64 over a small JSON object:
//! `{"v":1,"kind":"student","field":"name","order":"asc","key":"Kim","id":"..."}`.
//!
//! # Invariants
//! - `decode(encode(r, f, o))` yields `(r[f], r.id)` unchanged.
//! - Malformed tokens are validation errors, never panics.

use crate::model::entity::EntityKind;
use crate::model::query::SortOrder;
use crate::model::record::{FieldValue, Record, RecordId};
use crate::model::validation::ValidationError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Number, Value};

const CURSOR_FORMAT_VERSION: u64 = 1;
const MAX_TOKEN_CHARS: usize = 2048;

/// Resume point decoded from a token.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPosition {
    pub kind: EntityKind,
    pub field: String,
    pub order: SortOrder,
    /// Sort-key value of the last returned record.
    pub key: FieldValue,
    /// Tie-break id of the last returned record.
    pub id: RecordId,
}

impl CursorPosition {
    /// Rejects a cursor issued for a different entity, sort field or order.
    pub fn ensure_matches(
        &self,
        kind: EntityKind,
        field: &str,
        order: SortOrder,
    ) -> Result<(), ValidationError> {
        if self.kind == kind && self.field == field && self.order == order {
            return Ok(());
        }
        Err(ValidationError::CursorMismatch {
            expected: describe(kind, field, order),
            found: describe(self.kind, &self.field, self.order),
        })
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorPayload {
    v: u64,
    kind: EntityKind,
    field: String,
    order: SortOrder,
    key: FieldValue,
    id: RecordId,
}

/// Encodes and decodes cursor tokens.
pub struct CursorCodec;

impl CursorCodec {
    /// Builds the token resuming after `record` in a listing sorted by `field`.
    pub fn encode(record: &Record, field: &str, order: SortOrder) -> String {
        let mut payload = Map::new();
        payload.insert("v".to_string(), Value::from(CURSOR_FORMAT_VERSION));
        payload.insert("kind".to_string(), Value::from(record.kind.as_str()));
        payload.insert("field".to_string(), Value::from(field));
        payload.insert("order".to_string(), Value::from(order.as_str()));
        payload.insert("key".to_string(), key_to_json(record.field(field)));
        payload.insert("id".to_string(), Value::from(record.id.to_string()));
        URL_SAFE_NO_PAD.encode(Value::Object(payload).to_string())
    }

    pub fn decode(token: &str) -> Result<CursorPosition, ValidationError> {
        if token.len() > MAX_TOKEN_CHARS {
            return Err(ValidationError::InvalidCursor("token too long".to_string()));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| ValidationError::InvalidCursor("token is not valid base64".to_string()))?;
        let payload: CursorPayload = serde_json::from_slice(&bytes)
            .map_err(|_| ValidationError::InvalidCursor("token payload is malformed".to_string()))?;
        if payload.v != CURSOR_FORMAT_VERSION {
            return Err(ValidationError::InvalidCursor(format!(
                "unsupported cursor version {}",
                payload.v
            )));
        }

        Ok(CursorPosition {
            kind: payload.kind,
            field: payload.field,
            order: payload.order,
            key: payload.key,
            id: payload.id,
        })
    }
}

fn key_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(value) => Value::Bool(*value),
        FieldValue::Integer(value) => Value::from(*value),
        FieldValue::Real(value) => Number::from_f64(*value).map_or(Value::Null, Value::Number),
        FieldValue::Text(value) => Value::from(value.as_str()),
    }
}

fn describe(kind: EntityKind, field: &str, order: SortOrder) -> String {
    format!("{}:{field}:{}", kind.as_str(), order.as_str())
}

#[cfg(test)]
mod tests {
    use super::{CursorCodec, CursorPosition};
    use crate::model::entity::EntityKind;
    use crate::model::query::SortOrder;
    use crate::model::record::{FieldValue, Record, Version};
    use crate::model::validation::ValidationError;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn record_with(field: &str, value: FieldValue, id: Uuid) -> Record {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), value);
        Record {
            kind: EntityKind::Student,
            id,
            tenant_id: Uuid::nil(),
            fields,
            derived: BTreeMap::new(),
            version: Version::from_millis(1),
        }
    }

    proptest! {
        #[test]
        fn text_keys_round_trip(name in "\\PC{0,40}", raw_id in any::<u128>()) {
            let id = Uuid::from_u128(raw_id);
            let record = record_with("name", FieldValue::Text(name.clone()), id);
            let token = CursorCodec::encode(&record, "name", SortOrder::Asc);
            let position = CursorCodec::decode(&token).unwrap();
            prop_assert_eq!(position.key, FieldValue::Text(name));
            prop_assert_eq!(position.id, id);
        }

        #[test]
        fn integer_keys_round_trip(created_at in any::<i64>(), raw_id in any::<u128>()) {
            let id = Uuid::from_u128(raw_id);
            let record = record_with("created_at", FieldValue::Integer(created_at), id);
            let token = CursorCodec::encode(&record, "created_at", SortOrder::Desc);
            let position = CursorCodec::decode(&token).unwrap();
            prop_assert_eq!(position.key, FieldValue::Integer(created_at));
            prop_assert_eq!(position.id, id);
            prop_assert_eq!(position.order, SortOrder::Desc);
        }

        #[test]
        fn arbitrary_tokens_never_panic(token in "\\PC{0,64}") {
            let _ = CursorCodec::decode(&token);
        }
    }

    #[test]
    fn token_is_url_safe() {
        let record = record_with("name", FieldValue::from("??>>~~ Lee"), Uuid::new_v4());
        let token = CursorCodec::encode(&record, "name", SortOrder::Asc);
        assert!(token
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
    }

    #[test]
    fn structurally_invalid_tokens_are_rejected() {
        for token in ["", "not base64!", "e30", "eyJ2IjoxfQ"] {
            assert!(
                matches!(
                    CursorCodec::decode(token),
                    Err(ValidationError::InvalidCursor(_))
                ),
                "{token}"
            );
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let json = format!(
            r#"{{"v":9,"kind":"student","field":"name","order":"asc","key":"a","id":"{}"}}"#,
            Uuid::new_v4()
        );
        let err = CursorCodec::decode(&URL_SAFE_NO_PAD.encode(json)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCursor(message) if message.contains("version")));
    }

    #[test]
    fn mismatched_sort_is_reported() {
        let position = CursorPosition {
            kind: EntityKind::Student,
            field: "name".to_string(),
            order: SortOrder::Asc,
            key: FieldValue::from("Kim"),
            id: Uuid::new_v4(),
        };
        assert!(position
            .ensure_matches(EntityKind::Student, "name", SortOrder::Asc)
            .is_ok());
        assert!(matches!(
            position.ensure_matches(EntityKind::Student, "name", SortOrder::Desc),
            Err(ValidationError::CursorMismatch { .. })
        ));
        assert!(matches!(
            position.ensure_matches(EntityKind::Class, "name", SortOrder::Asc),
            Err(ValidationError::CursorMismatch { .. })
        ));
    }
}
