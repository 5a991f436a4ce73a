//! Free-text helpers for the FTS5 path and its substring fallback.
//!
//! # Invariants
//! - User text never reaches FTS5 as raw syntax; every term is quoted.
//! - Both paths split text into the same whitespace-separated terms.

use crate::db::DbError;
use crate::repo::StoreError;

/// Splits trimmed free text into search terms.
pub fn split_terms(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Builds an FTS5 expression requiring every term as a prefix match.
///
/// Returns `None` when there are no terms.
pub fn build_match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|term| escape_fts_term(term))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"*")
}

/// Short reason label for a failed full-text call, for logs.
pub fn engine_failure_reason(err: &StoreError) -> &'static str {
    match err {
        StoreError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(message)))) => {
            let message = message.to_lowercase();
            if (message.contains("fts5") && message.contains("syntax"))
                || message.contains("malformed match expression")
                || message.contains("unterminated")
            {
                "malformed_query"
            } else if message.contains("no such table") || message.contains("no such module") {
                "index_unavailable"
            } else {
                "engine_error"
            }
        }
        _ => "engine_error",
    }
}
