//! Glue between the broker and the underlying SQL engine: error adaptation,
//! value conversion, and the collation rewrite applied at prepare time.

use std::borrow::Cow;
use std::sync::LazyLock;

use ersatzlite_error::{codes, translate_engine_error, ErsatzError};
use ersatzlite_types::Value;
use regex::Regex;
use rusqlite::types::ValueRef;

// The engine has no LOCALIZED or UNICODE collations; the closest supported
// behavior is case-insensitive comparison.
static COLLATE_LOCALIZED_UNICODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+COLLATE\s+(LOCALIZED|UNICODE)").expect("static pattern"));

/// Rewrite `COLLATE LOCALIZED` and `COLLATE UNICODE` clauses (any case) to
/// `COLLATE NOCASE`.
pub fn rewrite_localized_collators(sql: &str) -> Cow<'_, str> {
    COLLATE_LOCALIZED_UNICODE.replace_all(sql, " COLLATE NOCASE")
}

/// Adapt an engine error into the closed taxonomy.
///
/// Engine result codes go through [`translate_engine_error`]; wrapper-layer
/// errors that never touched the engine map to the nearest broker kind.
pub(crate) fn map_engine_error(err: rusqlite::Error) -> ErsatzError {
    match err {
        rusqlite::Error::SqliteFailure(inner, message) => {
            let raw = message.unwrap_or_else(|| inner.to_string());
            translate_engine_error(inner.extended_code, &raw)
        }
        rusqlite::Error::InvalidColumnIndex(index) => translate_engine_error(
            codes::SQLITE_RANGE,
            &format!("column index out of range: {index}"),
        ),
        other => ErsatzError::internal(other.to_string()),
    }
}

/// Convert an engine column value into a value cell.
pub(crate) fn value_from_engine(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Convert a value cell into the engine's owned parameter type.
pub(crate) fn engine_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}
