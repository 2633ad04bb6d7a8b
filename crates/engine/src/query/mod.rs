//! Filter parsing and SQL building.
//!
//! The `where` DSL (`{path: {op: value}}`) is parsed into [`Filter`]
//! clauses, then compiled into SELECT/COUNT/DELETE statements that share
//! one WHERE. User values always travel as bound parameters.

pub mod builder;
pub mod operators;
pub mod parser;

pub use builder::{build_count, build_delete, build_select, QueryOpts};
pub use operators::Fragment;
pub use parser::{parse, parse_str, Filter};

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Convert a JSON operand into a SQLite bind value.
///
/// Integers stay integral (so they compare with `json_extract` integers);
/// other numbers become REAL. Arrays and objects are bound as their JSON
/// text, which is how `json_extract` renders nested values.
pub(crate) fn to_sql_param(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
