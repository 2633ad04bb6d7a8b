//! Identifier and reserved-field rules.
//!
//! Sets, collections, and function ids all share one rule:
//! `^[A-Za-z0-9_]+$`. Document bodies are JSON objects whose top-level keys
//! must not start with `_`; the synthetic `_meta` is allowed on input and
//! stripped before storage.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// True when `name` is non-empty and contains only `[A-Za-z0-9_]`.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Validate a set name, and a collection name when one is given.
pub fn validate_names(set: &str, collection: Option<&str>) -> Result<()> {
    if !valid_name(set) {
        return Err(Error::InvalidName { what: "set" });
    }
    if let Some(coll) = collection {
        if !valid_name(coll) {
            return Err(Error::InvalidName { what: "collection" });
        }
    }
    Ok(())
}

/// Require a JSON object at the root, returning its map.
pub fn require_object(body: Value) -> Result<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidBody {
            reason: format!("document root must be an object, got {}", type_name(&other)),
        }),
    }
}

/// Sanitize a create body: drop `_meta` entirely, reject any other
/// top-level key starting with `_`.
pub fn sanitize_for_create(body: Value) -> Result<Map<String, Value>> {
    let mut map = require_object(body)?;
    map.shift_remove("_meta");
    reject_reserved(&map)?;
    Ok(map)
}

/// Sanitize a PUT/PATCH body addressed at `id`.
///
/// `_meta` is allowed; if it carries an `id` it must equal the route id.
/// `_meta.created_at`/`_meta.updated_at` are accepted and discarded. Any
/// other top-level key starting with `_` is rejected.
pub fn sanitize_for_put_patch(body: Value, id: &str) -> Result<Map<String, Value>> {
    let mut map = require_object(body)?;
    if let Some(meta) = map.shift_remove("_meta") {
        let meta = match meta {
            Value::Object(m) => m,
            _ => {
                return Err(Error::InvalidBody {
                    reason: "_meta must be an object".into(),
                })
            }
        };
        if let Some(raw) = meta.get("id") {
            match raw.as_str() {
                Some(s) if s == id => {}
                _ => return Err(Error::MetaIdMismatch),
            }
        }
    }
    reject_reserved(&map)?;
    Ok(map)
}

fn reject_reserved(map: &Map<String, Value>) -> Result<()> {
    if map.keys().any(|k| k.starts_with('_')) {
        return Err(Error::ReservedField);
    }
    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
