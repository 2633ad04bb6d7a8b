//! Per-collection JSON Schema persistence and enforcement.
//!
//! A schema is optional. Writing empty bytes or the literal `null` removes
//! it. Validation runs on create, replace, and patch; a patch is validated
//! as the merged document.

use crate::database::{self, Store};
use docset_core::{ident, Error, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Schema operations over a shared [`Store`].
#[derive(Clone)]
pub struct Schemas {
    store: Arc<Store>,
}

impl Schemas {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Set or clear the collection's schema. Empty bytes or `null` clear;
    /// anything else must parse as JSON. Returns the stored schema, or
    /// `None` after a clear.
    pub fn set(&self, set: &str, collection: &str, bytes: &[u8]) -> Result<Option<Value>> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        database::ensure_collection_metadata(&conn, set, collection)?;

        let text = std::str::from_utf8(bytes).unwrap_or("").trim();
        if text.is_empty() || text == "null" {
            delete_schema(&conn, set, collection)?;
            return Ok(None);
        }
        let parsed: Value = serde_json::from_str(text).map_err(|e| Error::InvalidSchema {
            reason: e.to_string(),
        })?;
        conn.execute(
            "INSERT INTO schemas (set_name, collection_name, schema, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(set_name, collection_name)
             DO UPDATE SET schema = excluded.schema, updated_at = excluded.updated_at",
            rusqlite::params![set, collection, text, crate::now()],
        )?;
        Ok(Some(parsed))
    }

    /// The stored schema, parsed, or `None` when the collection has none.
    pub fn get(&self, set: &str, collection: &str) -> Result<Option<Value>> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        match get_schema_text(&conn, set, collection)? {
            None => Ok(None),
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        }
    }

    /// Clear the collection's schema. Idempotent.
    pub fn delete(&self, set: &str, collection: &str) -> Result<()> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        delete_schema(&conn, set, collection)
    }
}

/// Raw schema text for a collection; `None` covers absent, empty, and the
/// stored literal `null`.
pub fn get_schema_text(conn: &Connection, set: &str, collection: &str) -> Result<Option<String>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT schema FROM schemas WHERE set_name = ?1 AND collection_name = ?2",
            rusqlite::params![set, collection],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.filter(|s| !s.is_empty() && s != "null"))
}

fn delete_schema(conn: &Connection, set: &str, collection: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM schemas WHERE set_name = ?1 AND collection_name = ?2",
        rusqlite::params![set, collection],
    )?;
    Ok(())
}

/// Validate `doc` against the collection's schema, if one is bound.
///
/// Violations are aggregated into one human-readable reason.
pub fn validate_document(
    conn: &Connection,
    set: &str,
    collection: &str,
    doc: &Map<String, Value>,
) -> Result<()> {
    let Some(text) = get_schema_text(conn, set, collection)? else {
        return Ok(());
    };
    let schema: Value = serde_json::from_str(&text).map_err(|e| Error::InvalidSchema {
        reason: e.to_string(),
    })?;
    let validator = jsonschema::options()
        .should_validate_formats(true)
        .build(&schema)
        .map_err(|e| Error::InvalidSchema {
            reason: e.to_string(),
        })?;

    let instance = Value::Object(doc.clone());
    let reasons: Vec<String> = validator
        .iter_errors(&instance)
        .map(|err| {
            let location = err.instance_path.to_string();
            if location.is_empty() {
                err.to_string()
            } else {
                format!("{location}: {err}")
            }
        })
        .collect();
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(Error::SchemaViolation {
            reason: reasons.join("; "),
        })
    }
}
