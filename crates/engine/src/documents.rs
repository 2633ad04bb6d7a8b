//! Document CRUD and query.
//!
//! The row-level functions take a plain `&Connection` so they run equally
//! against a pooled connection or inside an open transaction (the function
//! executor reuses them for its `db.*` API). The [`Documents`] service adds
//! name validation, body sanitization, schema enforcement, and index-usage
//! accounting on top.

use crate::database::{self, table_name, Store};
use crate::query::{self, Filter, QueryOpts};
use crate::{index, schema};
use docset_core::{ident, Document, Error, Meta, QueryPage, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Query parameters for [`Documents::query`].
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Parsed or raw filter; `None` matches the whole collection.
    pub filter: Option<Value>,
    /// `created_at`, `updated_at`, or a JSON path.
    pub order_by: Option<String>,
    /// Page size; `0` disables paging.
    pub limit: i64,
    /// Page start; negative means unset.
    pub offset: i64,
    /// Attach `EXPLAIN QUERY PLAN` output to the page.
    pub explain: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            filter: None,
            order_by: None,
            limit: 0,
            offset: -1,
            explain: false,
        }
    }
}

impl QueryParams {
    fn parse_filter(&self) -> Result<Filter> {
        match &self.filter {
            None => Ok(Filter::empty()),
            Some(value) => query::parse(value),
        }
    }
}

/// Document operations over a shared [`Store`].
#[derive(Clone)]
pub struct Documents {
    store: Arc<Store>,
}

impl Documents {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a document; the set table and collection metadata are created
    /// on demand.
    pub fn create(&self, set: &str, collection: &str, body: Value) -> Result<Document> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        database::ensure_collection_metadata(&conn, set, collection)?;

        let sanitized = ident::sanitize_for_create(body)?;
        schema::validate_document(&conn, set, collection, &sanitized)?;
        insert_row(&conn, set, collection, sanitized)
    }

    /// Fetch a document or fail with `DocumentNotFound`.
    pub fn get(&self, set: &str, collection: &str, id: &str) -> Result<Document> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        get_row(&conn, set, collection, id)?.ok_or_else(|| Error::DocumentNotFound {
            id: id.to_string(),
        })
    }

    /// Replace the payload wholesale, bumping `updated_at`.
    pub fn replace(&self, set: &str, collection: &str, id: &str, body: Value) -> Result<Document> {
        ident::validate_names(set, Some(collection))?;
        let sanitized = ident::sanitize_for_put_patch(body, id)?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        schema::validate_document(&conn, set, collection, &sanitized)?;
        replace_row(&conn, set, collection, id, sanitized)?.ok_or_else(|| {
            Error::DocumentNotFound {
                id: id.to_string(),
            }
        })
    }

    /// Shallow-merge `patch` into the stored payload. A patch value wins,
    /// and an explicit `null` is stored as JSON null, not a key delete.
    /// The merged document is schema-validated, not the patch.
    pub fn patch(&self, set: &str, collection: &str, id: &str, patch: Value) -> Result<Document> {
        ident::validate_names(set, Some(collection))?;
        let sanitized = ident::sanitize_for_put_patch(patch, id)?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;

        let existing = get_row(&conn, set, collection, id)?.ok_or_else(|| {
            Error::DocumentNotFound {
                id: id.to_string(),
            }
        })?;
        let mut merged = existing.data;
        for (key, value) in sanitized {
            merged.insert(key, value);
        }
        schema::validate_document(&conn, set, collection, &merged)?;
        replace_row(&conn, set, collection, id, merged)?.ok_or_else(|| Error::DocumentNotFound {
            id: id.to_string(),
        })
    }

    /// Delete a document. Idempotent: deleting an absent id succeeds.
    pub fn delete(&self, set: &str, collection: &str, id: &str) -> Result<bool> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        delete_row(&conn, set, collection, id)
    }

    /// Run a filtered, ordered, paged query. The page carries the unpaged
    /// total; matching ready indexes get their usage counters bumped in the
    /// background.
    pub fn query(&self, set: &str, collection: &str, params: &QueryParams) -> Result<QueryPage> {
        ident::validate_names(set, Some(collection))?;
        let filter = params.parse_filter()?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;

        let opts = QueryOpts {
            set,
            collection,
            filter: &filter,
            order_by: params.order_by.as_deref(),
            limit: params.limit,
            offset: params.offset,
        };
        let total = count_rows(&conn, opts)?;
        let items = query_rows(&conn, opts)?;
        let plan = if params.explain {
            Some(explain_plan(&conn, opts)?)
        } else {
            None
        };

        if !filter.paths.is_empty() {
            self.bump_usage_async(set, collection, filter.paths.clone());
        }

        Ok(QueryPage { items, total, plan })
    }

    /// Remove documents from a collection: all of them, or just the filter
    /// matches. Feature-gated; returns the number of rows deleted.
    pub fn delete_collection(
        &self,
        set: &str,
        collection: &str,
        filter: Option<Value>,
    ) -> Result<u64> {
        if !self.store.config().allow_delete_collections {
            return Err(Error::FeatureDisabled {
                feature: "collection deletion",
            });
        }
        ident::validate_names(set, Some(collection))?;
        let parsed = match filter {
            None => Filter::empty(),
            Some(value) => query::parse(&value)?,
        };
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        let (sql, params) = query::build_delete(QueryOpts::all(set, collection, &parsed));
        let deleted = conn.execute(&sql, rusqlite::params_from_iter(params))? as u64;
        debug!(target: "docset::documents", set, collection, deleted, "collection delete");
        Ok(deleted)
    }

    fn bump_usage_async(&self, set: &str, collection: &str, paths: Vec<String>) {
        let store = Arc::clone(&self.store);
        let set = set.to_string();
        let collection = collection.to_string();
        // Usage counters are an observability signal; a full queue just
        // drops the bump.
        let _ = self.store.background().submit(move || {
            if let Ok(conn) = store.conn() {
                index::bump_usage(&conn, &set, &collection, &paths);
            }
        });
    }
}

// =============================================================================
// Row-level operations (transaction-safe)
// =============================================================================

/// Insert a new row with a fresh id and `created_at = updated_at = now`.
pub fn insert_row(
    conn: &Connection,
    set: &str,
    collection: &str,
    data: Map<String, Value>,
) -> Result<Document> {
    let id = xid::new().to_string();
    let now = crate::now();
    let payload = serde_json::to_string(&data)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (id, collection, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            table_name(set)
        ),
        rusqlite::params![id, collection, payload, now, now],
    )?;
    Ok(Document {
        data,
        meta: Meta {
            id,
            created_at: now,
            updated_at: now,
        },
    })
}

/// Load one row by `(id, collection)`.
pub fn get_row(
    conn: &Connection,
    set: &str,
    collection: &str,
    id: &str,
) -> Result<Option<Document>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT data, created_at, updated_at FROM {} WHERE id = ?1 AND collection = ?2",
                table_name(set)
            ),
            rusqlite::params![id, collection],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((data, created_at, updated_at)) => Ok(Some(Document {
            data: serde_json::from_str(&data)?,
            meta: Meta {
                id: id.to_string(),
                created_at,
                updated_at,
            },
        })),
    }
}

/// Overwrite a row's payload and bump `updated_at`. `None` when no row
/// matched.
pub fn replace_row(
    conn: &Connection,
    set: &str,
    collection: &str,
    id: &str,
    data: Map<String, Value>,
) -> Result<Option<Document>> {
    let now = crate::now();
    let payload = serde_json::to_string(&data)?;
    let affected = conn.execute(
        &format!(
            "UPDATE {} SET data = ?1, updated_at = ?2 WHERE id = ?3 AND collection = ?4",
            table_name(set)
        ),
        rusqlite::params![payload, now, id, collection],
    )?;
    if affected == 0 {
        return Ok(None);
    }
    let created_at: i64 = conn.query_row(
        &format!(
            "SELECT created_at FROM {} WHERE id = ?1 AND collection = ?2",
            table_name(set)
        ),
        rusqlite::params![id, collection],
        |row| row.get(0),
    )?;
    Ok(Some(Document {
        data,
        meta: Meta {
            id: id.to_string(),
            created_at,
            updated_at: now,
        },
    }))
}

/// Delete one row; `true` when a row was removed.
pub fn delete_row(conn: &Connection, set: &str, collection: &str, id: &str) -> Result<bool> {
    let affected = conn.execute(
        &format!(
            "DELETE FROM {} WHERE id = ?1 AND collection = ?2",
            table_name(set)
        ),
        rusqlite::params![id, collection],
    )?;
    Ok(affected > 0)
}

/// Run the page SELECT for `opts`.
pub fn query_rows(conn: &Connection, opts: QueryOpts<'_>) -> Result<Vec<Document>> {
    let (sql, params) = query::build_select(opts);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let data: String = row.get(1)?;
        let created_at: i64 = row.get(2)?;
        let updated_at: i64 = row.get(3)?;
        out.push(Document {
            data: serde_json::from_str(&data)?,
            meta: Meta {
                id,
                created_at,
                updated_at,
            },
        });
    }
    Ok(out)
}

/// Run the unpaged COUNT for `opts`.
pub fn count_rows(conn: &Connection, opts: QueryOpts<'_>) -> Result<i64> {
    let (sql, params) = query::build_count(opts);
    Ok(conn.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))?)
}

/// `EXPLAIN QUERY PLAN` for the page SELECT, one step per line.
fn explain_plan(conn: &Connection, opts: QueryOpts<'_>) -> Result<String> {
    let (sql, params) = query::build_select(opts);
    let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
    let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
    let mut steps = Vec::new();
    while let Some(row) = rows.next()? {
        // detail is the last column of SQLite's plan output
        let detail: String = row.get(3)?;
        steps.push(detail);
    }
    Ok(steps.join("; "))
}
