//! JSON-path index lifecycle: metadata, background builds, usage counters.
//!
//! An index is identified by its deterministic name, derived from the
//! collection and the sorted, normalized path list. Creation inserts a
//! `creating` metadata row and hands the physical `CREATE INDEX` to a
//! background worker; the row converges to `ready` or `error`. Usage
//! counters are a best-effort observability signal.

use crate::database::{self, table_name, Store};
use docset_core::path::normalize_paths;
use docset_core::{ident, Error, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle states of an index metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Creating,
    Ready,
    Error,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Creating => "creating",
            IndexStatus::Ready => "ready",
            IndexStatus::Error => "error",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "creating" => IndexStatus::Creating,
            "ready" => IndexStatus::Ready,
            _ => IndexStatus::Error,
        }
    }
}

/// One `idx_metadata` row.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub paths: Vec<String>,
    pub status: IndexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub usage_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

/// Accepted-for-build response: the deterministic name plus `creating`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexTicket {
    pub name: String,
    pub status: IndexStatus,
}

/// Deterministic index name for a collection and a normalized-sorted path
/// list: `idx_<collection>_<10 hex chars of sha1>`.
pub fn index_name(collection: &str, paths: &[String]) -> String {
    let digest = sha1_smol::Sha1::from(paths.join("|").as_bytes()).digest().to_string();
    format!("idx_{}_{}", collection, &digest[..10])
}

/// Index operations over a shared [`Store`].
#[derive(Clone)]
pub struct Indexes {
    store: Arc<Store>,
}

impl Indexes {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Accept an index build: verify the paths, record the `creating` row,
    /// and schedule the physical build. Returns before the index exists;
    /// only a later `status` of `ready` means it is usable.
    pub fn create<I, S>(&self, set: &str, collection: &str, paths: I) -> Result<IndexTicket>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ident::validate_names(set, Some(collection))?;
        let paths = normalize_paths(paths);
        if paths.is_empty() {
            return Err(Error::InvalidBody {
                reason: "path or paths required".into(),
            });
        }

        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        database::ensure_collection_metadata(&conn, set, collection)?;

        for path in &paths {
            if !path_exists(&conn, set, collection, path)? {
                return Err(Error::InvalidBody {
                    reason: format!("path not found in any document: {path}"),
                });
            }
        }

        let name = index_name(collection, &paths);
        // INSERT OR IGNORE makes concurrent creates of the same index
        // converge on a single row.
        conn.execute(
            "INSERT OR IGNORE INTO idx_metadata
                 (set_name, collection_name, idx_name, paths, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'creating', ?5)",
            rusqlite::params![set, collection, name, paths.join(","), crate::now()],
        )?;

        self.spawn_build(set, collection, &name, &paths);
        Ok(IndexTicket {
            name,
            status: IndexStatus::Creating,
        })
    }

    fn spawn_build(&self, set: &str, collection: &str, name: &str, paths: &[String]) {
        let task = {
            let store = Arc::clone(&self.store);
            let set = set.to_string();
            let collection = collection.to_string();
            let name = name.to_string();
            let paths = paths.to_vec();
            move || {
                let result = store
                    .conn()
                    .and_then(|conn| create_sql_index(&conn, &set, &name, &paths));
                let (status, error) = match result {
                    Ok(()) => (IndexStatus::Ready, None),
                    Err(e) => {
                        warn!(target: "docset::index", index = %name, error = %e, "index build failed");
                        (IndexStatus::Error, Some(e.to_string()))
                    }
                };
                if let Ok(conn) = store.conn() {
                    let _ = set_status(&conn, &set, &collection, &name, status, error.as_deref());
                }
            }
        };
        if self.store.background().submit(task).is_err() {
            // Queue saturated: record the failure instead of leaving the row
            // in `creating` forever.
            if let Ok(conn) = self.store.conn() {
                let _ = set_status(
                    &conn,
                    set,
                    collection,
                    name,
                    IndexStatus::Error,
                    Some("background queue full"),
                );
            }
        }
    }

    /// All metadata rows for the collection, newest first.
    pub fn list(&self, set: &str, collection: &str) -> Result<Vec<IndexInfo>> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(
            "SELECT idx_name, paths, status, error, usage_count, last_used_at, created_at
             FROM idx_metadata
             WHERE set_name = ?1 AND collection_name = ?2
             ORDER BY created_at DESC",
        )?;
        let mut rows = stmt.query(rusqlite::params![set, collection])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(read_info(row)?);
        }
        Ok(out)
    }

    /// Look up one index by its path set (the name is recomputed).
    pub fn status<I, S>(&self, set: &str, collection: &str, paths: I) -> Result<IndexInfo>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ident::validate_names(set, Some(collection))?;
        let paths = normalize_paths(paths);
        let name = index_name(collection, &paths);
        let conn = self.store.conn()?;
        conn.query_row(
            "SELECT idx_name, paths, status, error, usage_count, last_used_at, created_at
             FROM idx_metadata
             WHERE set_name = ?1 AND collection_name = ?2 AND idx_name = ?3",
            rusqlite::params![set, collection, name],
            read_info,
        )
        .optional()?
        .ok_or(Error::IndexNotFound)
    }

    /// Drop the physical index and its metadata row. Idempotent.
    pub fn delete<I, S>(&self, set: &str, collection: &str, paths: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ident::validate_names(set, Some(collection))?;
        let paths = normalize_paths(paths);
        let name = index_name(collection, &paths);
        let conn = self.store.conn()?;
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {name}"))?;
        conn.execute(
            "DELETE FROM idx_metadata WHERE set_name = ?1 AND collection_name = ?2 AND idx_name = ?3",
            rusqlite::params![set, collection, name],
        )?;
        debug!(target: "docset::index", index = %name, "index deleted");
        Ok(name)
    }
}

/// True when at least one document in the collection has a value at `path`.
fn path_exists(conn: &Connection, set: &str, collection: &str, path: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE collection = ?1 AND json_extract(data, ?2) IS NOT NULL LIMIT 1)",
            table_name(set)
        ),
        rusqlite::params![collection, path],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn create_sql_index(conn: &Connection, set: &str, name: &str, paths: &[String]) -> Result<()> {
    let exprs: Vec<String> = paths
        .iter()
        .map(|p| format!("(json_extract(data, '{p}'))"))
        .collect();
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {name} ON {}({})",
        table_name(set),
        exprs.join(", ")
    ))?;
    Ok(())
}

fn set_status(
    conn: &Connection,
    set: &str,
    collection: &str,
    name: &str,
    status: IndexStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE idx_metadata SET status = ?1, error = ?2
         WHERE set_name = ?3 AND collection_name = ?4 AND idx_name = ?5",
        rusqlite::params![status.as_str(), error, set, collection, name],
    )?;
    Ok(())
}

/// Mark rows stuck in `creating` (an earlier process died mid-build) as
/// errored. Called once at open; returns the number of rows swept.
pub fn sweep_stale_creating(conn: &Connection) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE idx_metadata SET status = 'error', error = 'index build interrupted by restart'
         WHERE status = 'creating'",
        [],
    )?)
}

/// Credit every ready index whose full path set is contained in
/// `used_paths`. Best-effort: failures are logged and swallowed.
pub fn bump_usage(conn: &Connection, set: &str, collection: &str, used_paths: &[String]) {
    if used_paths.is_empty() {
        return;
    }
    let used: HashSet<&str> = used_paths.iter().map(String::as_str).collect();
    let result: Result<()> = (|| {
        let mut stmt = conn.prepare(
            "SELECT idx_name, paths FROM idx_metadata
             WHERE set_name = ?1 AND collection_name = ?2 AND status = 'ready'",
        )?;
        let mut rows = stmt.query(rusqlite::params![set, collection])?;
        let now = crate::now();
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let paths: String = row.get(1)?;
            if paths.split(',').all(|p| used.contains(p)) {
                conn.execute(
                    "UPDATE idx_metadata SET usage_count = usage_count + 1, last_used_at = ?1
                     WHERE set_name = ?2 AND collection_name = ?3 AND idx_name = ?4",
                    rusqlite::params![now, set, collection, name],
                )?;
            }
        }
        Ok(())
    })();
    if let Err(e) = result {
        debug!(target: "docset::index", error = %e, "usage bump skipped");
    }
}

fn read_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexInfo> {
    let paths: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(IndexInfo {
        name: row.get(0)?,
        paths: paths.split(',').map(str::to_string).collect(),
        status: IndexStatus::from_db(&status),
        error: row.get(3)?,
        usage_count: row.get(4)?,
        last_used_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}
