//! Set and collection administration: listings, stats, destructive drops.

use crate::database::{self, table_name, Store};
use crate::index::{IndexInfo, Indexes};
use crate::schema;
use docset_core::{ident, Error, Result};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Per-set rollup for the sets listing.
#[derive(Debug, Clone, Serialize)]
pub struct SetOverview {
    /// Registered collections in the set.
    pub colls: i64,
    /// Documents across all its collections.
    pub docs: i64,
}

/// The `/_sets` payload: every set plus the aggregate document count.
#[derive(Debug, Clone, Serialize)]
pub struct SetsSummary {
    pub sets: BTreeMap<String, SetOverview>,
    pub total_docs: i64,
}

/// Per-collection stats inside one set.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStat {
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// The `_info` payload: schema, indexes, and stats for one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub schema: Option<Value>,
    pub indexes: Vec<IndexInfo>,
    pub stats: CollectionStat,
}

/// Admin operations over a shared [`Store`].
#[derive(Clone)]
pub struct Sets {
    store: Arc<Store>,
}

impl Sets {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Roll up every known set: collection count, document count, and the
    /// aggregate total.
    pub fn list(&self) -> Result<SetsSummary> {
        let conn = self.store.conn()?;
        let mut stmt = conn.prepare(
            "SELECT set_name, COUNT(*) FROM metadata GROUP BY set_name ORDER BY set_name",
        )?;
        let mut rows = stmt.query([])?;
        let mut sets = BTreeMap::new();
        let mut total_docs = 0;
        while let Some(row) = rows.next()? {
            let set: String = row.get(0)?;
            let colls: i64 = row.get(1)?;
            let docs = count_set_docs(&conn, &set)?;
            total_docs += docs;
            sets.insert(set, SetOverview { colls, docs });
        }
        Ok(SetsSummary { sets, total_docs })
    }

    /// Per-collection `{count, created_at}` for one set.
    pub fn stats(&self, set: &str) -> Result<BTreeMap<String, CollectionStat>> {
        ident::validate_names(set, None)?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT collection, COUNT(*), MIN(created_at) FROM {} GROUP BY collection",
            table_name(set)
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let collection: String = row.get(0)?;
            out.insert(
                collection,
                CollectionStat {
                    count: row.get(1)?,
                    created_at: row.get(2)?,
                },
            );
        }
        Ok(out)
    }

    /// Schema + indexes + stats for one collection.
    pub fn collection_info(&self, set: &str, collection: &str) -> Result<CollectionInfo> {
        ident::validate_names(set, Some(collection))?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;

        let schema = match schema::get_schema_text(&conn, set, collection)? {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        let indexes = Indexes::new(Arc::clone(&self.store)).list(set, collection)?;
        let (count, created_at): (i64, Option<i64>) = conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN(created_at) FROM {} WHERE collection = ?1",
                table_name(set)
            ),
            [collection],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CollectionInfo {
            schema,
            indexes,
            stats: CollectionStat { count, created_at },
        })
    }

    /// Drop a set: its physical table and its `metadata`, `idx_metadata`,
    /// and `schemas` rows. Feature-gated.
    pub fn delete(&self, set: &str) -> Result<()> {
        if !self.store.config().allow_delete_sets {
            return Err(Error::FeatureDisabled {
                feature: "set deletion",
            });
        }
        ident::validate_names(set, None)?;
        let conn = self.store.conn()?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table_name(set)))?;
        conn.execute("DELETE FROM metadata WHERE set_name = ?1", [set])?;
        conn.execute("DELETE FROM idx_metadata WHERE set_name = ?1", [set])?;
        conn.execute("DELETE FROM schemas WHERE set_name = ?1", [set])?;
        info!(target: "docset::sets", set, "set dropped");
        Ok(())
    }
}

fn count_set_docs(conn: &Connection, set: &str) -> Result<i64> {
    // The metadata row can outlive the table during a concurrent drop.
    let table = table_name(set);
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [&table],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(0);
    }
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}
