//! The storage engine: a pooled SQLite handle plus the physical-table
//! conventions every other component builds on.
//!
//! One `data_<set>` table per set, created lazily on first write. The pool
//! is deliberately small: SQLite serializes writers, so extra connections
//! only queue on the write lock. Pragmas at connection init: WAL journaling,
//! foreign keys on, 5 s busy timeout, NORMAL synchronous.

pub mod migrations;

use crate::background::Background;
use crate::config::StoreConfig;
use docset_core::{ident, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};

/// Pooled connection handle used throughout the engine.
pub type Conn = PooledConnection<SqliteConnectionManager>;

/// Physical table name backing a set.
pub fn table_name(set: &str) -> String {
    format!("data_{set}")
}

/// The shared database handle.
///
/// `Store` owns every table; the services (documents, indexes, schemas,
/// sets, functions) hold an `Arc<Store>` and borrow connections per call.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    background: Background,
    config: StoreConfig,
}

impl Store {
    /// Open (creating if missing) the database at `config.path`, apply
    /// migrations, sweep index builds interrupted by a previous shutdown,
    /// and start the background workers.
    pub fn open(config: StoreConfig) -> Result<Arc<Self>> {
        // case_sensitive_like keeps the plain LIKE operators case-sensitive;
        // the case-insensitive filter variants fold explicitly with LOWER().
        let manager = SqliteConnectionManager::file(&config.path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA case_sensitive_like = ON;",
            )
        });
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)?;

        {
            let conn = pool.get()?;
            migrations::run(&conn)?;
            let swept = crate::index::sweep_stale_creating(&conn)?;
            if swept > 0 {
                info!(target: "docset::store", swept, "marked interrupted index builds as error");
            }
        }

        info!(target: "docset::store", path = %config.path.display(), "opened database");
        let background = Background::new(config.background_workers, config.background_queue_depth);
        Ok(Arc::new(Self {
            pool,
            background,
            config,
        }))
    }

    /// Borrow a pooled connection.
    pub fn conn(&self) -> Result<Conn> {
        Ok(self.pool.get()?)
    }

    /// The background runner for index builds and stats writes.
    pub fn background(&self) -> &Background {
        &self.background
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Finish queued background work and stop the workers.
    pub fn close(&self) {
        self.background.drain();
        self.background.shutdown();
        debug!(target: "docset::store", "store closed");
    }

    /// Idempotently create the set's physical table and its secondary
    /// indexes. Validates the set name first; the name is embedded in DDL.
    pub fn ensure_set_table(&self, set: &str) -> Result<()> {
        let conn = self.conn()?;
        ensure_set_table(&conn, set)
    }

    /// Idempotently register a collection in the global `metadata` table.
    pub fn ensure_collection_metadata(&self, set: &str, collection: &str) -> Result<()> {
        let conn = self.conn()?;
        ensure_collection_metadata(&conn, set, collection)
    }
}

/// Connection-level variant of [`Store::ensure_set_table`], usable inside a
/// transaction.
pub fn ensure_set_table(conn: &Connection, set: &str) -> Result<()> {
    ident::validate_names(set, None)?;
    let table = table_name(set);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id         TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            data       JSON NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{set}_collection ON {table}(collection);
        CREATE INDEX IF NOT EXISTS idx_{set}_collection_created ON {table}(collection, created_at DESC);"
    ))?;
    Ok(())
}

/// Connection-level variant of [`Store::ensure_collection_metadata`].
pub fn ensure_collection_metadata(conn: &Connection, set: &str, collection: &str) -> Result<()> {
    ident::validate_names(set, Some(collection))?;
    conn.execute(
        "INSERT OR IGNORE INTO metadata (set_name, collection_name, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![set, collection, crate::now()],
    )?;
    Ok(())
}
