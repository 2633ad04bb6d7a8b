//! Idempotent global-table migrations, applied at every open.

use docset_core::Result;
use rusqlite::Connection;

/// Create the `metadata`, `idx_metadata`, and `schemas` tables when absent.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            set_name        TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            PRIMARY KEY (set_name, collection_name)
        );

        CREATE TABLE IF NOT EXISTS idx_metadata (
            set_name        TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            idx_name        TEXT NOT NULL,
            paths           TEXT NOT NULL,
            status          TEXT NOT NULL,
            error           TEXT,
            usage_count     INTEGER NOT NULL DEFAULT 0,
            last_used_at    INTEGER,
            created_at      INTEGER NOT NULL,
            PRIMARY KEY (set_name, collection_name, idx_name)
        );

        CREATE TABLE IF NOT EXISTS schemas (
            set_name        TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            schema          JSON NOT NULL,
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (set_name, collection_name)
        );
        "#,
    )?;
    Ok(())
}
