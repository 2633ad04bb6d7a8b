//! Store configuration.
//!
//! The surrounding adapter decides where values come from (environment,
//! flags, a file); this struct is the contract it fills in.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for opening a [`Store`](crate::Store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    /// Maximum pooled connections. SQLite has a single writer; a small pool
    /// keeps readers flowing without piling up lock contention.
    pub max_connections: u32,
    /// Allow `DELETE /{set}` to drop a whole set.
    pub allow_delete_sets: bool,
    /// Allow `DELETE /{set}/{collection}` to clear a collection.
    pub allow_delete_collections: bool,
    /// Worker threads for background index builds and stats writes.
    pub background_workers: usize,
    /// Bound on queued background tasks before submissions are rejected.
    pub background_queue_depth: usize,
}

impl StoreConfig {
    /// Config for a database at `path` with the standard limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data.db"),
            max_connections: 4,
            allow_delete_sets: false,
            allow_delete_collections: false,
            background_workers: 2,
            background_queue_depth: 1024,
        }
    }
}
