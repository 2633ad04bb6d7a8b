//! The docset storage engine.
//!
//! Everything below the wire surface: the pooled SQLite [`Store`] and its
//! physical-table conventions, the filter-to-SQL compiler, document CRUD
//! and query, the async index lifecycle, per-collection JSON Schema
//! enforcement, and set/collection administration.
//!
//! Services are thin handles over an `Arc<Store>`:
//!
//! ```no_run
//! use docset_engine::{Documents, Store, StoreConfig};
//!
//! # fn main() -> docset_core::Result<()> {
//! let store = Store::open(StoreConfig::new("./data.db"))?;
//! let docs = Documents::new(store.clone());
//! let doc = docs.create("app", "users", serde_json::json!({"name": "Alice"}))?;
//! assert_eq!(doc.meta.created_at, doc.meta.updated_at);
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod config;
pub mod database;
pub mod documents;
pub mod index;
pub mod query;
pub mod schema;
pub mod sets;

pub use config::StoreConfig;
pub use database::{table_name, Store};
pub use documents::{Documents, QueryParams};
pub use index::{IndexInfo, IndexStatus, IndexTicket, Indexes};
pub use query::Filter;
pub use schema::Schemas;
pub use sets::{CollectionInfo, CollectionStat, Sets, SetsSummary};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds, the row-timestamp resolution.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
