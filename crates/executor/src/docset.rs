//! The `Docset` facade: one handle wiring every service over a shared store.

use crate::service::FunctionRuntime;
use crate::store::FunctionStore;
use docset_core::Result;
use docset_engine::{Documents, Indexes, Schemas, Sets, Store, StoreConfig};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Liveness payload for the `/health` contract.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

/// A running docset store.
///
/// ```no_run
/// use docset_executor::Docset;
///
/// # fn main() -> docset_core::Result<()> {
/// let db = Docset::open_at("./data.db")?;
/// let doc = db
///     .documents()
///     .create("app", "users", serde_json::json!({"name": "Alice"}))?;
/// assert!(db.documents().get("app", "users", &doc.meta.id).is_ok());
/// db.close();
/// # Ok(())
/// # }
/// ```
pub struct Docset {
    store: Arc<Store>,
    documents: Documents,
    indexes: Indexes,
    schemas: Schemas,
    sets: Sets,
    functions: FunctionStore,
    runtime: FunctionRuntime,
}

impl Docset {
    /// Open with explicit configuration.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = Store::open(config)?;
        let functions = FunctionStore::new(store.clone());
        Ok(Self {
            documents: Documents::new(store.clone()),
            indexes: Indexes::new(store.clone()),
            schemas: Schemas::new(store.clone()),
            sets: Sets::new(store.clone()),
            runtime: FunctionRuntime::new(store.clone(), functions.clone()),
            functions,
            store,
        })
    }

    /// Open a database file with default configuration.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(StoreConfig::new(path.as_ref()))
    }

    pub fn documents(&self) -> &Documents {
        &self.documents
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    pub fn schemas(&self) -> &Schemas {
        &self.schemas
    }

    pub fn sets(&self) -> &Sets {
        &self.sets
    }

    pub fn functions(&self) -> &FunctionStore {
        &self.functions
    }

    pub fn runtime(&self) -> &FunctionRuntime {
        &self.runtime
    }

    /// The underlying store, for callers needing raw access.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Liveness payload.
    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Flush background work and stop the workers.
    pub fn close(&self) {
        self.store.close();
    }
}
