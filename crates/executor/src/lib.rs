//! Stored Lua procedures for docset.
//!
//! Functions are JSON documents in the reserved `_functions` collection of
//! their set. Execution acquires a pooled, sandboxed VM, opens a
//! transaction on the set's table, exposes `db.*` / `json.*` / `log.*` to
//! the script, and commits iff the script finishes in budget with a 2xx
//! `http_status`. The `_sandbox` variant always rolls back.
//!
//! This crate also re-exports the engine services through the [`Docset`]
//! facade, which is the crate-public entry point.

pub mod bridge;
pub mod docset;
pub mod service;
pub mod store;
pub mod types;

pub use docset::{Docset, Health};
pub use service::{validate_code, FunctionRuntime, SANDBOX_WARNING};
pub use store::FunctionStore;
pub use types::{
    Execution, ExportEnvelope, Function, FunctionStats, ImportDetail, ImportOptions, ImportResult,
    DEFAULT_TIMEOUT_MS, FUNCTIONS_COLLECTION, MAX_TIMEOUT_MS,
};

// The engine surface, so adapters can depend on one crate.
pub use docset_core::{Document, Envelope, Error, Meta, QueryPage, Result};
pub use docset_engine::{
    CollectionInfo, CollectionStat, Documents, IndexInfo, IndexStatus, IndexTicket, Indexes,
    QueryParams, Schemas, Sets, SetsSummary, Store, StoreConfig,
};
