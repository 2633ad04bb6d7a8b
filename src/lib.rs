//! # docset
//!
//! A self-contained JSON document store over embedded SQLite: two-level
//! namespaces (set → collection), an operator filter DSL compiled to
//! parameterized SQL, asynchronously built JSON-path indexes with usage
//! counters, per-collection JSON Schema enforcement, and stored Lua
//! procedures executing inside a transaction tied to the script's status
//! code.
//!
//! # Quick start
//!
//! ```no_run
//! use docset::{Docset, Function, QueryParams};
//! use serde_json::json;
//!
//! fn main() -> docset::Result<()> {
//!     let db = Docset::open_at("./data.db")?;
//!
//!     // Documents
//!     db.documents().create("app", "users", json!({"name": "Alice", "age": 30}))?;
//!     let page = db.documents().query(
//!         "app",
//!         "users",
//!         &QueryParams {
//!             filter: Some(json!({"age": {"$gte": 18}})),
//!             ..Default::default()
//!         },
//!     )?;
//!     assert_eq!(page.total, 1);
//!
//!     // Async JSON-path index
//!     db.indexes().create("app", "users", ["age"])?;
//!
//!     // A stored procedure that writes inside a transaction
//!     db.functions().create(
//!         "app",
//!         Function {
//!             id: "signup".into(),
//!             code: r#"db.create("events", {kind = "signup"}); http_status = 201"#.into(),
//!             ..serde_json::from_value(json!({"id": "signup"}))?
//!         },
//!     )?;
//!     let run = db.runtime().run("app", "signup", json!({}))?;
//!     assert_eq!(run.http_status, 201);
//!
//!     db.close();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! [`Docset`] is the entry point; it wires the engine services (documents,
//! indexes, schemas, sets) and the function runtime over one shared store.
//! Transport adapters (HTTP, CLI) stay outside this crate and speak through
//! the [`Envelope`] and the status mapping on [`Error`].

// Re-export the public API from docset-executor
pub use docset_executor::*;
