//! Error types for the docset store.
//!
//! A single [`Error`] enum covers every component, so the whole pipeline
//! (validation, filter parsing, schema enforcement, storage, function
//! execution) propagates through one taxonomy. Transport adapters map each
//! variant to a response status via [`Error::http_status`].
//!
//! ## Classification
//!
//! | Class | Status | Variants |
//! |-------|--------|----------|
//! | Validation | 400 | `InvalidName`, `ReservedField`, `MetaIdMismatch`, `InvalidBody`, `MalformedFilter`, `UnsupportedOperator`, `OperandShape`, `InvalidSchema`, `SchemaViolation`, `InvalidCode` |
//! | Not found | 404 | `DocumentNotFound`, `IndexNotFound`, `FunctionNotFound` |
//! | Conflict | 409 | `FunctionExists` |
//! | Forbidden | 403 | `FeatureDisabled` |
//! | Timeout | 504 | `ExecutionTimeout` |
//! | Internal | 500 | `Script`, `Storage`, `Pool`, `Serialization`, `Internal` |
//!
//! Script-level domain errors do not appear here: a function that sets
//! `http_status = 422` succeeds from the executor's point of view and the
//! status travels in the execution result, not in an `Error`.

use thiserror::Error;

/// Result alias used across all docset crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error for every docset operation.
#[derive(Debug, Error)]
pub enum Error {
    // ==================== Validation ====================
    /// Set, collection, or function identifier fails `^[A-Za-z0-9_]+$`.
    #[error("invalid {what} name: must match ^[A-Za-z0-9_]+$")]
    InvalidName {
        /// Which identifier was rejected ("set", "collection", "function").
        what: &'static str,
    },

    /// A top-level document key other than `_meta` starts with `_`.
    #[error("fields starting with '_' are reserved")]
    ReservedField,

    /// `_meta.id` in a PUT/PATCH body does not equal the addressed id.
    #[error("body _meta.id must match resource id")]
    MetaIdMismatch,

    /// Body is not the JSON shape the operation requires.
    #[error("invalid body: {reason}")]
    InvalidBody {
        /// What was wrong with the payload.
        reason: String,
    },

    /// The `where` input is not an object of `{path: {op: value}}` clauses.
    #[error("malformed where clause: {reason}")]
    MalformedFilter {
        /// Parser detail.
        reason: String,
    },

    /// Operator key is not in the supported table.
    #[error("unsupported operator: {op}")]
    UnsupportedOperator {
        /// The offending operator, as received.
        op: String,
    },

    /// Operator received a value of the wrong shape.
    #[error("operator {op} expects {expected}")]
    OperandShape {
        /// The operator whose operand was malformed.
        op: String,
        /// Human description of the expected shape.
        expected: &'static str,
    },

    /// Stored or submitted JSON Schema cannot be parsed or compiled.
    #[error("invalid JSON schema: {reason}")]
    InvalidSchema {
        /// Compiler detail.
        reason: String,
    },

    /// Document rejected by the collection's schema.
    #[error("schema validation failed: {reason}")]
    SchemaViolation {
        /// Aggregated, human-readable violation list.
        reason: String,
    },

    /// Function source rejected before save (sandbox pre-check or syntax).
    #[error("code validation failed: {reason}")]
    InvalidCode {
        /// Which pattern or syntax error was found.
        reason: String,
    },

    // ==================== Not found ====================
    /// No document with this id in the collection.
    #[error("document not found: {id}")]
    DocumentNotFound {
        /// The missing document id.
        id: String,
    },

    /// No index metadata for the recomputed index name.
    #[error("index not found")]
    IndexNotFound,

    /// No function with this id in the set.
    #[error("function not found: {id}")]
    FunctionNotFound {
        /// The missing function id.
        id: String,
    },

    // ==================== Conflict ====================
    /// Create of a function id that already exists.
    #[error("function already exists: {id}")]
    FunctionExists {
        /// The duplicate id.
        id: String,
    },

    // ==================== Forbidden ====================
    /// A destructive endpoint was invoked while its feature flag is off.
    #[error("{feature} disabled")]
    FeatureDisabled {
        /// The gated feature ("set deletion", "collection deletion").
        feature: &'static str,
    },

    // ==================== Timeout ====================
    /// Script exceeded its wall-clock budget.
    #[error("function execution timeout after {timeout_ms}ms")]
    ExecutionTimeout {
        /// The budget that was exceeded.
        timeout_ms: u64,
    },

    // ==================== Internal ====================
    /// Lua runtime error during function execution.
    #[error("lua execution error: {message}")]
    Script {
        /// The interpreter's message.
        message: String,
    },

    /// SQLite error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Connection pool exhausted or broken.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON encode/decode failure on an internal payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invariant violation or unexpected state.
    #[error("internal error: {reason}")]
    Internal {
        /// What went wrong.
        reason: String,
    },
}

impl Error {
    /// HTTP status a transport adapter should report for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidName { .. }
            | Error::ReservedField
            | Error::MetaIdMismatch
            | Error::InvalidBody { .. }
            | Error::MalformedFilter { .. }
            | Error::UnsupportedOperator { .. }
            | Error::OperandShape { .. }
            | Error::InvalidSchema { .. }
            | Error::SchemaViolation { .. }
            | Error::InvalidCode { .. } => 400,
            Error::DocumentNotFound { .. }
            | Error::IndexNotFound
            | Error::FunctionNotFound { .. } => 404,
            Error::FunctionExists { .. } => 409,
            Error::FeatureDisabled { .. } => 403,
            Error::ExecutionTimeout { .. } => 504,
            Error::Script { .. }
            | Error::Storage(_)
            | Error::Pool(_)
            | Error::Serialization(_)
            | Error::Internal { .. } => 500,
        }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_validation(&self) -> bool {
        self.http_status() == 400
    }

    /// Shorthand for an internal error with a formatted reason.
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }
}
