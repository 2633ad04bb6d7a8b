//! Persistence for function definitions.
//!
//! Definitions live as ordinary rows of the reserved `_functions` collection
//! in the set's physical table, with the function id as the row id and the
//! payload `{name, description, code, timeout, input_schema?, stats}`.

use crate::service;
use crate::types::{
    ExportEnvelope, Function, FunctionStats, ImportDetail, ImportOptions, ImportResult,
    DEFAULT_TIMEOUT_MS, FUNCTIONS_COLLECTION, MAX_TIMEOUT_MS,
};
use chrono::{SecondsFormat, Utc};
use docset_engine::{database, table_name, Store};
use docset_core::{ident, Error, Meta, Result};
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Function CRUD over a shared [`Store`].
#[derive(Clone)]
pub struct FunctionStore {
    store: Arc<Store>,
}

impl FunctionStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Save a new definition. The id must be fresh and valid, the code must
    /// pass the sandbox pre-check, and the timeout is defaulted and bounded.
    pub fn create(&self, set: &str, mut function: Function) -> Result<Function> {
        ident::validate_names(set, None)?;
        if function.id.is_empty() || !ident::valid_name(&function.id) {
            return Err(Error::InvalidName { what: "function" });
        }
        if function.code.is_empty() {
            return Err(Error::InvalidBody {
                reason: "code is required".into(),
            });
        }
        service::validate_code(&function.code)?;
        function.timeout = bound_timeout(function.timeout)?;
        if function.stats.is_none() {
            function.stats = Some(FunctionStats::default());
        }

        if self.try_get(set, &function.id)?.is_some() {
            return Err(Error::FunctionExists {
                id: function.id.clone(),
            });
        }

        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        database::ensure_collection_metadata(&conn, set, FUNCTIONS_COLLECTION)?;
        let now = docset_engine::now();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, collection, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                table_name(set)
            ),
            rusqlite::params![
                function.id,
                FUNCTIONS_COLLECTION,
                serde_json::to_string(&payload(&function))?,
                now,
                now
            ],
        )?;
        self.get(set, &function.id)
    }

    /// Load a definition or fail with `FunctionNotFound`.
    pub fn get(&self, set: &str, id: &str) -> Result<Function> {
        self.try_get(set, id)?.ok_or_else(|| Error::FunctionNotFound {
            id: id.to_string(),
        })
    }

    /// Load a definition if it exists. Absent set tables read as absent.
    pub fn try_get(&self, set: &str, id: &str) -> Result<Option<Function>> {
        ident::validate_names(set, None)?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT data, created_at, updated_at FROM {} WHERE id = ?1 AND collection = ?2",
                    table_name(set)
                ),
                rusqlite::params![id, FUNCTIONS_COLLECTION],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some((data, created_at, updated_at)) => {
                Ok(Some(decode(id, &data, created_at, updated_at)?))
            }
        }
    }

    /// Every definition in the set.
    pub fn list(&self, set: &str) -> Result<Vec<Function>> {
        ident::validate_names(set, None)?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE collection = ?1",
            table_name(set)
        ))?;
        let mut rows = stmt.query([FUNCTIONS_COLLECTION])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let data: String = row.get(1)?;
            out.push(decode(&id, &data, row.get(2)?, row.get(3)?)?);
        }
        Ok(out)
    }

    /// Replace a definition. Existing stats are preserved unless the caller
    /// supplies its own; code, when present, is re-checked.
    pub fn update(&self, set: &str, mut function: Function) -> Result<Function> {
        let existing = self.get(set, &function.id)?;
        if !function.code.is_empty() {
            service::validate_code(&function.code)?;
        }
        function.timeout = bound_timeout(function.timeout)?;
        if function.stats.is_none() {
            function.stats = existing.stats;
        }

        let conn = self.store.conn()?;
        conn.execute(
            &format!(
                "UPDATE {} SET data = ?1, updated_at = ?2 WHERE id = ?3 AND collection = ?4",
                table_name(set)
            ),
            rusqlite::params![
                serde_json::to_string(&payload(&function))?,
                docset_engine::now(),
                function.id,
                FUNCTIONS_COLLECTION
            ],
        )?;
        self.get(set, &function.id)
    }

    /// Remove a definition. Idempotent.
    pub fn delete(&self, set: &str, id: &str) -> Result<()> {
        ident::validate_names(set, None)?;
        let conn = self.store.conn()?;
        database::ensure_set_table(&conn, set)?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE id = ?1 AND collection = ?2",
                table_name(set)
            ),
            rusqlite::params![id, FUNCTIONS_COLLECTION],
        )?;
        Ok(())
    }

    /// Record one finished execution into the function's stored stats.
    ///
    /// The read-modify-write runs in its own immediate transaction so
    /// concurrent executions of the same function cannot lose counts.
    /// Best-effort: a concurrent delete just drops the update.
    pub fn record_execution(
        &self,
        set: &str,
        id: &str,
        http_status: u16,
        duration: std::time::Duration,
    ) {
        let result = (|| -> Result<()> {
            ident::validate_names(set, None)?;
            let mut conn = self.store.conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let row = tx
                .query_row(
                    &format!(
                        "SELECT data, created_at, updated_at FROM {} WHERE id = ?1 AND collection = ?2",
                        table_name(set)
                    ),
                    rusqlite::params![id, FUNCTIONS_COLLECTION],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((data, created_at, updated_at)) = row else {
                return Ok(());
            };
            let mut function = decode(id, &data, created_at, updated_at)?;
            let mut stats = function.stats.take().unwrap_or_default();
            stats.record(http_status, duration);
            function.stats = Some(stats);
            tx.execute(
                &format!(
                    "UPDATE {} SET data = ?1, updated_at = ?2 WHERE id = ?3 AND collection = ?4",
                    table_name(set)
                ),
                rusqlite::params![
                    serde_json::to_string(&payload(&function))?,
                    docset_engine::now(),
                    id,
                    FUNCTIONS_COLLECTION
                ],
            )?;
            tx.commit()?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(target: "docset::functions", function = id, error = %e, "stats update dropped");
        }
    }

    /// Export one definition, stats and row metadata stripped.
    pub fn export_one(&self, set: &str, id: &str) -> Result<ExportEnvelope> {
        let mut function = self.get(set, id)?;
        function.stats = None;
        function.meta = None;
        Ok(ExportEnvelope {
            version: "1.0".into(),
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            set: None,
            function: Some(function),
            functions: None,
        })
    }

    /// Export every definition in the set.
    pub fn export_all(&self, set: &str) -> Result<ExportEnvelope> {
        let mut functions = self.list(set)?;
        for f in &mut functions {
            f.stats = None;
            f.meta = None;
        }
        Ok(ExportEnvelope {
            version: "1.0".into(),
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            set: Some(set.to_string()),
            function: None,
            functions: Some(functions),
        })
    }

    /// Bulk import with per-id outcomes. Existing ids are skipped unless
    /// `overwrite`, in which case their stats are preserved.
    pub fn import(
        &self,
        set: &str,
        functions: Vec<Function>,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        ident::validate_names(set, None)?;
        let mut result = ImportResult::default();
        for mut function in functions {
            let id = function.id.clone();
            if id.is_empty() || !ident::valid_name(&id) {
                result.failed += 1;
                result.details.push(ImportDetail {
                    id,
                    status: "failed",
                    reason: Some("invalid function ID".into()),
                });
                continue;
            }
            if options.validate && !function.code.is_empty() {
                if let Err(e) = service::validate_code(&function.code) {
                    result.failed += 1;
                    result.details.push(ImportDetail {
                        id,
                        status: "failed",
                        reason: Some(e.to_string()),
                    });
                    continue;
                }
            }

            let existing = self.try_get(set, &id)?;
            if existing.is_some() && !options.overwrite {
                result.skipped += 1;
                result.details.push(ImportDetail {
                    id,
                    status: "skipped",
                    reason: Some("already exists".into()),
                });
                continue;
            }

            let outcome = match existing {
                Some(current) => {
                    function.stats = current.stats;
                    self.update(set, function)
                }
                None => {
                    function.stats = Some(FunctionStats::default());
                    function.meta = None;
                    self.create(set, function)
                }
            };
            match outcome {
                Ok(_) => {
                    result.imported += 1;
                    result.details.push(ImportDetail {
                        id,
                        status: "imported",
                        reason: None,
                    });
                }
                Err(e) => {
                    result.failed += 1;
                    result.details.push(ImportDetail {
                        id,
                        status: "failed",
                        reason: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(result)
    }
}

fn bound_timeout(timeout: u64) -> Result<u64> {
    if timeout == 0 {
        return Ok(DEFAULT_TIMEOUT_MS);
    }
    if timeout > MAX_TIMEOUT_MS {
        return Err(Error::InvalidBody {
            reason: format!("timeout cannot exceed {MAX_TIMEOUT_MS}ms"),
        });
    }
    Ok(timeout)
}

/// The stored payload: everything except id and row metadata.
fn payload(function: &Function) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("name".into(), Value::String(function.name.clone()));
    map.insert(
        "description".into(),
        Value::String(function.description.clone()),
    );
    map.insert("code".into(), Value::String(function.code.clone()));
    map.insert("timeout".into(), Value::from(function.timeout));
    if let Some(schema) = &function.input_schema {
        map.insert("input_schema".into(), schema.clone());
    }
    map.insert(
        "stats".into(),
        serde_json::to_value(function.stats.clone().unwrap_or_default()).unwrap_or(Value::Null),
    );
    map
}

fn decode(id: &str, data: &str, created_at: i64, updated_at: i64) -> Result<Function> {
    let value: Value = serde_json::from_str(data)?;
    let mut function: Function = serde_json::from_value(Value::Object({
        let mut map = value.as_object().cloned().unwrap_or_default();
        map.insert("id".into(), Value::String(id.to_string()));
        map.remove("_meta");
        map
    }))?;
    function.meta = Some(Meta {
        id: id.to_string(),
        created_at,
        updated_at,
    });
    Ok(function)
}
