//! Function definitions, execution results, and import/export shapes.

use chrono::{SecondsFormat, Utc};
use docset_core::Meta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Reserved collection holding function definitions inside each set.
pub const FUNCTIONS_COLLECTION: &str = "_functions";

/// Timeout applied when a definition does not specify one, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Upper bound on a function's timeout, in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 30000;

/// A stored function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    /// Caller-chosen id, `^[A-Za-z0-9_]+$`.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Optional JSON Schema for the execution input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Lua source.
    #[serde(default)]
    pub code: String,
    /// Wall-clock budget in milliseconds; `0` means the default.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FunctionStats>,
    /// Row metadata, populated on read.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Rolling execution statistics for one function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionStats {
    pub total_executions: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<String>,
    /// Executions keyed by stringified status code.
    #[serde(default)]
    pub error_breakdown: BTreeMap<String, u64>,
}

impl FunctionStats {
    /// Fold one finished execution into the rolling stats.
    pub fn record(&mut self, http_status: u16, duration: Duration) {
        self.total_executions += 1;
        self.last_executed = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        if (200..300).contains(&http_status) {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.success_rate = self.success_count as f64 / self.total_executions as f64;

        let duration_ms = duration.as_secs_f64() * 1000.0;
        self.avg_duration_ms = (self.avg_duration_ms * (self.total_executions - 1) as f64
            + duration_ms)
            / self.total_executions as f64;

        *self
            .error_breakdown
            .entry(http_status.to_string())
            .or_insert(0) += 1;
    }
}

/// Outcome of a function or sandbox run.
///
/// Script-level failures (runtime error, timeout, non-2xx status) still
/// produce an `Execution`; only infrastructure failures surface as `Err`
/// from the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub execution_id: String,
    pub function_id: String,
    /// The status the transport should respond with.
    pub http_status: u16,
    /// The script's `output` global, wrapped in `{value: …}` when the
    /// script left something other than a map there.
    pub output: Value,
    pub logs: Vec<String>,
    pub duration_ms: i64,
    /// RFC 3339 completion time.
    pub timestamp: String,
    /// Runtime or timeout error message, when the script did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present on sandbox runs: nothing was persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl Execution {
    /// True when the transaction was committed.
    pub fn committed(&self) -> bool {
        self.error.is_none() && self.warning.is_none() && (200..300).contains(&self.http_status)
    }
}

/// Export envelope for one or many definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEnvelope {
    pub version: String,
    pub exported_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<Function>>,
}

/// Options accepted by bulk import.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Replace definitions whose id already exists.
    #[serde(default)]
    pub overwrite: bool,
    /// Run the code pre-check on each definition before saving.
    #[serde(default = "default_true")]
    pub validate: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            validate: true,
        }
    }
}

/// Per-id outcome of a bulk import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportDetail {
    pub id: String,
    /// `imported`, `skipped`, or `failed`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Aggregate result of a bulk import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub details: Vec<ImportDetail>,
}
