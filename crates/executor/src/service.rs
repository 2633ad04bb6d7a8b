//! Sandboxed, transactional execution of stored Lua procedures.
//!
//! Execution order matters: the VM is acquired from the pool first, then the
//! transaction begins, never the reverse, so a pool wait can't hold the
//! database write lock. The script runs with `db.*` bound to the open
//! transaction; afterwards the transaction commits iff the script completed
//! without error, within budget, and with `200 <= http_status < 300`.
//!
//! Pooled VMs are scrubbed between runs: every global not present in the
//! post-sandbox baseline is removed, so script state cannot leak.

use crate::bridge::{json_to_lua, lua_to_json};
use crate::store::FunctionStore;
use crate::types::{Execution, Function, DEFAULT_TIMEOUT_MS};
use chrono::{SecondsFormat, Utc};
use docset_core::{Error, Result};
use docset_engine::database::Conn;
use docset_engine::query::QueryOpts;
use docset_engine::{documents, query, Store};
use mlua::{HookTriggers, Lua, Table, Value as LuaValue, VmState};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fixed marker attached to every sandbox result.
pub const SANDBOX_WARNING: &str = "Sandbox mode - no changes were saved";

/// Interpreter instances kept warm per process.
const VM_POOL_SIZE: usize = 8;

/// Instructions between wall-clock checks of the timeout hook.
const HOOK_GRANULARITY: u32 = 1024;

/// Source substrings rejected before any code is saved or run.
/// Matched case-insensitively.
const FORBIDDEN_PATTERNS: &[&str] = &["require", "dofile", "loadfile", "load("];

/// Globals removed from every VM at construction.
const REMOVED_GLOBALS: &[&str] = &[
    "require",
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "io",
    "os",
    "debug",
    "package",
];

/// Whether a finished execution's transaction may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnPolicy {
    /// Commit on success; the normal path.
    CommitOnSuccess,
    /// Roll back unconditionally; the `_sandbox` path.
    AlwaysRollback,
}

/// Reject code that names a sandbox escape hatch, then make sure it parses.
pub fn validate_code(code: &str) -> Result<()> {
    let lowered = code.to_lowercase();
    for pattern in FORBIDDEN_PATTERNS {
        if lowered.contains(pattern) {
            return Err(Error::InvalidCode {
                reason: format!("code contains dangerous pattern: {pattern}"),
            });
        }
    }
    let lua = Lua::new();
    lua.load(code)
        .into_function()
        .map_err(|e| Error::InvalidCode {
            reason: e.to_string(),
        })?;
    Ok(())
}

/// A pooled interpreter plus the global names that survive a scrub.
struct Vm {
    lua: Lua,
    baseline: HashSet<String>,
}

impl Vm {
    fn build() -> Result<Vm> {
        let lua = Lua::new();
        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals
                .raw_set(*name, LuaValue::Nil)
                .map_err(lua_internal)?;
        }
        install_json(&lua).map_err(lua_internal)?;

        let mut baseline = HashSet::new();
        for pair in globals.pairs::<LuaValue, LuaValue>() {
            let (key, _) = pair.map_err(lua_internal)?;
            if let LuaValue::String(s) = key {
                baseline.insert(s.to_string_lossy().to_string());
            }
        }
        Ok(Vm { lua, baseline })
    }

    /// Remove every global the baseline does not know, including the
    /// injected channels and anything the script created.
    fn scrub(&self) {
        let globals = self.lua.globals();
        let mut stale = Vec::new();
        for pair in globals.clone().pairs::<LuaValue, LuaValue>() {
            let Ok((key, _)) = pair else { continue };
            let keep = match &key {
                LuaValue::String(s) => self.baseline.contains(&*s.to_string_lossy()),
                _ => false,
            };
            if !keep {
                stale.push(key);
            }
        }
        for key in stale {
            let _ = globals.raw_set(key, LuaValue::Nil);
        }
        let _ = self.lua.gc_collect();
    }
}

struct VmPool {
    vms: Mutex<Vec<Vm>>,
}

impl VmPool {
    fn new() -> Self {
        Self {
            vms: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> Result<Vm> {
        if let Some(vm) = self.vms.lock().pop() {
            return Ok(vm);
        }
        Vm::build()
    }

    fn release(&self, vm: Vm) {
        vm.scrub();
        let mut vms = self.vms.lock();
        if vms.len() < VM_POOL_SIZE {
            vms.push(vm);
        }
    }
}

/// The shared connection slot: host functions borrow it during the run, the
/// finisher takes it back out to commit or roll back.
type SharedConn = Arc<Mutex<Option<Conn>>>;

/// Rolls the transaction back if the execution path drops it unfinished, so
/// a pooled connection never returns with a transaction open.
struct TxnGuard {
    conn: SharedConn,
}

impl TxnGuard {
    fn begin(conn: Conn) -> Result<(TxnGuard, SharedConn)> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let shared: SharedConn = Arc::new(Mutex::new(Some(conn)));
        Ok((
            TxnGuard {
                conn: Arc::clone(&shared),
            },
            shared,
        ))
    }

    fn commit(self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn rollback(self) {
        if let Some(conn) = self.conn.lock().take() {
            let _ = conn.execute_batch("ROLLBACK");
        }
    }
}

impl Drop for TxnGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.lock().take() {
            let _ = conn.execute_batch("ROLLBACK");
        }
    }
}

/// Executes stored functions and sandbox snippets.
#[derive(Clone)]
pub struct FunctionRuntime {
    store: Arc<Store>,
    functions: FunctionStore,
    pool: Arc<VmPool>,
}

impl FunctionRuntime {
    pub fn new(store: Arc<Store>, functions: FunctionStore) -> Self {
        Self {
            store,
            functions,
            pool: Arc::new(VmPool::new()),
        }
    }

    /// Execute a stored function with `input` as the request body.
    ///
    /// The response status is the script's `http_status` (500 for runtime
    /// errors, 504 for timeouts). Stats are updated asynchronously after
    /// the outcome is decided.
    pub fn run(&self, set: &str, function_id: &str, input: Value) -> Result<Execution> {
        let function: Function = self.functions.get(set, function_id)?;
        let timeout = if function.timeout == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            function.timeout
        };
        let execution =
            self.execute(set, function_id, &function.code, input, timeout, TxnPolicy::CommitOnSuccess)?;

        self.enqueue_stats(set, function_id, execution.http_status, execution.duration_ms);
        Ok(execution)
    }

    /// Execute an ad-hoc snippet whose transaction always rolls back.
    pub fn run_sandbox(
        &self,
        set: &str,
        code: &str,
        input: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Execution> {
        if code.is_empty() {
            return Err(Error::InvalidBody {
                reason: "code is required".into(),
            });
        }
        validate_code(code)?;
        let timeout = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(crate::types::MAX_TIMEOUT_MS);
        let mut execution =
            self.execute(set, "_sandbox", code, input, timeout, TxnPolicy::AlwaysRollback)?;
        execution.warning = Some(SANDBOX_WARNING.to_string());
        Ok(execution)
    }

    fn execute(
        &self,
        set: &str,
        function_id: &str,
        code: &str,
        input: Value,
        timeout_ms: u64,
        policy: TxnPolicy,
    ) -> Result<Execution> {
        // VM first, transaction second (see module docs).
        let vm = self.pool.acquire()?;
        let conn = self.store.conn()?;
        let (txn, shared) = match TxnGuard::begin(conn) {
            Ok(pair) => pair,
            Err(e) => {
                self.pool.release(vm);
                return Err(e);
            }
        };

        let execution_id = xid::new().to_string();
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let logs: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let outcome = run_script(
            &vm.lua,
            ScriptEnv {
                set,
                function_id,
                execution_id: &execution_id,
                started_at: &started_at,
                code,
                input: &input,
                timeout_ms,
                conn: &shared,
                logs: &logs,
            },
        );

        let (http_status, output, error, duration) = match outcome {
            Ok(finished) => finished,
            Err(e) => {
                // Host-side failure before the script could run.
                txn.rollback();
                self.pool.release(vm);
                return Err(e);
            }
        };

        let commit = policy == TxnPolicy::CommitOnSuccess
            && error.is_none()
            && (200..300).contains(&http_status);
        if commit {
            txn.commit()?;
            debug!(target: "docset::executor", function = function_id, http_status, "committed");
        } else {
            txn.rollback();
            debug!(target: "docset::executor", function = function_id, http_status, "rolled back");
        }

        self.pool.release(vm);

        let collected_logs = std::mem::take(&mut *logs.lock());
        Ok(Execution {
            execution_id,
            function_id: function_id.to_string(),
            http_status,
            output,
            logs: collected_logs,
            duration_ms: duration.as_millis() as i64,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            error,
            warning: None,
        })
    }

    fn enqueue_stats(&self, set: &str, function_id: &str, http_status: u16, duration_ms: i64) {
        let functions = self.functions.clone();
        let set = set.to_string();
        let id = function_id.to_string();
        let duration = Duration::from_millis(duration_ms.max(0) as u64);
        let submitted = self.store.background().submit(move || {
            functions.record_execution(&set, &id, http_status, duration);
        });
        if submitted.is_err() {
            warn!(target: "docset::executor", function = function_id, "stats update dropped: queue full");
        }
    }
}

struct ScriptEnv<'a> {
    set: &'a str,
    function_id: &'a str,
    execution_id: &'a str,
    started_at: &'a str,
    code: &'a str,
    input: &'a Value,
    timeout_ms: u64,
    conn: &'a SharedConn,
    logs: &'a Arc<Mutex<Vec<String>>>,
}

/// Install the per-execution environment, run the chunk under the timeout
/// hook, and extract `(http_status, output, error, duration)`.
fn run_script(
    lua: &Lua,
    env: ScriptEnv<'_>,
) -> Result<(u16, Value, Option<String>, Duration)> {
    install_db_api(lua, env.conn, env.set).map_err(lua_internal)?;
    install_log(lua, env.logs).map_err(lua_internal)?;
    set_globals(lua, &env).map_err(lua_internal)?;

    let timed_out = Arc::new(AtomicBool::new(false));
    let budget = Duration::from_millis(env.timeout_ms);
    let start = Instant::now();
    {
        let timed_out = Arc::clone(&timed_out);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_GRANULARITY),
            move |_lua, _debug| {
                if start.elapsed() >= budget {
                    timed_out.store(true, Ordering::Release);
                    Err(mlua::Error::RuntimeError("execution budget exhausted".into()))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
    }

    let result = lua.load(env.code).set_name(env.function_id).exec();
    lua.remove_hook();
    let duration = start.elapsed();

    Ok(match result {
        Ok(()) => {
            let status = read_status(lua);
            let output = read_output(lua);
            (status, output, None, duration)
        }
        Err(e) => {
            if timed_out.load(Ordering::Acquire) {
                (
                    504,
                    json!({}),
                    Some(format!(
                        "function execution timeout after {}ms",
                        env.timeout_ms
                    )),
                    duration,
                )
            } else {
                (500, json!({}), Some(format!("lua execution error: {e}")), duration)
            }
        }
    })
}

fn set_globals(lua: &Lua, env: &ScriptEnv<'_>) -> mlua::Result<()> {
    let globals = lua.globals();

    let input = match env.input {
        Value::Object(_) => env.input.clone(),
        _ => Value::Object(Map::new()),
    };
    globals.set("input", json_to_lua(lua, &input)?)?;
    globals.set("set", env.set)?;

    let ctx = lua.create_table()?;
    ctx.set("function_id", env.function_id)?;
    ctx.set("execution_id", env.execution_id)?;
    ctx.set("timestamp", env.started_at)?;
    globals.set("ctx", ctx)?;

    globals.set("http_status", 200)?;
    globals.set("output", lua.create_table()?)?;
    Ok(())
}

fn read_status(lua: &Lua) -> u16 {
    match lua.globals().get::<LuaValue>("http_status") {
        Ok(LuaValue::Integer(i)) => u16::try_from(i).unwrap_or(200),
        Ok(LuaValue::Number(n)) => {
            let i = n as i64;
            u16::try_from(i).unwrap_or(200)
        }
        _ => 200,
    }
}

fn read_output(lua: &Lua) -> Value {
    let value = lua
        .globals()
        .get::<LuaValue>("output")
        .map(|v| lua_to_json(&v))
        .unwrap_or(Value::Null);
    match value {
        Value::Object(_) => value,
        other => json!({ "value": other }),
    }
}

/// `json.encode` / `json.decode`, installed once per VM.
fn install_json(lua: &Lua) -> mlua::Result<()> {
    let json_table = lua.create_table()?;
    json_table.set(
        "encode",
        lua.create_function(|_lua, value: LuaValue| {
            match serde_json::to_string(&lua_to_json(&value)) {
                Ok(text) => Ok((Some(text), None::<String>)),
                Err(e) => Ok((None, Some(e.to_string()))),
            }
        })?,
    )?;
    json_table.set(
        "decode",
        lua.create_function(|lua, text: String| {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => Ok((json_to_lua(lua, &value)?, None::<String>)),
                Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
            }
        })?,
    )?;
    lua.globals().set("json", json_table)
}

/// `log.info` / `log.error`, appending to the execution's buffer.
fn install_log(lua: &Lua, logs: &Arc<Mutex<Vec<String>>>) -> mlua::Result<()> {
    let log_table = lua.create_table()?;
    let sink = Arc::clone(logs);
    log_table.set(
        "info",
        lua.create_function(move |_lua, message: String| {
            sink.lock().push(format!("[INFO] {message}"));
            Ok(())
        })?,
    )?;
    let sink = Arc::clone(logs);
    log_table.set(
        "error",
        lua.create_function(move |_lua, message: String| {
            sink.lock().push(format!("[ERROR] {message}"));
            Ok(())
        })?,
    )?;
    lua.globals().set("log", log_table)
}

/// The `db.*` API, bound to the execution's open transaction and set.
fn install_db_api(lua: &Lua, conn: &SharedConn, set: &str) -> mlua::Result<()> {
    let db = lua.create_table()?;

    let shared = Arc::clone(conn);
    let set_name = set.to_string();
    db.set(
        "query",
        lua.create_function(move |lua, (collection, filter): (String, Option<Table>)| {
            let guard = shared.lock();
            let Some(conn) = guard.as_ref() else {
                return Ok((LuaValue::Nil, Some("execution finished".to_string())));
            };
            let filter_value = match filter {
                None => Value::Object(Map::new()),
                Some(table) => match script_filter(&table) {
                    Ok(v) => v,
                    Err(message) => return Ok((LuaValue::Nil, Some(message))),
                },
            };
            let parsed = match query::parse(&filter_value) {
                Ok(p) => p,
                Err(e) => return Ok((LuaValue::Nil, Some(e.to_string()))),
            };
            match documents::query_rows(conn, QueryOpts::all(&set_name, &collection, &parsed)) {
                Ok(docs) => {
                    let items: Vec<Value> =
                        docs.iter().map(|d| Value::Object(d.with_meta())).collect();
                    Ok((json_to_lua(lua, &Value::Array(items))?, None))
                }
                Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
            }
        })?,
    )?;

    let shared = Arc::clone(conn);
    let set_name = set.to_string();
    db.set(
        "get",
        lua.create_function(move |lua, (collection, id): (String, String)| {
            let guard = shared.lock();
            let Some(conn) = guard.as_ref() else {
                return Ok((LuaValue::Nil, Some("execution finished".to_string())));
            };
            match documents::get_row(conn, &set_name, &collection, &id) {
                Ok(Some(doc)) => Ok((json_to_lua(lua, &Value::Object(doc.with_meta()))?, None)),
                Ok(None) => Ok((LuaValue::Nil, None)),
                Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
            }
        })?,
    )?;

    let shared = Arc::clone(conn);
    let set_name = set.to_string();
    db.set(
        "create",
        lua.create_function(move |lua, (collection, data): (String, Table)| {
            let guard = shared.lock();
            let Some(conn) = guard.as_ref() else {
                return Ok((LuaValue::Nil, Some("execution finished".to_string())));
            };
            let Value::Object(mut map) = lua_to_json(&LuaValue::Table(data)) else {
                return Ok((LuaValue::Nil, Some("data must be a table".to_string())));
            };
            map.shift_remove("_meta");
            match documents::insert_row(conn, &set_name, &collection, map) {
                Ok(doc) => Ok((json_to_lua(lua, &Value::Object(doc.with_meta()))?, None)),
                Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
            }
        })?,
    )?;

    let shared = Arc::clone(conn);
    let set_name = set.to_string();
    db.set(
        "update",
        lua.create_function(
            move |lua, (collection, id, data): (String, String, Table)| {
                let guard = shared.lock();
                let Some(conn) = guard.as_ref() else {
                    return Ok((LuaValue::Nil, Some("execution finished".to_string())));
                };
                let Value::Object(mut map) = lua_to_json(&LuaValue::Table(data)) else {
                    return Ok((LuaValue::Nil, Some("data must be a table".to_string())));
                };
                map.shift_remove("_meta");
                match documents::replace_row(conn, &set_name, &collection, &id, map) {
                    Ok(Some(doc)) => {
                        Ok((json_to_lua(lua, &Value::Object(doc.with_meta()))?, None))
                    }
                    Ok(None) => Ok((LuaValue::Nil, Some("document not found".to_string()))),
                    Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
                }
            },
        )?,
    )?;

    let shared = Arc::clone(conn);
    let set_name = set.to_string();
    db.set(
        "patch",
        lua.create_function(
            move |lua, (collection, id, changes): (String, String, Table)| {
                let guard = shared.lock();
                let Some(conn) = guard.as_ref() else {
                    return Ok((LuaValue::Nil, Some("execution finished".to_string())));
                };
                let Value::Object(mut patch) = lua_to_json(&LuaValue::Table(changes)) else {
                    return Ok((LuaValue::Nil, Some("changes must be a table".to_string())));
                };
                patch.shift_remove("_meta");
                let existing = match documents::get_row(conn, &set_name, &collection, &id) {
                    Ok(Some(doc)) => doc,
                    Ok(None) => {
                        return Ok((LuaValue::Nil, Some("document not found".to_string())))
                    }
                    Err(e) => return Ok((LuaValue::Nil, Some(e.to_string()))),
                };
                let mut merged = existing.data;
                for (key, value) in patch {
                    merged.insert(key, value);
                }
                match documents::replace_row(conn, &set_name, &collection, &id, merged) {
                    Ok(Some(doc)) => {
                        Ok((json_to_lua(lua, &Value::Object(doc.with_meta()))?, None))
                    }
                    Ok(None) => Ok((LuaValue::Nil, Some("document not found".to_string()))),
                    Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
                }
            },
        )?,
    )?;

    let shared = Arc::clone(conn);
    let set_name = set.to_string();
    db.set(
        "delete",
        lua.create_function(move |_lua, (collection, id): (String, String)| {
            let guard = shared.lock();
            let Some(conn) = guard.as_ref() else {
                return Ok((false, Some("execution finished".to_string())));
            };
            match documents::delete_row(conn, &set_name, &collection, &id) {
                Ok(affected) => Ok((affected, None)),
                Err(e) => Ok((false, Some(e.to_string()))),
            }
        })?,
    )?;

    lua.globals().set("db", db)
}

/// Translate a script filter table into the wire filter form. A value that
/// is itself a map is taken as an operator object; anything else is
/// equality shorthand and becomes `{"$eq": value}`.
fn script_filter(table: &Table) -> std::result::Result<Value, String> {
    let Value::Object(raw) = lua_to_json(&LuaValue::Table(table.clone())) else {
        return Err("filter must be a table of field conditions".to_string());
    };
    let mut filter = Map::new();
    for (path, condition) in raw {
        match condition {
            Value::Object(_) => {
                filter.insert(path, condition);
            }
            other => {
                filter.insert(path, json!({ "$eq": other }));
            }
        }
    }
    Ok(Value::Object(filter))
}

fn lua_internal(e: mlua::Error) -> Error {
    Error::internal(format!("lua environment setup failed: {e}"))
}
