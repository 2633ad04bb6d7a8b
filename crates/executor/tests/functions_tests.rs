//! Function store tests: definition CRUD, validation, export/import.

use docset_executor::{
    Docset, Error, Function, ImportOptions, StoreConfig, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS,
};
use serde_json::json;
use tempfile::TempDir;

fn open() -> (TempDir, Docset) {
    let dir = TempDir::new().unwrap();
    let db = Docset::open(StoreConfig::new(dir.path().join("fns.db"))).unwrap();
    (dir, db)
}

fn minimal(id: &str, code: &str) -> Function {
    Function {
        id: id.into(),
        name: String::new(),
        description: String::new(),
        input_schema: None,
        code: code.into(),
        timeout: 0,
        stats: None,
        meta: None,
    }
}

#[test]
fn create_defaults_timeout_and_initializes_stats() {
    let (_dir, db) = open();
    let created = db
        .functions()
        .create("s", minimal("greet", "output = {hi = true}"))
        .unwrap();
    assert_eq!(created.timeout, DEFAULT_TIMEOUT_MS);
    let stats = created.stats.unwrap();
    assert_eq!(stats.total_executions, 0);
    assert!(created.meta.is_some());
    db.close();
}

#[test]
fn create_rejects_duplicates_with_conflict() {
    let (_dir, db) = open();
    db.functions()
        .create("s", minimal("dup", "http_status = 200"))
        .unwrap();
    let err = db
        .functions()
        .create("s", minimal("dup", "http_status = 200"))
        .unwrap_err();
    assert!(matches!(err, Error::FunctionExists { .. }));
    assert_eq!(err.http_status(), 409);
    db.close();
}

#[test]
fn create_validates_id_code_and_timeout() {
    let (_dir, db) = open();

    let err = db
        .functions()
        .create("s", minimal("bad-id", "x = 1"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidName { .. }));

    let err = db.functions().create("s", minimal("empty", "")).unwrap_err();
    assert_eq!(err.http_status(), 400);

    let mut slow = minimal("slow", "x = 1");
    slow.timeout = MAX_TIMEOUT_MS + 1;
    let err = db.functions().create("s", slow).unwrap_err();
    assert!(err.to_string().contains("30000"));

    // Syntax errors are caught before save
    let err = db
        .functions()
        .create("s", minimal("broken", "this is not lua ((("))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCode { .. }));
    db.close();
}

#[test]
fn create_rejects_sandbox_escapes_statically() {
    let (_dir, db) = open();
    for code in [
        "require('os')",
        "REQUIRE('x')",
        "dofile('/etc/passwd')",
        "loadfile('x')",
        "load('return 1')()",
    ] {
        let err = db.functions().create("s", minimal("esc", code)).unwrap_err();
        assert!(
            matches!(err, Error::InvalidCode { .. }),
            "pattern not rejected: {code}"
        );
        assert!(err.to_string().contains("dangerous pattern"));
    }
    db.close();
}

#[test]
fn get_list_delete() {
    let (_dir, db) = open();
    db.functions().create("s", minimal("a", "x = 1")).unwrap();
    db.functions().create("s", minimal("b", "x = 2")).unwrap();

    let got = db.functions().get("s", "a").unwrap();
    assert_eq!(got.id, "a");
    assert_eq!(got.code, "x = 1");

    let mut ids: Vec<String> = db
        .functions()
        .list("s")
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);

    db.functions().delete("s", "a").unwrap();
    assert!(matches!(
        db.functions().get("s", "a").unwrap_err(),
        Error::FunctionNotFound { .. }
    ));
    // Idempotent
    db.functions().delete("s", "a").unwrap();
    db.close();
}

#[test]
fn update_preserves_stats_unless_supplied() {
    let (_dir, db) = open();
    db.functions()
        .create("s", minimal("counted", "http_status = 200"))
        .unwrap();
    db.runtime().run("s", "counted", json!({})).unwrap();
    db.store().background().drain();

    let mut updated = minimal("counted", "http_status = 204");
    updated.name = "renamed".into();
    let saved = db.functions().update("s", updated).unwrap();
    assert_eq!(saved.name, "renamed");
    assert_eq!(saved.code, "http_status = 204");
    assert_eq!(saved.stats.unwrap().total_executions, 1);

    let err = db
        .functions()
        .update("s", minimal("never_created", "x = 1"))
        .unwrap_err();
    assert!(matches!(err, Error::FunctionNotFound { .. }));
    db.close();
}

#[test]
fn export_strips_stats_and_meta() {
    let (_dir, db) = open();
    db.functions().create("s", minimal("one", "x = 1")).unwrap();
    db.functions().create("s", minimal("two", "x = 2")).unwrap();

    let single = db.functions().export_one("s", "one").unwrap();
    assert_eq!(single.version, "1.0");
    let f = single.function.unwrap();
    assert!(f.stats.is_none());
    assert!(f.meta.is_none());

    let all = db.functions().export_all("s").unwrap();
    assert_eq!(all.set.as_deref(), Some("s"));
    let functions = all.functions.unwrap();
    assert_eq!(functions.len(), 2);
    assert!(functions.iter().all(|f| f.stats.is_none()));
    db.close();
}

#[test]
fn import_reports_per_id_outcomes() {
    let (_dir, db) = open();
    db.functions()
        .create("s", minimal("existing", "x = 1"))
        .unwrap();

    let result = db
        .functions()
        .import(
            "s",
            vec![
                minimal("existing", "x = 99"),
                minimal("fresh", "x = 2"),
                minimal("bad id!", "x = 3"),
                minimal("evil", "require('os')"),
            ],
            ImportOptions {
                overwrite: false,
                validate: true,
            },
        )
        .unwrap();

    assert_eq!(result.imported, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.failed, 2);

    let by_id = |id: &str| result.details.iter().find(|d| d.id == id).unwrap();
    assert_eq!(by_id("existing").status, "skipped");
    assert_eq!(by_id("fresh").status, "imported");
    assert_eq!(by_id("bad id!").status, "failed");
    assert_eq!(by_id("evil").status, "failed");

    // Skipped: the stored code is untouched
    assert_eq!(db.functions().get("s", "existing").unwrap().code, "x = 1");
    db.close();
}

#[test]
fn import_with_overwrite_replaces_and_keeps_stats() {
    let (_dir, db) = open();
    db.functions()
        .create("s", minimal("fn", "http_status = 200"))
        .unwrap();
    db.runtime().run("s", "fn", json!({})).unwrap();
    db.store().background().drain();

    let result = db
        .functions()
        .import(
            "s",
            vec![minimal("fn", "http_status = 204")],
            ImportOptions {
                overwrite: true,
                validate: true,
            },
        )
        .unwrap();
    assert_eq!(result.imported, 1);

    let current = db.functions().get("s", "fn").unwrap();
    assert_eq!(current.code, "http_status = 204");
    assert_eq!(current.stats.unwrap().total_executions, 1);
    db.close();
}

#[test]
fn functions_live_in_reserved_collection() {
    let (_dir, db) = open();
    db.functions().create("s", minimal("fx", "x = 1")).unwrap();

    // Visible in the reserved collection through the document surface
    let page = db
        .documents()
        .query("s", "_functions", &Default::default())
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].meta.id, "fx");
    db.close();
}
