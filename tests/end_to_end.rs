//! End-to-end scenarios through the public facade, mirroring the wire
//! surface's behavior without a transport in the way.

use docset::{Docset, Error, Function, IndexStatus, QueryParams, StoreConfig, SANDBOX_WARNING};
use serde_json::json;
use tempfile::TempDir;

fn open() -> (TempDir, Docset) {
    let dir = TempDir::new().unwrap();
    let db = Docset::open(StoreConfig::new(dir.path().join("e2e.db"))).unwrap();
    (dir, db)
}

#[test]
fn create_then_get() {
    let (_dir, db) = open();
    let created = db
        .documents()
        .create("s", "c", json!({"name": "Alice", "age": 30}))
        .unwrap();

    let fetched = db.documents().get("s", "c", &created.meta.id).unwrap();
    let rendered = fetched.with_meta();
    assert_eq!(rendered["name"], json!("Alice"));
    assert_eq!(rendered["age"], json!(30));
    assert_eq!(rendered["_meta"]["id"], json!(created.meta.id));
    assert_eq!(fetched.meta.created_at, fetched.meta.updated_at);
    db.close();
}

#[test]
fn filtered_query_with_paging() {
    let (_dir, db) = open();
    db.documents().create("s", "c", json!({"age": 25})).unwrap();
    db.documents().create("s", "c", json!({"age": 35})).unwrap();

    let page = db
        .documents()
        .query(
            "s",
            "c",
            &QueryParams {
                filter: Some(json!({"age": {"$gte": 30}})),
                limit: 10,
                offset: -1,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].data["age"], json!(35));
    db.close();
}

#[test]
fn schema_rejects_bad_patch() {
    let (_dir, db) = open();
    let doc = db.documents().create("s", "c", json!({"age": 30})).unwrap();
    db.schemas()
        .set(
            "s",
            "c",
            br#"{"type": "object", "properties": {"age": {"type": "integer", "minimum": 0}}}"#,
        )
        .unwrap();

    let err = db
        .documents()
        .patch("s", "c", &doc.meta.id, json!({"age": -5}))
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    db.close();
}

#[test]
fn async_index_becomes_ready_and_counts_usage() {
    let (_dir, db) = open();
    db.documents()
        .create("s", "c", json!({"user": {"email": "a@b.c"}}))
        .unwrap();

    let ticket = db.indexes().create("s", "c", ["user.email"]).unwrap();
    assert_eq!(ticket.status, IndexStatus::Creating);

    db.store().background().drain();
    let info = db.indexes().status("s", "c", ["user.email"]).unwrap();
    assert_eq!(info.status, IndexStatus::Ready);
    assert_eq!(info.usage_count, 0);

    db.documents()
        .query(
            "s",
            "c",
            &QueryParams {
                filter: Some(json!({"user.email": {"$eq": "a@b.c"}})),
                ..Default::default()
            },
        )
        .unwrap();
    db.store().background().drain();

    let info = db.indexes().status("s", "c", ["user.email"]).unwrap();
    assert_eq!(info.usage_count, 1);
    db.close();
}

#[test]
fn function_commit_and_rollback() {
    let (_dir, db) = open();
    db.functions()
        .create(
            "s",
            Function {
                id: "add".into(),
                code: r#"db.create("carts", {user = "u", total = 0}); http_status = 200"#.into(),
                ..blank()
            },
        )
        .unwrap();
    db.functions()
        .create(
            "s",
            Function {
                id: "bad".into(),
                code: r#"db.create("carts", {user = "v"}); http_status = 400"#.into(),
                ..blank()
            },
        )
        .unwrap();

    let run = db.runtime().run("s", "add", json!({})).unwrap();
    assert_eq!(run.http_status, 200);
    let page = db
        .documents()
        .query(
            "s",
            "carts",
            &QueryParams {
                filter: Some(json!({"user": {"$eq": "u"}})),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.total, 1);

    let run = db.runtime().run("s", "bad", json!({})).unwrap();
    assert_eq!(run.http_status, 400);
    let page = db
        .documents()
        .query(
            "s",
            "carts",
            &QueryParams {
                filter: Some(json!({"user": {"$eq": "v"}})),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.total, 0);
    db.close();
}

#[test]
fn sandbox_persists_nothing() {
    let (_dir, db) = open();
    let run = db
        .runtime()
        .run_sandbox(
            "s",
            r#"db.create("c", {probe = true}); http_status = 200"#,
            json!({}),
            None,
        )
        .unwrap();
    assert_eq!(run.http_status, 200);
    assert_eq!(run.warning.as_deref(), Some(SANDBOX_WARNING));

    let page = db.documents().query("s", "c", &QueryParams::default()).unwrap();
    assert_eq!(page.total, 0);
    db.close();
}

#[test]
fn reserved_field_rejected() {
    let (_dir, db) = open();
    let err = db.documents().create("s", "c", json!({"_secret": 1})).unwrap_err();
    assert!(matches!(err, Error::ReservedField));
    assert_eq!(err.to_string(), "fields starting with '_' are reserved");
    db.close();
}

#[test]
fn sets_overview_reflects_writes() {
    let (_dir, db) = open();
    db.documents().create("a", "c1", json!({"x": 1})).unwrap();
    db.documents().create("a", "c2", json!({"x": 2})).unwrap();
    db.documents().create("b", "c1", json!({"x": 3})).unwrap();

    let summary = db.sets().list().unwrap();
    assert_eq!(summary.total_docs, 3);
    assert_eq!(summary.sets["a"].colls, 2);

    let stats = db.sets().stats("a").unwrap();
    assert_eq!(stats["c1"].count, 1);

    let health = db.health();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
    db.close();
}

fn blank() -> Function {
    Function {
        id: String::new(),
        name: String::new(),
        description: String::new(),
        input_schema: None,
        code: String::new(),
        timeout: 0,
        stats: None,
        meta: None,
    }
}
