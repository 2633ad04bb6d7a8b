//! Index lifecycle integration tests: async builds, idempotence, usage
//! accounting, restart sweep.

use docset_core::Error;
use docset_engine::{Documents, IndexStatus, Indexes, QueryParams, Store, StoreConfig};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Arc<Store> {
    Store::open(StoreConfig::new(dir.path().join("idx.db"))).unwrap()
}

fn seed(store: &Arc<Store>) {
    let docs = Documents::new(store.clone());
    docs.create("s", "c", json!({"user": {"email": "a@b.c"}, "age": 30}))
        .unwrap();
    docs.create("s", "c", json!({"user": {"email": "d@e.f"}, "age": 40}))
        .unwrap();
}

#[test]
fn create_builds_in_background_and_becomes_ready() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());

    let ticket = indexes.create("s", "c", ["user.email"]).unwrap();
    assert_eq!(ticket.status, IndexStatus::Creating);
    assert!(ticket.name.starts_with("idx_c_"));

    store.background().drain();

    let info = indexes.status("s", "c", ["user.email"]).unwrap();
    assert_eq!(info.status, IndexStatus::Ready);
    assert!(info.error.is_none());
    assert_eq!(info.paths, vec!["$.user.email"]);

    // The physical index exists
    let conn = store.conn().unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [&ticket.name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 1);
    store.close();
}

#[test]
fn dotted_and_prefixed_paths_name_the_same_index() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());

    let a = indexes.create("s", "c", ["user.email"]).unwrap();
    let b = indexes.create("s", "c", ["$.user.email"]).unwrap();
    assert_eq!(a.name, b.name);

    store.background().drain();
    let rows = indexes.list("s", "c").unwrap();
    assert_eq!(rows.len(), 1, "repeated create must leave one metadata row");
    store.close();
}

#[test]
fn multi_path_index_is_order_insensitive() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());

    let a = indexes.create("s", "c", ["age", "user.email"]).unwrap();
    let b = indexes.create("s", "c", ["user.email", "age"]).unwrap();
    assert_eq!(a.name, b.name);
    store.close();
}

#[test]
fn create_rejects_paths_absent_from_every_document() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());

    let err = indexes.create("s", "c", ["no.such.path"]).unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert!(err.to_string().contains("no.such.path"));

    let err = indexes.create("s", "c", Vec::<String>::new()).unwrap_err();
    assert_eq!(err.http_status(), 400);
    store.close();
}

#[test]
fn status_of_unknown_index_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());
    let err = indexes.status("s", "c", ["age"]).unwrap_err();
    assert!(matches!(err, Error::IndexNotFound));
    assert_eq!(err.http_status(), 404);
    store.close();
}

#[test]
fn delete_removes_index_and_metadata_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());

    let ticket = indexes.create("s", "c", ["age"]).unwrap();
    store.background().drain();

    let name = indexes.delete("s", "c", ["age"]).unwrap();
    assert_eq!(name, ticket.name);
    // Again: still fine
    indexes.delete("s", "c", ["age"]).unwrap();

    assert!(matches!(
        indexes.status("s", "c", ["age"]).unwrap_err(),
        Error::IndexNotFound
    ));
    let conn = store.conn().unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [&name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(count, 0);
    store.close();
}

#[test]
fn usage_counts_only_exact_path_coverage() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());
    let docs = Documents::new(store.clone());

    indexes.create("s", "c", ["age"]).unwrap();
    indexes.create("s", "c", ["age", "user.email"]).unwrap();
    store.background().drain();

    // Query touching only $.age: credits the single-path index, not the
    // two-path one.
    docs.query(
        "s",
        "c",
        &QueryParams {
            filter: Some(json!({"age": {"$gte": 0}})),
            ..Default::default()
        },
    )
    .unwrap();
    store.background().drain();

    let single = indexes.status("s", "c", ["age"]).unwrap();
    let double = indexes.status("s", "c", ["age", "user.email"]).unwrap();
    assert_eq!(single.usage_count, 1);
    assert!(single.last_used_at.is_some());
    assert_eq!(double.usage_count, 0);

    // Query touching both paths credits both indexes.
    docs.query(
        "s",
        "c",
        &QueryParams {
            filter: Some(json!({"age": {"$gte": 0}, "user.email": {"$notNull": true}})),
            ..Default::default()
        },
    )
    .unwrap();
    store.background().drain();

    let single = indexes.status("s", "c", ["age"]).unwrap();
    let double = indexes.status("s", "c", ["age", "user.email"]).unwrap();
    assert_eq!(single.usage_count, 2);
    assert_eq!(double.usage_count, 1);
    store.close();
}

#[test]
fn unfiltered_queries_do_not_touch_usage() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());
    let docs = Documents::new(store.clone());

    indexes.create("s", "c", ["age"]).unwrap();
    store.background().drain();

    docs.query("s", "c", &QueryParams::default()).unwrap();
    store.background().drain();

    assert_eq!(indexes.status("s", "c", ["age"]).unwrap().usage_count, 0);
    store.close();
}

#[test]
fn creating_rows_are_swept_to_error_on_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        seed(&store);
        // Simulate a build that never finished: plant a creating row by hand.
        let conn = store.conn().unwrap();
        conn.execute(
            "INSERT INTO idx_metadata (set_name, collection_name, idx_name, paths, status, created_at)
             VALUES ('s', 'c', 'idx_c_deadbeef00', '$.age', 'creating', 0)",
            [],
        )
        .unwrap();
        drop(conn);
        store.close();
    }

    let store = open(&dir);
    let conn = store.conn().unwrap();
    let (status, error): (String, String) = conn
        .query_row(
            "SELECT status, error FROM idx_metadata WHERE idx_name = 'idx_c_deadbeef00'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "error");
    assert!(error.contains("interrupted"));
    store.close();
}

#[test]
fn list_returns_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(&store);
    let indexes = Indexes::new(store.clone());

    indexes.create("s", "c", ["age"]).unwrap();
    indexes.create("s", "c", ["user.email"]).unwrap();
    store.background().drain();

    let rows = indexes.list("s", "c").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].created_at >= rows[1].created_at);
    store.close();
}
