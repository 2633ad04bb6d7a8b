//! SELECT/COUNT/DELETE builders sharing one WHERE.

use super::parser::Filter;
use super::to_sql_param;
use crate::database::table_name;
use docset_core::path::normalize_path;
use rusqlite::types::Value as SqlValue;

/// Inputs for building a collection query.
#[derive(Debug, Clone, Copy)]
pub struct QueryOpts<'a> {
    pub set: &'a str,
    pub collection: &'a str,
    pub filter: &'a Filter,
    /// `created_at`/`updated_at` sort the physical column; any other value
    /// is treated as a JSON path and sorts the extracted value.
    pub order_by: Option<&'a str>,
    /// Emitted as `LIMIT n` when `> 0`.
    pub limit: i64,
    /// Emitted as `OFFSET m` when `>= 0`, and only when a limit is set.
    pub offset: i64,
}

impl<'a> QueryOpts<'a> {
    /// Unordered, unpaged query over a collection.
    pub fn all(set: &'a str, collection: &'a str, filter: &'a Filter) -> Self {
        Self {
            set,
            collection,
            filter,
            order_by: None,
            limit: 0,
            offset: -1,
        }
    }
}

/// Build the page SELECT: `id, data, created_at, updated_at` rows.
pub fn build_select(opts: QueryOpts<'_>) -> (String, Vec<SqlValue>) {
    let (mut sql, params) = base(
        format!(
            "SELECT id, data, created_at, updated_at FROM {} WHERE collection = ?",
            table_name(opts.set)
        ),
        opts,
    );
    if let Some(order) = opts.order_by.filter(|o| !o.trim().is_empty()) {
        if order == "created_at" || order == "updated_at" {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        } else {
            sql.push_str(&format!(
                " ORDER BY json_extract(data, '{}')",
                normalize_path(order)
            ));
        }
    }
    if opts.limit > 0 {
        sql.push_str(&format!(" LIMIT {}", opts.limit));
        if opts.offset >= 0 {
            sql.push_str(&format!(" OFFSET {}", opts.offset));
        }
    }
    (sql, params)
}

/// Build the unpaged COUNT over the same WHERE.
pub fn build_count(opts: QueryOpts<'_>) -> (String, Vec<SqlValue>) {
    base(
        format!(
            "SELECT COUNT(*) FROM {} WHERE collection = ?",
            table_name(opts.set)
        ),
        opts,
    )
}

/// Build a DELETE over the same WHERE (filtered collection delete).
pub fn build_delete(opts: QueryOpts<'_>) -> (String, Vec<SqlValue>) {
    base(
        format!(
            "DELETE FROM {} WHERE collection = ?",
            table_name(opts.set)
        ),
        opts,
    )
}

fn base(mut sql: String, opts: QueryOpts<'_>) -> (String, Vec<SqlValue>) {
    let mut params: Vec<SqlValue> = vec![SqlValue::Text(opts.collection.to_string())];
    for clause in &opts.filter.clauses {
        sql.push_str(" AND ");
        sql.push_str(&clause.sql);
        params.extend(clause.params.iter().map(to_sql_param));
    }
    (sql, params)
}
