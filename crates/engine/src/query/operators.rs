//! The filter operator table.
//!
//! Each operator compiles to a SQL fragment over an already-normalized
//! `json_extract` expression plus the values to bind. Only operators, SQL
//! keywords, and the quoted path ever reach the SQL string; every user
//! value is a bound parameter.

use docset_core::{Error, Result};
use serde_json::Value;

/// A compiled clause: SQL fragment plus its bound values, in order.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Compile one `(operator, value)` pair against `expr`.
///
/// `expr` is the SQL expression the operator applies to, e.g.
/// `json_extract(data, '$.age')`.
pub fn compile(op: &str, expr: &str, value: &Value) -> Result<Fragment> {
    match op {
        "$eq" => comparison(op, "=", expr, value),
        "$ne" => comparison(op, "!=", expr, value),
        "$gt" => comparison(op, ">", expr, value),
        "$gte" => comparison(op, ">=", expr, value),
        "$lt" => comparison(op, "<", expr, value),
        "$lte" => comparison(op, "<=", expr, value),

        "$like" => like(op, expr, value, Anchor::None, false),
        "$ilike" => like(op, expr, value, Anchor::None, true),
        "$startsWith" => like(op, expr, value, Anchor::Prefix, false),
        "$endsWith" => like(op, expr, value, Anchor::Suffix, false),
        "$contains" => like(op, expr, value, Anchor::Both, false),
        "$istartsWith" => like(op, expr, value, Anchor::Prefix, true),
        "$iendsWith" => like(op, expr, value, Anchor::Suffix, true),
        "$icontains" => like(op, expr, value, Anchor::Both, true),

        "$in" => membership(op, expr, value, false),
        "$nin" => membership(op, expr, value, true),

        "$between" => between(op, expr, value),

        "$isNull" => Ok(Fragment {
            sql: format!("{expr} IS NULL"),
            params: Vec::new(),
        }),
        "$notNull" => Ok(Fragment {
            sql: format!("{expr} IS NOT NULL"),
            params: Vec::new(),
        }),

        _ => Err(Error::UnsupportedOperator { op: op.to_string() }),
    }
}

enum Anchor {
    None,
    Prefix,
    Suffix,
    Both,
}

fn comparison(op: &str, sql_op: &str, expr: &str, value: &Value) -> Result<Fragment> {
    require_scalar(op, value)?;
    Ok(Fragment {
        sql: format!("{expr} {sql_op} ?"),
        params: vec![value.clone()],
    })
}

fn like(op: &str, expr: &str, value: &Value, anchor: Anchor, fold_case: bool) -> Result<Fragment> {
    let s = value.as_str().ok_or(Error::OperandShape {
        op: op.to_string(),
        expected: "a string",
    })?;
    // Anchors are concatenated server-side so the pattern itself stays a
    // bound parameter.
    let pattern = match anchor {
        Anchor::None => s.to_string(),
        Anchor::Prefix => format!("{s}%"),
        Anchor::Suffix => format!("%{s}"),
        Anchor::Both => format!("%{s}%"),
    };
    let sql = if fold_case {
        format!("LOWER(CAST({expr} AS TEXT)) LIKE LOWER(?)")
    } else {
        format!("CAST({expr} AS TEXT) LIKE ?")
    };
    Ok(Fragment {
        sql,
        params: vec![Value::String(pattern)],
    })
}

fn membership(op: &str, expr: &str, value: &Value, negated: bool) -> Result<Fragment> {
    let items = value.as_array().ok_or(Error::OperandShape {
        op: op.to_string(),
        expected: "an array",
    })?;
    if items.is_empty() {
        // $in [] matches nothing; $nin [] matches everything.
        return Ok(Fragment {
            sql: if negated { "1 = 1" } else { "1 = 0" }.to_string(),
            params: Vec::new(),
        });
    }
    for item in items {
        require_scalar(op, item)?;
    }
    let placeholders = vec!["?"; items.len()].join(", ");
    let keyword = if negated { "NOT IN" } else { "IN" };
    Ok(Fragment {
        sql: format!("{expr} {keyword} ({placeholders})"),
        params: items.clone(),
    })
}

fn between(op: &str, expr: &str, value: &Value) -> Result<Fragment> {
    let items = value.as_array().ok_or(Error::OperandShape {
        op: op.to_string(),
        expected: "a two-element array [min, max]",
    })?;
    if items.len() != 2 {
        return Err(Error::OperandShape {
            op: op.to_string(),
            expected: "a two-element array [min, max]",
        });
    }
    require_scalar(op, &items[0])?;
    require_scalar(op, &items[1])?;
    Ok(Fragment {
        sql: format!("{expr} BETWEEN ? AND ?"),
        params: vec![items[0].clone(), items[1].clone()],
    })
}

fn require_scalar(op: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(Error::OperandShape {
            op: op.to_string(),
            expected: "a scalar value",
        }),
        _ => Ok(()),
    }
}
