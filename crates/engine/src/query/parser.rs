//! Filter parsing: `{path: {op: value}}` into compiled WHERE clauses.

use super::operators::{self, Fragment};
use docset_core::path::normalize_path;
use docset_core::{Error, Result};
use serde_json::Value;

/// A parsed filter: compiled clauses (ANDed together) plus the normalized
/// paths it references, for index-usage accounting.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub clauses: Vec<Fragment>,
    pub paths: Vec<String>,
}

impl Filter {
    /// A filter with no clauses; matches every row of the collection.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.paths.is_empty()
    }
}

/// Parse a raw `where` string. Blank input is the no-op filter.
pub fn parse_str(raw: &str) -> Result<Filter> {
    if raw.trim().is_empty() {
        return Ok(Filter::empty());
    }
    let value: Value = serde_json::from_str(raw).map_err(|_| malformed())?;
    parse(&value)
}

/// Parse an already-decoded filter value.
pub fn parse(value: &Value) -> Result<Filter> {
    if value.is_null() {
        return Ok(Filter::empty());
    }
    let object = value.as_object().ok_or_else(malformed)?;

    let mut filter = Filter::empty();
    for (path, ops) in object {
        let ops = ops.as_object().ok_or_else(malformed)?;
        let json_path = normalize_path(path);
        let expr = format!("json_extract(data, '{json_path}')");
        for (op, operand) in ops {
            filter.clauses.push(operators::compile(op, &expr, operand)?);
        }
        filter.paths.push(json_path);
    }
    Ok(filter)
}

fn malformed() -> Error {
    Error::MalformedFilter {
        reason: "expected a JSON object where keys are field paths and values are operator objects"
            .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_inputs_are_noop() {
        assert!(parse_str("").unwrap().is_empty());
        assert!(parse_str("   ").unwrap().is_empty());
        assert!(parse(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn single_clause() {
        let f = parse(&json!({"age": {"$gte": 30}})).unwrap();
        assert_eq!(f.clauses.len(), 1);
        assert_eq!(f.clauses[0].sql, "json_extract(data, '$.age') >= ?");
        assert_eq!(f.paths, vec!["$.age"]);
    }

    #[test]
    fn multiple_ops_on_one_path_and_together() {
        let f = parse(&json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        assert_eq!(f.clauses.len(), 2);
        assert_eq!(f.paths.len(), 1);
    }

    #[test]
    fn dotted_and_prefixed_paths_normalize() {
        let a = parse(&json!({"user.email": {"$eq": "a@b.c"}})).unwrap();
        let b = parse(&json!({"$.user.email": {"$eq": "a@b.c"}})).unwrap();
        assert_eq!(a.clauses[0].sql, b.clauses[0].sql);
        assert_eq!(a.paths, vec!["$.user.email"]);
    }

    #[test]
    fn malformed_shapes() {
        assert!(matches!(
            parse_str("not json").unwrap_err(),
            Error::MalformedFilter { .. }
        ));
        assert!(matches!(
            parse(&json!([1, 2])).unwrap_err(),
            Error::MalformedFilter { .. }
        ));
        // A bare value where an operator object is required
        assert!(matches!(
            parse(&json!({"age": 30})).unwrap_err(),
            Error::MalformedFilter { .. }
        ));
    }

    #[test]
    fn unknown_operator_is_distinct_from_malformed() {
        assert!(matches!(
            parse(&json!({"age": {"$regex": "x"}})).unwrap_err(),
            Error::UnsupportedOperator { .. }
        ));
    }

    #[test]
    fn quoted_path_segment_is_escaped() {
        let f = parse(&json!({"o'brien": {"$eq": 1}})).unwrap();
        assert_eq!(f.clauses[0].sql, "json_extract(data, '$.o''brien') = ?");
    }
}
