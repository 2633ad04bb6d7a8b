//! Document and response shapes shared between the engine and adapters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Synthetic per-document metadata, always derived from the row and never
/// stored inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Server-assigned, lexicographically sortable id.
    pub id: String,
    /// Unix seconds at creation.
    pub created_at: i64,
    /// Unix seconds at last write; `>= created_at`.
    pub updated_at: i64,
}

/// A document row as returned by the store: payload plus row metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// The stored JSON object.
    pub data: Map<String, Value>,
    /// Row identity and timestamps.
    pub meta: Meta,
}

impl Document {
    /// Payload with `_meta` projected in, as the wire surface renders it.
    pub fn with_meta(&self) -> Map<String, Value> {
        let mut out = self.data.clone();
        out.insert(
            "_meta".to_string(),
            serde_json::to_value(&self.meta).unwrap_or(Value::Null),
        );
        out
    }

    /// Payload either with or without `_meta`, per the caller's choice.
    pub fn render(&self, include_meta: bool) -> Map<String, Value> {
        if include_meta {
            self.with_meta()
        } else {
            self.data.clone()
        }
    }
}

/// Result of a collection query: one page of documents plus the unpaged
/// total (the `X-Total-Items` contract).
#[derive(Debug, Clone, Serialize)]
pub struct QueryPage {
    /// Matching documents, at most `limit` of them when a limit was set.
    pub items: Vec<Document>,
    /// Count over the same WHERE, ignoring limit/offset.
    pub total: i64,
    /// `EXPLAIN QUERY PLAN` text, present only when the caller asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

/// The uniform wire envelope: `{success, data, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Operation payload, `null` on failure.
    pub data: Value,
    /// Error message, `null` on success.
    pub error: Option<String>,
}

impl Envelope {
    /// Successful envelope around a serializable payload.
    pub fn ok(data: impl Serialize) -> Self {
        Envelope {
            success: true,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            error: None,
        }
    }

    /// Failure envelope with a message and no data.
    pub fn err(message: impl Into<String>) -> Self {
        Envelope {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }
}
