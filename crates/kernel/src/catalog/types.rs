//! Catalog wire types.
//!
//! Provides type definitions shared by the compiler pipeline:
//! - BatchRequest: the inbound request object
//! - TaggedValue: one column value as returned by the execution service
//! - BatchResponse: decoded records, compressed payload, or a validation message

use serde::{Deserialize, Serialize};

/// Value type of an addressable attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    String,
    Boolean,
    Json,
    Float,
    IntArray,
    Date,
}

/// SQL join kinds used by the catalog schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    #[default]
    LeftOuter,
}

impl JoinKind {
    /// SQL keyword(s) preceding `join`.
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::LeftOuter => "left outer",
        }
    }
}

/// Batch fetch request.
///
/// `required_fields` stays loosely typed so that a non-list value can be
/// reported with a descriptive message instead of a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRequest {
    /// External attribute names to project, in output order.
    #[serde(default)]
    pub required_fields: Option<serde_json::Value>,

    /// Boolean filter expression, e.g. `(id__exact=5)`.
    #[serde(default)]
    pub filter_string: Option<String>,

    /// Comma-separated `attr[ asc|desc]` terms.
    #[serde(default)]
    pub order_by: Option<String>,

    /// Optional limit/offset window.
    #[serde(default)]
    pub pagination_filters: Option<PaginationFilters>,

    /// Return the records gzip+base64 encoded.
    #[serde(default)]
    pub compress_response: Option<bool>,
}

/// Pagination parameters. Both must be present for a window to apply.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationFilters {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl PaginationFilters {
    /// The `(limit, offset)` window, only when both are supplied.
    pub fn window(&self) -> Option<Pagination> {
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => Some(Pagination { limit, offset }),
            _ => None,
        }
    }
}

/// A complete limit/offset window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

/// A column value tagged with its concrete kind.
///
/// Serializes in the `{"longValue": 5}` / `{"isNull": true}` shape used by
/// data-API style execution services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaggedValue {
    #[serde(rename = "longValue")]
    Long(i64),
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "stringValue")]
    String(String),
    #[serde(rename = "booleanValue")]
    Boolean(bool),
    #[serde(rename = "isNull")]
    Null(bool),
}

impl TaggedValue {
    pub fn null() -> Self {
        TaggedValue::Null(true)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TaggedValue::Null(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TaggedValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Approximate encoded size, used for response size limits.
    pub fn encoded_len(&self) -> usize {
        match self {
            TaggedValue::Long(_) | TaggedValue::Double(_) => 8,
            TaggedValue::String(s) => s.len(),
            TaggedValue::Boolean(_) | TaggedValue::Null(_) => 1,
        }
    }
}

/// One row of tagged column values.
pub type TaggedRow = Vec<TaggedValue>;

/// Output of a single statement execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementOutput {
    #[serde(default)]
    pub records: Vec<TaggedRow>,
}

/// One decoded output record keyed by external attribute name.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Outcome of a batch request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchResponse {
    /// Decoded records in row order.
    Records(Vec<Record>),
    /// Records serialized, gzip-compressed and base64-encoded.
    Compressed(String),
    /// Validation failure message.
    Invalid(String),
}
