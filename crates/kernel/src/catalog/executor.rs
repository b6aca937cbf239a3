//! Statement execution backends.
//!
//! The compiler pipeline talks to the database through [`StatementExecutor`],
//! which returns rows as tagged column values. The PostgreSQL backend
//! enforces a response size limit and reports oversized results with a
//! distinct error kind so callers can fall back to chunked fetching.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo};
use thiserror::Error;
use tracing::debug;

use super::types::{StatementOutput, TaggedRow, TaggedValue};

/// Execution failures.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The result is too large to return in one response.
    #[error("response too large: {0}")]
    Oversized(String),

    #[error("unsupported column type {type_name} for column '{column}'")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("execution failed: {0}")]
    Failed(String),
}

impl ExecutionError {
    /// Whether a chunked re-fetch may succeed where this call failed.
    pub fn is_oversized(&self) -> bool {
        matches!(self, ExecutionError::Oversized(_))
    }
}

/// Request/response SQL execution service.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute `sql` with positional parameters.
    async fn execute(
        &self,
        sql: &str,
        params: &[TaggedValue],
    ) -> Result<StatementOutput, ExecutionError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// How a PostgreSQL column is read into a [`TaggedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bool,
    Text,
    Json,
    IntArray,
    Timestamp,
    TimestampTz,
    Date,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name {
            "INT2" => ColumnKind::Int2,
            "INT4" => ColumnKind::Int4,
            "INT8" => ColumnKind::Int8,
            "FLOAT4" => ColumnKind::Float4,
            "FLOAT8" => ColumnKind::Float8,
            "BOOL" => ColumnKind::Bool,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => ColumnKind::Text,
            "JSON" | "JSONB" => ColumnKind::Json,
            "INT4[]" | "INT8[]" => ColumnKind::IntArray,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            "DATE" => ColumnKind::Date,
            _ => return None,
        };
        Some(kind)
    }
}

fn tagged<T>(value: Option<T>, wrap: impl FnOnce(T) -> TaggedValue) -> TaggedValue {
    value.map(wrap).unwrap_or_else(TaggedValue::null)
}

fn read_column(row: &PgRow, idx: usize, kind: ColumnKind) -> Result<TaggedValue, sqlx::Error> {
    let value = match kind {
        ColumnKind::Int2 => tagged(row.try_get::<Option<i16>, _>(idx)?, |v| {
            TaggedValue::Long(i64::from(v))
        }),
        ColumnKind::Int4 => tagged(row.try_get::<Option<i32>, _>(idx)?, |v| {
            TaggedValue::Long(i64::from(v))
        }),
        ColumnKind::Int8 => tagged(row.try_get::<Option<i64>, _>(idx)?, TaggedValue::Long),
        ColumnKind::Float4 => tagged(row.try_get::<Option<f32>, _>(idx)?, |v| {
            TaggedValue::Double(f64::from(v))
        }),
        ColumnKind::Float8 => tagged(row.try_get::<Option<f64>, _>(idx)?, TaggedValue::Double),
        ColumnKind::Bool => tagged(row.try_get::<Option<bool>, _>(idx)?, TaggedValue::Boolean),
        ColumnKind::Text => tagged(row.try_get::<Option<String>, _>(idx)?, TaggedValue::String),
        ColumnKind::Json => tagged(
            row.try_get::<Option<serde_json::Value>, _>(idx)?,
            |v| TaggedValue::String(v.to_string()),
        ),
        ColumnKind::IntArray => {
            let items = match row.try_get::<Option<Vec<i64>>, _>(idx) {
                Ok(items) => items,
                Err(_) => row
                    .try_get::<Option<Vec<i32>>, _>(idx)?
                    .map(|items| items.into_iter().map(i64::from).collect()),
            };
            tagged(items, |items| {
                TaggedValue::String(serde_json::Value::from(items).to_string())
            })
        }
        ColumnKind::Timestamp => tagged(
            row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)?,
            |v| TaggedValue::String(v.to_string()),
        ),
        ColumnKind::TimestampTz => tagged(
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?,
            |v| TaggedValue::String(v.naive_utc().to_string()),
        ),
        ColumnKind::Date => tagged(row.try_get::<Option<chrono::NaiveDate>, _>(idx)?, |v| {
            TaggedValue::String(v.to_string())
        }),
    };
    Ok(value)
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [TaggedValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            TaggedValue::Long(v) => query.bind(*v),
            TaggedValue::Double(v) => query.bind(*v),
            TaggedValue::String(v) => query.bind(v.as_str()),
            TaggedValue::Boolean(v) => query.bind(*v),
            TaggedValue::Null(_) => query.bind(None::<String>),
        };
    }
    query
}

/// Running size of a response against its byte limit.
#[derive(Debug)]
struct ResponseBudget {
    limit: usize,
    used: usize,
    rows: usize,
}

impl ResponseBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            used: 0,
            rows: 0,
        }
    }

    /// Account for one more row, failing as soon as the limit is passed.
    fn charge(&mut self, record: &TaggedRow) -> Result<(), ExecutionError> {
        self.used += record.iter().map(TaggedValue::encoded_len).sum::<usize>();
        self.rows += 1;
        if self.used > self.limit {
            return Err(ExecutionError::Oversized(format!(
                "exceeded {} bytes after {} rows",
                self.limit, self.rows
            )));
        }
        Ok(())
    }
}

/// PostgreSQL-backed executor with a response size limit.
pub struct PgStatementExecutor {
    pool: PgPool,
    max_response_bytes: usize,
}

impl PgStatementExecutor {
    pub fn new(pool: PgPool, max_response_bytes: usize) -> Self {
        Self {
            pool,
            max_response_bytes,
        }
    }

    fn convert_row(&self, row: &PgRow) -> Result<TaggedRow, ExecutionError> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let type_name = column.type_info().name();
                let kind = ColumnKind::from_type_name(type_name).ok_or_else(|| {
                    ExecutionError::UnsupportedColumn {
                        column: column.name().to_string(),
                        type_name: type_name.to_string(),
                    }
                })?;
                Ok(read_column(row, idx, kind)?)
            })
            .collect()
    }
}

#[async_trait]
impl StatementExecutor for PgStatementExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: &[TaggedValue],
    ) -> Result<StatementOutput, ExecutionError> {
        debug!(sql = %sql, params = params.len(), "executing statement");

        // Rows are read as they arrive; dropping the stream on overflow
        // abandons the rest of the result.
        let mut rows = bind_params(sqlx::query(sql), params).fetch(&self.pool);
        let mut budget = ResponseBudget::new(self.max_response_bytes);
        let mut records = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let record = self.convert_row(&row)?;
            budget.charge(&record)?;
            records.push(record);
        }

        Ok(StatementOutput { records })
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn column_kinds_from_type_names() {
        assert_eq!(ColumnKind::from_type_name("INT4"), Some(ColumnKind::Int4));
        assert_eq!(ColumnKind::from_type_name("VARCHAR"), Some(ColumnKind::Text));
        assert_eq!(ColumnKind::from_type_name("JSONB"), Some(ColumnKind::Json));
        assert_eq!(
            ColumnKind::from_type_name("INT4[]"),
            Some(ColumnKind::IntArray)
        );
        assert_eq!(ColumnKind::from_type_name("NUMERIC"), None);
    }

    #[test]
    fn budget_fails_on_first_row_past_limit() {
        let row = vec![TaggedValue::Long(1), TaggedValue::String("abcd".to_string())];
        let mut budget = ResponseBudget::new(30);

        assert!(budget.charge(&row).is_ok());
        assert!(budget.charge(&row).is_ok());
        let err = budget.charge(&row).unwrap_err();

        assert!(err.is_oversized());
        assert_eq!(err.to_string(), "response too large: exceeded 30 bytes after 3 rows");
    }

    #[test]
    fn budget_allows_exact_limit() {
        let mut budget = ResponseBudget::new(8);
        assert!(budget.charge(&vec![TaggedValue::Double(1.5)]).is_ok());
        assert!(budget.charge(&vec![TaggedValue::Boolean(true)]).is_err());
    }

    #[test]
    fn only_oversized_is_recoverable() {
        assert!(ExecutionError::Oversized("too big".to_string()).is_oversized());
        assert!(!ExecutionError::Failed("syntax error".to_string()).is_oversized());
        assert!(!ExecutionError::Database(sqlx::Error::RowNotFound).is_oversized());
    }
}
