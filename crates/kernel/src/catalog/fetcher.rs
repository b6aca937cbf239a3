//! Paginated fetching.
//!
//! A compiled query is first executed in one shot. When the executor reports
//! the result as oversized, the fetcher counts the rows and re-reads them in
//! fixed-size chunks, in order. Any failure on the fallback path is fatal.

use thiserror::Error;
use tracing::{debug, warn};

use super::executor::{ExecutionError, StatementExecutor};
use super::query_builder::CompiledQuery;
use super::types::TaggedRow;

/// Rows per fallback chunk.
pub const FALLBACK_CHUNK_SIZE: u64 = 1000;

/// Unrecoverable fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("statement execution failed")]
    Direct(#[source] ExecutionError),

    #[error("fallback count query failed")]
    Count(#[source] ExecutionError),

    /// The count query answered with something other than one non-negative integer.
    #[error("fallback count query returned {0}")]
    InvalidCount(String),

    #[error("fallback chunk at offset {offset} failed")]
    Chunk {
        offset: u64,
        #[source]
        source: ExecutionError,
    },
}

/// Which path produced the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPath {
    Direct,
    Fallback { total: u64, chunks: usize },
}

/// Rows in statement order plus the path taken.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub rows: Vec<TaggedRow>,
    pub path: FetchPath,
}

/// Executes compiled queries with a chunked fallback.
pub struct PaginatedFetcher<'e> {
    executor: &'e dyn StatementExecutor,
    chunk_size: u64,
}

impl<'e> PaginatedFetcher<'e> {
    pub fn new(executor: &'e dyn StatementExecutor) -> Self {
        Self {
            executor,
            chunk_size: FALLBACK_CHUNK_SIZE,
        }
    }

    /// Override the fallback chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn fetch(&self, query: &CompiledQuery) -> Result<FetchOutcome, FetchError> {
        match self.executor.execute(&query.sql, &[]).await {
            Ok(output) => Ok(FetchOutcome {
                rows: output.records,
                path: FetchPath::Direct,
            }),
            Err(err) if err.is_oversized() => {
                warn!(
                    executor = self.executor.name(),
                    error = %err,
                    "single-shot fetch too large; falling back to chunked fetch"
                );
                self.fetch_chunked(query).await
            }
            Err(err) => Err(FetchError::Direct(err)),
        }
    }

    async fn fetch_chunked(&self, query: &CompiledQuery) -> Result<FetchOutcome, FetchError> {
        let total = self.count(query).await?;
        let base_offset = query.pagination.map_or(0, |w| w.offset);

        let mut rows = Vec::new();
        let mut chunks = 0;
        let mut cursor = 0u64;
        while cursor <= total {
            let limit = match query.pagination {
                Some(window) => self.chunk_size.min(window.limit.saturating_sub(cursor)),
                None => self.chunk_size,
            };
            let offset = base_offset + cursor;

            let output = self
                .executor
                .execute(&query.chunk_sql(limit, offset), &[])
                .await
                .map_err(|source| FetchError::Chunk { offset, source })?;
            debug!(offset, fetched = output.records.len(), "fetched fallback chunk");

            rows.extend(output.records);
            chunks += 1;
            cursor += self.chunk_size;
        }

        Ok(FetchOutcome {
            rows,
            path: FetchPath::Fallback { total, chunks },
        })
    }

    async fn count(&self, query: &CompiledQuery) -> Result<u64, FetchError> {
        let output = self
            .executor
            .execute(&query.count_sql(), &[])
            .await
            .map_err(FetchError::Count)?;

        let Some(value) = output.records.first().and_then(|row| row.first()) else {
            return Err(FetchError::InvalidCount("no rows".to_string()));
        };
        value
            .as_i64()
            .and_then(|total| u64::try_from(total).ok())
            .ok_or_else(|| FetchError::InvalidCount(format!("{value:?}")))
    }
}
