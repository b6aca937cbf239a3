//! Product catalog batch query engine.
//!
//! This module provides:
//! - AttributeRegistry: static schema of addressable product fields
//! - FilterExpressionParser: filter strings to validated SQL conditions
//! - JoinResolver / QueryCompiler: SQL generation
//! - PaginatedFetcher: execution with a chunked fallback
//! - ResultDecoder: tagged column values to JSON records
//! - CatalogService: the request pipeline tying it together

pub mod compress;
pub mod decoder;
pub mod executor;
pub mod fetcher;
pub mod filter;
pub mod joins;
pub mod query_builder;
pub mod registry;
mod service;
pub mod types;

pub use compress::{Compressor, GzipCompressor};
pub use decoder::{JsonDecoders, ResultDecoder};
pub use executor::{ExecutionError, PgStatementExecutor, StatementExecutor};
pub use fetcher::{FetchError, FetchOutcome, FetchPath, PaginatedFetcher};
pub use filter::{FilterError, FilterExpressionParser, ParsedFilter};
pub use joins::{JoinPlan, JoinResolver};
pub use query_builder::{CompileError, CompiledQuery, QueryCompiler};
pub use registry::{AttributeRegistry, RegistryError, product_catalog};
pub use service::{
    CatalogService, ServiceError, ValidatedRequest, ValidationError, compile_request,
    validate_request,
};
pub use types::{BatchRequest, BatchResponse, Record, StatementOutput, TaggedRow, TaggedValue};
