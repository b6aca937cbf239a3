//! Catalog batch service.
//!
//! Runs one batch request through the whole pipeline:
//! - request validation (fields, filter, order)
//! - query compilation
//! - fetching, with the chunked fallback
//! - decoding and optional compression

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::compress::Compressor;
use super::decoder::{JsonDecoders, ResultDecoder};
use super::executor::StatementExecutor;
use super::fetcher::{FALLBACK_CHUNK_SIZE, FetchError, FetchPath, PaginatedFetcher};
use super::filter::{FilterError, FilterExpressionParser, ParsedFilter};
use super::query_builder::{CompileError, CompiledQuery, OrderTerm, QueryCompiler, parse_order_by};
use super::registry::AttributeRegistry;
use super::types::{BatchRequest, BatchResponse, Pagination};

/// Request schema failures. The `Display` text is the response body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No required_fields specified")]
    MissingRequiredFields,

    #[error("required_fields should be a list")]
    RequiredFieldsNotList,

    #[error("required_fields cannot be empty")]
    EmptyRequiredFields,

    #[error("{0} is not a valid attribute in required_fields.")]
    UnknownField(String),

    #[error("No filter_string specified")]
    MissingFilterString,

    #[error("filter_string cannot be empty")]
    EmptyFilterString,

    #[error("No order_by specified")]
    MissingOrderBy,

    #[error("order_by cannot be empty")]
    EmptyOrderBy,

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Failures after validation succeeded.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Compression(#[from] anyhow::Error),
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    /// Requested fields, duplicates removed, first occurrence kept.
    pub fields: Vec<String>,
    pub filter: ParsedFilter,
    pub order: Vec<OrderTerm>,
    pub pagination: Option<Pagination>,
    pub compress: bool,
}

/// Check a request against `registry`.
///
/// Checks run in a fixed order and stop at the first failure:
/// required fields, filter presence, order terms, then the filter grammar.
pub fn validate_request(
    registry: &AttributeRegistry,
    request: &BatchRequest,
) -> Result<ValidatedRequest, ValidationError> {
    let fields = validate_fields(registry, request.required_fields.as_ref())?;

    let filter_string = match request.filter_string.as_deref() {
        None => return Err(ValidationError::MissingFilterString),
        Some("") => return Err(ValidationError::EmptyFilterString),
        Some(s) => s,
    };

    let order = match request.order_by.as_deref() {
        None => return Err(ValidationError::MissingOrderBy),
        Some("") => return Err(ValidationError::EmptyOrderBy),
        Some(s) => parse_order_by(registry, s)?,
    };

    let filter = FilterExpressionParser::new(registry).parse(filter_string)?;

    Ok(ValidatedRequest {
        fields,
        filter,
        order,
        pagination: request.pagination_filters.and_then(|p| p.window()),
        compress: request.compress_response.unwrap_or(false),
    })
}

fn validate_fields(
    registry: &AttributeRegistry,
    value: Option<&Value>,
) -> Result<Vec<String>, ValidationError> {
    let Some(value) = value else {
        return Err(ValidationError::MissingRequiredFields);
    };
    let Value::Array(items) = value else {
        return Err(ValidationError::RequiredFieldsNotList);
    };
    if items.is_empty() {
        return Err(ValidationError::EmptyRequiredFields);
    }

    let mut fields: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let name = match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !registry.is_valid_attribute(&name) {
            return Err(ValidationError::UnknownField(name));
        }
        if !fields.contains(&name) {
            fields.push(name);
        }
    }
    Ok(fields)
}

/// Compile a validated request against `registry`.
pub fn compile_validated(
    registry: &AttributeRegistry,
    request: &ValidatedRequest,
) -> Result<CompiledQuery, ValidationError> {
    let query = QueryCompiler::new(registry).compile(
        &request.fields,
        Some(&request.filter),
        &request.order,
        request.pagination,
    )?;
    Ok(query)
}

/// Validate and compile without executing.
pub fn compile_request(
    registry: &AttributeRegistry,
    request: &BatchRequest,
) -> Result<CompiledQuery, ValidationError> {
    let validated = validate_request(registry, request)?;
    compile_validated(registry, &validated)
}

/// Executes catalog batch requests.
pub struct CatalogService {
    registry: Arc<AttributeRegistry>,
    decoders: JsonDecoders,
    executor: Arc<dyn StatementExecutor>,
    compressor: Arc<dyn Compressor>,
    chunk_size: u64,
}

impl CatalogService {
    pub fn new(
        registry: Arc<AttributeRegistry>,
        executor: Arc<dyn StatementExecutor>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        Self {
            registry,
            decoders: JsonDecoders::product_defaults(),
            executor,
            compressor,
            chunk_size: FALLBACK_CHUNK_SIZE,
        }
    }

    /// Replace the JSON attribute decoders.
    pub fn with_decoders(mut self, decoders: JsonDecoders) -> Self {
        self.decoders = decoders;
        self
    }

    /// Override the fallback chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    /// Check a request against the registry.
    pub fn validate(&self, request: &BatchRequest) -> Result<ValidatedRequest, ValidationError> {
        validate_request(&self.registry, request)
    }

    /// Compile a validated request.
    pub fn compile(&self, request: &ValidatedRequest) -> Result<CompiledQuery, ValidationError> {
        compile_validated(&self.registry, request)
    }

    /// Run a batch request end to end.
    ///
    /// Validation failures become [`BatchResponse::Invalid`]; only failures
    /// after validation are returned as errors.
    pub async fn handle(&self, request: &BatchRequest) -> Result<BatchResponse, ServiceError> {
        let validated = match self.validate(request) {
            Ok(validated) => validated,
            Err(err) => {
                info!(error = %err, "rejected catalog batch request");
                return Ok(BatchResponse::Invalid(err.to_string()));
            }
        };
        let query = match self.compile(&validated) {
            Ok(query) => query,
            Err(err) => return Ok(BatchResponse::Invalid(err.to_string())),
        };

        info!(
            fields = validated.fields.len(),
            joins = query.joined_tables.len(),
            paginated = query.pagination.is_some(),
            compress = validated.compress,
            "running catalog batch request"
        );

        let outcome = PaginatedFetcher::new(self.executor.as_ref())
            .with_chunk_size(self.chunk_size)
            .fetch(&query)
            .await?;
        if let FetchPath::Fallback { total, chunks } = outcome.path {
            info!(total, chunks, "catalog batch served by chunked fallback");
        }

        let records = ResultDecoder::new(&self.registry, &self.decoders)
            .decode(&query.fields, &outcome.rows);
        debug!(records = records.len(), "decoded catalog records");

        if validated.compress {
            let data = Value::Array(records.into_iter().map(Value::Object).collect());
            let compressed = self.compressor.compress(&data)?;
            return Ok(BatchResponse::Compressed(compressed));
        }

        Ok(BatchResponse::Records(records))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::compress::GzipCompressor;
    use crate::catalog::executor::ExecutionError;
    use crate::catalog::registry::product_catalog;
    use crate::catalog::types::StatementOutput;
    use crate::catalog::types::TaggedValue;
    use async_trait::async_trait;
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl StatementExecutor for Unreachable {
        async fn execute(
            &self,
            _sql: &str,
            _params: &[TaggedValue],
        ) -> Result<StatementOutput, ExecutionError> {
            Err(ExecutionError::Failed("executor should not be called".to_string()))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    fn service() -> CatalogService {
        CatalogService::new(
            Arc::new(product_catalog("").unwrap()),
            Arc::new(Unreachable),
            Arc::new(GzipCompressor::new()),
        )
    }

    fn request(value: serde_json::Value) -> BatchRequest {
        serde_json::from_value(value).unwrap()
    }

    fn rejection(value: serde_json::Value) -> String {
        service().validate(&request(value)).unwrap_err().to_string()
    }

    #[test]
    fn missing_and_empty_parts() {
        assert_eq!(rejection(json!({})), "No required_fields specified");
        assert_eq!(
            rejection(json!({"required_fields": "id"})),
            "required_fields should be a list"
        );
        assert_eq!(
            rejection(json!({"required_fields": []})),
            "required_fields cannot be empty"
        );
        assert_eq!(
            rejection(json!({"required_fields": ["id"]})),
            "No filter_string specified"
        );
        assert_eq!(
            rejection(json!({"required_fields": ["id"], "filter_string": ""})),
            "filter_string cannot be empty"
        );
        assert_eq!(
            rejection(json!({"required_fields": ["id"], "filter_string": "(id__exact=1)"})),
            "No order_by specified"
        );
        assert_eq!(
            rejection(json!({
                "required_fields": ["id"],
                "filter_string": "(id__exact=1)",
                "order_by": ""
            })),
            "order_by cannot be empty"
        );
    }

    #[test]
    fn unknown_required_field() {
        assert_eq!(
            rejection(json!({"required_fields": ["not_a_field"]})),
            "not_a_field is not a valid attribute in required_fields."
        );
    }

    #[test]
    fn order_checked_before_filter_grammar() {
        assert_eq!(
            rejection(json!({
                "required_fields": ["id"],
                "filter_string": "()",
                "order_by": "bogus"
            })),
            "bogus is not a valid attribute in order_by."
        );
        assert_eq!(
            rejection(json!({
                "required_fields": ["id"],
                "filter_string": "()",
                "order_by": "id"
            })),
            "Invalid filter string"
        );
    }

    #[test]
    fn duplicate_fields_collapse() {
        let validated = service()
            .validate(&request(json!({
                "required_fields": ["id", "name", "id"],
                "filter_string": "(id__exact=1)",
                "order_by": "id"
            })))
            .unwrap();
        assert_eq!(validated.fields, vec!["id", "name"]);
        assert!(!validated.compress);
        assert_eq!(validated.pagination, None);
    }

    #[test]
    fn compile_request_produces_sql() {
        let registry = product_catalog("").unwrap();
        let query = compile_request(
            &registry,
            &request(json!({
                "required_fields": ["id", "name"],
                "filter_string": "(id__exact=5)",
                "order_by": "id desc",
                "pagination_filters": {"limit": 10, "offset": 0}
            })))
            .unwrap();
        assert_eq!(
            query.sql,
            "select DISTINCT product.id, product.name from product where product.id=5 order by product.id desc limit 10 offset 0"
        );
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_executor() {
        let response = service()
            .handle(&request(json!({"required_fields": ["not_a_field"]})))
            .await
            .unwrap();
        assert_eq!(
            response,
            BatchResponse::Invalid("not_a_field is not a valid attribute in required_fields.".to_string())
        );
    }

    #[tokio::test]
    async fn non_oversized_failures_are_fatal() {
        let err = service()
            .handle(&request(json!({
                "required_fields": ["id"],
                "filter_string": "(id__exact=5)",
                "order_by": "id"
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Fetch(FetchError::Direct(_))));
    }
}
