#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! [`ScriptedExecutor`] stands in for the execution service. It serves a
//! fixed table of rows, honours `limit L offset O` suffixes and
//! `select count(*)` wrappers the way PostgreSQL would, and can be told to
//! fail the first (direct) call so the chunked fallback is exercised.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tower::ServiceExt;

use vetrina_kernel::AppState;
use vetrina_kernel::catalog::{
    AttributeRegistry, CatalogService, ExecutionError, GzipCompressor, StatementExecutor,
    StatementOutput, TaggedRow, TaggedValue, product_catalog,
};

/// Thumbnail prefix used by test registries.
pub const ASSET_PREFIX: &str = "https://assets.test/thumbnail/";

/// How the first statement fails, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectFailure {
    None,
    Oversized,
    Fatal,
}

/// In-memory execution service with scripted failures.
pub struct ScriptedExecutor {
    rows: Vec<TaggedRow>,
    direct_failure: DirectFailure,
    fail_chunks: bool,
    count_answer: Option<TaggedValue>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(rows: Vec<TaggedRow>) -> Self {
        Self {
            rows,
            direct_failure: DirectFailure::None,
            fail_chunks: false,
            count_answer: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_direct(mut self, failure: DirectFailure) -> Self {
        self.direct_failure = failure;
        self
    }

    /// Fail every statement after the count query.
    pub fn failing_chunks(mut self) -> Self {
        self.fail_chunks = true;
        self
    }

    /// Answer count queries with `value` instead of the real row count.
    pub fn answering_count(mut self, value: TaggedValue) -> Self {
        self.count_answer = Some(value);
        self
    }

    /// Statements executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn window<'a>(&'a self, sql: &str) -> &'a [TaggedRow] {
        let Some((_, tail)) = sql.rsplit_once(" limit ") else {
            return &self.rows;
        };
        let mut parts = tail.split(" offset ");
        let limit: usize = parts.next().unwrap().trim().parse().unwrap();
        let offset: usize = parts.next().unwrap().trim().parse().unwrap();
        let start = offset.min(self.rows.len());
        let end = (offset + limit).min(self.rows.len());
        &self.rows[start..end]
    }
}

#[async_trait]
impl StatementExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        sql: &str,
        params: &[TaggedValue],
    ) -> Result<StatementOutput, ExecutionError> {
        assert!(params.is_empty(), "catalog statements carry no parameters");

        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(sql.to_string());
            calls.len()
        };

        if call == 1 {
            match self.direct_failure {
                DirectFailure::None => {}
                DirectFailure::Oversized => {
                    return Err(ExecutionError::Oversized("scripted".to_string()));
                }
                DirectFailure::Fatal => {
                    return Err(ExecutionError::Failed("scripted".to_string()));
                }
            }
        }

        if let Some(inner) = sql
            .strip_prefix("select count(*) from (")
            .and_then(|rest| rest.strip_suffix(") as subquery"))
        {
            let total = i64::try_from(self.window(inner).len()).unwrap();
            let value = self.count_answer.clone().unwrap_or(TaggedValue::Long(total));
            return Ok(StatementOutput {
                records: vec![vec![value]],
            });
        }

        if self.fail_chunks && call > 1 {
            return Err(ExecutionError::Failed("scripted chunk failure".to_string()));
        }

        Ok(StatementOutput {
            records: self.window(sql).to_vec(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// `count` rows of `(id, name, thumbnail)` with ids counting up from 1.
pub fn product_rows(count: usize) -> Vec<TaggedRow> {
    (1..=count)
        .map(|id| {
            vec![
                TaggedValue::Long(i64::try_from(id).unwrap()),
                TaggedValue::String(format!("product {id}")),
                TaggedValue::String(format!("{id}.png")),
            ]
        })
        .collect()
}

pub fn registry() -> Arc<AttributeRegistry> {
    Arc::new(product_catalog(ASSET_PREFIX).unwrap())
}

/// Catalog service over `executor` with a small fallback chunk size.
pub fn catalog(executor: Arc<ScriptedExecutor>, chunk_size: u64) -> CatalogService {
    CatalogService::new(registry(), executor, Arc::new(GzipCompressor::new()))
        .with_chunk_size(chunk_size)
}

/// Test application wired to a scripted executor.
pub struct TestApp {
    pub router: Router,
    pub executor: Arc<ScriptedExecutor>,
}

impl TestApp {
    /// Build the full router. The pool is lazy and points at a closed port,
    /// so the catalog route never touches it and health checks fail quickly.
    pub async fn new(executor: ScriptedExecutor) -> Self {
        let executor = Arc::new(executor);
        let db = vetrina_kernel::db::lazy_pool(
            "postgres://vetrina@127.0.0.1:1/vetrina",
            1,
            Duration::from_millis(500),
        )
        .expect("lazy pool");
        let state = AppState::from_parts(db, Arc::new(catalog(executor.clone(), 1000)));

        Self {
            router: vetrina_kernel::app(state),
            executor,
        }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// GET a path.
    pub async fn get(&self, path: &str) -> Response {
        self.request(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    /// POST raw text as JSON to the batch endpoint.
    pub async fn post_batch_raw(&self, body: &str) -> Response {
        self.request(
            Request::post("/api/catalog/products/batch")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// POST a JSON body to the batch endpoint.
    pub async fn post_batch(&self, body: serde_json::Value) -> Response {
        self.post_batch_raw(&body.to_string()).await
    }
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    use http_body_util::BodyExt;

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is not JSON")
}
