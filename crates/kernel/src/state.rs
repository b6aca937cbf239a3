//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::catalog::{CatalogService, GzipCompressor, PgStatementExecutor, product_catalog};
use crate::config::Config;
use crate::db;

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    /// Catalog batch pipeline. Holds the read-only attribute registry.
    catalog: Arc<CatalogService>,
}

impl AppState {
    /// Create new application state, connecting to the database.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = db::create_pool(config).await?;
        let catalog = Arc::new(build_catalog(config, db.clone())?);
        Ok(Self::from_parts(db, catalog))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(db: PgPool, catalog: Arc<CatalogService>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db, catalog }),
        }
    }

    /// Get the database pool.
    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.inner.catalog
    }

    /// Check if PostgreSQL is healthy.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(self.db()).await
    }
}

/// Build the catalog service backed by PostgreSQL.
pub fn build_catalog(config: &Config, db: PgPool) -> Result<CatalogService> {
    let registry =
        product_catalog(&config.asset_url_prefix).context("invalid product catalog schema")?;
    let service = CatalogService::new(
        Arc::new(registry),
        Arc::new(PgStatementExecutor::new(db, config.max_response_bytes)),
        Arc::new(GzipCompressor::new()),
    );

    info!(
        attributes = service.registry().len(),
        environment = ?config.environment,
        max_response_bytes = config.max_response_bytes,
        "product catalog service built"
    );
    Ok(service)
}
