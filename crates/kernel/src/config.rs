//! Configuration loaded from environment variables.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

/// Default single-shot response limit (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Deployment environment. Selects environment-dependent constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CatalogEnvironment {
    #[default]
    Staging,
    Production,
}

impl CatalogEnvironment {
    /// Thumbnail URL prefix for this environment.
    pub fn default_asset_prefix(self) -> &'static str {
        match self {
            CatalogEnvironment::Staging => {
                "https://d3ckjemso196la.cloudfront.net/product_assets/thumbnail/"
            }
            CatalogEnvironment::Production => {
                "https://d48f7equ64qjl.cloudfront.net/product_assets/thumbnail/"
            }
        }
    }
}

impl FromStr for CatalogEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "staging" => Ok(CatalogEnvironment::Staging),
            "production" => Ok(CatalogEnvironment::Production),
            other => bail!("unknown catalog environment '{other}'"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Deployment environment (default: staging).
    pub environment: CatalogEnvironment,

    /// Prefix prepended to thumbnail values.
    pub asset_url_prefix: String,

    /// Single-shot responses larger than this fall back to chunked fetching.
    pub max_response_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let environment = match var("CATALOG_ENVIRONMENT") {
            Some(value) => value
                .parse()
                .context("CATALOG_ENVIRONMENT must be 'staging' or 'production'")?,
            None => CatalogEnvironment::default(),
        };

        let asset_url_prefix = var("ASSET_URL_PREFIX")
            .unwrap_or_else(|| environment.default_asset_prefix().to_string());

        let max_response_bytes = match var("MAX_RESPONSE_BYTES") {
            Some(value) => value
                .parse()
                .context("MAX_RESPONSE_BYTES must be a valid usize")?,
            None => DEFAULT_MAX_RESPONSE_BYTES,
        };

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            environment,
            asset_url_prefix,
            max_response_bytes,
        })
    }
}
