//! Vetrina Catalog Kernel Library
//!
//! This library exposes the catalog pipeline, configuration, and HTTP
//! routes for integration testing. The main entry point for running the
//! server is the `vetrina` binary.

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the application router with all routes and layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::catalog::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
