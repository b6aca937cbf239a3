//! Vetrina Catalog Kernel
//!
//! HTTP server for product catalog batch queries, plus a dry-run compiler.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vetrina_kernel::catalog::{BatchRequest, compile_request, product_catalog};
use vetrina_kernel::{AppState, Config};

/// Product catalog batch query service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Validate a batch request and print the SQL it compiles to.
    Compile {
        /// Path to a JSON batch request.
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Compile { request } => compile(&request),
    }
}

async fn serve() -> Result<()> {
    info!("Starting Vetrina catalog kernel");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(port = config.port, environment = ?config.environment, "Configuration loaded");

    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    info!("Database connection established");

    let app = vetrina_kernel::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn compile(path: &Path) -> Result<()> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let request: BatchRequest =
        serde_json::from_str(&body).context("request is not a valid batch request")?;

    // The asset prefix only affects decoding, never the SQL.
    let registry = product_catalog("").context("invalid product catalog schema")?;
    let query = compile_request(&registry, &request)?;

    info!(joins = ?query.joined_tables, "compiled request");
    println!("{}", query.sql);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
