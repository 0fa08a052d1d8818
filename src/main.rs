use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod matching;
mod models;
mod pagination;
mod render;
mod routes;
mod services;
mod state;

use services::{bundle_service::BundleService, snippet_service::SnippetService};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!("Starting snippet-service with config: {:?}", cfg);

    if !Path::new(&cfg.bundles_dir).exists() {
        fs::create_dir_all(&cfg.bundles_dir)?;
        tracing::info!("Created bundles directory at {}", cfg.bundles_dir);
    }

    // SQLx wants the database file's parent directory to exist.
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    if !Path::new(db_path).exists() {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(db_path)?;
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&cfg.database_url)
            .await?,
    );

    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let snippets = SnippetService::new(db.clone());
    let bundles = BundleService::new(
        db.clone(),
        snippets.clone(),
        cfg.bundles_dir.clone(),
        cfg.bundle_ttl_secs,
    );
    let state = AppState {
        config: Arc::new(cfg.clone()),
        snippets,
        bundles,
    };

    let app: Router = routes::routes::routes().with_state(state);

    let addr = cfg.addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run SQLite migrations manually from the migration SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
