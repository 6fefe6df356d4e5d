use anyhow::Result;
use axum::Router;
use cloud_storage::{
    config::AppConfig,
    routes::routes::routes,
    services::StorageService,
    store::{LocalObjectStore, ObjectStore},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting cloud-storage with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.data_dir).exists() {
        fs::create_dir_all(&cfg.data_dir)?;
        tracing::info!("Created storage directory at {}", cfg.data_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let store = LocalObjectStore::new(db, cfg.data_dir.clone());

    // --- Schema is idempotent; apply it on every start ---
    store.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    store.ping().await?;
    store.ensure_bucket(&cfg.bucket).await?;

    // --- Initialize core service ---
    let storage = StorageService::new(Arc::new(store), cfg.bucket.clone());

    // --- Build router ---
    let app: Router = routes().with_state(storage);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
