use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use upload_store::{config, db, routes, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-store with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.temp_dir, &cfg.final_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
            tracing::info!("Created directory at {}", dir.display());
        }
    }

    // Create the SQLite parent directory if needed
    if let Some(parent) = cfg.database_path().as_deref().and_then(|p| p.parent()) {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // --- Initialize SQLite connection ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let db = Arc::new(
        db::connect(&cfg.database_url, 5)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?,
    );

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&db).await?;

    // --- Initialize core services ---
    let state = AppState::new(db, &cfg.temp_dir, &cfg.final_dir, &cfg.tus_version);

    // --- Repair finalizes interrupted by a crash ---
    let report = state.finalizer.reconcile(state.streams.ledger()).await?;
    tracing::info!(
        checked = report.checked,
        recovered = report.recovered,
        unrecoverable = report.unrecoverable,
        "finalize reconciliation complete"
    );

    // --- Build router ---
    let app: Router = routes::routes::routes(state);

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
