use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use tidemark_server::state::AppState;

/// `tidemark health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$TIDEMARK_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("TIDEMARK_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tidemark=info".parse()?),
        )
        .json()
        .init();

    let cfg = tidemark_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    std::fs::create_dir_all(&cfg.import.storage_dir)?;
    let db_path = format!("{}/tidemark.db", cfg.data_dir);

    let db = tidemark_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    // Default organization and site so a fresh install can import right away.
    // Both seeds are upserts and safe on every startup.
    let seeded = async {
        db.seed_organization("org_default", "free", None, false).await?;
        db.seed_site("site_default", "org_default", "localhost", false)
            .await
    }
    .await;
    match seeded {
        Ok(()) => info!("Default site 'site_default' (localhost) ready"),
        Err(e) => tracing::warn!(error = %e, "Failed to seed default site"),
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));
    state.start_workers().await?;

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = tidemark_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        mode = ?cfg.mode,
        max_concurrent_imports = cfg.import.max_concurrent_per_org,
        "Tidemark listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
