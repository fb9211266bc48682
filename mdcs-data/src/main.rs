//! mdcs-data - Mobile Data Collection service
//!
//! Accepts survey/sensor observation uploads, validates them against
//! registered observer definitions, deduplicates, stores, and serves the
//! data back rolled up per submission as JSON or CSV.

use anyhow::Result;
use tracing::info;
use mdcs_common::config::{resolve_port, RootFolderInitializer, RootFolderResolver};

use mdcs_data::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Log build identification immediately after tracing init, before any
    // database delays
    info!(
        "Starting MDCS Data Collection (mdcs-data) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Resolve and prepare the data root folder
    let resolver = RootFolderResolver::new("data-collection");
    let root_folder = resolver.resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = mdcs_data::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let state = AppState::new(db_pool);
    let app = mdcs_data::build_router(state);

    let port = resolve_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app).await?;

    Ok(())
}
