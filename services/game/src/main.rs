use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::database::{DatabaseConfig, health_check, init_pool};
use game::{
    clock::SystemClock,
    config::AppConfig,
    repositories::postgres::PgStore,
    routes,
    state::{AppState, Settings},
    storage::{S3ContributionSink, s3_client},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting game service");

    let config = AppConfig::from_env()?;
    let cookie_key = config.cookie_key();

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    // Check database connectivity
    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let client = s3_client(&config.storage).await;
    let contributions = S3ContributionSink::new(client, config.storage.bucket.clone(), pool.clone());

    let app_state = AppState::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(contributions),
        Arc::new(SystemClock),
        Settings::from(&config),
        cookie_key,
    );

    // Start the web server
    let app = routes::create_router(app_state);

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Game service listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down game service");
        })
        .await?;

    pool.close().await;
    Ok(())
}
