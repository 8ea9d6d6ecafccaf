use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use elearning_api::{
    config::Config,
    create_router,
    services::{AppState, ProgressService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting e-learning API");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let app_state = Arc::new(AppState::new(config).context("Failed to load content catalog")?);

    // Replay stored progress once so stale aggregates and implausible
    // records are repaired before anything reads them.
    let progress = ProgressService::from_config(app_state.catalog.clone(), &app_state.config)
        .context("Failed to open progress storage")?;
    let chapters = progress.load_all();
    tracing::info!("Progress checked for {} chapters", chapters);
    for level in progress.level_summaries() {
        tracing::info!(
            level = %level.id,
            completion = level.completion,
            unlocked = level.unlocked,
            "Level progress"
        );
    }

    let app = create_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&app_state.config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", app_state.config.bind_addr))?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "elearning_api=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
