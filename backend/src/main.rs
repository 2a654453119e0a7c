use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainwatch_backend::{
    config::Config,
    db::connection::{create_pool, DbPool},
    routes::build_router,
    state::{AppState, Stores},
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainwatch_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!(
        jwt_secret = %mask_secret(&config.jwt_secret),
        redis = config.redis_url.is_some(),
        object_store_bucket = ?config.object_store_bucket,
        bind_addr = %config.bind_addr,
        "Loaded configuration from environment/.env"
    );

    let settings = config.tracking_settings();
    let pool: DbPool = create_pool(&config.database_url, settings.store_timeout).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let stores = Stores::connect(&config, pool).await?;
    let state = AppState::new(config.clone(), stores);
    let scheduler = state.start_background_tasks();
    let app = build_router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    tracing::info!("Background tasks stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
