//! One-shot copy of every cached train aggregate into the object store, for
//! use before planned cache maintenance.

use anyhow::{bail, Context};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainwatch_backend::{
    config::Config,
    services::{
        object_store::SnapshotStore, roster_cache::RosterCache, snapshot_sync::SnapshotSync,
    },
    state::{connect_cache, connect_object_store},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainwatch_backend=info,snapshot_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    if config.redis_url.is_none() || config.object_store_bucket.is_none() {
        bail!("REDIS_URL and OBJECT_STORE_BUCKET must both be set to sync snapshots");
    }

    let settings = config.tracking_settings();
    let roster = RosterCache::new(connect_cache(&config).await?, settings.sample_ttl);
    let snapshots = SnapshotStore::new(
        connect_object_store(&config).await,
        config.object_store_prefix.clone(),
    );

    let report = SnapshotSync::new(roster, snapshots)
        .run_once()
        .await
        .context("enumerating cached train aggregates")?;
    if !report.failed.is_empty() {
        bail!("Failed to sync {} train(s): {}", report.failed.len(), report.failed.join(", "));
    }
    tracing::info!(
        "Synced {} train snapshot(s), {} expired before sync",
        report.synced.len(),
        report.missing.len()
    );
    Ok(())
}
