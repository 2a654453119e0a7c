use std::sync::Arc;

use aws_sdk_s3::config::Region;

use crate::{
    config::Config,
    db::{connection::DbPool, redis::create_redis_pool},
    repositories::{
        tracking_session::{PgTrackingSessionRepository, TrackingSessionRepository},
        trip::{PgTripRepository, TripRepository},
    },
    services::{
        broadcaster::Broadcaster,
        cache_store::{CacheStore, InMemoryCacheStore, RedisCacheStore},
        object_store::{InMemoryObjectStore, ObjectStore, S3ObjectStore, SnapshotStore},
        roster_cache::RosterCache,
        scheduler::Scheduler,
        snapshot_sync::SnapshotSync,
        tracking::TrackingService,
        train_locks::TrainLockRegistry,
        trains_list::TrainsListCache,
    },
};

/// Storage backends the services are built on.
pub struct Stores {
    pub sessions: Arc<dyn TrackingSessionRepository>,
    pub trips: Arc<dyn TripRepository>,
    pub cache: Arc<dyn CacheStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Stores {
    /// Postgres-backed session and trip stores plus whichever cache and
    /// object store the configuration selects.
    pub async fn connect(config: &Config, pool: DbPool) -> anyhow::Result<Self> {
        let timeout = config.tracking_settings().store_timeout;
        Ok(Self {
            sessions: Arc::new(PgTrackingSessionRepository::new(pool.clone(), timeout)),
            trips: Arc::new(PgTripRepository::new(pool, timeout)),
            cache: connect_cache(config).await?,
            objects: connect_object_store(config).await,
        })
    }
}

pub async fn connect_cache(config: &Config) -> anyhow::Result<Arc<dyn CacheStore>> {
    let timeout = config.tracking_settings().store_timeout;
    Ok(match create_redis_pool(config).await? {
        Some(pool) => Arc::new(RedisCacheStore::new(pool, timeout)),
        None => {
            tracing::warn!("Roster cache is process-local; samples are lost on restart");
            Arc::new(InMemoryCacheStore::new())
        }
    })
}

pub async fn connect_object_store(config: &Config) -> Arc<dyn ObjectStore> {
    let timeout = config.tracking_settings().store_timeout;
    match &config.object_store_bucket {
        Some(bucket) => {
            let aws = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(Region::new(config.aws_region.clone()))
                .load()
                .await;
            tracing::info!(bucket = %bucket, region = %config.aws_region, "Using S3 object store");
            Arc::new(S3ObjectStore::new(
                aws_sdk_s3::Client::new(&aws),
                bucket.clone(),
                timeout,
            ))
        }
        None => {
            tracing::warn!("OBJECT_STORE_BUCKET not set, train snapshots kept in process memory");
            Arc::new(InMemoryObjectStore::new())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tracking: TrackingService,
    pub trains_list: Arc<TrainsListCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub snapshot_sync: Arc<SnapshotSync>,
}

impl AppState {
    pub fn new(config: Config, stores: Stores) -> Self {
        let settings = config.tracking_settings();
        let roster = RosterCache::new(stores.cache, settings.sample_ttl);
        let snapshots = SnapshotStore::new(stores.objects, config.object_store_prefix.clone());

        let tracking = TrackingService::new(
            stores.sessions.clone(),
            stores.trips,
            roster.clone(),
            snapshots.clone(),
            Arc::new(TrainLockRegistry::new()),
            settings,
        );
        let trains_list = Arc::new(TrainsListCache::new(stores.sessions.clone(), settings));
        let broadcaster = Arc::new(Broadcaster::with_default_sources(
            stores.sessions,
            roster.clone(),
            snapshots.clone(),
            settings,
        ));
        let snapshot_sync = Arc::new(SnapshotSync::new(roster, snapshots));

        Self {
            config,
            tracking,
            trains_list,
            broadcaster,
            snapshot_sync,
        }
    }

    /// Starts snapshot sync, the trains-list refresh and the broadcaster on
    /// their configured intervals.
    pub fn start_background_tasks(&self) -> Scheduler {
        let settings = self.config.tracking_settings();
        let mut scheduler = Scheduler::new();
        scheduler.start(self.snapshot_sync.clone(), settings.snapshot_sync_interval);
        scheduler.start(self.trains_list.clone(), settings.trains_list_refresh_interval);
        scheduler.start(self.broadcaster.clone(), settings.broadcast_interval);
        scheduler
    }
}
