use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub redis_pool_size: u32,
    pub redis_connect_timeout: u64,
    pub jwt_secret: String,
    pub object_store_bucket: Option<String>,
    pub object_store_prefix: String,
    pub aws_region: String,
    pub bind_addr: String,
    pub sample_ttl_seconds: u64,
    pub mobile_stale_seconds: u64,
    pub default_stale_seconds: u64,
    pub snapshot_sync_interval_seconds: u64,
    pub trains_list_refresh_seconds: u64,
    pub trains_list_max_age_seconds: u64,
    pub trains_list_recency_seconds: u64,
    pub broadcast_interval_seconds: u64,
    pub broadcast_recency_seconds: u64,
    pub store_timeout_ms: u64,
    pub lock_timeout_ms: u64,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/trainwatch".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "your-secret-key-change-this-in-production".to_string());

        let redis_url = optional_var("REDIS_URL");
        let object_store_bucket = optional_var("OBJECT_STORE_BUCKET");

        let config = Config {
            database_url,
            redis_url,
            redis_pool_size: parse_var("REDIS_POOL_SIZE", 10)?,
            redis_connect_timeout: parse_var("REDIS_CONNECT_TIMEOUT", 5)?,
            jwt_secret,
            object_store_bucket,
            object_store_prefix: env::var("OBJECT_STORE_PREFIX")
                .unwrap_or_else(|_| "trains/".to_string()),
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "ap-northeast-1".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            sample_ttl_seconds: parse_var("SAMPLE_TTL_SECONDS", 600)?,
            mobile_stale_seconds: parse_var("MOBILE_STALE_SECONDS", 480)?,
            default_stale_seconds: parse_var("DEFAULT_STALE_SECONDS", 120)?,
            snapshot_sync_interval_seconds: parse_var("SNAPSHOT_SYNC_INTERVAL_SECONDS", 90)?,
            trains_list_refresh_seconds: parse_var("TRAINS_LIST_REFRESH_SECONDS", 5)?,
            trains_list_max_age_seconds: parse_var("TRAINS_LIST_MAX_AGE_SECONDS", 10)?,
            trains_list_recency_seconds: parse_var("TRAINS_LIST_RECENCY_SECONDS", 300)?,
            broadcast_interval_seconds: parse_var("BROADCAST_INTERVAL_SECONDS", 5)?,
            broadcast_recency_seconds: parse_var("BROADCAST_RECENCY_SECONDS", 120)?,
            store_timeout_ms: parse_var("STORE_TIMEOUT_MS", 3000)?,
            lock_timeout_ms: parse_var("LOCK_TIMEOUT_MS", 2000)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.trains_list_refresh_seconds == 0
            || self.broadcast_interval_seconds == 0
            || self.snapshot_sync_interval_seconds == 0
        {
            return Err(anyhow!("Background task intervals must be greater than zero"));
        }
        if self.trains_list_refresh_seconds >= self.snapshot_sync_interval_seconds {
            return Err(anyhow!(
                "TRAINS_LIST_REFRESH_SECONDS must be shorter than SNAPSHOT_SYNC_INTERVAL_SECONDS"
            ));
        }
        Ok(())
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        TrackingSettings {
            sample_ttl: Duration::from_secs(self.sample_ttl_seconds),
            mobile_stale_after: Duration::from_secs(self.mobile_stale_seconds),
            default_stale_after: Duration::from_secs(self.default_stale_seconds),
            snapshot_sync_interval: Duration::from_secs(self.snapshot_sync_interval_seconds),
            trains_list_refresh_interval: Duration::from_secs(self.trains_list_refresh_seconds),
            trains_list_max_age: Duration::from_secs(self.trains_list_max_age_seconds),
            trains_list_recency: Duration::from_secs(self.trains_list_recency_seconds),
            broadcast_interval: Duration::from_secs(self.broadcast_interval_seconds),
            broadcast_recency: Duration::from_secs(self.broadcast_recency_seconds),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }
}

/// Timing knobs consumed by the tracking services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingSettings {
    /// Lifetime of a passenger sample (and of a train aggregate) in the roster cache.
    pub sample_ttl: Duration,
    /// Samples from mobile clients older than this are marked disconnected.
    pub mobile_stale_after: Duration,
    /// Same tolerance for every other client type.
    pub default_stale_after: Duration,
    pub snapshot_sync_interval: Duration,
    pub trains_list_refresh_interval: Duration,
    pub trains_list_max_age: Duration,
    pub trains_list_recency: Duration,
    pub broadcast_interval: Duration,
    pub broadcast_recency: Duration,
    pub store_timeout: Duration,
    pub lock_timeout: Duration,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            sample_ttl: Duration::from_secs(600),
            mobile_stale_after: Duration::from_secs(480),
            default_stale_after: Duration::from_secs(120),
            snapshot_sync_interval: Duration::from_secs(90),
            trains_list_refresh_interval: Duration::from_secs(5),
            trains_list_max_age: Duration::from_secs(10),
            trains_list_recency: Duration::from_secs(300),
            broadcast_interval: Duration::from_secs(5),
            broadcast_recency: Duration::from_secs(120),
            store_timeout: Duration::from_millis(3000),
            lock_timeout: Duration::from_millis(2000),
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
{
    match optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", key, raw)),
        None => Ok(default),
    }
}
