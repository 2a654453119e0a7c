//! In-memory listing of active trains, refreshed on a short timer and served
//! without touching the session store per request.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::TrackingSettings;
use crate::error::StorageError;
use crate::models::{
    tracking_session::TrackingSession,
    train::{TrainStatus, TrainSummary},
};
use crate::repositories::tracking_session::TrackingSessionRepository;
use crate::services::scheduler::PeriodicTask;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainsListSnapshot {
    pub trains: Vec<TrainSummary>,
    pub generated_at: DateTime<Utc>,
}

struct Cached {
    snapshot: Arc<TrainsListSnapshot>,
    built_at: Instant,
}

pub struct TrainsListCache {
    sessions: Arc<dyn TrackingSessionRepository>,
    settings: TrackingSettings,
    cached: RwLock<Option<Cached>>,
    refreshing: AtomicBool,
}

impl TrainsListCache {
    pub fn new(sessions: Arc<dyn TrackingSessionRepository>, settings: TrackingSettings) -> Self {
        Self {
            sessions,
            settings,
            cached: RwLock::new(None),
            refreshing: AtomicBool::new(false),
        }
    }

    /// Returns the cached listing. The first call builds it inline; later
    /// calls past the max age return the old listing and refresh in the
    /// background.
    pub async fn get(self: &Arc<Self>) -> Result<Arc<TrainsListSnapshot>, StorageError> {
        let current = {
            let cached = self.cached.read().unwrap_or_else(|e| e.into_inner());
            cached
                .as_ref()
                .map(|c| (c.snapshot.clone(), c.built_at.elapsed()))
        };

        match current {
            None => self.refresh().await,
            Some((snapshot, age)) => {
                if age > self.settings.trains_list_max_age {
                    self.spawn_refresh();
                }
                Ok(snapshot)
            }
        }
    }

    pub async fn refresh(&self) -> Result<Arc<TrainsListSnapshot>, StorageError> {
        let sessions = self.sessions.list_active().await?;
        let now = Utc::now();
        let recency = chrono::Duration::from_std(self.settings.trains_list_recency)
            .unwrap_or(chrono::Duration::MAX);
        let snapshot = Arc::new(TrainsListSnapshot {
            trains: summarize(&sessions, now, recency),
            generated_at: now,
        });

        let mut cached = self.cached.write().unwrap_or_else(|e| e.into_inner());
        *cached = Some(Cached {
            snapshot: snapshot.clone(),
            built_at: Instant::now(),
        });
        tracing::debug!(trains = snapshot.trains.len(), "Trains list refreshed");
        Ok(snapshot)
    }

    fn spawn_refresh(self: &Arc<Self>) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.refresh().await {
                tracing::warn!(error = %err, "Background trains list refresh failed");
            }
            this.refreshing.store(false, Ordering::Release);
        });
    }
}

#[async_trait]
impl PeriodicTask for TrainsListCache {
    fn name(&self) -> &'static str {
        "trains_list"
    }

    async fn tick(&self) {
        if let Err(err) = self.refresh().await {
            tracing::warn!(error = %err, "Trains list refresh failed, serving previous listing");
        }
    }
}

/// Groups active sessions by train, keeping trains with at least one
/// heartbeat inside `recency`. A train that also has quieter sessions is
/// reported as partial.
pub fn summarize(
    sessions: &[TrackingSession],
    now: DateTime<Utc>,
    recency: chrono::Duration,
) -> Vec<TrainSummary> {
    #[derive(Default)]
    struct Group {
        recent: usize,
        quiet: usize,
        last_update: Option<DateTime<Utc>>,
    }

    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
    for session in sessions.iter().filter(|s| s.is_active()) {
        let group = groups.entry(session.train_number.as_str()).or_default();
        if now - session.last_heartbeat <= recency {
            group.recent += 1;
            group.last_update = group.last_update.max(Some(session.last_heartbeat));
        } else {
            group.quiet += 1;
        }
    }

    groups
        .into_iter()
        .filter_map(|(train_id, group)| {
            let last_update = group.last_update?;
            Some(TrainSummary {
                train_id: train_id.to_string(),
                passenger_count: group.recent,
                last_update,
                status: if group.quiet == 0 {
                    TrainStatus::Active
                } else {
                    TrainStatus::Partial
                },
            })
        })
        .collect()
}
