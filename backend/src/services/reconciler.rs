//! Rebuilds one train's aggregate from session rows and cached samples.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;

use crate::config::TrackingSettings;
use crate::error::{TrackingError, WriteStage};
use crate::models::train::TrainAggregate;
use crate::repositories::tracking_session::TrackingSessionRepository;
use crate::services::{aggregate::build_aggregate, roster_cache::RosterCache};

#[derive(Clone)]
pub struct RosterReconciler {
    sessions: Arc<dyn TrackingSessionRepository>,
    roster: RosterCache,
    settings: TrackingSettings,
}

impl RosterReconciler {
    pub fn new(
        sessions: Arc<dyn TrackingSessionRepository>,
        roster: RosterCache,
        settings: TrackingSettings,
    ) -> Self {
        Self {
            sessions,
            roster,
            settings,
        }
    }

    /// Recomputes and republishes the aggregate of `train_id`. Callers hold
    /// the train lock.
    ///
    /// A failed session read leaves the previously published aggregate in
    /// place. `Ok(None)` means the train has no fresh passenger and its cache
    /// entry was removed.
    pub async fn rebuild(&self, train_id: &str) -> Result<Option<TrainAggregate>, TrackingError> {
        let storage = TrackingError::storage;

        let sessions = self
            .sessions
            .find_active_by_train(train_id)
            .await
            .map_err(storage(WriteStage::Aggregate))?;

        let mut samples = HashMap::with_capacity(sessions.len());
        for session in &sessions {
            let sample = self
                .roster
                .get_sample(session.id)
                .await
                .map_err(storage(WriteStage::Aggregate))?;
            if let Some(sample) = sample {
                samples.insert(session.id, sample);
            }
        }

        match build_aggregate(train_id, &sessions, &samples, Utc::now(), &self.settings) {
            Some(aggregate) => {
                self.roster
                    .put_aggregate(&aggregate)
                    .await
                    .map_err(storage(WriteStage::Aggregate))?;
                tracing::debug!(
                    train_id,
                    passenger_count = aggregate.passenger_count,
                    pending = aggregate.pending_sessions,
                    "Train aggregate rebuilt"
                );
                Ok(Some(aggregate))
            }
            None => {
                self.roster
                    .delete_aggregate(train_id)
                    .await
                    .map_err(storage(WriteStage::Aggregate))?;
                tracing::debug!(train_id, "Train has no fresh passengers, aggregate removed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        passenger::{PassengerSample, PassengerStatus},
        tracking_session::{ClientType, SessionStatus, TrackingSession},
    };
    use crate::repositories::tracking_session::{
        InMemoryTrackingSessionRepository, MockTrackingSessionRepository,
    };
    use crate::services::cache_store::InMemoryCacheStore;
    use crate::types::{SessionId, UserId};
    use std::time::Duration;

    fn roster() -> RosterCache {
        RosterCache::new(Arc::new(InMemoryCacheStore::new()), Duration::from_secs(600))
    }

    fn active_session(train: &str) -> TrackingSession {
        let now = Utc::now();
        TrackingSession {
            id: SessionId::new(),
            user_id: UserId::new(),
            train_number: train.to_string(),
            client_type: ClientType::Mobile,
            started_at: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
        }
    }

    fn sample_for(session: &TrackingSession, lat: f64, lng: f64) -> PassengerSample {
        PassengerSample {
            session_id: session.id,
            user_id: session.user_id,
            train_number: session.train_number.clone(),
            client_type: session.client_type,
            lat,
            lng,
            timestamp: Utc::now(),
            received_at: Utc::now(),
            speed: None,
            heading: None,
            altitude: None,
            accuracy: None,
            status: PassengerStatus::Active,
        }
    }

    #[tokio::test]
    async fn rebuild_publishes_aggregate_for_sessions_with_samples() {
        let repo = Arc::new(InMemoryTrackingSessionRepository::new());
        let roster = roster();
        let a = active_session("T1");
        let b = active_session("T1");
        repo.insert(a.clone());
        repo.insert(b.clone());
        roster.put_sample(&sample_for(&a, 10.0, 10.0)).await.unwrap();
        roster.put_sample(&sample_for(&b, 20.0, 20.0)).await.unwrap();

        let reconciler = RosterReconciler::new(repo, roster.clone(), TrackingSettings::default());
        let aggregate = reconciler.rebuild("T1").await.unwrap().unwrap();
        assert_eq!(aggregate.passenger_count, 2);
        assert_eq!(aggregate.average_position.lat, 15.0);
        assert_eq!(roster.get_aggregate("T1").await.unwrap(), Some(aggregate));
    }

    #[tokio::test]
    async fn rebuild_removes_aggregate_when_no_fresh_passenger_remains() {
        let repo = Arc::new(InMemoryTrackingSessionRepository::new());
        let roster = roster();
        let a = active_session("T1");
        repo.insert(a.clone());
        roster.put_sample(&sample_for(&a, 10.0, 10.0)).await.unwrap();
        let reconciler =
            RosterReconciler::new(repo.clone(), roster.clone(), TrackingSettings::default());
        reconciler.rebuild("T1").await.unwrap();

        roster.delete_sample(a.id).await.unwrap();
        assert!(reconciler.rebuild("T1").await.unwrap().is_none());
        assert!(roster.get_aggregate("T1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_session_read_keeps_previous_aggregate() {
        let roster = roster();
        let a = active_session("T1");
        roster.put_sample(&sample_for(&a, 1.0, 2.0)).await.unwrap();

        let mut repo = MockTrackingSessionRepository::new();
        let row = a.clone();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        repo.expect_find_active_by_train().times(2).returning(move |_| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(vec![row.clone()])
            } else {
                Err(crate::error::StorageError::Cache("boom".into()))
            }
        });

        let reconciler =
            RosterReconciler::new(Arc::new(repo), roster.clone(), TrackingSettings::default());
        let published = reconciler.rebuild("T1").await.unwrap();

        let err = reconciler.rebuild("T1").await.unwrap_err();
        assert_eq!(err.failed_stage(), Some(WriteStage::Aggregate));
        assert_eq!(roster.get_aggregate("T1").await.unwrap(), published);
    }
}
