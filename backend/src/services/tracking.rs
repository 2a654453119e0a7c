//! Session lifecycle and the location write path.
//!
//! Every roster mutation for a train runs under that train's lock: the
//! sample write (or removal) and the aggregate rebuild. Heartbeats, durable
//! snapshot deletes and trip inserts happen after the lock is released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use validator::ValidationError;

use crate::config::TrackingSettings;
use crate::error::{StorageError, TrackingError, WriteStage};
use crate::models::{
    passenger::{LocationFix, PassengerSample, PassengerStatus, Position},
    tracking_session::{ClientType, SessionStatus, TrackingSession},
    train::{DataSource, TrainAggregate},
    trip::{NewTrip, RoutePoint, TripStats},
};
use crate::repositories::{tracking_session::TrackingSessionRepository, trip::TripRepository};
use crate::services::{
    aggregate::{restrict_to_sessions, trip_stats},
    object_store::SnapshotStore, reconciler::RosterReconciler,
    roster_cache::RosterCache, train_locks::TrainLockRegistry,
};
use crate::types::{SessionId, TripId, UserId};
use crate::validation::rules;

#[derive(Debug, Clone)]
pub struct StartSession {
    pub train_number: String,
    pub client_type: ClientType,
    pub initial_position: Option<LocationFix>,
}

#[derive(Debug, Clone, Default)]
pub struct StopSession {
    pub save_trip: bool,
    pub train_name: Option<String>,
    pub route: Vec<RoutePoint>,
    pub tracking_data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    SessionNotActive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocationAck {
    Updated {
        session_id: SessionId,
        train_id: String,
        /// Fresh passengers on the train after this update.
        passenger_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        average_position: Option<Position>,
    },
    Ignored { reason: IgnoreReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HeartbeatAck {
    Recorded {
        session_id: SessionId,
        last_heartbeat: DateTime<Utc>,
    },
    Ignored { reason: IgnoreReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedTrip {
    pub trip_id: TripId,
    #[serde(flatten)]
    pub stats: TripStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopAck {
    Stopped {
        session_id: SessionId,
        train_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trip: Option<SavedTrip>,
    },
    Ignored { reason: IgnoreReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedSession {
    pub session: TrackingSession,
    /// Sessions of the same user force-terminated by this start.
    pub terminated: Vec<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationAck>,
}

#[derive(Clone)]
pub struct TrackingService {
    sessions: Arc<dyn TrackingSessionRepository>,
    trips: Arc<dyn TripRepository>,
    roster: RosterCache,
    snapshots: SnapshotStore,
    locks: Arc<TrainLockRegistry>,
    reconciler: RosterReconciler,
    settings: TrackingSettings,
}

impl TrackingService {
    pub fn new(
        sessions: Arc<dyn TrackingSessionRepository>,
        trips: Arc<dyn TripRepository>,
        roster: RosterCache,
        snapshots: SnapshotStore,
        locks: Arc<TrainLockRegistry>,
        settings: TrackingSettings,
    ) -> Self {
        let reconciler = RosterReconciler::new(sessions.clone(), roster.clone(), settings);
        Self {
            sessions,
            trips,
            roster,
            snapshots,
            locks,
            reconciler,
            settings,
        }
    }

    pub fn locks(&self) -> &Arc<TrainLockRegistry> {
        &self.locks
    }

    pub async fn start_session(
        &self,
        user_id: UserId,
        request: StartSession,
    ) -> Result<StartedSession, TrackingError> {
        rules::validate_train_number(&request.train_number)
            .map_err(|e| validation_error("train_number", e))?;
        if let Some(fix) = &request.initial_position {
            validate_fix(fix)?;
        }

        let previous = self
            .sessions
            .find_active_by_user(user_id)
            .await
            .map_err(TrackingError::storage(WriteStage::Session))?;
        let mut terminated = Vec::with_capacity(previous.len());
        for session in previous {
            self.retire(&session, SessionStatus::Terminated).await?;
            tracing::info!(
                session_id = %session.id,
                user_id = %user_id,
                train_id = %session.train_number,
                "Force-terminated previous tracking session"
            );
            terminated.push(session.id);
        }

        let now = Utc::now();
        let session = TrackingSession {
            id: SessionId::new(),
            user_id,
            train_number: request.train_number,
            client_type: request.client_type,
            started_at: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
        };
        self.sessions
            .create(&session)
            .await
            .map_err(TrackingError::storage(WriteStage::Session))?;
        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            train_id = %session.train_number,
            client_type = %session.client_type,
            "Tracking session started"
        );

        let location = match request.initial_position {
            Some(fix) => Some(self.record_fix(&session, &fix).await?),
            None => None,
        };

        Ok(StartedSession {
            session,
            terminated,
            location,
        })
    }

    pub async fn update_location(
        &self,
        user_id: UserId,
        session_id: SessionId,
        fix: LocationFix,
    ) -> Result<LocationAck, TrackingError> {
        validate_fix(&fix)?;
        let session = self.owned_session(user_id, session_id).await?;
        if !session.is_active() {
            tracing::debug!(session_id = %session_id, status = %session.status, "Ignoring location for inactive session");
            return Ok(LocationAck::Ignored {
                reason: IgnoreReason::SessionNotActive,
            });
        }
        self.record_fix(&session, &fix).await
    }

    pub async fn heartbeat(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<HeartbeatAck, TrackingError> {
        let session = self.owned_session(user_id, session_id).await?;
        if !session.is_active() {
            return Ok(HeartbeatAck::Ignored {
                reason: IgnoreReason::SessionNotActive,
            });
        }
        let at = Utc::now();
        if !self.touch(session_id, at).await? {
            return Ok(HeartbeatAck::Ignored {
                reason: IgnoreReason::SessionNotActive,
            });
        }
        Ok(HeartbeatAck::Recorded {
            session_id,
            last_heartbeat: at,
        })
    }

    pub async fn stop_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
        request: StopSession,
    ) -> Result<StopAck, TrackingError> {
        if request.save_trip {
            for point in &request.route {
                rules::validate_latitude(point.lat).map_err(|e| validation_error("route.lat", e))?;
                rules::validate_longitude(point.lng)
                    .map_err(|e| validation_error("route.lng", e))?;
            }
        }
        let session = self.owned_session(user_id, session_id).await?;
        if !session.is_active() {
            return Ok(StopAck::Ignored {
                reason: IgnoreReason::SessionNotActive,
            });
        }

        self.retire(&session, SessionStatus::Completed).await?;
        tracing::info!(
            session_id = %session_id,
            train_id = %session.train_number,
            save_trip = request.save_trip,
            "Tracking session stopped"
        );

        let trip = if request.save_trip {
            Some(self.save_trip(&session, request).await?)
        } else {
            None
        };

        Ok(StopAck::Stopped {
            session_id,
            train_id: session.train_number,
            trip,
        })
    }

    /// Current aggregate of a train: the cache first, then the durable
    /// snapshot if it is younger than the sample TTL. A snapshot only keeps
    /// passengers whose session is still active.
    pub async fn train(&self, train_id: &str) -> Result<Option<TrainAggregate>, StorageError> {
        match self.roster.get_aggregate(train_id).await {
            Ok(Some(aggregate)) => return Ok(Some(aggregate)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(train_id, error = %err, "Roster cache read failed, trying object store");
            }
        }

        let Some(snapshot) = self.snapshots.get(train_id).await? else {
            return Ok(None);
        };
        let max_age = chrono::Duration::from_std(self.settings.sample_ttl)
            .unwrap_or(chrono::Duration::MAX);
        if Utc::now() - snapshot.last_update > max_age {
            return Ok(None);
        }
        let sessions = self.sessions.find_active_by_train(train_id).await?;
        let Some(mut snapshot) = restrict_to_sessions(snapshot, &sessions) else {
            tracing::debug!(train_id, "Snapshot has no active passengers left, ignoring");
            return Ok(None);
        };
        snapshot.data_source = DataSource::ObjectStore;
        Ok(Some(snapshot))
    }

    async fn owned_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<TrackingSession, TrackingError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await
            .map_err(TrackingError::storage(WriteStage::Session))?;
        match session {
            Some(session) if session.user_id == user_id => Ok(session),
            Some(_) => {
                tracing::warn!(session_id = %session_id, user_id = %user_id, "Session belongs to another user");
                Err(TrackingError::InvalidSession(session_id.to_string()))
            }
            None => Err(TrackingError::InvalidSession(session_id.to_string())),
        }
    }

    async fn record_fix(
        &self,
        session: &TrackingSession,
        fix: &LocationFix,
    ) -> Result<LocationAck, TrackingError> {
        let received_at = Utc::now();
        let sample = PassengerSample {
            session_id: session.id,
            user_id: session.user_id,
            train_number: session.train_number.clone(),
            client_type: session.client_type,
            lat: fix.lat,
            lng: fix.lng,
            timestamp: fix.timestamp.unwrap_or(received_at),
            received_at,
            speed: fix.speed,
            heading: fix.heading,
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            status: PassengerStatus::Active,
        };

        let aggregate = {
            let _guard = self
                .locks
                .acquire(&session.train_number, self.settings.lock_timeout)
                .await?;
            // A stop may have completed while this update waited for the lock.
            let still_active = self
                .sessions
                .find_by_id(session.id)
                .await
                .map_err(TrackingError::storage(WriteStage::Session))?
                .is_some_and(|s| s.is_active());
            if !still_active {
                tracing::debug!(session_id = %session.id, "Session ended before its location was recorded");
                return Ok(LocationAck::Ignored {
                    reason: IgnoreReason::SessionNotActive,
                });
            }
            self.roster
                .put_sample(&sample)
                .await
                .map_err(TrackingError::storage(WriteStage::Sample))?;
            self.reconciler.rebuild(&session.train_number).await?
        };

        if !self.touch(session.id, received_at).await? {
            tracing::debug!(session_id = %session.id, "Session ended right after its location was recorded");
        }

        Ok(LocationAck::Updated {
            session_id: session.id,
            train_id: session.train_number.clone(),
            passenger_count: aggregate.as_ref().map_or(0, |a| a.passenger_count),
            average_position: aggregate.map(|a| a.average_position),
        })
    }

    /// Returns `false` when the session is no longer active.
    async fn touch(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool, TrackingError> {
        self.sessions
            .update_heartbeat(session_id, at)
            .await
            .map_err(TrackingError::storage(WriteStage::Heartbeat))
    }

    /// Moves `session` to a terminal status and drops it from its train's
    /// roster. The durable snapshot is only touched once the lock is gone.
    async fn retire(
        &self,
        session: &TrackingSession,
        status: SessionStatus,
    ) -> Result<(), TrackingError> {
        let train_id = session.train_number.as_str();
        let remaining = {
            let _guard = self
                .locks
                .acquire(train_id, self.settings.lock_timeout)
                .await?;
            self.sessions
                .update_status(session.id, status)
                .await
                .map_err(TrackingError::storage(WriteStage::Session))?;
            self.roster
                .delete_sample(session.id)
                .await
                .map_err(TrackingError::storage(WriteStage::Sample))?;
            self.reconciler.rebuild(train_id).await?
        };

        if remaining.is_none() {
            if let Err(err) = self.snapshots.delete(train_id).await {
                tracing::warn!(train_id, error = %err, "Failed to delete snapshot of emptied train");
            }
        }
        Ok(())
    }

    async fn save_trip(
        &self,
        session: &TrackingSession,
        request: StopSession,
    ) -> Result<SavedTrip, TrackingError> {
        let completed_at = Utc::now();
        let stats = trip_stats(&request.route, session.started_at, completed_at);
        let trip = self
            .trips
            .insert(NewTrip {
                session_id: session.id,
                user_id: session.user_id,
                train_number: session.train_number.clone(),
                train_name: request.train_name,
                stats,
                tracking_data: request.tracking_data.unwrap_or(Value::Null),
                route: request.route,
                started_at: session.started_at,
                completed_at,
            })
            .await
            .map_err(TrackingError::storage(WriteStage::Trip))?;
        tracing::info!(
            session_id = %session.id,
            trip_id = %trip.id,
            distance_km = stats.distance_km,
            "Trip saved"
        );
        Ok(SavedTrip {
            trip_id: trip.id,
            stats,
        })
    }
}

fn validation_error(field: &str, err: ValidationError) -> TrackingError {
    TrackingError::Validation(format!("{}: {}", field, err.code))
}

pub fn validate_fix(fix: &LocationFix) -> Result<(), TrackingError> {
    rules::validate_latitude(fix.lat).map_err(|e| validation_error("lat", e))?;
    rules::validate_longitude(fix.lng).map_err(|e| validation_error("lng", e))?;
    if let Some(speed) = fix.speed {
        rules::validate_speed(speed).map_err(|e| validation_error("speed", e))?;
    }
    if let Some(heading) = fix.heading {
        rules::validate_heading(heading).map_err(|e| validation_error("heading", e))?;
    }
    if let Some(altitude) = fix.altitude {
        rules::validate_altitude(altitude).map_err(|e| validation_error("altitude", e))?;
    }
    if let Some(accuracy) = fix.accuracy {
        rules::validate_accuracy(accuracy).map_err(|e| validation_error("accuracy", e))?;
    }
    Ok(())
}
