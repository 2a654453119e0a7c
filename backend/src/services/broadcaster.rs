//! Periodic fan-out of per-train state to connected observers.
//!
//! Each tick reads the active sessions once, resolves every train through an
//! ordered list of sources (cache, object store, bare session rows) and
//! pushes one `train_updates` message to every observer. Observers whose
//! channel is closed are dropped from the registry.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::TrackingSettings;
use crate::error::StorageError;
use crate::models::{
    broadcast::{BroadcastMessage, TrainUpdatesPayload},
    passenger::PassengerStatus,
    tracking_session::TrackingSession,
    train::{DataSource, PassengerView, TrainAggregate, TrainUpdate},
};
use crate::repositories::tracking_session::TrackingSessionRepository;
use crate::services::{
    aggregate::{average_of, average_position},
    object_store::SnapshotStore,
    roster_cache::RosterCache,
    scheduler::PeriodicTask,
};
use crate::types::SessionId;

pub type ObserverId = Uuid;

/// Outbound half of one observer's push channel, already serialized.
pub type ObserverSender = UnboundedSender<String>;

#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<HashMap<ObserverId, ObserverSender>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverId, ObserverSender>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, id: ObserverId, sender: ObserverSender) {
        self.guard().insert(id, sender);
    }

    /// Dropping the sender closes the observer's channel.
    pub fn remove(&self, id: ObserverId) -> bool {
        self.guard().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn send(&self, id: ObserverId, text: String) -> bool {
        let Some(sender) = self.guard().get(&id).cloned() else {
            return false;
        };
        if sender.send(text).is_err() {
            self.remove(id);
            return false;
        }
        true
    }

    /// Sends `text` to every observer and removes those whose channel is
    /// closed. Returns the removed ids.
    pub fn broadcast(&self, text: &str) -> Vec<ObserverId> {
        let targets: Vec<(ObserverId, ObserverSender)> = self
            .guard()
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let failed: Vec<ObserverId> = targets
            .into_iter()
            .filter(|(_, sender)| sender.send(text.to_owned()).is_err())
            .map(|(id, _)| id)
            .collect();

        if !failed.is_empty() {
            let mut observers = self.guard();
            for id in &failed {
                observers.remove(id);
            }
        }
        failed
    }
}

/// Per-passenger state for one train, as found by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSnapshot {
    pub passengers: Vec<PassengerView>,
    pub data_source: DataSource,
}

impl TrainSnapshot {
    fn from_aggregate(aggregate: &TrainAggregate, data_source: DataSource) -> Self {
        Self {
            passengers: aggregate.passenger_list.iter().map(PassengerView::from).collect(),
            data_source,
        }
    }
}

#[derive(Debug)]
pub enum SourceLookup {
    Hit(TrainSnapshot),
    Miss,
    Failed(StorageError),
}

/// One tier the broadcaster may read a train's roster from.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, train_id: &str, sessions: &[TrackingSession]) -> SourceLookup;
}

pub struct CacheSource(pub RosterCache);

#[async_trait]
impl AggregateSource for CacheSource {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn lookup(&self, train_id: &str, _sessions: &[TrackingSession]) -> SourceLookup {
        match self.0.get_aggregate(train_id).await {
            Ok(Some(aggregate)) => {
                SourceLookup::Hit(TrainSnapshot::from_aggregate(&aggregate, DataSource::Cache))
            }
            Ok(None) => SourceLookup::Miss,
            Err(err) => SourceLookup::Failed(err),
        }
    }
}

pub struct ObjectStoreSource(pub SnapshotStore);

#[async_trait]
impl AggregateSource for ObjectStoreSource {
    fn name(&self) -> &'static str {
        "object_store"
    }

    async fn lookup(&self, train_id: &str, _sessions: &[TrackingSession]) -> SourceLookup {
        match self.0.get(train_id).await {
            Ok(Some(aggregate)) => SourceLookup::Hit(TrainSnapshot::from_aggregate(
                &aggregate,
                DataSource::ObjectStore,
            )),
            Ok(None) => SourceLookup::Miss,
            Err(err) => SourceLookup::Failed(err),
        }
    }
}

/// Last resort: who is on the train, without positions.
pub struct SessionRowsSource;

#[async_trait]
impl AggregateSource for SessionRowsSource {
    fn name(&self) -> &'static str {
        "sessions"
    }

    async fn lookup(&self, _train_id: &str, sessions: &[TrackingSession]) -> SourceLookup {
        SourceLookup::Hit(TrainSnapshot {
            passengers: sessions
                .iter()
                .map(|s| PassengerView {
                    session_id: s.id,
                    user_id: s.user_id,
                    position: None,
                    speed: None,
                    heading: None,
                    timestamp: Some(s.last_heartbeat),
                    status: PassengerStatus::Active,
                })
                .collect(),
            data_source: DataSource::Sessions,
        })
    }
}

pub struct Broadcaster {
    sessions: Arc<dyn TrackingSessionRepository>,
    sources: Vec<Arc<dyn AggregateSource>>,
    observers: ObserverRegistry,
    settings: TrackingSettings,
}

impl Broadcaster {
    pub fn new(
        sessions: Arc<dyn TrackingSessionRepository>,
        sources: Vec<Arc<dyn AggregateSource>>,
        settings: TrackingSettings,
    ) -> Self {
        Self {
            sessions,
            sources,
            observers: ObserverRegistry::new(),
            settings,
        }
    }

    /// Cache, then object store, then session rows.
    pub fn with_default_sources(
        sessions: Arc<dyn TrackingSessionRepository>,
        roster: RosterCache,
        snapshots: SnapshotStore,
        settings: TrackingSettings,
    ) -> Self {
        Self::new(
            sessions,
            vec![
                Arc::new(CacheSource(roster)),
                Arc::new(ObjectStoreSource(snapshots)),
                Arc::new(SessionRowsSource),
            ],
            settings,
        )
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Sends the full current state to a new observer, then adds it to the
    /// broadcast group.
    pub async fn connect(&self, sender: ObserverSender) -> Result<ObserverId, StorageError> {
        let id = Uuid::new_v4();
        let trains = match self.current_updates().await {
            Ok(trains) => trains,
            Err(err) => {
                tracing::warn!(observer_id = %id, error = %err, "Initial state unavailable, sending empty roster");
                Vec::new()
            }
        };
        let message = BroadcastMessage::InitialData(TrainUpdatesPayload {
            trains,
            timestamp: Utc::now(),
        });
        let text = message.to_json()?;
        if sender.send(text).is_err() {
            tracing::debug!(observer_id = %id, "Observer went away before initial data");
            return Ok(id);
        }
        self.observers.register(id, sender);
        tracing::info!(observer_id = %id, observers = self.observers.len(), "Observer connected");
        Ok(id)
    }

    pub fn disconnect(&self, id: ObserverId) {
        if self.observers.remove(id) {
            tracing::info!(observer_id = %id, observers = self.observers.len(), "Observer disconnected");
        }
    }

    pub fn send_to(&self, id: ObserverId, message: &BroadcastMessage) -> bool {
        match message.to_json() {
            Ok(text) => self.observers.send(id, text),
            Err(err) => {
                tracing::warn!(observer_id = %id, error = %err, "Failed to encode message");
                false
            }
        }
    }

    /// One broadcast cycle. Returns how many observers received the update;
    /// does nothing at all without observers.
    pub async fn tick_once(&self) -> Result<usize, StorageError> {
        if self.observers.is_empty() {
            return Ok(0);
        }

        let trains = self.current_updates().await?;
        let message = BroadcastMessage::TrainUpdates(TrainUpdatesPayload {
            trains,
            timestamp: Utc::now(),
        });
        let text = message.to_json()?;
        let failed = self.observers.broadcast(&text);
        for id in &failed {
            tracing::warn!(observer_id = %id, "Observer channel closed, removed from broadcast group");
        }
        Ok(self.observers.len())
    }

    /// Builds one update per train with active sessions.
    pub async fn current_updates(&self) -> Result<Vec<TrainUpdate>, StorageError> {
        let sessions = self.sessions.list_active().await?;
        let mut by_train: BTreeMap<&str, Vec<TrackingSession>> = BTreeMap::new();
        for session in &sessions {
            by_train
                .entry(session.train_number.as_str())
                .or_default()
                .push(session.clone());
        }

        let now = Utc::now();
        let mut updates = Vec::with_capacity(by_train.len());
        for (train_id, group) in by_train {
            let Some(snapshot) = self.resolve(train_id, &group).await else {
                continue;
            };
            if let Some(update) = self.train_update(train_id, &group, snapshot, now) {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    async fn resolve(&self, train_id: &str, sessions: &[TrackingSession]) -> Option<TrainSnapshot> {
        for source in &self.sources {
            match source.lookup(train_id, sessions).await {
                SourceLookup::Hit(snapshot) => return Some(snapshot),
                SourceLookup::Miss => {}
                SourceLookup::Failed(err) => {
                    tracing::warn!(train_id, source = source.name(), error = %err, "Roster source failed, falling back");
                }
            }
        }
        None
    }

    fn train_update(
        &self,
        train_id: &str,
        sessions: &[TrackingSession],
        snapshot: TrainSnapshot,
        now: DateTime<Utc>,
    ) -> Option<TrainUpdate> {
        let recency = chrono::Duration::from_std(self.settings.broadcast_recency)
            .unwrap_or(chrono::Duration::MAX);
        let heartbeats: HashMap<SessionId, DateTime<Utc>> = sessions
            .iter()
            .map(|s| (s.id, s.last_heartbeat))
            .collect();

        let passengers: Vec<PassengerView> = snapshot
            .passengers
            .into_iter()
            .filter(|p| {
                heartbeats
                    .get(&p.session_id)
                    .is_some_and(|hb| now - *hb <= recency)
            })
            .collect();
        if passengers.is_empty() {
            return None;
        }

        let positions: Vec<_> = passengers.iter().filter_map(|p| p.position).collect();
        let last_update = passengers
            .iter()
            .filter_map(|p| heartbeats.get(&p.session_id).copied())
            .max()
            .unwrap_or(now);

        Some(TrainUpdate {
            train_id: train_id.to_string(),
            passenger_count: passengers.len(),
            average_position: average_position(&positions),
            average_speed: average_of(passengers.iter().filter_map(|p| p.speed)),
            passengers,
            last_update,
            data_source: snapshot.data_source,
        })
    }
}

#[async_trait]
impl PeriodicTask for Broadcaster {
    fn name(&self) -> &'static str {
        "broadcaster"
    }

    async fn tick(&self) {
        if let Err(err) = self.tick_once().await {
            tracing::warn!(error = %err, "Broadcast cycle skipped");
        }
    }
}
