//! Derived per-train views: the cached aggregate, the list summary and the
//! broadcast update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::passenger::{PassengerSample, PassengerStatus, Position};
use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainStatus {
    /// Every listed passenger has a fresh sample.
    Active,
    /// At least one listed passenger is disconnected.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Cache,
    ObjectStore,
    Sessions,
}

/// Roster of one train rebuilt from session rows and cached samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainAggregate {
    pub train_id: String,
    /// Passengers with a fresh sample; the position average runs over them.
    pub passenger_count: usize,
    /// Active sessions that have not reported a sample yet.
    #[serde(default)]
    pub pending_sessions: usize,
    pub average_position: Position,
    pub passenger_list: Vec<PassengerSample>,
    pub last_update: DateTime<Utc>,
    pub status: TrainStatus,
    pub data_source: DataSource,
}

impl TrainAggregate {
    pub fn active_passengers(&self) -> impl Iterator<Item = &PassengerSample> {
        self.passenger_list
            .iter()
            .filter(|p| p.status == PassengerStatus::Active)
    }
}

/// Entry of the lightweight active-trains listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    pub train_id: String,
    pub passenger_count: usize,
    pub last_update: DateTime<Utc>,
    pub status: TrainStatus,
}

/// Per-passenger entry pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerView {
    pub session_id: SessionId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub status: PassengerStatus,
}

impl From<&PassengerSample> for PassengerView {
    fn from(sample: &PassengerSample) -> Self {
        Self {
            session_id: sample.session_id,
            user_id: sample.user_id,
            position: Some(sample.position()),
            speed: sample.speed,
            heading: sample.heading,
            timestamp: Some(sample.timestamp),
            status: sample.status,
        }
    }
}

/// One train's state inside a `train_updates` / `initial_data` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainUpdate {
    pub train_id: String,
    pub passenger_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_speed: Option<f64>,
    pub passengers: Vec<PassengerView>,
    pub last_update: DateTime<Utc>,
    pub data_source: DataSource,
}
