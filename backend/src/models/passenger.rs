//! Ephemeral per-session GPS samples held in the roster cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::tracking_session::ClientType;
use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PassengerStatus {
    #[default]
    Active,
    Disconnected,
}

/// Latest location reported by one tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerSample {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub train_number: String,
    #[serde(default)]
    pub client_type: ClientType,
    pub lat: f64,
    pub lng: f64,
    /// Time reported by the client for this fix.
    pub timestamp: DateTime<Utc>,
    /// Server time the fix arrived; staleness is measured from here.
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub status: PassengerStatus,
}

impl PassengerSample {
    pub fn position(&self) -> Position {
        Position {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// A GPS fix as reported by a client, before it is bound to a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
}

impl LocationFix {
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            timestamp: None,
            speed: None,
            heading: None,
            altitude: None,
            accuracy: None,
        }
    }
}
