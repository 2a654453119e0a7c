//! JSON payloads accepted by the tracking endpoints.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use crate::models::{passenger::LocationFix, tracking_session::ClientType, trip::RoutePoint};
use crate::types::SessionId;
use crate::validation::rules;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LocationPayload {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    pub timestamp: Option<DateTime<Utc>>,
    /// m/s
    #[validate(range(min = 0.0))]
    pub speed: Option<f64>,
    #[validate(range(min = 0.0, exclusive_max = 360.0))]
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    #[validate(range(min = 0.0))]
    pub accuracy: Option<f64>,
}

impl From<LocationPayload> for LocationFix {
    fn from(payload: LocationPayload) -> Self {
        Self {
            lat: payload.lat,
            lng: payload.lng,
            timestamp: payload.timestamp,
            speed: payload.speed,
            heading: payload.heading,
            altitude: payload.altitude,
            accuracy: payload.accuracy,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartTrackingRequest {
    #[validate(custom(function = "rules::validate_train_number"))]
    pub train_number: String,
    #[serde(default)]
    pub client_type: ClientType,
    #[validate(nested)]
    pub initial_position: Option<LocationPayload>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LocationUpdateRequest {
    pub session_id: SessionId,
    #[serde(flatten)]
    #[validate(nested)]
    pub location: LocationPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StopTrackingRequest {
    pub session_id: SessionId,
    #[serde(default)]
    pub save_trip: bool,
    #[validate(length(max = 100))]
    pub train_name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub route_coordinates: Vec<RoutePoint>,
    pub tracking_data: Option<Value>,
}
