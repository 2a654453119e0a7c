//! Completed trips, written once when a session stops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};

use crate::types::{SessionId, TripId, UserId};

/// Point of the route a client recorded during its session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Metres per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Metres above sea level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TripStats {
    pub distance_km: f64,
    pub duration_seconds: i64,
    /// km/h
    pub max_speed_kmh: Option<f64>,
    /// km/h
    pub average_speed_kmh: Option<f64>,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
}

#[derive(Debug, Clone)]
pub struct NewTrip {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub train_number: String,
    pub train_name: Option<String>,
    pub stats: TripStats,
    pub tracking_data: Value,
    pub route: Vec<RoutePoint>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: TripId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub train_number: String,
    pub train_name: Option<String>,
    pub distance_km: f64,
    pub duration_seconds: i64,
    pub max_speed_kmh: Option<f64>,
    pub average_speed_kmh: Option<f64>,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub tracking_data: Json<Value>,
    pub route_coordinates: Json<Vec<RoutePoint>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Trip {
    pub fn from_new(id: TripId, trip: NewTrip) -> Self {
        Self {
            id,
            session_id: trip.session_id,
            user_id: trip.user_id,
            train_number: trip.train_number,
            train_name: trip.train_name,
            distance_km: trip.stats.distance_km,
            duration_seconds: trip.stats.duration_seconds,
            max_speed_kmh: trip.stats.max_speed_kmh,
            average_speed_kmh: trip.stats.average_speed_kmh,
            elevation_gain_m: trip.stats.elevation_gain_m,
            elevation_loss_m: trip.stats.elevation_loss_m,
            tracking_data: Json(trip.tracking_data),
            route_coordinates: Json(trip.route),
            started_at: trip.started_at,
            completed_at: trip.completed_at,
        }
    }
}
