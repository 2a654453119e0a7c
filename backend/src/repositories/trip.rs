use std::time::Duration;

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};

use crate::error::StorageError;
use crate::models::trip::{NewTrip, Trip};
use crate::types::{SessionId, TripId};
use crate::utils::timeout::bounded;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn insert(&self, trip: NewTrip) -> Result<Trip, StorageError>;
    async fn find_by_session(&self, session_id: SessionId) -> Result<Option<Trip>, StorageError>;
}

pub struct PgTripRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PgTripRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn insert(&self, trip: NewTrip) -> Result<Trip, StorageError> {
        let row = Trip::from_new(TripId::new(), trip);
        bounded(
            "insert_trip",
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO trips
                    (id, session_id, user_id, train_number, train_name,
                     distance_km, duration_seconds, max_speed_kmh, average_speed_kmh,
                     elevation_gain_m, elevation_loss_m, tracking_data, route_coordinates,
                     started_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(row.id)
            .bind(row.session_id)
            .bind(row.user_id)
            .bind(&row.train_number)
            .bind(&row.train_name)
            .bind(row.distance_km)
            .bind(row.duration_seconds)
            .bind(row.max_speed_kmh)
            .bind(row.average_speed_kmh)
            .bind(row.elevation_gain_m)
            .bind(row.elevation_loss_m)
            .bind(Json(&row.tracking_data.0))
            .bind(Json(&row.route_coordinates.0))
            .bind(row.started_at)
            .bind(row.completed_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(row)
    }

    async fn find_by_session(&self, session_id: SessionId) -> Result<Option<Trip>, StorageError> {
        bounded(
            "find_trip_by_session",
            self.timeout,
            sqlx::query_as::<_, Trip>(
                r#"
                SELECT id, session_id, user_id, train_number, train_name,
                       distance_km, duration_seconds, max_speed_kmh, average_speed_kmh,
                       elevation_gain_m, elevation_loss_m, tracking_data, route_coordinates,
                       started_at, completed_at
                FROM trips
                WHERE session_id = $1
                "#,
            )
            .bind(session_id)
            .fetch_optional(&self.pool),
        )
        .await
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct InMemoryTripRepository {
    trips: std::sync::Mutex<Vec<Trip>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl InMemoryTripRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Trip> {
        self.trips.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl TripRepository for InMemoryTripRepository {
    async fn insert(&self, trip: NewTrip) -> Result<Trip, StorageError> {
        let row = Trip::from_new(TripId::new(), trip);
        let mut trips = self.trips.lock().unwrap_or_else(|e| e.into_inner());
        if trips.iter().any(|t| t.session_id == row.session_id) {
            return Err(StorageError::Database(sqlx::Error::Protocol(
                "trip already saved for session".into(),
            )));
        }
        trips.push(row.clone());
        Ok(row)
    }

    async fn find_by_session(&self, session_id: SessionId) -> Result<Option<Trip>, StorageError> {
        let trips = self.trips.lock().unwrap_or_else(|e| e.into_inner());
        Ok(trips.iter().find(|t| t.session_id == session_id).cloned())
    }
}
