//! Pure roster computations shared by the reconciler, the broadcaster and
//! trip saving.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::TrackingSettings;
use crate::models::{
    passenger::{PassengerSample, PassengerStatus, Position},
    tracking_session::{ClientType, TrackingSession},
    train::{DataSource, TrainAggregate, TrainStatus},
    trip::{RoutePoint, TripStats},
};
use crate::types::SessionId;

const EARTH_RADIUS_KM: f64 = 6371.0;
const MPS_TO_KMH: f64 = 3.6;

pub fn staleness_tolerance(
    client_type: ClientType,
    settings: &TrackingSettings,
) -> chrono::Duration {
    let tolerance = if client_type.is_mobile() {
        settings.mobile_stale_after
    } else {
        settings.default_stale_after
    };
    chrono::Duration::from_std(tolerance).unwrap_or(chrono::Duration::MAX)
}

pub fn classify_sample(
    sample: &PassengerSample,
    client_type: ClientType,
    now: DateTime<Utc>,
    settings: &TrackingSettings,
) -> PassengerStatus {
    if now - sample.received_at <= staleness_tolerance(client_type, settings) {
        PassengerStatus::Active
    } else {
        PassengerStatus::Disconnected
    }
}

pub fn average_position<'a, I>(positions: I) -> Option<Position>
where
    I: IntoIterator<Item = &'a Position>,
{
    let (count, lat, lng) = positions
        .into_iter()
        .fold((0usize, 0.0, 0.0), |(n, lat, lng), p| (n + 1, lat + p.lat, lng + p.lng));
    (count > 0).then(|| Position {
        lat: lat / count as f64,
        lng: lng / count as f64,
    })
}

pub fn average_of<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (count, sum) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0usize, 0.0), |(n, sum), v| (n + 1, sum + v));
    (count > 0).then(|| sum / count as f64)
}

/// Builds the aggregate for `train_id` from its active session rows and the
/// samples found for them. Returns `None` when no passenger has a fresh
/// sample: an empty train has no aggregate at all.
pub fn build_aggregate(
    train_id: &str,
    sessions: &[TrackingSession],
    samples: &HashMap<SessionId, PassengerSample>,
    now: DateTime<Utc>,
    settings: &TrackingSettings,
) -> Option<TrainAggregate> {
    let mut pending_sessions = 0;
    let mut passenger_list = Vec::new();

    for session in sessions.iter().filter(|s| s.is_active() && s.train_number == train_id) {
        let Some(sample) = samples.get(&session.id) else {
            pending_sessions += 1;
            continue;
        };
        let status = classify_sample(sample, session.client_type, now, settings);
        if status == PassengerStatus::Disconnected && !session.client_type.is_mobile() {
            continue;
        }
        let mut sample = sample.clone();
        sample.status = status;
        sample.client_type = session.client_type;
        passenger_list.push(sample);
    }

    let active: Vec<Position> = passenger_list
        .iter()
        .filter(|p| p.status == PassengerStatus::Active)
        .map(PassengerSample::position)
        .collect();
    let average_position = average_position(&active)?;

    let status = if active.len() == passenger_list.len() {
        TrainStatus::Active
    } else {
        TrainStatus::Partial
    };

    Some(TrainAggregate {
        train_id: train_id.to_string(),
        passenger_count: active.len(),
        pending_sessions,
        average_position,
        passenger_list,
        last_update: now,
        status,
        data_source: DataSource::Cache,
    })
}

/// Narrows a stored aggregate to passengers whose session is still active on
/// the train. Returns `None` when no fresh passenger survives.
pub fn restrict_to_sessions(
    mut aggregate: TrainAggregate,
    sessions: &[TrackingSession],
) -> Option<TrainAggregate> {
    let active: Vec<SessionId> = sessions
        .iter()
        .filter(|s| s.is_active() && s.train_number == aggregate.train_id)
        .map(|s| s.id)
        .collect();
    aggregate
        .passenger_list
        .retain(|p| active.contains(&p.session_id));

    let fresh: Vec<Position> = aggregate
        .active_passengers()
        .map(PassengerSample::position)
        .collect();
    aggregate.average_position = average_position(&fresh)?;
    aggregate.passenger_count = fresh.len();
    aggregate.pending_sessions = active.len().saturating_sub(aggregate.passenger_list.len());
    aggregate.status = if fresh.len() == aggregate.passenger_list.len() {
        TrainStatus::Active
    } else {
        TrainStatus::Partial
    };
    Some(aggregate)
}

pub fn haversine_km(a: &RoutePoint, b: &RoutePoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

pub fn trip_stats(
    route: &[RoutePoint],
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> TripStats {
    let distance_km: f64 = route.windows(2).map(|w| haversine_km(&w[0], &w[1])).sum();
    let duration_seconds = (completed_at - started_at).num_seconds().max(0);

    let reported_speeds: Vec<f64> = route
        .iter()
        .filter_map(|p| p.speed)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s * MPS_TO_KMH)
        .collect();
    let max_speed_kmh = reported_speeds.iter().copied().reduce(f64::max);
    let average_speed_kmh = if duration_seconds > 0 && distance_km > 0.0 {
        Some(distance_km / (duration_seconds as f64 / 3600.0))
    } else {
        average_of(reported_speeds.iter().copied())
    };

    let mut elevation_gain_m = 0.0;
    let mut elevation_loss_m = 0.0;
    let altitudes: Vec<f64> = route.iter().filter_map(|p| p.altitude).collect();
    for pair in altitudes.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            elevation_gain_m += delta;
        } else {
            elevation_loss_m -= delta;
        }
    }

    TripStats {
        distance_km,
        duration_seconds,
        max_speed_kmh,
        average_speed_kmh,
        elevation_gain_m,
        elevation_loss_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tracking_session::SessionStatus;
    use crate::types::UserId;
    use chrono::Duration;

    fn session(train: &str, client_type: ClientType) -> TrackingSession {
        let now = Utc::now();
        TrackingSession {
            id: SessionId::new(),
            user_id: UserId::new(),
            train_number: train.to_string(),
            client_type,
            started_at: now,
            last_heartbeat: now,
            status: SessionStatus::Active,
        }
    }

    fn sample_for(session: &TrackingSession, lat: f64, lng: f64, age: Duration) -> PassengerSample {
        let at = Utc::now() - age;
        PassengerSample {
            session_id: session.id,
            user_id: session.user_id,
            train_number: session.train_number.clone(),
            client_type: session.client_type,
            lat,
            lng,
            timestamp: at,
            received_at: at,
            speed: None,
            heading: None,
            altitude: None,
            accuracy: None,
            status: PassengerStatus::Active,
        }
    }

    #[test]
    fn average_position_of_two_points() {
        let avg = average_position(&[
            Position { lat: 10.01, lng: 10.01 },
            Position { lat: 10.03, lng: 10.03 },
        ])
        .unwrap();
        assert!((avg.lat - 10.02).abs() < 1e-9);
        assert!((avg.lng - 10.02).abs() < 1e-9);
        assert!(average_position(&[]).is_none());
    }

    #[test]
    fn average_of_ignores_non_finite_values() {
        assert_eq!(average_of([10.0, f64::NAN, 20.0]), Some(15.0));
        assert_eq!(average_of(std::iter::empty()), None);
    }

    #[test]
    fn aggregate_skips_sessions_without_samples() {
        let settings = TrackingSettings::default();
        let a = session("T1", ClientType::Mobile);
        let b = session("T1", ClientType::Mobile);
        let samples = HashMap::from([(
            a.id,
            sample_for(&a, 10.0, 20.0, Duration::seconds(5)),
        )]);
        let agg = build_aggregate("T1", &[a, b], &samples, Utc::now(), &settings).unwrap();
        assert_eq!(agg.passenger_count, 1);
        assert_eq!(agg.pending_sessions, 1);
        assert_eq!(agg.average_position, Position { lat: 10.0, lng: 20.0 });
        assert_eq!(agg.status, TrainStatus::Active);
    }

    #[test]
    fn stale_mobile_sample_is_listed_but_not_averaged() {
        let settings = TrackingSettings::default();
        let fresh = session("T1", ClientType::Mobile);
        let stale = session("T1", ClientType::Mobile);
        let samples = HashMap::from([
            (fresh.id, sample_for(&fresh, 1.0, 1.0, Duration::seconds(30))),
            (stale.id, sample_for(&stale, 50.0, 50.0, Duration::minutes(9))),
        ]);
        let agg =
            build_aggregate("T1", &[fresh, stale.clone()], &samples, Utc::now(), &settings).unwrap();
        assert_eq!(agg.passenger_count, 1);
        assert_eq!(agg.passenger_list.len(), 2);
        assert_eq!(agg.average_position, Position { lat: 1.0, lng: 1.0 });
        assert_eq!(agg.status, TrainStatus::Partial);
        let listed = agg
            .passenger_list
            .iter()
            .find(|p| p.session_id == stale.id)
            .unwrap();
        assert_eq!(listed.status, PassengerStatus::Disconnected);
    }

    #[test]
    fn stale_web_sample_is_dropped_after_two_minutes() {
        let settings = TrackingSettings::default();
        let fresh = session("T1", ClientType::Mobile);
        let web = session("T1", ClientType::Web);
        let samples = HashMap::from([
            (fresh.id, sample_for(&fresh, 1.0, 1.0, Duration::seconds(30))),
            (web.id, sample_for(&web, 2.0, 2.0, Duration::minutes(3))),
        ]);
        let agg = build_aggregate("T1", &[fresh, web], &samples, Utc::now(), &settings).unwrap();
        assert_eq!(agg.passenger_list.len(), 1);
        assert_eq!(agg.status, TrainStatus::Active);
    }

    #[test]
    fn mobile_sample_within_eight_minutes_stays_active() {
        let settings = TrackingSettings::default();
        let mobile = session("T1", ClientType::Mobile);
        let samples = HashMap::from([(
            mobile.id,
            sample_for(&mobile, 3.0, 4.0, Duration::minutes(7)),
        )]);
        let agg = build_aggregate("T1", &[mobile], &samples, Utc::now(), &settings).unwrap();
        assert_eq!(agg.passenger_count, 1);
    }

    #[test]
    fn aggregate_is_absent_without_fresh_samples() {
        let settings = TrackingSettings::default();
        let stale = session("T1", ClientType::Mobile);
        let samples = HashMap::from([(
            stale.id,
            sample_for(&stale, 1.0, 1.0, Duration::minutes(9)),
        )]);
        assert!(build_aggregate("T1", &[stale], &samples, Utc::now(), &settings).is_none());
        assert!(build_aggregate("T1", &[], &HashMap::new(), Utc::now(), &settings).is_none());
    }

    #[test]
    fn restricting_drops_departed_passengers() {
        let settings = TrackingSettings::default();
        let staying = session("T1", ClientType::Mobile);
        let mut leaving = session("T1", ClientType::Mobile);
        let samples = HashMap::from([
            (staying.id, sample_for(&staying, 1.0, 1.0, Duration::seconds(5))),
            (leaving.id, sample_for(&leaving, 3.0, 3.0, Duration::seconds(5))),
        ]);
        let stored = build_aggregate(
            "T1",
            &[staying.clone(), leaving.clone()],
            &samples,
            Utc::now(),
            &settings,
        )
        .unwrap();
        assert_eq!(stored.passenger_count, 2);

        leaving.status = SessionStatus::Completed;
        let narrowed =
            restrict_to_sessions(stored.clone(), &[staying.clone(), leaving.clone()]).unwrap();
        assert_eq!(narrowed.passenger_count, 1);
        assert_eq!(narrowed.passenger_list.len(), 1);
        assert_eq!(narrowed.average_position, Position { lat: 1.0, lng: 1.0 });

        assert!(restrict_to_sessions(stored, &[leaving]).is_none());
    }

    fn point(lat: f64, lng: f64, speed: Option<f64>, altitude: Option<f64>) -> RoutePoint {
        RoutePoint {
            lat,
            lng,
            timestamp: None,
            speed,
            altitude,
        }
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Tokyo station to Shin-Yokohama, roughly 23.5 km as the crow flies.
        let tokyo = point(35.6812, 139.7671, None, None);
        let shin_yokohama = point(35.5075, 139.6176, None, None);
        let d = haversine_km(&tokyo, &shin_yokohama);
        assert!((d - 23.5).abs() < 2.5, "distance was {d}");
    }

    #[test]
    fn trip_stats_accumulate_elevation_and_speed() {
        let start = Utc::now() - Duration::hours(1);
        let end = start + Duration::hours(1);
        let route = vec![
            point(35.0, 139.0, Some(10.0), Some(10.0)),
            point(35.1, 139.0, Some(30.0), Some(40.0)),
            point(35.2, 139.0, None, Some(25.0)),
        ];
        let stats = trip_stats(&route, start, end);
        assert!((stats.distance_km - 22.2).abs() < 0.5);
        assert_eq!(stats.duration_seconds, 3600);
        assert!((stats.max_speed_kmh.unwrap() - 108.0).abs() < 1e-9);
        assert!((stats.average_speed_kmh.unwrap() - stats.distance_km).abs() < 1e-6);
        assert_eq!(stats.elevation_gain_m, 30.0);
        assert_eq!(stats.elevation_loss_m, 15.0);
    }

    #[test]
    fn trip_stats_for_empty_route_are_zero() {
        let now = Utc::now();
        let stats = trip_stats(&[], now, now);
        assert_eq!(stats, TripStats::default());
    }
}
