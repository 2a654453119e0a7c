use trainwatch_backend::{
    models::{
        passenger::LocationFix,
        tracking_session::{ClientType, SessionStatus},
        train::DataSource,
    },
    repositories::TrackingSessionRepository,
    services::tracking::{LocationAck, StartSession, StopAck, StopSession},
    types::UserId,
};

mod support;

use support::{assert_close, test_app};

fn start(train: &str) -> StartSession {
    StartSession {
        train_number: train.to_string(),
        client_type: ClientType::Mobile,
        initial_position: None,
    }
}

#[tokio::test]
async fn two_riders_on_one_train_share_an_averaged_position() {
    let app = test_app();
    let tracking = &app.state.tracking;
    let (alice, bob) = (UserId::new(), UserId::new());

    let a = tracking.start_session(alice, start("T1")).await.unwrap();
    let b = tracking.start_session(bob, start("T1")).await.unwrap();
    tracking
        .update_location(alice, a.session.id, LocationFix::at(35.0, 139.0))
        .await
        .unwrap();
    let ack = tracking
        .update_location(bob, b.session.id, LocationFix::at(35.2, 139.2))
        .await
        .unwrap();

    match ack {
        LocationAck::Updated {
            passenger_count,
            average_position: Some(position),
            ..
        } => {
            assert_eq!(passenger_count, 2);
            assert_close(position.lat, 35.1);
            assert_close(position.lng, 139.1);
        }
        other => panic!("unexpected ack: {:?}", other),
    }

    let aggregate = tracking.train("T1").await.unwrap().expect("aggregate cached");
    assert_eq!(aggregate.passenger_count, 2);
    assert_eq!(aggregate.data_source, DataSource::Cache);

    let stop = tracking
        .stop_session(alice, a.session.id, StopSession::default())
        .await
        .unwrap();
    assert!(matches!(stop, StopAck::Stopped { .. }));
    let aggregate = tracking.train("T1").await.unwrap().expect("bob still aboard");
    assert_eq!(aggregate.passenger_count, 1);
    assert_close(aggregate.average_position.lat, 35.2);

    tracking
        .stop_session(bob, b.session.id, StopSession::default())
        .await
        .unwrap();
    assert!(tracking.train("T1").await.unwrap().is_none());
}

#[tokio::test]
async fn aggregate_follows_riders_joining_and_leaving() {
    let app = test_app();
    let tracking = &app.state.tracking;
    let (a_user, b_user) = (UserId::new(), UserId::new());

    let mut a_start = start("T1");
    a_start.initial_position = Some(LocationFix::at(10.0, 10.0));
    let a = tracking.start_session(a_user, a_start).await.unwrap();
    tracking
        .update_location(a_user, a.session.id, LocationFix::at(10.01, 10.01))
        .await
        .unwrap();
    let aggregate = tracking.train("T1").await.unwrap().unwrap();
    assert_eq!(aggregate.passenger_count, 1);
    assert_close(aggregate.average_position.lat, 10.01);
    assert_close(aggregate.average_position.lng, 10.01);

    let mut b_start = start("T1");
    b_start.initial_position = Some(LocationFix::at(10.03, 10.03));
    let b = tracking.start_session(b_user, b_start).await.unwrap();
    let aggregate = tracking.train("T1").await.unwrap().unwrap();
    assert_eq!(aggregate.passenger_count, 2);
    assert_close(aggregate.average_position.lat, (10.01 + 10.03) / 2.0);
    assert_close(aggregate.average_position.lng, (10.01 + 10.03) / 2.0);

    tracking
        .stop_session(a_user, a.session.id, StopSession::default())
        .await
        .unwrap();
    let aggregate = tracking.train("T1").await.unwrap().unwrap();
    assert_eq!(aggregate.passenger_count, 1);
    assert_close(aggregate.average_position.lat, 10.03);

    tracking
        .stop_session(b_user, b.session.id, StopSession::default())
        .await
        .unwrap();
    assert!(tracking.train("T1").await.unwrap().is_none());
    assert!(app.objects.keys().is_empty());
}

#[tokio::test]
async fn starting_again_moves_the_rider_to_the_new_train() {
    let app = test_app();
    let tracking = &app.state.tracking;
    let user = UserId::new();

    let mut first = start("T1");
    first.initial_position = Some(LocationFix::at(35.0, 139.0));
    let first = tracking.start_session(user, first).await.unwrap();
    assert!(tracking.train("T1").await.unwrap().is_some());

    let mut second = start("T2");
    second.initial_position = Some(LocationFix::at(34.0, 135.0));
    let second = tracking.start_session(user, second).await.unwrap();

    assert_eq!(second.terminated, vec![first.session.id]);
    assert_eq!(
        app.sessions.get(first.session.id).unwrap().status,
        SessionStatus::Terminated
    );
    assert!(tracking.train("T1").await.unwrap().is_none());
    let t2 = tracking.train("T2").await.unwrap().expect("T2 aggregate");
    assert_eq!(t2.passenger_count, 1);

    let active = app.sessions.find_active_by_user(user).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.session.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_riders_on_one_train_are_all_counted() {
    let app = test_app();
    let tracking = app.state.tracking.clone();
    const RIDERS: usize = 24;

    let mut handles = Vec::with_capacity(RIDERS);
    for i in 0..RIDERS {
        let tracking = tracking.clone();
        handles.push(tokio::spawn(async move {
            let user = UserId::new();
            let started = tracking.start_session(user, start("T9")).await.unwrap();
            let lat = 35.0 + i as f64 * 0.001;
            tracking
                .update_location(user, started.session.id, LocationFix::at(lat, 139.0))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let aggregate = tracking.train("T9").await.unwrap().expect("aggregate");
    assert_eq!(aggregate.passenger_count, RIDERS);
    assert_eq!(aggregate.passenger_list.len(), RIDERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_trains_update_independently() {
    let app = test_app();
    let tracking = app.state.tracking.clone();
    let trains = ["A1", "B2", "C3", "D4"];

    let mut handles = Vec::new();
    for (i, train) in trains.iter().enumerate() {
        for _ in 0..3 {
            let tracking = tracking.clone();
            let train = train.to_string();
            handles.push(tokio::spawn(async move {
                let user = UserId::new();
                let started = tracking.start_session(user, start(&train)).await.unwrap();
                tracking
                    .update_location(
                        user,
                        started.session.id,
                        LocationFix::at(30.0 + i as f64, 130.0),
                    )
                    .await
                    .unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for (i, train) in trains.iter().enumerate() {
        let aggregate = tracking.train(train).await.unwrap().expect("aggregate");
        assert_eq!(aggregate.passenger_count, 3, "train {}", train);
        assert_close(aggregate.average_position.lat, 30.0 + i as f64);
    }
    assert_eq!(tracking.locks().len(), trains.len());
}

#[tokio::test]
async fn stop_with_save_trip_persists_route_statistics() {
    let app = test_app();
    let tracking = &app.state.tracking;
    let user = UserId::new();
    let started = tracking.start_session(user, start("T1")).await.unwrap();

    let route = serde_json::from_value(serde_json::json!([
        { "lat": 35.0, "lng": 139.0, "altitude": 10.0 },
        { "lat": 35.01, "lng": 139.0, "altitude": 25.0 },
        { "lat": 35.02, "lng": 139.0, "altitude": 5.0 }
    ]))
    .unwrap();
    let ack = tracking
        .stop_session(
            user,
            started.session.id,
            StopSession {
                save_trip: true,
                train_name: Some("Limited Express".into()),
                route,
                tracking_data: None,
            },
        )
        .await
        .unwrap();

    let StopAck::Stopped { trip: Some(trip), .. } = ack else {
        panic!("expected a saved trip");
    };
    assert!(trip.stats.distance_km > 2.0 && trip.stats.distance_km < 2.5);
    assert_close(trip.stats.elevation_gain_m, 15.0);
    assert_close(trip.stats.elevation_loss_m, 20.0);

    let stored = app.trips.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].session_id, started.session.id);
    assert_eq!(stored[0].train_name.as_deref(), Some("Limited Express"));
    assert_eq!(stored[0].route_coordinates.0.len(), 3);
}

#[tokio::test]
async fn trains_list_groups_sessions_by_train() {
    let app = test_app();
    let tracking = &app.state.tracking;
    for train in ["T1", "T1", "T2"] {
        tracking
            .start_session(UserId::new(), start(train))
            .await
            .unwrap();
    }

    let listing = app.state.trains_list.get().await.unwrap();
    let counts: Vec<_> = listing
        .trains
        .iter()
        .map(|t| (t.train_id.as_str(), t.passenger_count))
        .collect();
    assert_eq!(counts, vec![("T1", 2), ("T2", 1)]);
}
