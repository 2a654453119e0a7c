use serde_json::Value;
use tokio::sync::mpsc;
use trainwatch_backend::{
    models::{passenger::LocationFix, tracking_session::ClientType},
    services::tracking::{StartSession, StopSession},
    types::UserId,
};

mod support;

use support::test_app;

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn observer_gets_initial_state_then_periodic_updates() {
    let app = test_app();
    let broadcaster = app.state.broadcaster.clone();
    let tracking = &app.state.tracking;

    let (tx, mut rx) = mpsc::unbounded_channel();
    broadcaster.connect(tx).await.unwrap();
    let initial = parse(&rx.recv().await.unwrap());
    assert_eq!(initial["type"], "initial_data");
    assert!(initial["data"]["trains"].as_array().unwrap().is_empty());

    let rider = UserId::new();
    let started = tracking
        .start_session(
            rider,
            StartSession {
                train_number: "T1".into(),
                client_type: ClientType::Mobile,
                initial_position: None,
            },
        )
        .await
        .unwrap();
    let mut fix = LocationFix::at(35.0, 139.0);
    fix.speed = Some(20.0);
    tracking
        .update_location(rider, started.session.id, fix)
        .await
        .unwrap();

    assert_eq!(broadcaster.tick_once().await.unwrap(), 1);
    let update = parse(&rx.recv().await.unwrap());
    assert_eq!(update["type"], "train_updates");
    let trains = update["data"]["trains"].as_array().unwrap();
    assert_eq!(trains.len(), 1);
    assert_eq!(trains[0]["train_id"], "T1");
    assert_eq!(trains[0]["passenger_count"], 1);
    assert_eq!(trains[0]["average_speed"], 20.0);
    assert_eq!(trains[0]["data_source"], "cache");

    tracking
        .stop_session(rider, started.session.id, StopSession::default())
        .await
        .unwrap();
    broadcaster.tick_once().await.unwrap();
    let update = parse(&rx.recv().await.unwrap());
    assert!(update["data"]["trains"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn closed_observers_leave_the_broadcast_group() {
    let app = test_app();
    let broadcaster = app.state.broadcaster.clone();

    let (kept_tx, mut kept_rx) = mpsc::unbounded_channel();
    let (gone_tx, gone_rx) = mpsc::unbounded_channel();
    broadcaster.connect(kept_tx).await.unwrap();
    broadcaster.connect(gone_tx).await.unwrap();
    assert_eq!(broadcaster.observers().len(), 2);
    drop(gone_rx);

    assert_eq!(broadcaster.tick_once().await.unwrap(), 1);
    assert_eq!(broadcaster.observers().len(), 1);
    kept_rx.recv().await.unwrap();
    assert_eq!(parse(&kept_rx.recv().await.unwrap())["type"], "train_updates");
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let app = test_app();
    let broadcaster = app.state.broadcaster.clone();
    let (tx, _rx) = mpsc::unbounded_channel();
    let id = broadcaster.connect(tx).await.unwrap();

    broadcaster.disconnect(id);
    broadcaster.disconnect(id);
    assert!(broadcaster.observers().is_empty());
    assert_eq!(broadcaster.tick_once().await.unwrap(), 0);
}
