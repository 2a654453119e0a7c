use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppError,
    middleware::auth::Principal,
    models::tracking_request::{
        HeartbeatRequest, LocationUpdateRequest, StartTrackingRequest, StopTrackingRequest,
    },
    services::tracking::{
        HeartbeatAck, LocationAck, StartSession, StartedSession, StopAck, StopSession,
    },
    state::AppState,
    validation::Validate,
};

pub async fn start_tracking(
    State(state): State<AppState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Json(payload): Json<StartTrackingRequest>,
) -> Result<(StatusCode, Json<StartedSession>), AppError> {
    payload.validate()?;
    let started = state
        .tracking
        .start_session(
            user_id,
            StartSession {
                train_number: payload.train_number,
                client_type: payload.client_type,
                initial_position: payload.initial_position.map(Into::into),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn update_location(
    State(state): State<AppState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Json(payload): Json<LocationUpdateRequest>,
) -> Result<Json<LocationAck>, AppError> {
    payload.validate()?;
    let ack = state
        .tracking
        .update_location(user_id, payload.session_id, payload.location.into())
        .await?;
    Ok(Json(ack))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatAck>, AppError> {
    let ack = state.tracking.heartbeat(user_id, payload.session_id).await?;
    Ok(Json(ack))
}

pub async fn stop_tracking(
    State(state): State<AppState>,
    Extension(Principal(user_id)): Extension<Principal>,
    Json(payload): Json<StopTrackingRequest>,
) -> Result<Json<StopAck>, AppError> {
    payload.validate()?;
    let ack = state
        .tracking
        .stop_session(
            user_id,
            payload.session_id,
            StopSession {
                save_trip: payload.save_trip,
                train_name: payload.train_name,
                route: payload.route_coordinates,
                tracking_data: payload.tracking_data,
            },
        )
        .await?;
    Ok(Json(ack))
}
