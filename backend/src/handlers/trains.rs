use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::AppError,
    models::train::TrainAggregate,
    services::trains_list::TrainsListSnapshot,
    state::AppState,
};

pub async fn list_trains(
    State(state): State<AppState>,
) -> Result<Json<TrainsListSnapshot>, AppError> {
    let listing = state.trains_list.get().await?;
    Ok(Json(TrainsListSnapshot::clone(&listing)))
}

pub async fn get_train(
    State(state): State<AppState>,
    Path(train_id): Path<String>,
) -> Result<Json<TrainAggregate>, AppError> {
    state
        .tracking
        .train(&train_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No active passengers on train {}", train_id)))
}
