use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers, middleware, state::AppState};

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/trains", get(handlers::trains::list_trains))
        .route("/api/trains/{train_id}", get(handlers::trains::get_train))
        .route("/ws/trains", get(handlers::ws::trains_socket));

    let tracking_routes = Router::new()
        .route(
            "/api/tracking/start",
            post(handlers::tracking::start_tracking),
        )
        .route(
            "/api/tracking/location",
            post(handlers::tracking::update_location),
        )
        .route(
            "/api/tracking/heartbeat",
            post(handlers::tracking::heartbeat),
        )
        .route("/api/tracking/stop", post(handlers::tracking::stop_tracking))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(tracking_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::log_error_responses))
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                        .allow_headers(Any)
                        .max_age(std::time::Duration::from_secs(24 * 60 * 60)),
                ),
        )
        .with_state(state)
}
