use std::time::Duration;

use axum::{
    http::{header, Method, StatusCode},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    handlers::{
        entities::{create_entity, delete_entity, get_entity, update_entity},
        events::{events_sse, heartbeat, subscribe},
        health::{healthz, livez},
    },
    state::AppState,
};

/// Create the application router with all routes and middleware.
pub fn create_app(state: AppState) -> Router {
    // CORS configuration for API endpoints
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    // SSE streams outlive the request timeout, so they are routed outside it.
    let event_routes = Router::new()
        .route("/events", get(events_sse))
        .route("/events/{client_id}/heartbeat", post(heartbeat))
        .route("/events/{client_id}/subscribe", post(subscribe));

    let entity_routes = Router::new()
        .route("/{entity_type}", post(create_entity))
        .route(
            "/{entity_type}/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ));

    let api_routes = event_routes.merge(entity_routes).layer(cors);

    // Main application router
    Router::new()
        .route("/livez", get(livez))
        .route("/healthz", get(healthz))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
