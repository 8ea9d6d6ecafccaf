use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;

pub use config::{Config, ProgressPolicy};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api", content_routes().layer(cors).layer(CompressionLayer::new()))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn content_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/levels", get(handlers::content::list_levels))
        .route(
            "/levels/{level_id}/chapters",
            get(handlers::content::list_chapters),
        )
        .route(
            "/levels/{level_id}/exercises/{chapter_id}",
            get(handlers::content::chapter_exercises),
        )
        .route(
            "/exercises/normalize",
            post(handlers::content::normalize_exercise),
        )
}
