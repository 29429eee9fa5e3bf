use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/sumps", get(handlers::get_sumps))
        .route("/api/sumps/{id}", put(handlers::put_sump))
        .route("/api/sumps/{id}/analysis", get(handlers::get_sump_analysis))
        .route("/api/pumps/health-summary", get(handlers::get_pump_summary))
        .route("/api/pumps/{id}", put(handlers::put_pump))
        .route("/api/roads/warnings", get(handlers::get_road_warnings))
        .route("/api/roads/{id}", put(handlers::put_road))
        .route("/api/roads/{id}/telemetry", post(handlers::post_telemetry))
        .route(
            "/api/roads/{id}/telemetry/batch",
            post(handlers::post_telemetry_batch),
        )
        .route("/api/roads/{id}/softspots", get(handlers::get_soft_spots))
        .route(
            "/api/roads/{id}/drainage-assessment",
            get(handlers::get_drainage_assessment),
        )
        .route(
            "/api/roads/{id}/clear-softspot",
            post(handlers::post_clear_soft_spot),
        )
        .route(
            "/api/roads/{id}/clear-softspots",
            post(handlers::post_clear_soft_spots),
        )
        .route(
            "/api/weather/early-warning",
            post(handlers::post_early_warning),
        )
        .route("/api/weather/forecast", get(handlers::get_forecast))
        .with_state(state)
}
