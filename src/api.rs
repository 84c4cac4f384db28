pub(crate) mod batch;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod notify;
pub(crate) mod results;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/batch/start", post(batch::start))
        .route("/batch/advance/{job_id}", post(batch::advance))
        .route("/batch/status/{job_id}", get(batch::status))
        .route("/result/{id}", get(results::get_result))
        .route("/history", get(results::history))
        .route("/notify/result/{id}", post(notify::send_result))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
