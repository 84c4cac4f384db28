//! Simulated notification delivery for a finished analysis.
//!
//! No mail provider is wired up; the endpoint validates the request, logs the
//! would-be delivery, and reports it as simulated.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct NotifyRequest {
    email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyResponse {
    success: bool,
    message: String,
    analysis_id: i64,
    email: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// POST /notify/result/{id}
pub(crate) async fn send_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<NotifyRequest>,
) -> impl IntoResponse {
    let Some(email) = payload.email.filter(|email| !email.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "email is required".to_string(),
            }),
        )
            .into_response();
    };

    let analysis = match state.dao().get_analysis(id).await {
        Ok(Some(analysis)) => analysis,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "analysis not found".to_string(),
                }),
            )
                .into_response();
        }
        Err(err) => {
            error!(analysis_id = id, error = ?err, "failed to load analysis");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to load analysis".to_string(),
                }),
            )
                .into_response();
        }
    };

    info!(
        analysis_id = analysis.id,
        video_id = %analysis.video_id,
        email = %email,
        transcript_chars = analysis.transcript.len(),
        summary_chars = analysis.summary.as_deref().map_or(0, str::len),
        "simulated notification delivery"
    );

    let body = Json(NotifyResponse {
        success: true,
        message: format!("analysis {id} sent to {email} (simulated)"),
        analysis_id: id,
        email,
    });
    (StatusCode::OK, body).into_response()
}
