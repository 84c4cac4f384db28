//! 解析結果（大本＋要約）の参照API。

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;
use crate::store::models::Analysis;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisView {
    id: i64,
    video_id: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_name: Option<String>,
    source: String,
    created_at: String,
}

impl AnalysisView {
    fn from_analysis(analysis: &Analysis) -> Self {
        Self {
            id: analysis.id,
            video_id: analysis.video_id.clone(),
            url: analysis.url.clone(),
            title: analysis.title.clone(),
            transcript: analysis.transcript.clone(),
            summary: analysis.summary.clone(),
            status: analysis.status.as_str().to_string(),
            channel_id: analysis.channel_id.clone(),
            channel_name: analysis.channel_name.clone(),
            source: analysis.source.clone(),
            created_at: analysis.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalysisResponse {
    analysis: AnalysisView,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    analyses: Vec<AnalysisView>,
}

/// GET /result/{id}
pub(crate) async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.dao().get_analysis(id).await {
        Ok(Some(analysis)) => (
            StatusCode::OK,
            Json(AnalysisResponse {
                analysis: AnalysisView::from_analysis(&analysis),
            }),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "analysis not found".to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!(analysis_id = id, error = ?err, "failed to load analysis");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to load analysis".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /history
///
/// 直近の解析結果を新しい順で返す。
pub(crate) async fn history(State(state): State<AppState>) -> impl IntoResponse {
    match state.dao().recent_analyses(state.config().history_limit()).await {
        Ok(analyses) => (
            StatusCode::OK,
            Json(HistoryResponse {
                analyses: analyses.iter().map(AnalysisView::from_analysis).collect(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!(error = ?err, "failed to load history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to load history".to_string(),
                }),
            )
                .into_response()
        }
    }
}
