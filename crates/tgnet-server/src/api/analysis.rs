use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tgnet_core::{AnalysisResult, AnalysisType, ChannelId};
use tgnet_engine::{parse_analysis_types, EngineError};

use crate::middleware::RequestId;

use super::{map_engine_error, ApiError, ApiResponse, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct AnalyzeRequest {
    /// Defaults to every analysis type.
    pub analysis_types: Option<Vec<String>>,
    pub depth: Option<u32>,
    /// Run inline and return the result instead of answering `202 Accepted`.
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct AnalysisStarted {
    channel_id: ChannelId,
    status: &'static str,
    analysis_types: Vec<AnalysisType>,
    depth: u32,
    progress_url: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum AnalyzeOutcome {
    Started(AnalysisStarted),
    Completed(Box<AnalysisResult>),
}

#[derive(Debug, Serialize)]
pub(super) struct CancelOutcome {
    channel_id: ChannelId,
    cancelled: bool,
}

/// POST /api/v1/channels/{id}/analyze
pub(super) async fn start_analysis(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(channel_id): Path<ChannelId>,
    Json(body): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AnalyzeOutcome>>), ApiError> {
    let rid = &req_id.0;
    let requested = match &body.analysis_types {
        Some(names) => parse_analysis_types(names).map_err(|e| map_engine_error(rid.clone(), &e))?,
        None => AnalysisType::ALL.to_vec(),
    };
    let (types, depth) = state
        .engine
        .validate_request(&requested, body.depth)
        .map_err(|e| map_engine_error(rid.clone(), &e))?;
    state
        .engine
        .channel(channel_id)
        .await
        .map_err(|e| map_engine_error(rid.clone(), &e))?;

    if body.wait {
        let result = state
            .engine
            .analyze(channel_id, &types, Some(depth))
            .await
            .map_err(|e| map_engine_error(rid.clone(), &e))?;
        return Ok((
            StatusCode::OK,
            Json(ApiResponse::new(
                AnalyzeOutcome::Completed(Box::new(result)),
                req_id.0,
            )),
        ));
    }

    let engine = Arc::clone(&state.engine);
    let background_types = types.clone();
    tokio::spawn(async move {
        match engine
            .analyze(channel_id, &background_types, Some(depth))
            .await
        {
            Ok(_) => {}
            Err(EngineError::Cancelled(_)) => {
                tracing::info!(channel_id, "background analysis cancelled");
            }
            Err(e) if e.is_internal() => {
                tracing::error!(channel_id, error = %e, "background analysis failed");
            }
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "background analysis rejected");
            }
        }
    });

    let started = AnalysisStarted {
        channel_id,
        status: "started",
        analysis_types: types,
        depth,
        progress_url: format!("/ws/analysis/{channel_id}"),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(AnalyzeOutcome::Started(started), req_id.0)),
    ))
}

/// DELETE /api/v1/channels/{id}/analyze
pub(super) async fn cancel_analysis(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<ApiResponse<CancelOutcome>>, ApiError> {
    state
        .engine
        .channel(channel_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    let cancelled = state.engine.cancel(channel_id);
    tracing::info!(channel_id, cancelled, "analysis cancel requested");
    Ok(Json(ApiResponse::new(
        CancelOutcome {
            channel_id,
            cancelled,
        },
        req_id.0,
    )))
}

/// GET /api/v1/analysis/{id}
pub(super) async fn get_analysis(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<ApiResponse<AnalysisResult>>, ApiError> {
    let result = state
        .engine
        .latest_result(channel_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("channel {channel_id} has not been analyzed yet"),
            )
        })?;
    Ok(Json(ApiResponse::new(result, req_id.0)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{app, send, MIRROR, NEWS};

    #[tokio::test]
    async fn inline_analysis_stores_result_and_edges() {
        let app = app().await;
        let (status, json) = send(
            app.clone(),
            "POST",
            &format!("/api/v1/channels/{NEWS}/analyze"),
            Some(json!({ "analysis_types": ["content", "network"], "wait": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["channel_id"], NEWS);
        assert_eq!(json["data"]["content_analysis"]["status"], "completed");
        assert_eq!(json["data"]["temporal_analysis"]["status"], "not_requested");

        let (status, stored) =
            send(app.clone(), "GET", &format!("/api/v1/analysis/{NEWS}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["data"]["analyzed_at"], json["data"]["analyzed_at"]);

        let (status, edges) = send(app, "GET", "/api/v1/connections", None).await;
        assert_eq!(status, StatusCode::OK);
        let edges = edges["data"].as_array().expect("edge array");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0]["connection_type"], "content_similarity");
        assert_eq!(edges[0]["source"], NEWS);
        assert_eq!(edges[0]["target"], MIRROR);
    }

    #[tokio::test]
    async fn background_analysis_is_accepted() {
        let (status, json) = send(
            app().await,
            "POST",
            &format!("/api/v1/channels/{MIRROR}/analyze"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["data"]["status"], "started");
        assert_eq!(json["data"]["depth"], 2);
        assert_eq!(
            json["data"]["analysis_types"],
            json!(["content", "temporal", "network"])
        );
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_running() {
        let app = app().await;
        let uri = format!("/api/v1/channels/{NEWS}/analyze");

        let (status, json) = send(
            app.clone(),
            "POST",
            &uri,
            Some(json!({ "analysis_types": ["sentiment"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "validation_error");

        let (status, _) = send(app.clone(), "POST", &uri, Some(json!({ "analysis_types": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app.clone(), "POST", &uri, Some(json!({ "depth": 9 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app.clone(),
            "POST",
            "/api/v1/channels/404/analyze",
            Some(json!({ "wait": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, edges) = send(app, "GET", "/api/v1/connections", None).await;
        assert_eq!(edges["data"], json!([]));
    }

    #[tokio::test]
    async fn missing_result_is_not_found() {
        let (status, json) = send(app().await, "GET", &format!("/api/v1/analysis/{NEWS}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"]["message"]
            .as_str()
            .is_some_and(|m| m.contains("not been analyzed")));
    }

    #[tokio::test]
    async fn cancel_without_running_analysis_reports_false() {
        let app = app().await;
        let (status, json) = send(
            app.clone(),
            "DELETE",
            &format!("/api/v1/channels/{NEWS}/analyze"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["cancelled"], false);

        let (status, _) = send(app, "DELETE", "/api/v1/channels/404/analyze", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
