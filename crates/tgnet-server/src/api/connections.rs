use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use tgnet_core::{ChannelId, Connection, ConnectionType};
use tgnet_engine::{ConnectionFilter, Overview};

use crate::middleware::RequestId;

use super::{map_engine_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct ConnectionsQuery {
    pub source: Option<ChannelId>,
    pub target: Option<ChannelId>,
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
    pub min_strength: Option<f64>,
    pub limit: Option<i64>,
}

impl ConnectionsQuery {
    fn into_filter(self, request_id: &str) -> Result<ConnectionFilter, ApiError> {
        let connection_type = self
            .connection_type
            .as_deref()
            .map(str::parse::<ConnectionType>)
            .transpose()
            .map_err(|e| ApiError::new(request_id, "validation_error", e.to_string()))?;

        if let Some(min) = self.min_strength {
            if !(0.0..=1.0).contains(&min) {
                return Err(ApiError::new(
                    request_id,
                    "validation_error",
                    format!("min_strength must be within [0, 1], got {min}"),
                ));
            }
        }

        Ok(ConnectionFilter {
            source: self.source,
            target: self.target,
            connection_type,
            min_strength: self.min_strength,
            limit: Some(normalize_limit(self.limit)),
        })
    }
}

/// GET /api/v1/connections
pub(super) async fn list_connections(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ConnectionsQuery>,
) -> Result<Json<ApiResponse<Vec<Connection>>>, ApiError> {
    let filter = query.into_filter(&req_id.0)?;
    let connections = state
        .engine
        .connections(&filter)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(connections, req_id.0)))
}

/// GET /api/v1/stats/overview
pub(super) async fn overview(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Overview>>, ApiError> {
    let overview = state
        .engine
        .overview()
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(overview, req_id.0)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{app, send, NEWS};
    use super::*;

    fn query(connection_type: Option<&str>, min_strength: Option<f64>) -> ConnectionsQuery {
        ConnectionsQuery {
            source: None,
            target: None,
            connection_type: connection_type.map(str::to_string),
            min_strength,
            limit: None,
        }
    }

    #[test]
    fn filter_parses_type_and_defaults_limit() {
        let filter = query(Some("time_correlation"), Some(0.5))
            .into_filter("req-1")
            .expect("valid filter");
        assert_eq!(filter.connection_type, Some(ConnectionType::TimeCorrelation));
        assert_eq!(filter.limit, Some(50));
    }

    #[test]
    fn filter_rejects_unknown_type_and_bad_strength() {
        let err = query(Some("mentions"), None)
            .into_filter("req-1")
            .expect_err("unknown type");
        assert_eq!(err.error.code, "validation_error");

        let err = query(None, Some(1.5))
            .into_filter("req-1")
            .expect_err("out of range");
        assert!(err.error.message.contains("min_strength"));
    }

    #[tokio::test]
    async fn bad_type_query_is_a_bad_request() {
        let (status, json) = send(app().await, "GET", "/api/v1/connections?type=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn overview_counts_channels_and_analysed_ones() {
        let app = app().await;
        let (status, json) = send(app.clone(), "GET", "/api/v1/stats/overview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["channels"], 2);
        assert_eq!(json["data"]["connections"], 0);
        assert!(json["data"]["average_strength"].is_null());

        send(
            app.clone(),
            "POST",
            &format!("/api/v1/channels/{NEWS}/analyze"),
            Some(json!({ "analysis_types": ["temporal"], "wait": true })),
        )
        .await;

        let (_, json) = send(app, "GET", "/api/v1/stats/overview", None).await;
        assert_eq!(json["data"]["analyzed_channels"], 1);
        assert_eq!(json["data"]["connections_by_type"]["time_correlation"], 1);
    }
}
