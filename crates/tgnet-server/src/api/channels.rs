use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgnet_core::{Channel, ChannelId};

use crate::middleware::RequestId;

use super::{
    map_engine_error, normalize_limit, normalize_offset, ApiError, ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub(super) struct ChannelsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct ChannelItem {
    channel_id: ChannelId,
    name: String,
    username: String,
    subscribers_count: i64,
    theme: Option<String>,
    verified: bool,
    created_at: DateTime<Utc>,
    last_post_at: Option<DateTime<Utc>>,
}

impl From<Channel> for ChannelItem {
    fn from(channel: Channel) -> Self {
        Self {
            channel_id: channel.id,
            name: channel.name,
            username: channel.username,
            subscribers_count: channel.subscribers_count,
            theme: channel.theme,
            verified: channel.verified,
            created_at: channel.created_at,
            last_post_at: channel.last_post_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ChannelPage {
    items: Vec<ChannelItem>,
    total: usize,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct ChannelDetail {
    #[serde(flatten)]
    channel: ChannelItem,
    analysis_running: bool,
    last_analyzed_at: Option<DateTime<Utc>>,
}

pub(super) async fn list_channels(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ChannelsQuery>,
) -> Result<Json<ApiResponse<ChannelPage>>, ApiError> {
    let limit = normalize_limit(query.limit);
    let offset = normalize_offset(query.offset);
    let (channels, total) = state
        .engine
        .channels(limit, offset)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    let page = ChannelPage {
        items: channels.into_iter().map(ChannelItem::from).collect(),
        total,
        limit,
        offset,
    };
    Ok(Json(ApiResponse::new(page, req_id.0)))
}

pub(super) async fn get_channel(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<ApiResponse<ChannelDetail>>, ApiError> {
    let channel = state
        .engine
        .channel(channel_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;
    let latest = state
        .engine
        .latest_result(channel_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    let detail = ChannelDetail {
        channel: ChannelItem::from(channel),
        analysis_running: state.engine.is_running(channel_id),
        last_analyzed_at: latest.map(|r| r.analyzed_at),
    };
    Ok(Json(ApiResponse::new(detail, req_id.0)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::super::test_support::{app, send, NEWS};

    #[tokio::test]
    async fn list_channels_pages_by_id() {
        let (status, json) = send(app().await, "GET", "/api/v1/channels?limit=1&offset=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["total"], 2);
        assert_eq!(json["data"]["limit"], 1);
        let items = json["data"]["items"].as_array().expect("items array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["username"], "mirror");
    }

    #[tokio::test]
    async fn get_channel_returns_detail() {
        let (status, json) = send(app().await, "GET", &format!("/api/v1/channels/{NEWS}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["channel_id"], NEWS);
        assert_eq!(json["data"]["analysis_running"], false);
        assert!(json["data"]["last_analyzed_at"].is_null());
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let (status, json) = send(app().await, "GET", "/api/v1/channels/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }
}
