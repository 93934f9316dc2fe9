mod analysis;
mod channels;
mod connections;
mod realtime;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tgnet_core::AppConfig;
use tgnet_engine::{AnalysisEngine, EngineError, ProgressEvent, Store};
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{request_id, RequestId};

/// Buffered progress events per subscriber before a slow WebSocket starts lagging.
const PROGRESS_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AnalysisEngine>,
    pub progress: broadcast::Sender<ProgressEvent>,
}

impl AppState {
    /// Build the engine over `store`, wired to a broadcast feed of progress events.
    pub fn new<S: Store + 'static>(store: Arc<S>, config: &AppConfig) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_BUFFER);
        let timeout = (config.analysis_timeout_secs > 0)
            .then(|| Duration::from_secs(config.analysis_timeout_secs));
        let engine = AnalysisEngine::new(store, config.analysis.clone())
            .with_workers(config.worker_concurrency)
            .with_progress(Arc::new(progress.clone()))
            .with_timeout(timeout);
        Self {
            engine: Arc::new(engine),
            progress,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(data: T, request_id: String) -> Self {
        Self {
            data,
            meta: ResponseMeta::new(request_id),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" | "cancelled" => StatusCode::CONFLICT,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<i64>) -> usize {
    usize::try_from(limit.unwrap_or(50).clamp(1, 200)).unwrap_or(50)
}

pub(super) fn normalize_offset(offset: Option<i64>) -> usize {
    usize::try_from(offset.unwrap_or(0).max(0)).unwrap_or(0)
}

pub(super) fn map_engine_error(request_id: String, error: &EngineError) -> ApiError {
    match error {
        EngineError::NotFound(_) => ApiError::new(request_id, "not_found", error.to_string()),
        EngineError::InvalidArgument(_) => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        EngineError::Cancelled(_) => ApiError::new(request_id, "cancelled", error.to_string()),
        EngineError::TimedOut { .. } => ApiError::new(request_id, "timeout", error.to_string()),
        EngineError::Store(_) | EngineError::Compute(_) => {
            tracing::error!(error = %error, "engine request failed");
            ApiError::new(request_id, "internal_error", "internal error")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-request-id")])
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/channels", get(channels::list_channels))
        .route("/api/v1/channels/{channel_id}", get(channels::get_channel))
        .route(
            "/api/v1/channels/{channel_id}/analyze",
            axum::routing::post(analysis::start_analysis).delete(analysis::cancel_analysis),
        )
        .route("/api/v1/analysis/{channel_id}", get(analysis::get_analysis))
        .route("/api/v1/connections", get(connections::list_connections))
        .route("/api/v1/stats/overview", get(connections::overview))
        .route("/ws/analysis/{channel_id}", get(realtime::ws_analysis))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);

    match state.engine.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    meta,
                }),
            )
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use chrono::{Duration, Utc};
    use tgnet_core::{AnalysisConfig, AppConfig, Channel, Environment, Post};
    use tgnet_engine::MemoryStore;
    use tower::ServiceExt;

    use super::{build_app, AppState};

    pub(crate) const NEWS: i64 = 1;
    pub(crate) const MIRROR: i64 = 2;

    pub(crate) fn app_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://unused".to_string(),
            env: Environment::Test,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
            log_level: "info".to_string(),
            channels_path: PathBuf::from("./config/channels.yaml"),
            db_max_connections: 1,
            db_min_connections: 1,
            db_acquire_timeout_secs: 1,
            worker_concurrency: 2,
            analysis_timeout_secs: 0,
            prune_schedule: "0 15 3 * * *".to_string(),
            analysis: AnalysisConfig::default(),
        }
    }

    fn channel(id: i64, username: &str) -> Channel {
        Channel {
            id,
            name: username.to_uppercase(),
            username: username.to_string(),
            subscribers_count: 1_000,
            theme: None,
            verified: false,
            created_at: Utc::now(),
            last_post_at: None,
        }
    }

    /// Two channels; the mirror republishes every story a few minutes later.
    pub(crate) async fn seeded_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        store.put_channel(channel(NEWS, "news")).await;
        store.put_channel(channel(MIRROR, "mirror")).await;

        let base = Utc::now() - Duration::days(3);
        let stories: Vec<String> = (0..12)
            .map(|i| format!("Story {i}: council approves budget for district {i} after long debate"))
            .collect();
        let mut posts = Vec::new();
        for (i, text) in (0_i64..).zip(&stories) {
            posts.push(Post {
                id: i,
                channel_id: NEWS,
                text: text.clone(),
                published_at: base + Duration::minutes(i * 90),
                media_hash: None,
            });
            posts.push(Post {
                id: 1_000 + i,
                channel_id: MIRROR,
                text: text.clone(),
                published_at: base + Duration::minutes(i * 90 + 4),
                media_hash: None,
            });
        }
        store.add_posts(posts).await;

        AppState::new(store, &app_config())
    }

    pub(crate) async fn app() -> Router {
        build_app(seeded_state().await)
    }

    pub(crate) async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (axum::http::StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json parse")
        };
        (status, json)
    }
}
