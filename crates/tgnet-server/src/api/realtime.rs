//! WebSocket progress feed for a single channel's analysis.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    Extension,
};
use serde::Serialize;
use tgnet_core::ChannelId;
use tgnet_engine::{ProgressEvent, ProgressKind};
use tokio::sync::broadcast;

use crate::middleware::RequestId;

use super::{map_engine_error, ApiError, AppState};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Subscribed { channel_id: ChannelId, running: bool },
    Lagged { skipped: u64 },
}

/// GET /ws/analysis/{id}
pub(super) async fn ws_analysis(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(channel_id): Path<ChannelId>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .channel(channel_id)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    // Subscribe before the upgrade so no event between now and the handshake is lost.
    let events = state.progress.subscribe();
    let running = state.engine.is_running(channel_id);
    tracing::debug!(channel_id, running, "progress subscriber connected");
    Ok(ws.on_upgrade(move |socket| stream_progress(socket, channel_id, running, events)))
}

async fn stream_progress(
    mut socket: WebSocket,
    channel_id: ChannelId,
    running: bool,
    mut events: broadcast::Receiver<ProgressEvent>,
) {
    if send_json(&mut socket, &ServerMessage::Subscribed { channel_id, running })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = events.recv() => match event {
                Ok(event) if event.channel_id == channel_id => {
                    let finished = is_terminal(event.kind);
                    if send_json(&mut socket, &event).await.is_err() || finished {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel_id, skipped, "progress subscriber lagged");
                    if send_json(&mut socket, &ServerMessage::Lagged { skipped }).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(channel_id, "progress subscriber disconnected");
}

fn is_terminal(kind: ProgressKind) -> bool {
    matches!(
        kind,
        ProgressKind::Completed | ProgressKind::Failed | ProgressKind::Cancelled
    )
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, payload: &T) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize progress message");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
