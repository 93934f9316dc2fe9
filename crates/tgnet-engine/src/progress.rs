//! Progress reporting for long-running analyses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tgnet_core::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub channel_id: ChannelId,
    /// Percent complete, 0..=100.
    pub progress: u8,
    pub current_step: String,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Receives progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for tokio::sync::broadcast::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // No subscribers is not an error.
        let _ = self.send(event);
    }
}

/// Emits events for one run and extrapolates its finish time.
pub(crate) struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    channel_id: ChannelId,
    started_at: DateTime<Utc>,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn start(sink: &'a dyn ProgressSink, channel_id: ChannelId) -> Self {
        let tracker = Self {
            sink,
            channel_id,
            started_at: Utc::now(),
        };
        tracker.send(ProgressKind::Started, 0, "queued", None);
        tracker
    }

    pub(crate) fn step(&self, progress: u8, current_step: &str) {
        let progress = progress.min(99);
        let estimate = self.estimate(progress, Utc::now());
        self.send(ProgressKind::Progress, progress, current_step, estimate);
    }

    pub(crate) fn completed(&self) {
        self.send(ProgressKind::Completed, 100, "completed", Some(Utc::now()));
    }

    pub(crate) fn failed(&self, reason: &str) {
        self.send(ProgressKind::Failed, 100, reason, None);
    }

    pub(crate) fn cancelled(&self) {
        self.send(ProgressKind::Cancelled, 100, "cancelled", None);
    }

    fn estimate(&self, progress: u8, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if progress == 0 {
            return None;
        }
        let elapsed_ms = (now - self.started_at).num_milliseconds().max(0);
        let total_ms = elapsed_ms.saturating_mul(100) / i64::from(progress);
        Some(self.started_at + Duration::milliseconds(total_ms))
    }

    fn send(
        &self,
        kind: ProgressKind,
        progress: u8,
        current_step: &str,
        estimated_completion: Option<DateTime<Utc>>,
    ) {
        self.sink.emit(ProgressEvent {
            kind,
            channel_id: self.channel_id,
            progress,
            current_step: current_step.to_string(),
            estimated_completion,
        });
    }
}
