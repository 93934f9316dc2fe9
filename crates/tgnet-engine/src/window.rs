use chrono::{DateTime, Duration, Utc};

use tgnet_core::{Channel, ConnectionCandidate, Post, SectionOutcome};

/// The time range a single analysis looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    /// The `days` days ending at `end`.
    #[must_use]
    pub fn ending_at(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
        }
    }

    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    #[must_use]
    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// A channel together with its posts inside the analysis window, oldest first.
#[derive(Debug, Clone)]
pub struct ChannelWindow {
    pub channel: Channel,
    pub posts: Vec<Post>,
}

/// What a detector hands back to the orchestrator: the section for the
/// result document plus the edges it wants committed.
#[derive(Debug, Clone)]
pub struct DetectorRun<T> {
    pub outcome: SectionOutcome<T>,
    pub candidates: Vec<ConnectionCandidate>,
}

impl<T> DetectorRun<T> {
    #[must_use]
    pub fn without_candidates(outcome: SectionOutcome<T>) -> Self {
        Self {
            outcome,
            candidates: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::without_candidates(SectionOutcome::Failed {
            reason: reason.into(),
        })
    }
}
