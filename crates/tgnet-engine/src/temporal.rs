//! Posting-time correlation between channels.

use chrono::{DateTime, Timelike, Utc};

use tgnet_core::{
    AnalysisConfig, ChannelId, ConnectionCandidate, ConnectionType, CoreError, Evidence,
    PeerCorrelation, PeerCorrelationOutcome, Post, PostingPattern, SectionOutcome,
    TemporalAnalysis, TemporalEvidence,
};

use crate::window::{AnalysisWindow, ChannelWindow, DetectorRun};

const PEAK_HOURS: usize = 3;
/// Sample size at which temporal confidence reaches one half.
const CONFIDENCE_HALF_SAMPLE: f64 = 10.0;

/// Count posts per fixed-width bucket across the whole window.
#[must_use]
pub fn bucket_counts(
    times: &[DateTime<Utc>],
    window: &AnalysisWindow,
    bucket_minutes: u32,
) -> Vec<f64> {
    let width = i64::from(bucket_minutes.max(1));
    let span = window.minutes().max(1);
    let buckets = usize::try_from((span + width - 1) / width).unwrap_or(1);
    let mut counts = vec![0.0; buckets];
    for &at in times {
        if !window.contains(at) {
            continue;
        }
        let offset = (at - window.start).num_minutes() / width;
        if let Ok(idx) = usize::try_from(offset) {
            if let Some(slot) = counts.get_mut(idx) {
                *slot += 1.0;
            }
        }
    }
    counts
}

/// Pearson correlation coefficient.
///
/// Returns `None` when either series has zero variance or the series are
/// shorter than two samples; the coefficient is undefined there and must not
/// be reported as 0 or 1.
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let len = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / len;
    let mean_y = y[..n].iter().sum::<f64>() / len;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx <= f64::EPSILON || syy <= f64::EPSILON {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// One-to-one pairing of posts published within the sync delay.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncStats {
    pub pairs: usize,
    pub left_leads: usize,
    pub right_leads: usize,
    pub mean_lag_minutes: Option<f64>,
}

/// Pair posts across two channels whose publish times differ by at most
/// `max_delay_minutes`, closest pairs first. Both inputs must be sorted.
#[must_use]
pub fn synchronized(
    left: &[DateTime<Utc>],
    right: &[DateTime<Utc>],
    max_delay_minutes: u32,
) -> SyncStats {
    let max_delay = i64::from(max_delay_minutes) * 60;

    let mut candidates: Vec<(i64, usize, usize)> = Vec::new();
    let mut lower = 0usize;
    for (i, a) in left.iter().enumerate() {
        while lower < right.len() && (*a - right[lower]).num_seconds() > max_delay {
            lower += 1;
        }
        for (j, b) in right.iter().enumerate().skip(lower) {
            let delta = (*b - *a).num_seconds();
            if delta > max_delay {
                break;
            }
            candidates.push((delta, i, j));
        }
    }
    candidates.sort_by_key(|&(delta, i, j)| (delta.abs(), i, j));

    let mut used_left = vec![false; left.len()];
    let mut used_right = vec![false; right.len()];
    let mut stats = SyncStats::default();
    let mut total_lag_secs = 0i64;
    for (delta, i, j) in candidates {
        if used_left[i] || used_right[j] {
            continue;
        }
        used_left[i] = true;
        used_right[j] = true;
        stats.pairs += 1;
        total_lag_secs += delta.abs();
        match delta.signum() {
            1 => stats.left_leads += 1,
            -1 => stats.right_leads += 1,
            _ => {}
        }
    }

    if stats.pairs > 0 {
        #[allow(clippy::cast_precision_loss)]
        let mean = total_lag_secs as f64 / stats.pairs as f64 / 60.0;
        stats.mean_lag_minutes = Some(mean);
    }
    stats
}

/// Hour-of-day activity of one channel.
#[must_use]
pub fn posting_pattern(posts: &[Post], window_days: u32) -> PostingPattern {
    let mut hourly = vec![0u32; 24];
    for post in posts {
        hourly[post.published_at.hour() as usize] += 1;
    }

    let mut ranked: Vec<u32> = (0..24u32).filter(|h| hourly[*h as usize] > 0).collect();
    ranked.sort_by(|a, b| hourly[*b as usize].cmp(&hourly[*a as usize]).then(a.cmp(b)));
    ranked.truncate(PEAK_HOURS);

    #[allow(clippy::cast_precision_loss)]
    let average_posts_per_day = posts.len() as f64 / f64::from(window_days.max(1));

    PostingPattern {
        total_posts: posts.len(),
        hourly_distribution: hourly,
        peak_hours: ranked,
        average_posts_per_day,
    }
}

#[derive(Debug, Clone)]
pub struct TemporalComparison {
    pub evidence: TemporalEvidence,
    pub candidate: Option<ConnectionCandidate>,
}

#[derive(Debug, Clone)]
pub enum PeerTiming {
    InsufficientData { required: usize, available: usize },
    Compared(TemporalComparison),
}

#[derive(Debug, Clone)]
pub struct TemporalCorrelator {
    correlation_threshold: f64,
    sync_delay_minutes: u32,
    min_synchronized_posts: usize,
    bucket_minutes: u32,
    min_posts: usize,
    window_days: u32,
}

impl TemporalCorrelator {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            correlation_threshold: config.time_correlation_threshold,
            sync_delay_minutes: config.sync_delay_minutes,
            min_synchronized_posts: config.min_synchronized_posts,
            bucket_minutes: config.bucket_minutes,
            min_posts: config.temporal_min_posts,
            window_days: config.window_days,
        }
    }

    /// Correlate two channels' posting times inside `window`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] if the resulting candidate fails validation.
    pub fn compare(
        &self,
        source: ChannelId,
        source_posts: &[Post],
        target: ChannelId,
        target_posts: &[Post],
        window: &AnalysisWindow,
    ) -> Result<PeerTiming, CoreError> {
        let available = source_posts.len().min(target_posts.len());
        if available < self.min_posts {
            return Ok(PeerTiming::InsufficientData {
                required: self.min_posts,
                available,
            });
        }

        let left = sorted_times(source_posts);
        let right = sorted_times(target_posts);
        let left_series = bucket_counts(&left, window, self.bucket_minutes);
        let right_series = bucket_counts(&right, window, self.bucket_minutes);
        let correlation = pearson(&left_series, &right_series);
        let sync = synchronized(&left, &right, self.sync_delay_minutes);

        let evidence = TemporalEvidence {
            source_posts: left.len(),
            target_posts: right.len(),
            bucket_minutes: self.bucket_minutes,
            bucket_count: left_series.len(),
            correlation,
            synchronized_posts: sync.pairs,
            source_leads: sync.left_leads,
            target_leads: sync.right_leads,
            mean_lag_minutes: sync.mean_lag_minutes,
        };

        let correlated = correlation.is_some_and(|r| r >= self.correlation_threshold);
        let in_sync = sync.pairs >= self.min_synchronized_posts;
        let candidate = if correlated || in_sync {
            #[allow(clippy::cast_precision_loss)]
            let sync_ratio = sync.pairs as f64 / available as f64;
            let strength = correlation.unwrap_or(0.0).max(sync_ratio).clamp(0.0, 1.0);
            #[allow(clippy::cast_precision_loss)]
            let sample = available as f64;
            Some(ConnectionCandidate::new(
                source,
                target,
                ConnectionType::TimeCorrelation,
                strength,
                sample / (sample + CONFIDENCE_HALF_SAMPLE),
                Evidence::Temporal(evidence.clone()),
            )?)
        } else {
            None
        };

        Ok(PeerTiming::Compared(TemporalComparison {
            evidence,
            candidate,
        }))
    }

    #[must_use]
    pub fn run(
        &self,
        subject: &ChannelWindow,
        peers: &[ChannelWindow],
        window: &AnalysisWindow,
    ) -> DetectorRun<TemporalAnalysis> {
        let subject_id = subject.channel.id;
        if subject.posts.len() < self.min_posts {
            return DetectorRun::without_candidates(SectionOutcome::InsufficientData {
                required: self.min_posts,
                available: subject.posts.len(),
            });
        }

        let mut summaries = Vec::with_capacity(peers.len());
        let mut candidates = Vec::new();
        for peer in peers {
            let timing = match self.compare(subject_id, &subject.posts, peer.channel.id, &peer.posts, window) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(
                        channel_id = subject_id,
                        peer_id = peer.channel.id,
                        error = %e,
                        "temporal comparison produced an invalid candidate"
                    );
                    return DetectorRun::failed(e.to_string());
                }
            };

            let outcome = match timing {
                PeerTiming::InsufficientData { required, available } => {
                    PeerCorrelationOutcome::InsufficientData { required, available }
                }
                PeerTiming::Compared(c) => {
                    let connected = c.candidate.is_some();
                    if let Some(candidate) = c.candidate {
                        candidates.push(candidate);
                    }
                    PeerCorrelationOutcome::Compared {
                        correlation: c.evidence.correlation,
                        synchronized_posts: c.evidence.synchronized_posts,
                        channel_leads: c.evidence.source_leads,
                        peer_leads: c.evidence.target_leads,
                        mean_lag_minutes: c.evidence.mean_lag_minutes,
                        connected,
                    }
                }
            };
            summaries.push(PeerCorrelation {
                channel_id: peer.channel.id,
                channel_name: peer.channel.name.clone(),
                outcome,
            });
        }

        tracing::debug!(
            channel_id = subject_id,
            peers = peers.len(),
            edges = candidates.len(),
            "temporal correlation complete"
        );

        DetectorRun {
            outcome: SectionOutcome::Completed {
                result: TemporalAnalysis {
                    posting_pattern: posting_pattern(&subject.posts, self.window_days),
                    peers: summaries,
                },
            },
            candidates,
        }
    }
}

fn sorted_times(posts: &[Post]) -> Vec<DateTime<Utc>> {
    let mut times: Vec<DateTime<Utc>> = posts.iter().map(|p| p.published_at).collect();
    times.sort_unstable();
    times
}
