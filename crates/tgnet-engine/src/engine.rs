//! Analysis orchestrator.
//!
//! `analyze` validates the request, serialises work per channel, runs the
//! requested detectors (content and temporal concurrently on the worker
//! pool), commits each detector's batch through the graph builder, computes
//! network metrics, and stores the result as the channel's latest.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use tgnet_core::{
    AnalysisConfig, AnalysisResult, AnalysisType, Channel, ChannelId, Connection, ConnectionType,
    ContentAnalysis, NetworkAnalysis, SectionOutcome, TemporalAnalysis,
};

use crate::graph::GraphBuilder;
use crate::metrics::MetricsCalculator;
use crate::pool::WorkerPool;
use crate::progress::{NoProgress, ProgressSink, ProgressTracker};
use crate::similarity::SimilarityDetector;
use crate::store::{ConnectionFilter, ConnectionStore, Store};
use crate::summary::summarize;
use crate::temporal::TemporalCorrelator;
use crate::window::{AnalysisWindow, ChannelWindow, DetectorRun};
use crate::EngineError;

/// Concurrent post fetches while loading peer windows.
const POST_FETCH_CONCURRENCY: usize = 8;

/// Parse analysis type names from a request.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] for an empty list or an unknown name.
pub fn parse_analysis_types<S: AsRef<str>>(raw: &[S]) -> Result<Vec<AnalysisType>, EngineError> {
    let parsed = raw
        .iter()
        .map(|s| s.as_ref().parse::<AnalysisType>())
        .collect::<Result<Vec<_>, _>>()?;
    normalize_types(&parsed)
}

fn normalize_types(types: &[AnalysisType]) -> Result<Vec<AnalysisType>, EngineError> {
    if types.is_empty() {
        return Err(EngineError::InvalidArgument(
            "at least one analysis type is required".to_string(),
        ));
    }
    let mut types = types.to_vec();
    types.sort_unstable();
    types.dedup();
    Ok(types)
}

/// Graph-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub channels: usize,
    pub connections: usize,
    pub connections_by_type: BTreeMap<ConnectionType, usize>,
    pub average_strength: Option<f64>,
    pub analyzed_channels: usize,
    pub generated_at: DateTime<Utc>,
}

type ChannelLocks = Mutex<HashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>>;
type RunningRuns = Mutex<HashMap<ChannelId, Vec<(u64, CancellationToken)>>>;

/// Removes a run's cancellation handle when the run ends or is dropped.
struct Registration<'a> {
    running: &'a RunningRuns,
    channel_id: ChannelId,
    run_id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(runs) = running.get_mut(&self.channel_id) {
            runs.retain(|(run_id, _)| *run_id != self.run_id);
            if runs.is_empty() {
                running.remove(&self.channel_id);
            }
        }
    }
}

/// A handle on one channel's lock. The map entry is dropped with the last
/// handle, so idle channels hold no lock.
struct ChannelLock<'a> {
    locks: &'a ChannelLocks,
    channel_id: ChannelId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for ChannelLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this handle are the only owners left.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.channel_id);
        }
    }
}

pub struct AnalysisEngine {
    store: Arc<dyn Store>,
    graph: GraphBuilder,
    config: AnalysisConfig,
    similarity: SimilarityDetector,
    temporal: TemporalCorrelator,
    metrics: MetricsCalculator,
    pool: WorkerPool,
    progress: Arc<dyn ProgressSink>,
    timeout: Option<Duration>,
    locks: ChannelLocks,
    running: RunningRuns,
    next_run: AtomicU64,
}

impl AnalysisEngine {
    #[must_use]
    pub fn new<S>(store: Arc<S>, config: AnalysisConfig) -> Self
    where
        S: Store + 'static,
    {
        let connections: Arc<dyn ConnectionStore> = store.clone();
        Self {
            graph: GraphBuilder::new(connections, &config),
            similarity: SimilarityDetector::new(&config),
            temporal: TemporalCorrelator::new(&config),
            metrics: MetricsCalculator::new(&config),
            store,
            config,
            pool: WorkerPool::new(4),
            progress: Arc::new(NoProgress),
            timeout: None,
            locks: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, size: usize) -> Self {
        self.pool = WorkerPool::new(size);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Limit each analysis to `timeout`; `None` disables the limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    #[must_use]
    pub fn graph(&self) -> &GraphBuilder {
        &self.graph
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend is unreachable.
    pub async fn health(&self) -> Result<(), EngineError> {
        Ok(self.store.health_check().await?)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown channels.
    pub async fn channel(&self, channel_id: ChannelId) -> Result<Channel, EngineError> {
        self.store
            .get_channel(channel_id)
            .await?
            .ok_or(EngineError::NotFound(channel_id))
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on read failure.
    pub async fn channels(&self, limit: usize, offset: usize) -> Result<(Vec<Channel>, usize), EngineError> {
        let total = self.store.count_channels().await?;
        let page = self.store.list_channels(limit, offset).await?;
        Ok((page, total))
    }

    /// Latest stored result for a channel.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown channels.
    pub async fn latest_result(&self, channel_id: ChannelId) -> Result<Option<AnalysisResult>, EngineError> {
        self.channel(channel_id).await?;
        Ok(self.store.latest_result(channel_id).await?)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on read failure.
    pub async fn connections(&self, filter: &ConnectionFilter) -> Result<Vec<Connection>, EngineError> {
        self.graph.list(filter).await
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on read failure.
    pub async fn overview(&self) -> Result<Overview, EngineError> {
        let channels = self.store.count_channels().await?;
        let stats = self.store.connection_stats().await?;
        let analyzed_channels = self.store.analyzed_channel_count().await?;
        Ok(Overview {
            channels,
            connections: stats.total,
            connections_by_type: stats.by_type,
            average_strength: stats.average_strength,
            analyzed_channels,
            generated_at: Utc::now(),
        })
    }

    /// Delete edges older than the staleness window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the delete fails.
    pub async fn prune_stale(&self) -> Result<usize, EngineError> {
        self.graph.prune_stale(Utc::now()).await
    }

    /// Cancel every running or queued analysis of `channel_id`. Returns
    /// whether there was one.
    pub fn cancel(&self, channel_id: ChannelId) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(&channel_id) {
            Some(runs) => {
                for (_, token) in runs {
                    token.cancel();
                }
                !runs.is_empty()
            }
            None => false,
        }
    }

    /// Whether an analysis of `channel_id` is running or waiting for its turn.
    #[must_use]
    pub fn is_running(&self, channel_id: ChannelId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&channel_id)
    }

    /// Check a request without running it, returning the deduplicated types
    /// and the effective depth.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] for no analysis types or a
    /// depth outside `1..=max_depth`.
    pub fn validate_request(
        &self,
        analysis_types: &[AnalysisType],
        depth: Option<u32>,
    ) -> Result<(Vec<AnalysisType>, u32), EngineError> {
        Ok((normalize_types(analysis_types)?, self.resolve_depth(depth)?))
    }

    /// Analyse one channel.
    ///
    /// # Errors
    ///
    /// See [`AnalysisEngine::analyze_with`].
    pub async fn analyze(
        &self,
        channel_id: ChannelId,
        analysis_types: &[AnalysisType],
        depth: Option<u32>,
    ) -> Result<AnalysisResult, EngineError> {
        self.analyze_with(channel_id, analysis_types, depth, CancellationToken::new())
            .await
    }

    /// Analyse one channel, stopping early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidArgument`] for no analysis types or a depth
    ///   outside `1..=max_depth`.
    /// - [`EngineError::NotFound`] for unknown channels. Nothing is written.
    /// - [`EngineError::Cancelled`] / [`EngineError::TimedOut`]; batches not
    ///   yet committed are dropped.
    /// - [`EngineError::Store`] when a commit or the result save fails.
    pub async fn analyze_with(
        &self,
        channel_id: ChannelId,
        analysis_types: &[AnalysisType],
        depth: Option<u32>,
        cancel: CancellationToken,
    ) -> Result<AnalysisResult, EngineError> {
        let (types, depth) = self.validate_request(analysis_types, depth)?;
        let channel = self.channel(channel_id).await?;

        // Registered before queueing so a waiting run can be cancelled too.
        let token = cancel.child_token();
        let _registration = self.register(channel_id, token.clone());

        let channel_lock = self.lock_for(channel_id);
        let _guard = tokio::select! {
            guard = channel_lock.lock.lock() => guard,
            () = token.cancelled() => {
                tracing::info!(channel_id, "queued analysis cancelled");
                return Err(EngineError::Cancelled(channel_id));
            }
        };

        let tracker = ProgressTracker::start(self.progress.as_ref(), channel_id);

        tracing::info!(
            channel_id,
            depth,
            types = ?types,
            "analysis started"
        );

        let work = self.within_timeout(channel_id, self.run(&channel, &types, depth, &tracker, &token));
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Err(EngineError::Cancelled(channel_id)),
            result = work => result,
        };

        match &outcome {
            Ok(_) => {
                tracker.completed();
                tracing::info!(channel_id, "analysis completed");
            }
            Err(EngineError::Cancelled(_)) => {
                tracker.cancelled();
                tracing::info!(channel_id, "analysis cancelled");
            }
            Err(e) => {
                tracker.failed(&e.to_string());
                tracing::error!(channel_id, error = %e, "analysis failed");
            }
        }
        outcome
    }

    fn resolve_depth(&self, depth: Option<u32>) -> Result<u32, EngineError> {
        let depth = depth.unwrap_or(self.config.default_depth);
        if depth == 0 || depth > self.config.max_depth {
            return Err(EngineError::InvalidArgument(format!(
                "depth must be within 1..={}, got {depth}",
                self.config.max_depth
            )));
        }
        Ok(depth)
    }

    fn lock_for(&self, channel_id: ChannelId) -> ChannelLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        ChannelLock {
            locks: &self.locks,
            channel_id,
            lock: Arc::clone(locks.entry(channel_id).or_default()),
        }
    }

    fn register(&self, channel_id: ChannelId, token: CancellationToken) -> Registration<'_> {
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id)
            .or_default()
            .push((run_id, token));
        Registration {
            running: &self.running,
            channel_id,
            run_id,
        }
    }

    async fn within_timeout<T>(
        &self,
        channel_id: ChannelId,
        work: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| EngineError::TimedOut {
                    channel_id,
                    seconds: limit.as_secs(),
                })?,
            None => work.await,
        }
    }

    async fn run(
        &self,
        channel: &Channel,
        types: &[AnalysisType],
        depth: u32,
        tracker: &ProgressTracker<'_>,
        token: &CancellationToken,
    ) -> Result<AnalysisResult, EngineError> {
        let now = Utc::now();
        let window = AnalysisWindow::ending_at(now, self.config.window_days);
        let wants = |t: AnalysisType| types.contains(&t);

        let (content, temporal) = if wants(AnalysisType::Content) || wants(AnalysisType::Temporal) {
            tracker.step(5, "loading posts");
            let (subject, peers) = self.load_windows(channel, &window).await?;
            let subject = Arc::new(subject);
            let peers = Arc::new(peers);

            tracker.step(20, "running detectors");
            tokio::join!(
                self.run_content(wants(AnalysisType::Content), &subject, &peers),
                self.run_temporal(wants(AnalysisType::Temporal), &subject, &peers, window),
            )
        } else {
            (
                DetectorRun::without_candidates(SectionOutcome::NotRequested),
                DetectorRun::without_candidates(SectionOutcome::NotRequested),
            )
        };

        tracker.step(60, "committing connections");
        for (detector, batch) in [
            ("content_similarity", &content.candidates),
            ("time_correlation", &temporal.candidates),
        ] {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled(channel.id));
            }
            self.graph.commit(detector, batch, now).await?;
        }

        let network = if wants(AnalysisType::Network) {
            tracker.step(75, "network metrics");
            self.run_network(channel.id, depth, now).await?
        } else {
            SectionOutcome::NotRequested
        };

        tracker.step(90, "saving result");
        let incident = self.graph.incident(channel.id).await?;
        let relationship_summary = summarize(
            &self.config,
            channel.id,
            &incident,
            &content.outcome,
            &temporal.outcome,
            &network,
        );

        let result = AnalysisResult {
            channel_id: channel.id,
            analyzed_at: now,
            depth,
            analysis_types: types.to_vec(),
            content_analysis: content.outcome,
            temporal_analysis: temporal.outcome,
            network_analysis: network,
            relationship_summary,
        };
        self.store.save_result(&result).await?;
        Ok(result)
    }

    async fn load_windows(
        &self,
        channel: &Channel,
        window: &AnalysisWindow,
    ) -> Result<(ChannelWindow, Vec<ChannelWindow>), EngineError> {
        let limit = self.config.max_posts_per_channel;
        let subject_posts = self
            .store
            .recent_posts(channel.id, window.start, window.end, limit)
            .await?;

        let total = self.store.count_channels().await?;
        let others: Vec<Channel> = self
            .store
            .list_channels(total, 0)
            .await?
            .into_iter()
            .filter(|c| c.id != channel.id)
            .collect();

        let peers: Vec<ChannelWindow> = stream::iter(others)
            .map(|peer| async move {
                let posts = self
                    .store
                    .recent_posts(peer.id, window.start, window.end, limit)
                    .await?;
                Ok::<_, EngineError>(ChannelWindow {
                    channel: peer,
                    posts,
                })
            })
            .buffered(POST_FETCH_CONCURRENCY)
            .try_filter(|peer| futures::future::ready(!peer.posts.is_empty()))
            .try_collect()
            .await?;

        tracing::debug!(
            channel_id = channel.id,
            posts = subject_posts.len(),
            peers = peers.len(),
            "analysis window loaded"
        );

        Ok((
            ChannelWindow {
                channel: channel.clone(),
                posts: subject_posts,
            },
            peers,
        ))
    }

    async fn run_content(
        &self,
        requested: bool,
        subject: &Arc<ChannelWindow>,
        peers: &Arc<Vec<ChannelWindow>>,
    ) -> DetectorRun<ContentAnalysis> {
        if !requested {
            return DetectorRun::without_candidates(SectionOutcome::NotRequested);
        }
        let detector = self.similarity.clone();
        let subject = Arc::clone(subject);
        let peers = Arc::clone(peers);
        match self.pool.run(move || detector.run(&subject, &peers)).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(error = %e, "content similarity detector failed");
                DetectorRun::failed(e.to_string())
            }
        }
    }

    async fn run_temporal(
        &self,
        requested: bool,
        subject: &Arc<ChannelWindow>,
        peers: &Arc<Vec<ChannelWindow>>,
        window: AnalysisWindow,
    ) -> DetectorRun<TemporalAnalysis> {
        if !requested {
            return DetectorRun::without_candidates(SectionOutcome::NotRequested);
        }
        let correlator = self.temporal.clone();
        let subject = Arc::clone(subject);
        let peers = Arc::clone(peers);
        match self
            .pool
            .run(move || correlator.run(&subject, &peers, &window))
            .await
        {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(error = %e, "temporal correlator failed");
                DetectorRun::failed(e.to_string())
            }
        }
    }

    async fn run_network(
        &self,
        channel_id: ChannelId,
        depth: u32,
        now: DateTime<Utc>,
    ) -> Result<SectionOutcome<NetworkAnalysis>, EngineError> {
        let snapshot = self.graph.snapshot(now).await?.with_node(channel_id);
        let calculator = self.metrics.clone();
        Ok(
            match self
                .pool
                .run(move || calculator.compute(&snapshot, channel_id, depth))
                .await
            {
                Ok(result) => SectionOutcome::Completed { result },
                Err(e) => {
                    tracing::error!(channel_id, error = %e, "network metrics failed");
                    SectionOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        )
    }
}
