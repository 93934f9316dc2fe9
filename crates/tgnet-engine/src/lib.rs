//! Relationship inference for broadcast channels.
//!
//! Detectors turn post windows into scored connection candidates, the graph
//! builder upserts them, the metrics calculator ranks channels over a graph
//! snapshot, and [`AnalysisEngine`] ties the pieces into a per-channel
//! analysis run.

pub mod engine;
pub mod error;
pub mod graph;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod progress;
pub mod similarity;
pub mod store;
pub mod temporal;
pub mod text;
pub mod window;

mod retry;
mod summary;

pub use engine::{parse_analysis_types, AnalysisEngine, Overview};
pub use error::{EngineError, StoreError};
pub use graph::{GraphBuilder, GraphSnapshot};
pub use memory::MemoryStore;
pub use metrics::{
    betweenness_centrality, closeness_centrality, eigenvector_centrality, pagerank,
    MetricsCalculator, PageRank,
};
pub use pool::WorkerPool;
pub use progress::{NoProgress, ProgressEvent, ProgressKind, ProgressSink};
pub use similarity::SimilarityDetector;
pub use store::{
    ChannelRepository, CommitSummary, ConnectionFilter, ConnectionStats, ConnectionStore,
    PostSource, ResultStore, Store,
};
pub use temporal::TemporalCorrelator;
pub use window::{AnalysisWindow, ChannelWindow, DetectorRun};
