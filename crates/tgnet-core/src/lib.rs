//! Shared domain types and configuration for the channel relationship engine.

pub mod analysis;
pub mod analysis_config;
pub mod app_config;
pub mod channels;
pub mod config;
pub mod connections;
pub mod score;

use thiserror::Error;

pub use analysis::{
    AnalysisResult, AnalysisType, Community, ContentAnalysis, DuplicateAnalysis, DuplicateKind,
    DuplicatePair, GraphStats, NetworkAnalysis, NodeMetrics, PeerCorrelation, PeerCorrelationOutcome,
    PeerSimilarity, PeerSimilarityOutcome, PostingPattern, RankedChannel, RelationshipSummary,
    SectionOutcome, TemporalAnalysis,
};
pub use analysis_config::AnalysisConfig;
pub use app_config::{AppConfig, Environment};
pub use channels::{load_channels, Channel, ChannelId, ChannelSeed, ChannelsFile, Post};
pub use config::{load_app_config, load_app_config_from_env};
pub use connections::{
    Connection, ConnectionCandidate, ConnectionKey, ConnectionType, ContentEvidence, Evidence,
    TemporalEvidence,
};
pub use score::Score;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read channels file {path}: {source}")]
    ChannelsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse channels file: {0}")]
    ChannelsFileParse(#[from] serde_yaml::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),

    #[error("channel {0} cannot be connected to itself")]
    SelfLoop(ChannelId),

    #[error("{evidence} evidence cannot back a {connection_type} connection")]
    EvidenceMismatch {
        connection_type: ConnectionType,
        evidence: &'static str,
    },

    #[error("unknown connection type: {0}")]
    UnknownConnectionType(String),

    #[error("unknown analysis type: {0}")]
    UnknownAnalysisType(String),
}
