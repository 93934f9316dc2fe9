use std::net::SocketAddr;
use std::path::PathBuf;

use crate::AnalysisConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub channels_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Upper bound on concurrently running CPU-bound analysis tasks.
    pub worker_concurrency: usize,
    /// Wall-clock limit for one analysis run; `0` disables the limit.
    pub analysis_timeout_secs: u64,
    /// Cron expression for the stale-connection sweep.
    pub prune_schedule: String,
    pub analysis: AnalysisConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("channels_path", &self.channels_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("analysis_timeout_secs", &self.analysis_timeout_secs)
            .field("prune_schedule", &self.prune_schedule)
            .field("analysis", &self.analysis)
            .finish()
    }
}
