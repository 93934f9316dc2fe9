use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Thresholds and tuning knobs for every inference component.
///
/// Passed explicitly into each component constructor; nothing reads these
/// from ambient state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum average similarity for a `content_similarity` edge.
    pub similarity_threshold: f64,
    /// Pair score at which two posts count as near-duplicates.
    pub duplicate_threshold: f64,
    /// Best-match score at which a post counts as related to the other channel.
    pub related_floor: f64,
    /// Minimum posts per channel for content analysis.
    pub min_posts: usize,

    pub time_correlation_threshold: f64,
    pub sync_delay_minutes: u32,
    pub min_synchronized_posts: usize,
    pub bucket_minutes: u32,
    /// Minimum posts per channel for temporal analysis.
    pub temporal_min_posts: usize,

    pub window_days: u32,
    pub max_posts_per_channel: usize,

    pub rank_damping: f64,
    pub rank_tolerance: f64,
    pub rank_max_iterations: usize,
    pub default_depth: u32,
    pub max_depth: u32,
    pub strong_connection_threshold: f64,
    pub community_edge_threshold: f64,

    pub staleness_days: u32,
    pub max_commit_retries: u32,
    pub commit_backoff_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            duplicate_threshold: 0.85,
            related_floor: 0.3,
            min_posts: 5,
            time_correlation_threshold: 0.6,
            sync_delay_minutes: 10,
            min_synchronized_posts: 3,
            bucket_minutes: 60,
            temporal_min_posts: 3,
            window_days: 7,
            max_posts_per_channel: 200,
            rank_damping: 0.85,
            rank_tolerance: 1e-6,
            rank_max_iterations: 100,
            default_depth: 2,
            max_depth: 5,
            strong_connection_threshold: 0.7,
            community_edge_threshold: 0.5,
            staleness_days: 30,
            max_commit_retries: 3,
            commit_backoff_ms: 50,
        }
    }
}

impl AnalysisConfig {
    /// Check every knob for a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("similarity_threshold", self.similarity_threshold),
            ("duplicate_threshold", self.duplicate_threshold),
            ("related_floor", self.related_floor),
            ("time_correlation_threshold", self.time_correlation_threshold),
            ("strong_connection_threshold", self.strong_connection_threshold),
            ("community_edge_threshold", self.community_edge_threshold),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if !(self.rank_damping > 0.0 && self.rank_damping < 1.0) {
            return Err(ConfigError::Validation(format!(
                "rank_damping must be within (0, 1), got {}",
                self.rank_damping
            )));
        }
        if !(self.rank_tolerance > 0.0) {
            return Err(ConfigError::Validation(
                "rank_tolerance must be positive".to_string(),
            ));
        }
        if self.rank_max_iterations == 0 {
            return Err(ConfigError::Validation(
                "rank_max_iterations must be at least 1".to_string(),
            ));
        }
        if self.min_posts == 0 || self.temporal_min_posts == 0 {
            return Err(ConfigError::Validation(
                "minimum post counts must be at least 1".to_string(),
            ));
        }
        if self.bucket_minutes == 0 || self.window_days == 0 {
            return Err(ConfigError::Validation(
                "bucket_minutes and window_days must be at least 1".to_string(),
            ));
        }
        if self.max_posts_per_channel < self.min_posts {
            return Err(ConfigError::Validation(format!(
                "max_posts_per_channel ({}) is below min_posts ({})",
                self.max_posts_per_channel, self.min_posts
            )));
        }
        if self.default_depth == 0 || self.default_depth > self.max_depth {
            return Err(ConfigError::Validation(format!(
                "default_depth must be within 1..={}, got {}",
                self.max_depth, self.default_depth
            )));
        }
        if self.staleness_days == 0 {
            return Err(ConfigError::Validation(
                "staleness_days must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AnalysisConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn defaults_match_documented_thresholds() {
        let cfg = AnalysisConfig::default();
        assert!((cfg.similarity_threshold - 0.7).abs() < f64::EPSILON);
        assert!((cfg.duplicate_threshold - 0.85).abs() < f64::EPSILON);
        assert!((cfg.time_correlation_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.sync_delay_minutes, 10);
        assert_eq!(cfg.staleness_days, 30);
        assert!((cfg.rank_damping - 0.85).abs() < f64::EPSILON);
        assert_eq!(cfg.rank_max_iterations, 100);
        assert_eq!(cfg.default_depth, 2);
        assert_eq!(cfg.min_posts, 5);
    }

    #[test]
    fn rejects_threshold_above_one() {
        let cfg = AnalysisConfig {
            duplicate_threshold: 1.5,
            ..AnalysisConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("duplicate_threshold")));
    }

    #[test]
    fn rejects_degenerate_damping() {
        let cfg = AnalysisConfig {
            rank_damping: 1.0,
            ..AnalysisConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_default_depth_beyond_max() {
        let cfg = AnalysisConfig {
            default_depth: 6,
            ..AnalysisConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
