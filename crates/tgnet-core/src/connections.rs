//! Typed, scored relationships between channels.
//!
//! Content similarity and time correlation are symmetric relations, so their
//! keys are canonicalised with the lower channel id as `source`. Callers may
//! pass channel ids in either order; [`ConnectionCandidate::new`] swaps them
//! (and mirrors the evidence) when necessary. Directional types keep the
//! orientation they were given.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChannelId, CoreError, Score};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    ContentSimilarity,
    TimeCorrelation,
    AdminOverlap,
    CrossPosting,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 4] = [
        ConnectionType::ContentSimilarity,
        ConnectionType::TimeCorrelation,
        ConnectionType::AdminOverlap,
        ConnectionType::CrossPosting,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::ContentSimilarity => "content_similarity",
            ConnectionType::TimeCorrelation => "time_correlation",
            ConnectionType::AdminOverlap => "admin_overlap",
            ConnectionType::CrossPosting => "cross_posting",
        }
    }

    #[must_use]
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            ConnectionType::ContentSimilarity | ConnectionType::TimeCorrelation
        )
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownConnectionType(s.to_string()))
    }
}

/// Uniqueness key of a stored connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionKey {
    source: ChannelId,
    target: ChannelId,
    connection_type: ConnectionType,
}

impl ConnectionKey {
    /// Build a key, canonicalising symmetric types.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SelfLoop`] when `source == target`.
    pub fn new(
        source: ChannelId,
        target: ChannelId,
        connection_type: ConnectionType,
    ) -> Result<Self, CoreError> {
        Ok(Self::oriented(source, target, connection_type)?.0)
    }

    /// Like [`ConnectionKey::new`], also reporting whether the ids were swapped.
    fn oriented(
        source: ChannelId,
        target: ChannelId,
        connection_type: ConnectionType,
    ) -> Result<(Self, bool), CoreError> {
        if source == target {
            return Err(CoreError::SelfLoop(source));
        }
        let swap = connection_type.is_symmetric() && source > target;
        let (source, target) = if swap {
            (target, source)
        } else {
            (source, target)
        };
        Ok((
            Self {
                source,
                target,
                connection_type,
            },
            swap,
        ))
    }

    #[must_use]
    pub fn source(&self) -> ChannelId {
        self.source
    }

    #[must_use]
    pub fn target(&self) -> ChannelId {
        self.target
    }

    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    #[must_use]
    pub fn involves(&self, channel: ChannelId) -> bool {
        self.source == channel || self.target == channel
    }

    /// The endpoint opposite `channel`, if `channel` is an endpoint.
    #[must_use]
    pub fn other(&self, channel: ChannelId) -> Option<ChannelId> {
        if self.source == channel {
            Some(self.target)
        } else if self.target == channel {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Supporting numbers produced by the similarity detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEvidence {
    pub source_posts: usize,
    pub target_posts: usize,
    pub compared_pairs: usize,
    /// Posts on either side whose best cross-channel match reached the related floor.
    pub related_posts: usize,
    pub average_similarity: f64,
    pub max_similarity: f64,
    /// One-to-one matched near-duplicate pairs.
    pub duplicate_posts: usize,
    pub shared_media: usize,
}

/// Supporting numbers produced by the temporal correlator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalEvidence {
    pub source_posts: usize,
    pub target_posts: usize,
    pub bucket_minutes: u32,
    pub bucket_count: usize,
    /// Pearson correlation of the bucketed series; absent when either series is constant.
    pub correlation: Option<f64>,
    pub synchronized_posts: usize,
    pub source_leads: usize,
    pub target_leads: usize,
    pub mean_lag_minutes: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    Content(ContentEvidence),
    Temporal(TemporalEvidence),
    /// Payload for detector types without a built-in heuristic
    /// (`admin_overlap`, `cross_posting`).
    Extension { payload: serde_json::Value },
}

impl Evidence {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Evidence::Content(_) => "content",
            Evidence::Temporal(_) => "temporal",
            Evidence::Extension { .. } => "extension",
        }
    }

    #[must_use]
    pub fn supports(&self, connection_type: ConnectionType) -> bool {
        match self {
            Evidence::Content(_) => connection_type == ConnectionType::ContentSimilarity,
            Evidence::Temporal(_) => connection_type == ConnectionType::TimeCorrelation,
            Evidence::Extension { .. } => !connection_type.is_symmetric(),
        }
    }

    /// Swap source-side and target-side fields.
    #[must_use]
    pub fn mirrored(self) -> Self {
        match self {
            Evidence::Content(mut e) => {
                std::mem::swap(&mut e.source_posts, &mut e.target_posts);
                Evidence::Content(e)
            }
            Evidence::Temporal(mut e) => {
                std::mem::swap(&mut e.source_posts, &mut e.target_posts);
                std::mem::swap(&mut e.source_leads, &mut e.target_leads);
                Evidence::Temporal(e)
            }
            other @ Evidence::Extension { .. } => other,
        }
    }
}

/// A detector's proposal for an edge, validated at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionCandidate {
    #[serde(flatten)]
    key: ConnectionKey,
    strength: Score,
    confidence: Score,
    evidence: Evidence,
}

impl ConnectionCandidate {
    /// # Errors
    ///
    /// Returns [`CoreError`] for self loops, out-of-range scores, or evidence
    /// that does not belong to `connection_type`.
    pub fn new(
        source: ChannelId,
        target: ChannelId,
        connection_type: ConnectionType,
        strength: f64,
        confidence: f64,
        evidence: Evidence,
    ) -> Result<Self, CoreError> {
        if !evidence.supports(connection_type) {
            return Err(CoreError::EvidenceMismatch {
                connection_type,
                evidence: evidence.kind(),
            });
        }
        let strength = Score::new(strength)?;
        let confidence = Score::new(confidence)?;
        let (key, swapped) = ConnectionKey::oriented(source, target, connection_type)?;
        let evidence = if swapped { evidence.mirrored() } else { evidence };
        Ok(Self {
            key,
            strength,
            confidence,
            evidence,
        })
    }

    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    #[must_use]
    pub fn strength(&self) -> Score {
        self.strength
    }

    #[must_use]
    pub fn confidence(&self) -> Score {
        self.confidence
    }

    #[must_use]
    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }
}

/// A stored edge of the relationship graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    #[serde(flatten)]
    key: ConnectionKey,
    pub strength: Score,
    pub confidence: Score,
    pub evidence: Evidence,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Connection {
    #[must_use]
    pub fn detected(candidate: ConnectionCandidate, now: DateTime<Utc>) -> Self {
        Self {
            key: candidate.key,
            strength: candidate.strength,
            confidence: candidate.confidence,
            evidence: candidate.evidence,
            first_detected: now,
            last_updated: now,
        }
    }

    /// Rebuild a connection read back from storage.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EvidenceMismatch`] if the stored evidence does not
    /// belong to the key's connection type.
    pub fn restore(
        key: ConnectionKey,
        strength: Score,
        confidence: Score,
        evidence: Evidence,
        first_detected: DateTime<Utc>,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        if !evidence.supports(key.connection_type) {
            return Err(CoreError::EvidenceMismatch {
                connection_type: key.connection_type,
                evidence: evidence.kind(),
            });
        }
        Ok(Self {
            key,
            strength,
            confidence,
            evidence,
            first_detected,
            last_updated,
        })
    }

    /// Apply a fresh candidate for the same key. `first_detected` is kept.
    pub fn refresh(&mut self, candidate: ConnectionCandidate, now: DateTime<Utc>) {
        debug_assert_eq!(self.key, candidate.key);
        self.strength = candidate.strength;
        self.confidence = candidate.confidence;
        self.evidence = candidate.evidence;
        self.last_updated = now;
    }

    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        self.key
    }
}
