//! Content similarity between channels.
//!
//! Each post is scored against every post of the other channel with
//! `0.4·tfidf_cosine + 0.4·shingle_jaccard + 0.2·word_jaccard`. Texts that
//! normalise to the same string, and posts carrying the same media
//! fingerprint, score 1.0 outright.

use std::collections::BTreeSet;

use tgnet_core::{
    AnalysisConfig, ChannelId, ConnectionCandidate, ConnectionType, ContentAnalysis,
    ContentEvidence, CoreError, DuplicateAnalysis, DuplicateKind, DuplicatePair, Evidence,
    PeerSimilarity, PeerSimilarityOutcome, Post, SectionOutcome,
};

use crate::text::{cosine, jaccard, PreparedPost, TermVector, TfIdfModel};
use crate::window::{ChannelWindow, DetectorRun};

const TFIDF_WEIGHT: f64 = 0.4;
const SHINGLE_WEIGHT: f64 = 0.4;
const LEXICAL_WEIGHT: f64 = 0.2;

const EXACT_DUPLICATE: f64 = 0.95;
const TEXTUAL_DUPLICATE_TFIDF: f64 = 0.8;
const MAX_DUPLICATE_EXAMPLES: usize = 10;
const KEYWORD_COUNT: usize = 10;

/// Score of one post pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairScore {
    pub score: f64,
    pub text_score: f64,
    pub tfidf: f64,
    pub media_match: bool,
}

impl PairScore {
    #[must_use]
    pub fn kind(&self) -> DuplicateKind {
        if self.text_score > EXACT_DUPLICATE {
            DuplicateKind::Exact
        } else if self.media_match {
            DuplicateKind::Media
        } else if self.tfidf > TEXTUAL_DUPLICATE_TFIDF {
            DuplicateKind::Textual
        } else {
            DuplicateKind::Partial
        }
    }
}

/// Posts of one channel with their TF-IDF vectors under a shared model.
struct Vectorised {
    posts: Vec<PreparedPost>,
    vectors: Vec<TermVector>,
}

impl Vectorised {
    fn new(posts: Vec<PreparedPost>, model: &TfIdfModel) -> Self {
        let vectors = posts.iter().map(|p| model.vector(p)).collect();
        Self { posts, vectors }
    }

    fn score(&self, i: usize, other: &Vectorised, j: usize) -> PairScore {
        score_pair(&self.posts[i], &self.vectors[i], &other.posts[j], &other.vectors[j])
    }
}

fn prepare(posts: &[Post]) -> Vec<PreparedPost> {
    posts.iter().map(PreparedPost::from_post).collect()
}

fn score_pair(a: &PreparedPost, va: &TermVector, b: &PreparedPost, vb: &TermVector) -> PairScore {
    let media_match = matches!((&a.media_hash, &b.media_hash), (Some(x), Some(y)) if x == y);

    let (text_score, tfidf) = if a.is_empty() || b.is_empty() {
        (0.0, 0.0)
    } else if a.fingerprint == b.fingerprint {
        (1.0, 1.0)
    } else {
        let tfidf = cosine(va, vb);
        let combined = TFIDF_WEIGHT * tfidf
            + SHINGLE_WEIGHT * jaccard(&a.shingles, &b.shingles)
            + LEXICAL_WEIGHT * jaccard(&a.word_set, &b.word_set);
        (combined.clamp(0.0, 1.0), tfidf)
    };

    PairScore {
        score: if media_match { 1.0 } else { text_score },
        text_score,
        tfidf,
        media_match,
    }
}

/// Greedy one-to-one matching: highest score first, ties by post ids.
/// Each input entry is `(left index, right index, score)`.
fn match_one_to_one(
    mut pairs: Vec<(usize, usize, PairScore)>,
    left_ids: &[i64],
    right_ids: &[i64],
) -> Vec<(usize, usize, PairScore)> {
    pairs.sort_by(|a, b| {
        b.2.score
            .total_cmp(&a.2.score)
            .then_with(|| left_ids[a.0].cmp(&left_ids[b.0]))
            .then_with(|| right_ids[a.1].cmp(&right_ids[b.1]))
    });

    let mut used_left = BTreeSet::new();
    let mut used_right = BTreeSet::new();
    pairs
        .into_iter()
        .filter(|(i, j, _)| {
            if used_left.contains(i) || used_right.contains(j) {
                return false;
            }
            used_left.insert(*i);
            used_right.insert(*j);
            true
        })
        .collect()
}

fn minutes_between(a: &PreparedPost, b: &PreparedPost) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let minutes = (a.published_at - b.published_at).num_seconds().abs() as f64 / 60.0;
    minutes
}

/// Result of comparing two channels that both had enough posts.
#[derive(Debug, Clone)]
pub struct ContentComparison {
    pub evidence: ContentEvidence,
    /// Mean best-match score over related posts; `None` when nothing was related.
    pub average_similarity: Option<f64>,
    pub duplicates: Vec<DuplicatePair>,
    pub candidate: Option<ConnectionCandidate>,
}

#[derive(Debug, Clone)]
pub enum PeerComparison {
    InsufficientData { required: usize, available: usize },
    Compared(ContentComparison),
}

#[derive(Debug, Clone)]
pub struct SimilarityDetector {
    similarity_threshold: f64,
    duplicate_threshold: f64,
    related_floor: f64,
    min_posts: usize,
}

impl SimilarityDetector {
    #[must_use]
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            duplicate_threshold: config.duplicate_threshold,
            related_floor: config.related_floor,
            min_posts: config.min_posts,
        }
    }

    #[must_use]
    pub fn min_posts(&self) -> usize {
        self.min_posts
    }

    /// Compare the recent posts of two channels.
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
    ) -> Result<PeerComparison, CoreError> {
        let available = source_posts.len().min(target_posts.len());
        if available < self.min_posts {
            return Ok(PeerComparison::InsufficientData {
                required: self.min_posts,
                available,
            });
        }

        let left = prepare(source_posts);
        let right = prepare(target_posts);
        let model = TfIdfModel::fit(left.iter().chain(right.iter()));
        let left = Vectorised::new(left, &model);
        let right = Vectorised::new(right, &model);

        let mut best_left = vec![0.0_f64; left.posts.len()];
        let mut best_right = vec![0.0_f64; right.posts.len()];
        let mut max_similarity = 0.0_f64;
        let mut duplicate_candidates = Vec::new();

        for i in 0..left.posts.len() {
            for j in 0..right.posts.len() {
                let pair = left.score(i, &right, j);
                best_left[i] = best_left[i].max(pair.score);
                best_right[j] = best_right[j].max(pair.score);
                max_similarity = max_similarity.max(pair.score);
                if pair.score >= self.duplicate_threshold {
                    duplicate_candidates.push((i, j, pair));
                }
            }
        }

        // Sorted so the sum does not depend on which side was the source.
        let mut related: Vec<f64> = best_left
            .iter()
            .chain(best_right.iter())
            .copied()
            .filter(|s| *s >= self.related_floor)
            .collect();
        related.sort_by(f64::total_cmp);
        #[allow(clippy::cast_precision_loss)]
        let average_similarity =
            (!related.is_empty()).then(|| related.iter().sum::<f64>() / related.len() as f64);

        let left_ids: Vec<i64> = left.posts.iter().map(|p| p.post_id).collect();
        let right_ids: Vec<i64> = right.posts.iter().map(|p| p.post_id).collect();
        let duplicates: Vec<DuplicatePair> =
            match_one_to_one(duplicate_candidates, &left_ids, &right_ids)
                .into_iter()
                .map(|(i, j, pair)| DuplicatePair {
                    first_post_id: left_ids[i],
                    second_post_id: right_ids[j],
                    similarity: pair.score,
                    time_diff_minutes: minutes_between(&left.posts[i], &right.posts[j]),
                    kind: pair.kind(),
                })
                .collect();

        let left_media: BTreeSet<&str> =
            left.posts.iter().filter_map(|p| p.media_hash.as_deref()).collect();
        let shared_media = right
            .posts
            .iter()
            .filter_map(|p| p.media_hash.as_deref())
            .collect::<BTreeSet<_>>()
            .intersection(&left_media)
            .count();

        let evidence = ContentEvidence {
            source_posts: left.posts.len(),
            target_posts: right.posts.len(),
            compared_pairs: left.posts.len() * right.posts.len(),
            related_posts: related.len(),
            average_similarity: average_similarity.unwrap_or(0.0),
            max_similarity,
            duplicate_posts: duplicates.len(),
            shared_media,
        };

        let candidate = match average_similarity {
            Some(avg) if avg >= self.similarity_threshold && self.enough_related(related.len()) => {
                Some(ConnectionCandidate::new(
                    source,
                    target,
                    ConnectionType::ContentSimilarity,
                    avg,
                    self.confidence(related.len(), left.posts.len() + right.posts.len()),
                    Evidence::Content(evidence.clone()),
                )?)
            }
            _ => None,
        };

        Ok(PeerComparison::Compared(ContentComparison {
            evidence,
            average_similarity,
            duplicates,
            candidate,
        }))
    }

    /// Related posts are counted on both sides; an edge needs `min_posts` of
    /// them per channel on average.
    fn enough_related(&self, related: usize) -> bool {
        related >= 2 * self.min_posts
    }

    /// Half from having enough related posts, half from how much of both
    /// windows they cover.
    fn confidence(&self, related: usize, total_posts: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let volume = (related as f64 / (2 * self.min_posts) as f64).min(1.0);
        #[allow(clippy::cast_precision_loss)]
        let coverage = if total_posts == 0 {
            0.0
        } else {
            related as f64 / total_posts as f64
        };
        (0.5 * volume + 0.5 * coverage).clamp(0.0, 1.0)
    }

    /// Near-duplicates among one channel's own posts.
    #[must_use]
    pub fn self_duplicates(&self, posts: &[Post]) -> DuplicateAnalysis {
        let prepared = prepare(posts);
        let model = TfIdfModel::fit(&prepared);
        let own = Vectorised::new(prepared, &model);

        let mut candidates = Vec::new();
        for i in 0..own.posts.len() {
            for j in (i + 1)..own.posts.len() {
                let pair = own.score(i, &own, j);
                if pair.score >= self.duplicate_threshold {
                    candidates.push((i, j, pair));
                }
            }
        }

        let ids: Vec<i64> = own.posts.iter().map(|p| p.post_id).collect();
        let matched = match_one_to_one(candidates, &ids, &ids);
        #[allow(clippy::cast_precision_loss)]
        let duplicate_rate = if own.posts.is_empty() {
            0.0
        } else {
            matched.len() as f64 / own.posts.len() as f64
        };

        DuplicateAnalysis {
            total_duplicates: matched.len(),
            duplicate_rate,
            examples: matched
                .iter()
                .take(MAX_DUPLICATE_EXAMPLES)
                .map(|&(i, j, pair)| DuplicatePair {
                    first_post_id: ids[i],
                    second_post_id: ids[j],
                    similarity: pair.score,
                    time_diff_minutes: minutes_between(&own.posts[i], &own.posts[j]),
                    kind: pair.kind(),
                })
                .collect(),
        }
    }

    /// Run the detector for `subject` against every peer.
    #[must_use]
    pub fn run(&self, subject: &ChannelWindow, peers: &[ChannelWindow]) -> DetectorRun<ContentAnalysis> {
        let subject_id = subject.channel.id;
        if subject.posts.len() < self.min_posts {
            return DetectorRun::without_candidates(SectionOutcome::InsufficientData {
                required: self.min_posts,
                available: subject.posts.len(),
            });
        }

        let prepared = prepare(&subject.posts);
        let keywords = TfIdfModel::fit(&prepared).top_terms(&prepared, KEYWORD_COUNT);
        let duplicate_analysis = self.self_duplicates(&subject.posts);

        let mut summaries = Vec::with_capacity(peers.len());
        let mut candidates = Vec::new();
        for peer in peers {
            let comparison = match self.compare(subject_id, &subject.posts, peer.channel.id, &peer.posts) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        channel_id = subject_id,
                        peer_id = peer.channel.id,
                        error = %e,
                        "content comparison produced an invalid candidate"
                    );
                    return DetectorRun::failed(e.to_string());
                }
            };

            let outcome = match comparison {
                PeerComparison::InsufficientData { required, available } => {
                    PeerSimilarityOutcome::InsufficientData { required, available }
                }
                PeerComparison::Compared(c) => {
                    let connected = c.candidate.is_some();
                    if let Some(candidate) = c.candidate {
                        candidates.push(candidate);
                    }
                    PeerSimilarityOutcome::Compared {
                        average_similarity: c.average_similarity,
                        max_similarity: c.evidence.max_similarity,
                        related_posts: c.evidence.related_posts,
                        duplicate_posts: c.evidence.duplicate_posts,
                        connected,
                    }
                }
            };
            summaries.push(PeerSimilarity {
                channel_id: peer.channel.id,
                channel_name: peer.channel.name.clone(),
                outcome,
            });
        }

        tracing::debug!(
            channel_id = subject_id,
            peers = peers.len(),
            edges = candidates.len(),
            "content similarity complete"
        );

        DetectorRun {
            outcome: SectionOutcome::Completed {
                result: ContentAnalysis {
                    window_posts: subject.posts.len(),
                    duplicate_analysis,
                    keywords,
                    peers: summaries,
                },
            },
            candidates,
        }
    }
}

#[cfg(test)]
#[path = "similarity_test.rs"]
mod tests;
