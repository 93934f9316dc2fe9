//! Text normalisation and the lexical measures used by the similarity detector.
//!
//! Every map here is a `BTreeMap` so floating-point sums are accumulated in
//! the same order on every run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use tgnet_core::Post;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:https?://|www\.)\S+").expect("valid url regex"));
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\w+").expect("valid mention regex"));
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\w+").expect("valid hashtag regex"));
static PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid punctuation regex"));
static SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Words ignored by the TF-IDF model. Shingles and word sets keep them.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will",
    "with", "и", "в", "во", "на", "не", "что", "с", "со", "по", "к", "а", "но", "из", "за",
    "для", "от", "это", "как", "о", "у",
];

/// Strip URLs, @mentions, #hashtags and punctuation, collapse whitespace,
/// lowercase.
#[must_use]
pub fn normalize(text: &str) -> String {
    let text = URL_RE.replace_all(text, " ");
    let text = MENTION_RE.replace_all(&text, " ");
    let text = HASHTAG_RE.replace_all(&text, " ");
    let text = PUNCT_RE.replace_all(&text, " ");
    SPACE_RE.replace_all(&text, " ").trim().to_lowercase()
}

/// Hex SHA-256 of already-normalised text.
#[must_use]
pub fn fingerprint(normalized: &str) -> String {
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Word bigrams, or the single word for one-word texts.
#[must_use]
pub fn shingles(words: &[String]) -> BTreeSet<String> {
    if words.len() == 1 {
        return words.iter().cloned().collect();
    }
    words
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect()
}

/// Jaccard index of two sets; `0.0` when both are empty.
#[must_use]
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = intersection as f64 / union as f64;
    ratio
}

/// A post with every derived text feature computed once.
#[derive(Debug, Clone)]
pub struct PreparedPost {
    pub post_id: i64,
    pub published_at: DateTime<Utc>,
    pub normalized: String,
    pub fingerprint: String,
    pub words: Vec<String>,
    pub word_set: BTreeSet<String>,
    pub shingles: BTreeSet<String>,
    pub media_hash: Option<String>,
}

impl PreparedPost {
    #[must_use]
    pub fn from_post(post: &Post) -> Self {
        let normalized = normalize(&post.text);
        let words: Vec<String> = normalized.split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect();
        Self {
            post_id: post.id,
            published_at: post.published_at,
            fingerprint: fingerprint(&normalized),
            word_set: words.iter().cloned().collect(),
            shingles: shingles(&words),
            words,
            normalized,
            media_hash: post.media_hash.clone().filter(|h| !h.is_empty()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Terms that count towards TF-IDF.
    fn terms(&self) -> impl Iterator<Item = &str> {
        self.words
            .iter()
            .map(String::as_str)
            .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(w))
    }
}

/// Sparse, L2-normalised TF-IDF vector.
pub type TermVector = BTreeMap<String, f64>;

/// Smoothed inverse document frequencies over one corpus:
/// `idf(t) = ln((1 + n) / (1 + df(t))) + 1`.
#[derive(Debug, Clone, Default)]
pub struct TfIdfModel {
    idf: BTreeMap<String, f64>,
    documents: usize,
}

impl TfIdfModel {
    #[must_use]
    pub fn fit<'a>(corpus: impl IntoIterator<Item = &'a PreparedPost>) -> Self {
        let mut df: BTreeMap<String, usize> = BTreeMap::new();
        let mut documents = 0usize;
        for post in corpus {
            documents += 1;
            let unique: BTreeSet<&str> = post.terms().collect();
            for term in unique {
                *df.entry(term.to_string()).or_default() += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let n = documents as f64;
        let idf = df
            .into_iter()
            .map(|(term, count)| {
                #[allow(clippy::cast_precision_loss)]
                let weight = ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0;
                (term, weight)
            })
            .collect();
        Self { idf, documents }
    }

    #[must_use]
    pub fn documents(&self) -> usize {
        self.documents
    }

    /// TF-IDF vector of `post`. Terms unseen during fitting are ignored.
    #[must_use]
    pub fn vector(&self, post: &PreparedPost) -> TermVector {
        let mut tf: BTreeMap<&str, f64> = BTreeMap::new();
        for term in post.terms() {
            *tf.entry(term).or_default() += 1.0;
        }

        let mut vector: TermVector = tf
            .into_iter()
            .filter_map(|(term, count)| self.idf.get(term).map(|idf| (term.to_string(), count * idf)))
            .collect();

        let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for weight in vector.values_mut() {
                *weight /= norm;
            }
        }
        vector
    }

    /// Highest-weighted terms over `posts`, ties broken alphabetically.
    #[must_use]
    pub fn top_terms(&self, posts: &[PreparedPost], n: usize) -> Vec<String> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for post in posts {
            for (term, weight) in self.vector(post) {
                *totals.entry(term).or_default() += weight;
            }
        }
        let mut ranked: Vec<(String, f64)> = totals
            .into_iter()
            .filter(|(term, _)| term.chars().count() >= 3)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(n).map(|(term, _)| term).collect()
    }
}

/// Cosine similarity of two L2-normalised vectors.
#[must_use]
pub fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum();
    dot.clamp(0.0, 1.0)
}
