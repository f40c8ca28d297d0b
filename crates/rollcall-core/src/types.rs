use crate::intake::IntakeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered person: the roll number is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub roll: String,
    pub name: String,
}

impl Identity {
    /// Build a validated identity. Both fields are trimmed.
    ///
    /// The roll ends up in an image file name, so it may not contain
    /// whitespace or path separators.
    pub fn new(roll: &str, name: &str) -> Result<Self, IntakeError> {
        let roll = roll.trim();
        let name = name.trim();

        if roll.is_empty() {
            return Err(IntakeError::EmptyRoll);
        }
        if roll == "."
            || roll == ".."
            || roll
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(IntakeError::InvalidRoll(roll.to_string()));
        }
        if name.is_empty() {
            return Err(IntakeError::EmptyName);
        }

        Ok(Self {
            roll: roll.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.roll)
    }
}

/// A registered student as persisted by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub identity: Identity,
    pub embedding: Embedding,
    pub image_path: PathBuf,
    /// RFC 3339 local timestamp.
    pub registered_at: String,
}

/// Which distance function the matcher uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMetric {
    /// Cosine similarity, accept when `score >= threshold`.
    #[default]
    Cosine,
    /// Euclidean distance, accept when `score <= threshold`.
    Euclidean,
}

const DEFAULT_COSINE_THRESHOLD: f32 = 0.40;

impl MatchMetric {
    /// Threshold used when none is configured.
    ///
    /// Embeddings are L2-normalized, where `d = sqrt(2 - 2 * cos)`, so the
    /// euclidean default accepts exactly the pairs the cosine default does.
    pub fn default_threshold(self) -> f32 {
        match self {
            MatchMetric::Cosine => DEFAULT_COSINE_THRESHOLD,
            MatchMetric::Euclidean => (2.0 - 2.0 * DEFAULT_COSINE_THRESHOLD).sqrt(),
        }
    }

    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            MatchMetric::Cosine => Box::new(CosineMatcher),
            MatchMetric::Euclidean => Box::new(EuclideanMatcher),
        }
    }
}

impl std::str::FromStr for MatchMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(MatchMetric::Cosine),
            "euclidean" => Ok(MatchMetric::Euclidean),
            other => Err(format!("unknown metric {other:?} (expected cosine or euclidean)")),
        }
    }
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Identity of the accepted candidate, `None` when nothing cleared the threshold.
    pub identity: Option<Identity>,
    /// Best score seen, in the metric's units. `None` when nothing was compared.
    pub score: Option<f32>,
}

impl MatchResult {
    pub fn no_match(score: Option<f32>) -> Self {
        Self {
            identity: None,
            score,
        }
    }

    pub fn matched(&self) -> bool {
        self.identity.is_some()
    }
}

/// Strategy for comparing a query embedding against a gallery of registered faces.
///
/// Implementations visit every gallery entry in order, and the first entry
/// reaching the best score wins.
pub trait Matcher {
    fn metric(&self) -> MatchMetric;

    fn compare(&self, query: &Embedding, gallery: &[StudentRecord], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn metric(&self) -> MatchMetric {
        MatchMetric::Cosine
    }

    fn compare(&self, query: &Embedding, gallery: &[StudentRecord], threshold: f32) -> MatchResult {
        let best = best_candidate(query, gallery, Embedding::similarity, |s, best| s > best);
        decide(gallery, best, |s| s >= threshold)
    }
}

/// Euclidean distance matcher (tolerance-style threshold).
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn metric(&self) -> MatchMetric {
        MatchMetric::Euclidean
    }

    fn compare(&self, query: &Embedding, gallery: &[StudentRecord], threshold: f32) -> MatchResult {
        let best = best_candidate(query, gallery, Embedding::euclidean_distance, |d, best| {
            d < best
        });
        decide(gallery, best, |d| d <= threshold)
    }
}

/// Index and score of the best gallery entry. Strict `better` keeps the first
/// of several equal scores. Entries with a different dimension never win.
fn best_candidate(
    query: &Embedding,
    gallery: &[StudentRecord],
    score: impl Fn(&Embedding, &Embedding) -> f32,
    better: impl Fn(f32, f32) -> bool,
) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;

    for (i, record) in gallery.iter().enumerate() {
        if record.embedding.dim() != query.dim() {
            tracing::warn!(
                roll = %record.identity.roll,
                stored = record.embedding.dim(),
                query = query.dim(),
                "embedding dimension mismatch, skipping"
            );
            continue;
        }

        let s = score(query, &record.embedding);
        if s.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if !better(s, current) => {}
            _ => best = Some((i, s)),
        }
    }

    best
}

fn decide(
    gallery: &[StudentRecord],
    best: Option<(usize, f32)>,
    accept: impl Fn(f32) -> bool,
) -> MatchResult {
    match best {
        Some((idx, score)) if accept(score) => MatchResult {
            identity: Some(gallery[idx].identity.clone()),
            score: Some(score),
        },
        Some((_, score)) => MatchResult::no_match(Some(score)),
        None => MatchResult::no_match(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn record(roll: &str, name: &str, values: &[f32]) -> StudentRecord {
        StudentRecord {
            id: roll.into(),
            identity: Identity::new(roll, name).unwrap(),
            embedding: emb(values),
            image_path: PathBuf::new(),
            registered_at: String::new(),
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(emb(&[1.0, 0.0]).similarity(&emb(&[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((emb(&[1.0, 0.0]).similarity(&emb(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        assert!((emb(&[0.0, 0.0]).euclidean_distance(&emb(&[3.0, 4.0])) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_identity_trims_and_validates() {
        let id = Identity::new("  101 ", " Alice ").unwrap();
        assert_eq!(id.roll, "101");
        assert_eq!(id.name, "Alice");
        assert_eq!(id.to_string(), "Alice (101)");

        assert!(matches!(Identity::new("", "Alice"), Err(IntakeError::EmptyRoll)));
        assert!(matches!(Identity::new("101", "  "), Err(IntakeError::EmptyName)));
        assert!(matches!(Identity::new("1 01", "A"), Err(IntakeError::InvalidRoll(_))));
        assert!(matches!(Identity::new("../x", "A"), Err(IntakeError::InvalidRoll(_))));
        assert!(matches!(Identity::new("..", "A"), Err(IntakeError::InvalidRoll(_))));
    }

    #[test]
    fn test_cosine_matcher_visits_whole_gallery() {
        let query = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![
            record("1", "decoy1", &[0.0, 1.0, 0.0]),
            record("2", "decoy2", &[0.0, 0.0, 1.0]),
            record("3", "match", &[1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&query, &gallery, 0.5);
        assert!(result.matched());
        let identity = result.identity.unwrap();
        assert_eq!(identity.roll, "3");
        assert_eq!(identity.name, "match");
        assert!((result.score.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_below_threshold() {
        let query = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![record("1", "other", &[0.0, 1.0, 0.0])];

        let result = CosineMatcher.compare(&query, &gallery, 0.5);
        assert!(!result.matched());
        assert!(result.score.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        for metric in [MatchMetric::Cosine, MatchMetric::Euclidean] {
            for query in [emb(&[1.0, 0.0]), emb(&[0.0, 0.0]), emb(&[-3.0, 7.5])] {
                // Thresholds that would accept anything.
                let result = metric.matcher().compare(&query, &[], match metric {
                    MatchMetric::Cosine => -1.0,
                    MatchMetric::Euclidean => f32::MAX,
                });
                assert_eq!(result, MatchResult::no_match(None));
            }
        }
    }

    #[test]
    fn test_ties_go_to_first_entry() {
        let query = emb(&[1.0, 0.0]);
        let gallery = vec![
            record("101", "Alice", &[2.0, 0.0]),
            record("102", "Alice Twin", &[2.0, 0.0]),
        ];

        let cos = CosineMatcher.compare(&query, &gallery, 0.5);
        assert_eq!(cos.identity.unwrap().roll, "101");

        let euc = EuclideanMatcher.compare(&query, &gallery, 2.0);
        assert_eq!(euc.identity.unwrap().roll, "101");
    }

    #[test]
    fn test_matching_is_deterministic() {
        let query = emb(&[0.6, 0.8, 0.0]);
        let gallery = vec![
            record("101", "Alice", &[0.6, 0.7, 0.1]),
            record("102", "Bob", &[0.1, 0.2, 0.9]),
            record("103", "Carol", &[0.6, 0.8, 0.05]),
        ];

        let first = CosineMatcher.compare(&query, &gallery, 0.4);
        for _ in 0..10 {
            assert_eq!(CosineMatcher.compare(&query, &gallery, 0.4), first);
        }
        assert_eq!(first.identity.unwrap().roll, "103");
    }

    #[test]
    fn test_euclidean_matcher_tolerance() {
        let query = emb(&[0.0, 0.0]);
        let gallery = vec![
            record("101", "Alice", &[0.3, 0.4]),
            record("102", "Bob", &[1.0, 1.0]),
        ];

        let hit = EuclideanMatcher.compare(&query, &gallery, 0.6);
        assert_eq!(hit.identity.unwrap().roll, "101");
        assert!((hit.score.unwrap() - 0.5).abs() < 1e-6);

        let miss = EuclideanMatcher.compare(&query, &gallery, 0.45);
        assert!(!miss.matched());
        assert!((miss.score.unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_never_wins() {
        let query = emb(&[1.0, 0.0]);
        let gallery = vec![
            record("101", "Wrong Model", &[1.0, 0.0, 0.0]),
            record("102", "Bob", &[0.9, 0.1]),
        ];

        let result = CosineMatcher.compare(&query, &gallery, 0.5);
        assert_eq!(result.identity.unwrap().roll, "102");

        let only_bad = CosineMatcher.compare(&query, &gallery[..1], 0.5);
        assert_eq!(only_bad, MatchResult::no_match(None));
    }

    #[test]
    fn test_default_thresholds_agree_on_unit_vectors() {
        let gallery = vec![record("101", "Alice", &[1.0, 0.0])];

        // cos = 0.6, 0.45, 0.35 and 0.0 against the stored unit vector.
        for (query, expected) in [
            ([0.6, 0.8], true),
            ([0.45, 0.893_029], true),
            ([0.35, 0.936_750], false),
            ([0.0, 1.0], false),
        ] {
            let query = emb(&query);
            for metric in [MatchMetric::Cosine, MatchMetric::Euclidean] {
                let result = metric
                    .matcher()
                    .compare(&query, &gallery, metric.default_threshold());
                assert_eq!(result.matched(), expected, "{metric:?} on {:?}", query.values);
            }
        }
    }

    #[test]
    fn test_metric_parsing_and_defaults() {
        assert_eq!("Cosine".parse::<MatchMetric>().unwrap(), MatchMetric::Cosine);
        assert_eq!("euclidean".parse::<MatchMetric>().unwrap(), MatchMetric::Euclidean);
        assert!("manhattan".parse::<MatchMetric>().is_err());
        assert!((MatchMetric::Euclidean.default_threshold() - 1.095_445).abs() < 1e-5);
        assert_eq!(MatchMetric::Euclidean.matcher().metric(), MatchMetric::Euclidean);
    }
}
