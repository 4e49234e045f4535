//! Candidate answers and best-candidate tracking

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Free-form metadata attached to candidates, budgets and results.
pub type Metadata = Map<String, Value>;

/// One sampled model output being evaluated.
///
/// The engine only reads these fields and never mutates a candidate once
/// it has been produced by a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Opaque identifier
    pub id: String,
    /// Textual content of the output
    pub content: String,
    /// Optional score assigned by the generator or a previous stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Optional token count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Candidate {
    /// Create a candidate with the given identifier and content
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: None,
            tokens: None,
            metadata: Metadata::new(),
        }
    }

    /// Attach a score
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Attach a token count
    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Insert one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A candidate paired with a score, compared only by that score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    pub metadata: Metadata,
}

impl ScoredCandidate {
    pub fn new(candidate: Candidate, score: f64) -> Self {
        Self {
            candidate,
            score,
            metadata: Metadata::new(),
        }
    }

    /// Return the highest-scoring entry, keeping the earliest one on ties.
    pub fn best_of(scored: impl IntoIterator<Item = ScoredCandidate>) -> Option<ScoredCandidate> {
        scored.into_iter().fold(None, |best, next| match best {
            Some(current) if current >= next => Some(current),
            _ => Some(next),
        })
    }
}

impl PartialEq for ScoredCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl PartialOrd for ScoredCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.score.partial_cmp(&other.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_builders() {
        let c = Candidate::new("c1", "42")
            .with_score(0.7)
            .with_tokens(3)
            .with_metadata("model", "mock");
        assert_eq!(c.score, Some(0.7));
        assert_eq!(c.tokens, Some(3));
        assert_eq!(c.metadata["model"], "mock");
    }

    #[test]
    fn test_scored_candidates_compare_by_score_only() {
        let a = ScoredCandidate::new(Candidate::new("a", "x"), 0.5);
        let b = ScoredCandidate::new(Candidate::new("b", "y"), 0.5);
        let c = ScoredCandidate::new(Candidate::new("c", "x"), 0.9);
        assert_eq!(a, b);
        assert!(c > a);
    }

    #[test]
    fn test_best_of_prefers_first_on_tie() {
        let best = ScoredCandidate::best_of(vec![
            ScoredCandidate::new(Candidate::new("a", "x"), 0.8),
            ScoredCandidate::new(Candidate::new("b", "y"), 0.8),
            ScoredCandidate::new(Candidate::new("c", "z"), 0.1),
        ])
        .unwrap();
        assert_eq!(best.candidate.id, "a");
    }

    #[test]
    fn test_best_of_empty() {
        assert!(ScoredCandidate::best_of(Vec::new()).is_none());
    }

    #[test]
    fn test_candidate_serde_defaults() {
        let c: Candidate = serde_json::from_str(r#"{"id":"x","content":"4"}"#).unwrap();
        assert_eq!(c.score, None);
        assert!(c.metadata.is_empty());
    }
}
