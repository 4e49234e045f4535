//! Difficulty levels and the difficulty-estimation contract
//!
//! Estimating how hard a query is belongs to an external collaborator (a
//! heuristic or an LLM classifier). This module defines the contract plus two
//! small estimators: a fixed one for tests and a keyword heuristic for demos.

use crate::core::candidate::Metadata;
use crate::core::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse difficulty of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl DifficultyLevel {
    /// All levels from easiest to hardest
    pub const ALL: [DifficultyLevel; 3] = [
        DifficultyLevel::Easy,
        DifficultyLevel::Medium,
        DifficultyLevel::Hard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Easy => "easy",
            DifficultyLevel::Medium => "medium",
            DifficultyLevel::Hard => "hard",
        }
    }

    /// Map a score in [0, 1] onto a level (thirds of the unit interval)
    pub fn from_score(score: f64) -> Self {
        if score < 1.0 / 3.0 {
            DifficultyLevel::Easy
        } else if score < 2.0 / 3.0 {
            DifficultyLevel::Medium
        } else {
            DifficultyLevel::Hard
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(DifficultyLevel::Easy),
            "medium" => Ok(DifficultyLevel::Medium),
            "hard" => Ok(DifficultyLevel::Hard),
            other => Err(format!(
                "difficulty must be easy, medium or hard, got '{}'",
                other
            )),
        }
    }
}

/// Output of a difficulty estimator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyEstimate {
    pub level: DifficultyLevel,
    /// Estimator-specific score, conventionally in [0, 1]
    pub score: f64,
}

impl DifficultyEstimate {
    pub fn new(level: DifficultyLevel, score: f64) -> Self {
        Self { level, score }
    }
}

/// Errors reported by a difficulty estimator
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorError {
    pub message: String,
}

impl EstimatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EstimatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "difficulty estimation failed: {}", self.message)
    }
}

impl std::error::Error for EstimatorError {}

/// Estimates the difficulty of a query.
pub trait DifficultyEstimator: Send + Sync {
    /// Estimate the difficulty of `query` given free-form context
    fn estimate(
        &self,
        query: &str,
        context: &Metadata,
    ) -> BoxFuture<'_, Result<DifficultyEstimate, EstimatorError>>;
}

/// Estimator that always reports the same level.
#[derive(Debug, Clone, Copy)]
pub struct FixedDifficulty {
    estimate: DifficultyEstimate,
}

impl FixedDifficulty {
    pub fn new(level: DifficultyLevel) -> Self {
        let score = match level {
            DifficultyLevel::Easy => 0.2,
            DifficultyLevel::Medium => 0.5,
            DifficultyLevel::Hard => 0.8,
        };
        Self {
            estimate: DifficultyEstimate::new(level, score),
        }
    }
}

impl DifficultyEstimator for FixedDifficulty {
    fn estimate(
        &self,
        _query: &str,
        _context: &Metadata,
    ) -> BoxFuture<'_, Result<DifficultyEstimate, EstimatorError>> {
        let estimate = self.estimate;
        Box::pin(async move { Ok(estimate) })
    }
}

/// Words that tend to indicate multi-step reasoning
const HARD_KEYWORDS: [&str; 10] = [
    "prove",
    "derive",
    "optimize",
    "integral",
    "theorem",
    "algorithm",
    "complexity",
    "why",
    "explain",
    "step by step",
];

/// Cheap length and keyword heuristic.
///
/// Score = 0.5 * min(words / `long_query_words`, 1) + 0.5 * min(keyword hits / 2, 1).
#[derive(Debug, Clone)]
pub struct KeywordDifficultyEstimator {
    long_query_words: usize,
}

impl Default for KeywordDifficultyEstimator {
    fn default() -> Self {
        Self {
            long_query_words: 60,
        }
    }
}

impl KeywordDifficultyEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Word count at which the length component saturates
    pub fn with_long_query_words(mut self, words: usize) -> Self {
        self.long_query_words = words.max(1);
        self
    }

    /// Score a query synchronously
    pub fn score(&self, query: &str) -> f64 {
        let lowered = query.to_lowercase();
        let words = lowered.split_whitespace().count();
        let length_part = (words as f64 / self.long_query_words as f64).min(1.0);
        let hits = HARD_KEYWORDS
            .iter()
            .filter(|kw| lowered.contains(*kw))
            .count();
        let keyword_part = (hits as f64 / 2.0).min(1.0);
        0.5 * length_part + 0.5 * keyword_part
    }
}

impl DifficultyEstimator for KeywordDifficultyEstimator {
    fn estimate(
        &self,
        query: &str,
        _context: &Metadata,
    ) -> BoxFuture<'_, Result<DifficultyEstimate, EstimatorError>> {
        let result = if query.trim().is_empty() {
            Err(EstimatorError::new("query is empty"))
        } else {
            let score = self.score(query);
            Ok(DifficultyEstimate::new(DifficultyLevel::from_score(score), score))
        };
        Box::pin(async move { result })
    }
}
