//! Aggregator Contract
//!
//! An aggregator picks (or synthesizes) one best candidate from a set. It is
//! used twice: by the self-consistency loop to produce the final answer, and
//! by the consensus checker, which reads the vote distribution it exposes.
//!
//! Built-in aggregators form a small closed registry (`AggregatorKind`)
//! resolved when a runner is constructed; callers may also inject their own
//! `Arc<dyn Aggregator>`.

use crate::core::candidate::{Candidate, Metadata, ScoredCandidate};
use crate::core::voting::MajorityVoteAggregator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How to break ties between equally-voted answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the answer that appeared first
    #[default]
    FirstSeen,
    /// Prefer the answer carrying the highest candidate score, then first seen
    HighestScore,
}

/// Options passed to `Aggregator::aggregate`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateOptions {
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl AggregateOptions {
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }
}

/// Votes for one normalized answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteEntry {
    /// Canonical answer key
    pub answer: String,
    pub count: usize,
    /// Position of the first candidate giving this answer
    pub first_index: usize,
}

/// Vote counts in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoteDistribution {
    entries: Vec<VoteEntry>,
}

impl VoteDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one vote for `answer` cast by the candidate at `index`
    pub fn record(&mut self, answer: String, index: usize) {
        match self.entries.iter_mut().find(|e| e.answer == answer) {
            Some(entry) => entry.count += 1,
            None => self.entries.push(VoteEntry {
                answer,
                count: 1,
                first_index: index,
            }),
        }
    }

    pub fn entries(&self) -> &[VoteEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total votes cast
    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Highest vote count (0 when empty)
    pub fn max_votes(&self) -> usize {
        self.entries.iter().map(|e| e.count).max().unwrap_or(0)
    }

    /// First-seen answer among those with the most votes
    pub fn leader(&self) -> Option<&VoteEntry> {
        let top = self.max_votes();
        self.entries.iter().find(|e| e.count == top)
    }

    /// Entries tied for the most votes, in first-seen order
    pub fn leaders(&self) -> impl Iterator<Item = &VoteEntry> {
        let top = self.max_votes();
        self.entries.iter().filter(move |e| e.count == top)
    }

    pub fn as_map(&self) -> BTreeMap<String, usize> {
        self.entries
            .iter()
            .map(|e| (e.answer.clone(), e.count))
            .collect()
    }

    /// JSON object of answer -> count
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|e| (e.answer.clone(), Value::from(e.count)))
                .collect(),
        )
    }
}

/// Result of aggregating a candidate set
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutcome {
    pub best: Candidate,
    /// Vote distribution, for aggregators that vote
    pub votes: Option<VoteDistribution>,
    /// Aggregator confidence in `best`, conventionally in [0, 1]
    pub confidence: Option<f64>,
    pub metadata: Metadata,
}

/// Errors from aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorError {
    /// Nothing to aggregate
    NoCandidates,
    /// The aggregator does not expose votes
    NoVoteDistribution {
        aggregator: String,
    },
    /// Aggregator-specific failure
    Failed {
        message: String,
    },
}

impl fmt::Display for AggregatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorError::NoCandidates => write!(f, "no candidates to aggregate"),
            AggregatorError::NoVoteDistribution { aggregator } => {
                write!(f, "aggregator '{}' exposes no vote distribution", aggregator)
            }
            AggregatorError::Failed { message } => write!(f, "aggregation failed: {}", message),
        }
    }
}

impl std::error::Error for AggregatorError {}

/// Selects a best candidate from several.
pub trait Aggregator: Send + Sync + fmt::Debug {
    /// Stable name used in logs and metadata
    fn name(&self) -> &str;

    /// Aggregate a non-empty candidate set
    fn aggregate(
        &self,
        candidates: &[Candidate],
        options: &AggregateOptions,
    ) -> Result<AggregateOutcome, AggregatorError>;
}

/// Picks the candidate with the highest score.
///
/// Unscored candidates rank below every scored one; on equal scores the
/// earlier candidate wins. Exposes no vote distribution.
#[derive(Debug, Clone, Default)]
pub struct HighestScoreAggregator;

impl HighestScoreAggregator {
    pub fn new() -> Self {
        Self
    }
}

impl Aggregator for HighestScoreAggregator {
    fn name(&self) -> &str {
        "highest_score"
    }

    fn aggregate(
        &self,
        candidates: &[Candidate],
        _options: &AggregateOptions,
    ) -> Result<AggregateOutcome, AggregatorError> {
        let best = ScoredCandidate::best_of(candidates.iter().map(|c| {
            let score = c.score.filter(|s| s.is_finite()).unwrap_or(f64::NEG_INFINITY);
            ScoredCandidate::new(c.clone(), score)
        }))
        .ok_or(AggregatorError::NoCandidates)?;

        let confidence = best.score.is_finite().then(|| best.score.clamp(0.0, 1.0));
        let mut metadata = Metadata::new();
        metadata.insert("aggregator".into(), Value::from(self.name()));
        metadata.insert("scored".into(), Value::from(best.score.is_finite()));

        Ok(AggregateOutcome {
            best: best.candidate,
            votes: None,
            confidence,
            metadata,
        })
    }
}

/// Registry of built-in aggregators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorKind {
    #[default]
    MajorityVote,
    HighestScore,
}

impl AggregatorKind {
    /// Instantiate the built-in aggregator
    pub fn build(&self) -> Arc<dyn Aggregator> {
        match self {
            AggregatorKind::MajorityVote => Arc::new(MajorityVoteAggregator::new()),
            AggregatorKind::HighestScore => Arc::new(HighestScoreAggregator::new()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregatorKind::MajorityVote => "majority_vote",
            AggregatorKind::HighestScore => "highest_score",
        }
    }
}

impl FromStr for AggregatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "majority_vote" | "majority" => Ok(AggregatorKind::MajorityVote),
            "highest_score" | "best_score" => Ok(AggregatorKind::HighestScore),
            other => Err(format!(
                "aggregator must be majority_vote or highest_score, got '{}'",
                other
            )),
        }
    }
}
