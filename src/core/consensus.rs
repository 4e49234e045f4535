//! Consensus Checking
//!
//! Measures how strongly a candidate set agrees:
//!
//! ```text
//! agreement = max_vote_count / total_candidates
//! ```
//!
//! The vote distribution comes from an aggregator (majority vote by default).
//! Agreement is always in [0, 1] and equals 1.0 exactly when every candidate
//! normalizes to the same answer.

use crate::core::aggregator::{AggregateOptions, Aggregator, AggregatorError};
use crate::core::candidate::Candidate;
use crate::core::voting::MajorityVoteAggregator;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Errors from a consensus check
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusError {
    /// Empty candidate set
    NoCandidates,
    /// No threshold supplied
    NoThreshold,
    /// Threshold outside [0, 1] or not finite
    InvalidThreshold {
        value: f64,
    },
    /// Backing aggregator exposes no votes
    NoVoteDistribution {
        aggregator: String,
    },
    /// Backing aggregator failed
    Aggregation(AggregatorError),
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::NoCandidates => write!(f, "no candidates to check"),
            ConsensusError::NoThreshold => write!(f, "no consensus threshold given"),
            ConsensusError::InvalidThreshold { value } => {
                write!(f, "consensus threshold must be in [0, 1], got {}", value)
            }
            ConsensusError::NoVoteDistribution { aggregator } => {
                write!(
                    f,
                    "aggregator '{}' exposes no vote distribution",
                    aggregator
                )
            }
            ConsensusError::Aggregation(e) => write!(f, "consensus aggregation failed: {}", e),
        }
    }
}

impl std::error::Error for ConsensusError {}

impl From<AggregatorError> for ConsensusError {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::NoVoteDistribution { aggregator } => {
                ConsensusError::NoVoteDistribution { aggregator }
            }
            other => ConsensusError::Aggregation(other),
        }
    }
}

/// Outcome of a consensus check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusCheck {
    /// `agreement >= threshold`
    pub reached: bool,
    /// Fraction of candidates agreeing with the leading answer
    pub agreement: f64,
    /// Canonical leading answer
    pub leader: Option<String>,
}

/// Validate a consensus threshold
pub fn validate_threshold(threshold: Option<f64>) -> Result<f64, ConsensusError> {
    let value = threshold.ok_or(ConsensusError::NoThreshold)?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConsensusError::InvalidThreshold { value });
    }
    Ok(value)
}

/// Agreement checker backed by a vote-producing aggregator.
#[derive(Debug, Clone)]
pub struct ConsensusChecker {
    aggregator: Arc<dyn Aggregator>,
    options: AggregateOptions,
}

impl Default for ConsensusChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusChecker {
    /// Checker backed by majority vote over final answers
    pub fn new() -> Self {
        Self::with_aggregator(Arc::new(MajorityVoteAggregator::new()))
    }

    /// Checker backed by any aggregator that exposes votes
    pub fn with_aggregator(aggregator: Arc<dyn Aggregator>) -> Self {
        Self {
            aggregator,
            options: AggregateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AggregateOptions) -> Self {
        self.options = options;
        self
    }

    /// Check whether `candidates` agree at `threshold`.
    ///
    /// # Errors
    ///
    /// - `NoCandidates` for an empty set
    /// - `NoThreshold` / `InvalidThreshold` for a missing or out-of-range threshold
    /// - `NoVoteDistribution` / `Aggregation` if the aggregator cannot supply votes
    pub fn check(
        &self,
        candidates: &[Candidate],
        threshold: Option<f64>,
    ) -> Result<ConsensusCheck, ConsensusError> {
        if candidates.is_empty() {
            return Err(ConsensusError::NoCandidates);
        }
        let threshold = validate_threshold(threshold)?;

        let outcome = self.aggregator.aggregate(candidates, &self.options)?;
        let votes = outcome
            .votes
            .ok_or_else(|| ConsensusError::NoVoteDistribution {
                aggregator: self.aggregator.name().to_string(),
            })?;

        let agreement = (votes.max_votes() as f64 / candidates.len() as f64).clamp(0.0, 1.0);
        Ok(ConsensusCheck {
            reached: agreement >= threshold,
            agreement,
            leader: votes.leader().map(|e| e.answer.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::HighestScoreAggregator;

    fn candidates(answers: &[&str]) -> Vec<Candidate> {
        answers
            .iter()
            .enumerate()
            .map(|(i, a)| Candidate::new(format!("c{}", i), *a))
            .collect()
    }

    #[test]
    fn test_unanimous_agreement() {
        let check = ConsensusChecker::new()
            .check(&candidates(&["4", "4", "4"]), Some(0.8))
            .unwrap();
        assert!(check.reached);
        assert_eq!(check.agreement, 1.0);
        assert_eq!(check.leader.as_deref(), Some("4"));
    }

    #[test]
    fn test_partial_agreement_below_threshold() {
        let check = ConsensusChecker::new()
            .check(&candidates(&["4", "5", "4", "6"]), Some(0.8))
            .unwrap();
        assert!(!check.reached);
        assert_eq!(check.agreement, 0.5);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let check = ConsensusChecker::new()
            .check(&candidates(&["a", "a", "b", "a", "a"]), Some(0.8))
            .unwrap();
        assert!(check.reached);
    }

    #[test]
    fn test_validation_errors() {
        let checker = ConsensusChecker::new();
        assert_eq!(
            checker.check(&[], Some(0.5)),
            Err(ConsensusError::NoCandidates)
        );
        assert_eq!(
            checker.check(&candidates(&["a"]), None),
            Err(ConsensusError::NoThreshold)
        );
        assert!(matches!(
            checker.check(&candidates(&["a"]), Some(1.5)),
            Err(ConsensusError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            checker.check(&candidates(&["a"]), Some(f64::NAN)),
            Err(ConsensusError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_aggregator_without_votes() {
        let checker = ConsensusChecker::with_aggregator(Arc::new(HighestScoreAggregator::new()));
        let err = checker.check(&candidates(&["a", "a"]), Some(0.5)).unwrap_err();
        assert_eq!(
            err,
            ConsensusError::NoVoteDistribution {
                aggregator: "highest_score".into()
            }
        );
    }
}
