//! Majority Vote Aggregation
//!
//! Groups candidates by their canonical answer (via a `CandidateMatcher`) and
//! selects the answer with the most votes. The returned best candidate is the
//! first candidate that gave the winning answer.
//!
//! # Ordering
//!
//! Vote counts depend only on the multiset of normalized answers. Ties are
//! broken deterministically: by default the answer encountered first wins.

use crate::core::aggregator::{
    AggregateOptions, AggregateOutcome, Aggregator, AggregatorError, TieBreak, VoteDistribution,
};
use crate::core::candidate::{Candidate, Metadata};
use crate::core::matcher::{answer_matcher, CandidateMatcher};
use serde_json::Value;
use std::sync::Arc;

/// Majority-vote aggregator over normalized answers.
#[derive(Debug, Clone)]
pub struct MajorityVoteAggregator {
    matcher: Arc<dyn CandidateMatcher>,
}

impl Default for MajorityVoteAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MajorityVoteAggregator {
    /// Create an aggregator using final-answer matching
    pub fn new() -> Self {
        Self {
            matcher: answer_matcher(),
        }
    }

    /// Set a custom candidate matcher for answer grouping.
    pub fn with_matcher(mut self, matcher: Arc<dyn CandidateMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn matcher(&self) -> &Arc<dyn CandidateMatcher> {
        &self.matcher
    }

    /// Tally canonical answers in candidate order
    pub fn tally(&self, candidates: &[Candidate]) -> VoteDistribution {
        let mut votes = VoteDistribution::new();
        for (index, candidate) in candidates.iter().enumerate() {
            votes.record(self.matcher.canonicalize(&candidate.content), index);
        }
        votes
    }

    fn winning_index(
        &self,
        candidates: &[Candidate],
        votes: &VoteDistribution,
        tie_break: TieBreak,
    ) -> Option<usize> {
        match tie_break {
            TieBreak::FirstSeen => votes.leader().map(|e| e.first_index),
            TieBreak::HighestScore => {
                let mut best: Option<(usize, f64)> = None;
                for entry in votes.leaders() {
                    let score = candidates
                        .iter()
                        .filter(|c| self.matcher.canonicalize(&c.content) == entry.answer)
                        .filter_map(|c| c.score)
                        .fold(f64::NEG_INFINITY, f64::max);
                    match best {
                        Some((_, current)) if current >= score => {}
                        _ => best = Some((entry.first_index, score)),
                    }
                }
                best.map(|(index, _)| index)
            }
        }
    }
}

impl Aggregator for MajorityVoteAggregator {
    fn name(&self) -> &str {
        "majority_vote"
    }

    fn aggregate(
        &self,
        candidates: &[Candidate],
        options: &AggregateOptions,
    ) -> Result<AggregateOutcome, AggregatorError> {
        if candidates.is_empty() {
            return Err(AggregatorError::NoCandidates);
        }

        let votes = self.tally(candidates);
        let index = self
            .winning_index(candidates, &votes, options.tie_break)
            .ok_or(AggregatorError::NoCandidates)?;
        let best = candidates[index].clone();
        let confidence = votes.max_votes() as f64 / candidates.len() as f64;

        let mut metadata = Metadata::new();
        metadata.insert("aggregator".into(), Value::from(self.name()));
        metadata.insert("matcher".into(), Value::from(self.matcher.matcher_type()));
        metadata.insert("votes".into(), votes.to_value());
        metadata.insert("total_votes".into(), Value::from(votes.total()));
        metadata.insert(
            "answer".into(),
            Value::from(self.matcher.canonicalize(&best.content)),
        );

        Ok(AggregateOutcome {
            best,
            votes: Some(votes),
            confidence: Some(confidence),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::matcher::ExactMatcher;

    fn candidates(answers: &[&str]) -> Vec<Candidate> {
        answers
            .iter()
            .enumerate()
            .map(|(i, a)| Candidate::new(format!("c{}", i), *a))
            .collect()
    }

    #[test]
    fn test_majority_wins() {
        let agg = MajorityVoteAggregator::new();
        let outcome = agg
            .aggregate(&candidates(&["4", "5", "4"]), &AggregateOptions::default())
            .unwrap();
        assert_eq!(outcome.best.id, "c0");
        assert_eq!(outcome.confidence, Some(2.0 / 3.0));
        assert_eq!(outcome.votes.unwrap().max_votes(), 2);
        assert_eq!(outcome.metadata["votes"]["4"], 2);
    }

    #[test]
    fn test_tie_prefers_first_seen() {
        let agg = MajorityVoteAggregator::new();
        let outcome = agg
            .aggregate(
                &candidates(&["7", "8", "8", "7"]),
                &AggregateOptions::default(),
            )
            .unwrap();
        assert_eq!(outcome.best.content, "7");
    }

    #[test]
    fn test_tie_break_by_score() {
        let cs = vec![
            Candidate::new("a", "7").with_score(0.2),
            Candidate::new("b", "8").with_score(0.9),
            Candidate::new("c", "8"),
            Candidate::new("d", "7"),
        ];
        let agg = MajorityVoteAggregator::new();
        let outcome = agg
            .aggregate(
                &cs,
                &AggregateOptions::default().with_tie_break(TieBreak::HighestScore),
            )
            .unwrap();
        assert_eq!(outcome.best.id, "b");
    }

    #[test]
    fn test_groups_by_final_answer() {
        let agg = MajorityVoteAggregator::new();
        let cs = candidates(&["so \\boxed{12}", "The answer is 12.", "13"]);
        let outcome = agg.aggregate(&cs, &AggregateOptions::default()).unwrap();
        assert_eq!(outcome.best.id, "c0");
        assert_eq!(outcome.votes.unwrap().max_votes(), 2);
    }

    #[test]
    fn test_custom_matcher() {
        let agg = MajorityVoteAggregator::new().with_matcher(Arc::new(ExactMatcher::new()));
        let cs = candidates(&["The answer is 12", "\\boxed{12}"]);
        let votes = agg.tally(&cs);
        assert_eq!(votes.entries().len(), 2);
    }

    #[test]
    fn test_rejects_empty() {
        let agg = MajorityVoteAggregator::new();
        assert_eq!(
            agg.aggregate(&[], &AggregateOptions::default()),
            Err(AggregatorError::NoCandidates)
        );
    }
}
