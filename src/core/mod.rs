//! Core compute-allocation and consensus algorithms
//!
//! - `budget` / `budgeter`: compute budgets and the functional allocator
//! - `prm`: step-score combinators for process reward models
//! - `matcher`: answer normalization used to group candidates
//! - `voting` / `aggregator`: majority vote and the aggregator contract
//! - `consensus`: agreement scoring over a candidate set
//! - `generator` / `difficulty`: collaborator contracts and test doubles
//! - `self_consistency`: the batched early-stopping sampler

pub mod aggregator;
pub mod budget;
pub mod budgeter;
pub mod candidate;
pub mod consensus;
pub mod difficulty;
pub mod generator;
pub mod matcher;
pub mod prm;
pub mod self_consistency;
pub mod voting;

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future returned by the async collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use aggregator::{
    AggregateOptions, AggregateOutcome, Aggregator, AggregatorError, AggregatorKind,
    HighestScoreAggregator, TieBreak, VoteDistribution, VoteEntry,
};
pub use budget::{BudgetError, BudgetParams, ComputeBudget};
pub use budgeter::{ComputeBudgeter, DifficultyInput, Remaining, UsageStats};
pub use candidate::{Candidate, Metadata, ScoredCandidate};
pub use consensus::{ConsensusCheck, ConsensusChecker, ConsensusError};
pub use difficulty::{
    DifficultyEstimate, DifficultyEstimator, DifficultyLevel, EstimatorError, FixedDifficulty,
    KeywordDifficultyEstimator,
};
pub use generator::{GenerateOptions, Generator, GeneratorError, MockGenerator, MockStep};
pub use matcher::{answer_matcher, default_matcher, AnswerMatcher, CandidateMatcher, ExactMatcher};
pub use prm::{PrmError, PrmMethod};
pub use self_consistency::{
    difficulty_bounds, AdaptiveSelfConsistency, SelfConsistencyConfig, SelfConsistencyError,
    SelfConsistencyResult,
};
pub use voting::MajorityVoteAggregator;
