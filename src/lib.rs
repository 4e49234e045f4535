//! Convergence - Adaptive Compute Allocation and Consensus for LLM Answers
//!
//! Governs how much compute a query receives and converges several sampled
//! model outputs into one trusted answer:
//!
//! - **Compute budgets**: difficulty-driven allocation with a global cost ceiling
//! - **Adaptive self-consistency**: batched sampling that stops once answers agree
//! - **Verifier ensembles**: weighted scoring across independent verifiers
//! - **PRM aggregation**: pure combinators over step-level reward scores
//!
//! # Quick Start
//!
//! ```rust
//! use convergence::core::{ComputeBudgeter, DifficultyLevel};
//!
//! let budgeter = ComputeBudgeter::new().with_global_limit(20.0).unwrap();
//! let (budget, budgeter) = budgeter.allocate(DifficultyLevel::Medium).unwrap();
//!
//! assert_eq!(budget.num_candidates(), 5);
//! assert_eq!(budget.cost(), 8.5);
//! assert_eq!(budgeter.usage_stats().allocation_count, 1);
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod pipeline;
pub mod verification;

// Re-export commonly used items at crate root
pub use config::{ConfigError, PipelineConfig};
pub use core::{
    AdaptiveSelfConsistency, Candidate, ComputeBudget, ComputeBudgeter, ConsensusChecker,
    DifficultyLevel, SelfConsistencyConfig, SelfConsistencyError, SelfConsistencyResult,
};
pub use events::observers::{LoggingObserver, MetricsObserver};
pub use events::{EventBus, PipelineEvent};
pub use pipeline::{Pipeline, PipelineError, PipelineOutcome};
pub use verification::{
    AggregationStrategy, ErrorPolicy, VerificationConfig, VerificationError,
    VerificationResult, VerificationRunner, Verifier, VerifierConfig,
};
