//! End-to-end Pipeline
//!
//! Budget, then sample, then (optionally) verify:
//!
//! 1. Estimate difficulty, or use the configured default level
//! 2. Allocate a budget; the budget's `num_candidates` caps the sampler
//! 3. Run adaptive self-consistency
//! 4. Verify the winning candidate when verifiers are configured or the
//!    budget asks for PRM scoring (a `prm` verifier is added if missing)
//!
//! The budgeter is threaded through by value: `run` returns the updated
//! budgeter next to the outcome, failed or not, and leaves the caller's copy
//! untouched. A verification in which every verifier failed counts as no
//! verification.

use crate::config::{ConfigError, PipelineConfig};
use crate::core::budget::{BudgetError, ComputeBudget};
use crate::core::budgeter::{ComputeBudgeter, DifficultyInput};
use crate::core::candidate::Metadata;
use crate::core::difficulty::{DifficultyEstimate, DifficultyEstimator, DifficultyLevel};
use crate::core::generator::Generator;
use crate::core::self_consistency::{
    AdaptiveSelfConsistency, SelfConsistencyError, SelfConsistencyResult,
};
use crate::events::bus::emit;
use crate::events::{EventBus, PipelineEvent};
use crate::verification::builtin::BuiltinVerifier;
use crate::verification::runner::{VerificationConfig, VerificationError, VerificationRunner};
use crate::verification::{VerificationContext, VerificationResult, VerifierConfig, VerifierSource};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors from a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Budget(BudgetError),
    Sampling(SelfConsistencyError),
    Verification(VerificationError),
}

impl PipelineError {
    /// Retrying with more budget or time may succeed
    pub fn is_resource(&self) -> bool {
        match self {
            PipelineError::Budget(e) => e.is_resource(),
            PipelineError::Sampling(e) => e.is_resource(),
            PipelineError::Verification(e) => e.is_resource(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Budget(e) => write!(f, "budget allocation failed: {}", e),
            PipelineError::Sampling(e) => write!(f, "sampling failed: {}", e),
            PipelineError::Verification(e) => write!(f, "verification failed: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Budget(e) => Some(e),
            PipelineError::Sampling(e) => Some(e),
            PipelineError::Verification(e) => Some(e),
        }
    }
}

impl From<BudgetError> for PipelineError {
    fn from(e: BudgetError) -> Self {
        PipelineError::Budget(e)
    }
}

impl From<SelfConsistencyError> for PipelineError {
    fn from(e: SelfConsistencyError) -> Self {
        PipelineError::Sampling(e)
    }
}

impl From<VerificationError> for PipelineError {
    fn from(e: VerificationError) -> Self {
        PipelineError::Verification(e)
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub budget: ComputeBudget,
    pub difficulty: DifficultyLevel,
    /// Estimator output, when an estimator ran successfully
    pub estimate: Option<DifficultyEstimate>,
    pub sampling: SelfConsistencyResult,
    pub verification: Option<VerificationResult>,
    /// Verified score reached the budget's PRM threshold, or no verifier
    /// produced a result
    pub accepted: bool,
}

impl PipelineOutcome {
    /// Final answer text
    pub fn answer(&self) -> &str {
        &self.sampling.best.content
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "answer": self.answer(),
            "difficulty": self.difficulty,
            "estimate": self.estimate,
            "budget": self.budget.to_map(),
            "sampling": self.sampling.to_value(),
            "verification": self.verification,
            "accepted": self.accepted,
        })
    }
}

/// Budgeted sampling and verification for single queries
#[derive(Debug, Clone)]
pub struct Pipeline {
    sampler: AdaptiveSelfConsistency,
    verifiers: Vec<VerifierConfig>,
    verification: VerificationConfig,
    default_difficulty: DifficultyLevel,
    events: Option<EventBus>,
}

impl Pipeline {
    /// Pipeline around `sampler`, with no verifiers and default settings
    pub fn new(sampler: AdaptiveSelfConsistency) -> Self {
        Self {
            sampler,
            verifiers: Vec::new(),
            verification: VerificationConfig::default(),
            default_difficulty: DifficultyLevel::default(),
            events: None,
        }
    }

    /// Validate `config` and build the sampler and verifier list from it
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let verifiers = config
            .verification
            .verifiers
            .iter()
            .map(|spec| spec.to_config())
            .collect();
        Ok(Self {
            sampler: config.sampler()?,
            verifiers,
            verification: config.verification.settings.clone(),
            default_difficulty: config.default_difficulty,
            events: None,
        })
    }

    pub fn with_verifier(mut self, verifier: VerifierConfig) -> Self {
        self.verifiers.push(verifier);
        self
    }

    pub fn with_verification(mut self, settings: VerificationConfig) -> Self {
        self.verification = settings;
        self
    }

    pub fn with_default_difficulty(mut self, level: DifficultyLevel) -> Self {
        self.default_difficulty = level;
        self
    }

    /// Publish events from every stage to `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.sampler = self.sampler.with_event_bus(bus.clone());
        self.events = Some(bus);
        self
    }

    async fn difficulty(
        &self,
        query: &str,
        estimator: Option<&dyn DifficultyEstimator>,
    ) -> Option<DifficultyEstimate> {
        let estimator = estimator?;
        match estimator.estimate(query, &Metadata::new()).await {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %self.default_difficulty,
                    "Difficulty estimation failed, using default level"
                );
                None
            }
        }
    }

    fn allocate(
        &self,
        budgeter: &ComputeBudgeter,
        input: DifficultyInput,
    ) -> Result<(ComputeBudget, ComputeBudgeter), PipelineError> {
        let label = input.to_string();
        match budgeter.allocate(input) {
            Ok((budget, next)) => {
                emit(self.events.as_ref(), || {
                    PipelineEvent::budget_allocated(
                        &label,
                        budget.num_candidates(),
                        budget.cost(),
                        next.used_budget(),
                    )
                });
                Ok((budget, next))
            }
            Err(e) => {
                if let BudgetError::BudgetExhausted {
                    requested,
                    used,
                    limit,
                } = e
                {
                    emit(self.events.as_ref(), || {
                        PipelineEvent::budget_exhausted(requested, used, limit)
                    });
                }
                Err(e.into())
            }
        }
    }

    /// Verifier runner for this budget, `None` when nothing should be verified
    fn runner_for(
        &self,
        budget: &ComputeBudget,
    ) -> Result<Option<VerificationRunner>, VerificationError> {
        let mut verifiers = self.verifiers.clone();
        let has_prm = verifiers
            .iter()
            .any(|v| matches!(v.source, VerifierSource::Builtin(BuiltinVerifier::Prm)));
        if budget.use_prm() && !has_prm {
            verifiers.push(
                VerifierConfig::builtin(BuiltinVerifier::Prm)
                    .with_config("threshold", budget.prm_threshold()),
            );
        }
        if verifiers.is_empty() {
            return Ok(None);
        }

        let runner = VerificationRunner::new(self.verification.clone(), verifiers)?;
        Ok(Some(match &self.events {
            Some(bus) => runner.with_event_bus(bus.clone()),
            None => runner,
        }))
    }

    /// Answer `query` within the budgeter's limits.
    ///
    /// The returned budgeter carries the charge for this run whenever the
    /// allocation succeeded, including runs that fail later on; after a
    /// `Budget` error it is the caller's budgeter unchanged.
    ///
    /// # Errors
    ///
    /// - `Budget` when the allocation does not fit the global limit
    /// - `Sampling` for timeouts and total generator failure
    /// - `Verification` for verifier timeouts, or failures under `halt`
    pub async fn run(
        &self,
        budgeter: &ComputeBudgeter,
        query: &str,
        generator: Arc<dyn Generator>,
        estimator: Option<&dyn DifficultyEstimator>,
        context: &VerificationContext,
    ) -> (Result<PipelineOutcome, PipelineError>, ComputeBudgeter) {
        let estimate = self.difficulty(query, estimator).await;
        let difficulty = estimate.map_or(self.default_difficulty, |e| e.level);
        let input = match estimate {
            Some(estimate) => DifficultyInput::Estimate(estimate),
            None => DifficultyInput::Level(difficulty),
        };

        let (budget, charged) = match self.allocate(budgeter, input) {
            Ok(allocated) => allocated,
            Err(e) => return (Err(e), budgeter.clone()),
        };
        debug!(
            difficulty = %difficulty,
            num_candidates = budget.num_candidates(),
            use_prm = budget.use_prm(),
            cost = budget.cost(),
            "Budget allocated for query"
        );

        let outcome = self
            .execute(budget, difficulty, estimate, query, generator, context)
            .await;
        match &outcome {
            Ok(outcome) => info!(
                difficulty = %difficulty,
                actual_n = outcome.sampling.actual_n,
                early_stopped = outcome.sampling.early_stopped,
                verified = outcome.verification.is_some(),
                accepted = outcome.accepted,
                used_budget = charged.used_budget(),
                "Pipeline run finished"
            ),
            Err(e) => warn!(
                error = %e,
                used_budget = charged.used_budget(),
                "Pipeline run failed after allocation"
            ),
        }
        (outcome, charged)
    }

    async fn execute(
        &self,
        budget: ComputeBudget,
        difficulty: DifficultyLevel,
        estimate: Option<DifficultyEstimate>,
        query: &str,
        generator: Arc<dyn Generator>,
        context: &VerificationContext,
    ) -> Result<PipelineOutcome, PipelineError> {
        let sampling = self
            .sampler
            .capped(budget.num_candidates())
            .run(query, generator, Some(difficulty))
            .await?;

        let verification = match self.runner_for(&budget)? {
            Some(runner) => {
                let result = runner.verify(&sampling.best, context).await?;
                if result.verifier_count() == Some(0) {
                    warn!(
                        candidate = %sampling.best.id,
                        "No verifier produced a result, answer left unverified"
                    );
                    None
                } else {
                    Some(result)
                }
            }
            None => None,
        };
        let accepted = verification
            .as_ref()
            .map_or(true, |v| v.score >= budget.prm_threshold());

        Ok(PipelineOutcome {
            budget,
            difficulty,
            estimate,
            sampling,
            verification,
            accepted,
        })
    }
}
