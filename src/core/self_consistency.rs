//! Adaptive Self-Consistency
//!
//! Samples candidates in batches and stops as soon as enough of them agree.
//!
//! # Algorithm
//!
//! 1. Next batch = `min(batch_size, max_n - current_n)`; 0 means aggregate and return
//! 2. Generate the batch concurrently; individual failures are dropped, a
//!    batch with zero successes fails the run
//! 3. Below `min_candidates`, loop without checking consensus
//! 4. Otherwise measure agreement: at or above the threshold stop early,
//!    at `max_n` stop without early stop, else loop
//! 5. Aggregate; if aggregation fails fall back to the first candidate
//!
//! The whole run is one spawned task bounded by `timeout`. On expiry the task
//! is aborted and no partial result is returned.

use crate::config::{duration_ms, option_duration_ms};
use crate::core::aggregator::{
    AggregateOptions, Aggregator, AggregatorKind, TieBreak, VoteDistribution,
};
use crate::core::candidate::{Candidate, Metadata};
use crate::core::consensus::{validate_threshold, ConsensusChecker};
use crate::core::difficulty::DifficultyLevel;
use crate::core::generator::{GenerateOptions, Generator, GeneratorError};
use crate::events::bus::emit;
use crate::events::{EventBus, PipelineEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Sampler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfConsistencyConfig {
    /// Candidates required before consensus is checked
    pub min_candidates: usize,
    /// Hard ceiling on candidates per run
    pub max_candidates: usize,
    /// Candidates requested per round
    pub batch_size: usize,
    /// Agreement needed to stop early, in [0, 1]
    pub early_stop_threshold: f64,
    /// Wall-clock bound on the whole run
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Generator calls in flight at once
    pub max_concurrency: usize,
    /// Bound on a single generator call
    #[serde(rename = "per_call_timeout_ms", with = "option_duration_ms")]
    pub per_call_timeout: Option<Duration>,
    pub temperature: f64,
    pub aggregator: AggregatorKind,
    pub tie_break: TieBreak,
}

impl Default for SelfConsistencyConfig {
    fn default() -> Self {
        Self {
            min_candidates: 3,
            max_candidates: 20,
            batch_size: 3,
            early_stop_threshold: 0.8,
            timeout: Duration::from_secs(60),
            max_concurrency: 8,
            per_call_timeout: None,
            temperature: 0.7,
            aggregator: AggregatorKind::MajorityVote,
            tie_break: TieBreak::FirstSeen,
        }
    }
}

impl SelfConsistencyConfig {
    pub fn with_min_candidates(mut self, min: usize) -> Self {
        self.min_candidates = min;
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_early_stop_threshold(mut self, threshold: f64) -> Self {
        self.early_stop_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = Some(timeout);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorKind) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Check every field, returning the first violation
    pub fn validate(&self) -> Result<(), SelfConsistencyError> {
        if self.min_candidates == 0 {
            return Err(SelfConsistencyError::InvalidMinCandidates {
                found: self.min_candidates,
            });
        }
        if self.min_candidates >= self.max_candidates {
            return Err(SelfConsistencyError::MinCandidatesMustBeLessThanMax {
                min: self.min_candidates,
                max: self.max_candidates,
            });
        }
        if self.batch_size == 0 {
            return Err(SelfConsistencyError::InvalidBatchSize {
                found: self.batch_size,
            });
        }
        if validate_threshold(Some(self.early_stop_threshold)).is_err() {
            return Err(SelfConsistencyError::InvalidThreshold {
                value: self.early_stop_threshold,
            });
        }
        if self.timeout.is_zero() || self.per_call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SelfConsistencyError::InvalidTimeout);
        }
        if self.max_concurrency == 0 {
            return Err(SelfConsistencyError::InvalidConcurrency);
        }
        Ok(())
    }

}

/// Errors from construction or a run
#[derive(Debug, Clone, PartialEq)]
pub enum SelfConsistencyError {
    /// `min_candidates` is zero
    InvalidMinCandidates { found: usize },
    /// `min_candidates >= max_candidates`
    MinCandidatesMustBeLessThanMax { min: usize, max: usize },
    /// `batch_size` is zero
    InvalidBatchSize { found: usize },
    /// Threshold outside [0, 1]
    InvalidThreshold { value: f64 },
    /// Zero timeout
    InvalidTimeout,
    /// Zero concurrency
    InvalidConcurrency,
    /// Every generator call in a round failed
    AllGeneratorsFailed {
        requested: usize,
        last_error: Option<String>,
    },
    /// Nothing was generated to aggregate
    NoCandidatesToAggregate,
    /// The run exceeded its overall timeout
    Timeout { timeout: Duration },
    /// Generation panicked
    GeneratorCrashed { reason: String },
}

impl SelfConsistencyError {
    /// Retrying with a larger timeout may succeed
    pub fn is_resource(&self) -> bool {
        matches!(self, SelfConsistencyError::Timeout { .. })
    }

    /// Raised at construction, never during a run
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SelfConsistencyError::InvalidMinCandidates { .. }
                | SelfConsistencyError::MinCandidatesMustBeLessThanMax { .. }
                | SelfConsistencyError::InvalidBatchSize { .. }
                | SelfConsistencyError::InvalidThreshold { .. }
                | SelfConsistencyError::InvalidTimeout
                | SelfConsistencyError::InvalidConcurrency
        )
    }
}

impl fmt::Display for SelfConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfConsistencyError::InvalidMinCandidates { found } => {
                write!(f, "min_candidates must be >= 1, got {}", found)
            }
            SelfConsistencyError::MinCandidatesMustBeLessThanMax { min, max } => {
                write!(
                    f,
                    "min_candidates ({}) must be less than max_candidates ({})",
                    min, max
                )
            }
            SelfConsistencyError::InvalidBatchSize { found } => {
                write!(f, "batch_size must be >= 1, got {}", found)
            }
            SelfConsistencyError::InvalidThreshold { value } => {
                write!(f, "early_stop_threshold must be in [0, 1], got {}", value)
            }
            SelfConsistencyError::InvalidTimeout => write!(f, "timeouts must be non-zero"),
            SelfConsistencyError::InvalidConcurrency => {
                write!(f, "max_concurrency must be >= 1")
            }
            SelfConsistencyError::AllGeneratorsFailed {
                requested,
                last_error,
            } => {
                write!(f, "all {} generator calls failed", requested)?;
                if let Some(e) = last_error {
                    write!(f, " (last error: {})", e)?;
                }
                Ok(())
            }
            SelfConsistencyError::NoCandidatesToAggregate => {
                write!(f, "no candidates to aggregate")
            }
            SelfConsistencyError::Timeout { timeout } => {
                write!(f, "self-consistency run timed out after {:?}", timeout)
            }
            SelfConsistencyError::GeneratorCrashed { reason } => {
                write!(f, "generator crashed: {}", reason)
            }
        }
    }
}

impl std::error::Error for SelfConsistencyError {}

/// Outcome of a self-consistency run
#[derive(Debug, Clone, PartialEq)]
pub struct SelfConsistencyResult {
    /// Aggregated answer
    pub best: Candidate,
    /// Every successful candidate, in submission order
    pub candidates_generated: Vec<Candidate>,
    pub actual_n: usize,
    /// Stopped because agreement reached the threshold
    pub early_stopped: bool,
    /// Last measured agreement
    pub consensus: Option<f64>,
    /// Aggregation failed and `best` is the first candidate
    pub aggregation_error: bool,
    /// Aggregator confidence in `best`
    pub confidence: Option<f64>,
    pub votes: Option<VoteDistribution>,
    pub batches: usize,
    pub difficulty: DifficultyLevel,
    pub initial_n: usize,
    pub max_n: usize,
    pub elapsed: Duration,
    pub metadata: Metadata,
}

impl SelfConsistencyResult {
    /// Summary as JSON, without the candidate list
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "best": self.best,
            "actual_n": self.actual_n,
            "early_stopped": self.early_stopped,
            "consensus": self.consensus,
            "aggregation_error": self.aggregation_error,
            "confidence": self.confidence,
            "votes": self.votes.as_ref().map(VoteDistribution::to_value),
            "batches": self.batches,
            "difficulty": self.difficulty,
            "initial_n": self.initial_n,
            "max_n": self.max_n,
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "metadata": self.metadata,
        })
    }
}

/// Initial and maximum sample counts per difficulty, clamped into
/// `[min_candidates, max_candidates]`.
pub fn difficulty_bounds(
    level: DifficultyLevel,
    min_candidates: usize,
    max_candidates: usize,
) -> (usize, usize) {
    let (initial, max) = match level {
        DifficultyLevel::Easy => (3, 5),
        DifficultyLevel::Medium => (5, 10),
        DifficultyLevel::Hard => (10, 20),
    };
    let hi = max_candidates.max(min_candidates);
    let max_n = max.clamp(min_candidates, hi);
    let initial_n = initial.clamp(min_candidates, hi).min(max_n);
    (initial_n, max_n)
}

/// Batched early-stopping sampler.
#[derive(Debug, Clone)]
pub struct AdaptiveSelfConsistency {
    config: SelfConsistencyConfig,
    aggregator: Arc<dyn Aggregator>,
    consensus: ConsensusChecker,
    events: Option<EventBus>,
    /// Hard ceiling on `max_n`, below `min_candidates` if need be
    cap: Option<usize>,
}

impl AdaptiveSelfConsistency {
    /// Validate `config` and resolve its aggregator
    pub fn new(config: SelfConsistencyConfig) -> Result<Self, SelfConsistencyError> {
        config.validate()?;
        let aggregator = config.aggregator.build();
        let consensus = ConsensusChecker::new()
            .with_options(AggregateOptions::default().with_tie_break(config.tie_break));
        Ok(Self {
            config,
            aggregator,
            consensus,
            events: None,
            cap: None,
        })
    }

    /// Replace the final aggregator
    pub fn with_aggregator(mut self, aggregator: Arc<dyn Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Replace the agreement backend
    pub fn with_consensus_checker(mut self, consensus: ConsensusChecker) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &SelfConsistencyConfig {
        &self.config
    }

    /// Same sampler that never generates more than `cap` candidates.
    ///
    /// The cap wins over `min_candidates`: a run that cannot reach the
    /// minimum returns what it has without checking consensus.
    pub fn capped(&self, cap: usize) -> Self {
        Self {
            cap: Some(self.cap.map_or(cap, |current| current.min(cap))),
            ..self.clone()
        }
    }

    /// Ceiling set by [`capped`](Self::capped)
    pub fn cap(&self) -> Option<usize> {
        self.cap
    }

    /// Sample until agreement or `max_n`, bounded by the configured timeout.
    ///
    /// `difficulty` defaults to medium.
    pub async fn run(
        &self,
        prompt: &str,
        generator: Arc<dyn Generator>,
        difficulty: Option<DifficultyLevel>,
    ) -> Result<SelfConsistencyResult, SelfConsistencyError> {
        let difficulty = difficulty.unwrap_or_default();
        let (initial_n, max_n) = difficulty_bounds(
            difficulty,
            self.config.min_candidates,
            self.config.max_candidates,
        );
        let max_n = self.cap.map_or(max_n, |cap| max_n.min(cap));
        let initial_n = initial_n.min(max_n);
        debug!(
            difficulty = %difficulty,
            initial_n = initial_n,
            max_n = max_n,
            generator = generator.name(),
            "Starting self-consistency run"
        );

        let unit = SamplingRun {
            config: self.config.clone(),
            aggregator: Arc::clone(&self.aggregator),
            consensus: self.consensus.clone(),
            events: self.events.clone(),
            prompt: Arc::from(prompt),
            generator,
            difficulty,
            initial_n,
            max_n,
        };

        let timeout = self.config.timeout;
        let mut handle = tokio::spawn(unit.execute());
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(crash_error(join_error)),
            Err(_) => {
                handle.abort();
                warn!(timeout_ms = timeout.as_millis() as u64, "Self-consistency run timed out");
                emit(self.events.as_ref(), || {
                    PipelineEvent::timed_out("sampling", timeout)
                });
                Err(SelfConsistencyError::Timeout { timeout })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn crash_error(error: JoinError) -> SelfConsistencyError {
    let reason = if error.is_panic() {
        panic_message(error.into_panic().as_ref())
    } else {
        "task cancelled".to_string()
    };
    SelfConsistencyError::GeneratorCrashed { reason }
}

/// Generation tasks of one batch, aborted when dropped
struct BatchTasks(Vec<JoinHandle<Result<Candidate, GeneratorError>>>);

impl Drop for BatchTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// State owned by one spawned run
struct SamplingRun {
    config: SelfConsistencyConfig,
    aggregator: Arc<dyn Aggregator>,
    consensus: ConsensusChecker,
    events: Option<EventBus>,
    prompt: Arc<str>,
    generator: Arc<dyn Generator>,
    difficulty: DifficultyLevel,
    initial_n: usize,
    max_n: usize,
}

impl SamplingRun {
    async fn execute(self) -> Result<SelfConsistencyResult, SelfConsistencyError> {
        let start = Instant::now();
        let mut candidates: Vec<Candidate> = Vec::with_capacity(self.max_n);
        let mut issued = 0usize;
        let mut batches = 0usize;
        let mut consensus = None;

        loop {
            let next = self
                .config
                .batch_size
                .min(self.max_n.saturating_sub(candidates.len()));
            if next == 0 {
                return self.finish(candidates, false, consensus, batches, start);
            }

            let batch_start = Instant::now();
            let generated = self.generate_batch(batches, issued, next).await?;
            issued += next;
            let succeeded = generated.len();
            candidates.extend(generated);
            emit(self.events.as_ref(), || {
                PipelineEvent::batch_generated(
                    batches,
                    next,
                    succeeded,
                    candidates.len(),
                    batch_start.elapsed(),
                )
            });
            batches += 1;

            if candidates.len() < self.config.min_candidates {
                continue;
            }

            match self
                .consensus
                .check(&candidates, Some(self.config.early_stop_threshold))
            {
                Ok(check) => {
                    debug!(
                        total = candidates.len(),
                        agreement = check.agreement,
                        reached = check.reached,
                        "Consensus checked"
                    );
                    consensus = Some(check.agreement);
                    emit(self.events.as_ref(), || {
                        PipelineEvent::consensus_checked(
                            candidates.len(),
                            Some(check.agreement),
                            check.reached,
                        )
                    });
                    if check.reached {
                        info!(
                            actual_n = candidates.len(),
                            agreement = check.agreement,
                            "Consensus reached, stopping early"
                        );
                        return self.finish(candidates, true, consensus, batches, start);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Consensus check failed, treating as no consensus");
                    emit(self.events.as_ref(), || {
                        PipelineEvent::consensus_checked(candidates.len(), None, false)
                    });
                }
            }

            if candidates.len() >= self.max_n {
                return self.finish(candidates, false, consensus, batches, start);
            }
        }
    }

    /// Generate `count` candidates concurrently, in submission order
    async fn generate_batch(
        &self,
        batch: usize,
        first_index: usize,
        count: usize,
    ) -> Result<Vec<Candidate>, SelfConsistencyError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = BatchTasks(Vec::with_capacity(count));

        for index in first_index..first_index + count {
            let generator = Arc::clone(&self.generator);
            let prompt = Arc::clone(&self.prompt);
            let semaphore = Arc::clone(&semaphore);
            let per_call = self.config.per_call_timeout;
            let options = GenerateOptions {
                temperature: self.config.temperature,
                index,
                batch,
                metadata: Metadata::new(),
            };

            tasks.0.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| GeneratorError::failed(e.to_string()))?;
                let call = generator.generate(&prompt, &options);
                match per_call {
                    Some(limit) => tokio::time::timeout(limit, call)
                        .await
                        .unwrap_or(Err(GeneratorError::Timeout { limit })),
                    None => call.await,
                }
            }));
        }

        let mut generated = Vec::with_capacity(count);
        let mut last_error = None;
        for handle in tasks.0.iter_mut() {
            match handle.await {
                Ok(Ok(candidate)) => generated.push(candidate),
                Ok(Err(e)) => {
                    debug!(batch = batch, error = %e, "Dropping failed generation");
                    last_error = Some(e.to_string());
                }
                Err(join_error) => return Err(crash_error(join_error)),
            }
        }

        if generated.is_empty() {
            warn!(batch = batch, requested = count, "Every generation in batch failed");
            return Err(SelfConsistencyError::AllGeneratorsFailed {
                requested: count,
                last_error,
            });
        }
        Ok(generated)
    }

    fn finish(
        &self,
        candidates: Vec<Candidate>,
        early_stopped: bool,
        consensus: Option<f64>,
        batches: usize,
        start: Instant,
    ) -> Result<SelfConsistencyResult, SelfConsistencyError> {
        let first = candidates
            .first()
            .cloned()
            .ok_or(SelfConsistencyError::NoCandidatesToAggregate)?;

        let options = AggregateOptions::default().with_tie_break(self.config.tie_break);
        let mut metadata = Metadata::new();
        let (best, confidence, votes, aggregation_error) =
            match self.aggregator.aggregate(&candidates, &options) {
                Ok(outcome) => {
                    metadata.extend(outcome.metadata);
                    (outcome.best, outcome.confidence, outcome.votes, false)
                }
                Err(e) => {
                    warn!(error = %e, "Aggregation failed, falling back to first candidate");
                    metadata.insert("aggregation_failure".into(), Value::from(e.to_string()));
                    (first, None, None, true)
                }
            };

        let elapsed = start.elapsed();
        let actual_n = candidates.len();
        emit(self.events.as_ref(), || {
            PipelineEvent::sampling_finished(
                actual_n,
                early_stopped,
                consensus,
                aggregation_error,
                elapsed,
            )
        });

        Ok(SelfConsistencyResult {
            best,
            candidates_generated: candidates,
            actual_n,
            early_stopped,
            consensus,
            aggregation_error,
            confidence,
            votes,
            batches,
            difficulty: self.difficulty,
            initial_n: self.initial_n,
            max_n: self.max_n,
            elapsed,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aggregator::{AggregateOutcome, AggregatorError, HighestScoreAggregator};
    use crate::core::generator::{MockGenerator, MockStep};
    use crate::core::BoxFuture;

    fn config(min: usize, max: usize, batch: usize) -> SelfConsistencyConfig {
        SelfConsistencyConfig::default()
            .with_min_candidates(min)
            .with_max_candidates(max)
            .with_batch_size(batch)
    }

    fn answers(list: &[&str]) -> Arc<dyn Generator> {
        Arc::new(MockGenerator::new(
            list.iter().map(|s| s.to_string()).collect(),
        ))
    }

    #[derive(Debug)]
    struct BrokenAggregator;

    impl Aggregator for BrokenAggregator {
        fn name(&self) -> &str {
            "broken"
        }

        fn aggregate(
            &self,
            _candidates: &[Candidate],
            _options: &AggregateOptions,
        ) -> Result<AggregateOutcome, AggregatorError> {
            Err(AggregatorError::Failed {
                message: "unavailable".into(),
            })
        }
    }

    /// Sleeps on odd indices
    struct SlowOddGenerator;

    impl Generator for SlowOddGenerator {
        fn generate(
            &self,
            _prompt: &str,
            options: &GenerateOptions,
        ) -> BoxFuture<'_, Result<Candidate, GeneratorError>> {
            let index = options.index;
            Box::pin(async move {
                if index % 2 == 1 {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(Candidate::new(format!("cand-{}", index), "42"))
            })
        }
    }

    // ==========================================
    // Configuration Tests
    // ==========================================

    #[test]
    fn test_config_validation() {
        assert!(SelfConsistencyConfig::default().validate().is_ok());
        assert_eq!(
            config(5, 5, 1).validate(),
            Err(SelfConsistencyError::MinCandidatesMustBeLessThanMax { min: 5, max: 5 })
        );
        assert_eq!(
            config(0, 5, 1).validate(),
            Err(SelfConsistencyError::InvalidMinCandidates { found: 0 })
        );
        assert_eq!(
            config(1, 5, 0).validate(),
            Err(SelfConsistencyError::InvalidBatchSize { found: 0 })
        );
        assert!(matches!(
            config(1, 5, 1).with_early_stop_threshold(1.2).validate(),
            Err(SelfConsistencyError::InvalidThreshold { .. })
        ));
        assert_eq!(
            config(1, 5, 1).with_timeout(Duration::ZERO).validate(),
            Err(SelfConsistencyError::InvalidTimeout)
        );
        assert!(AdaptiveSelfConsistency::new(config(3, 2, 1))
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_difficulty_bounds_table() {
        assert_eq!(difficulty_bounds(DifficultyLevel::Easy, 1, 100), (3, 5));
        assert_eq!(difficulty_bounds(DifficultyLevel::Medium, 1, 100), (5, 10));
        assert_eq!(difficulty_bounds(DifficultyLevel::Hard, 1, 100), (10, 20));
    }

    #[test]
    fn test_difficulty_bounds_clamped() {
        assert_eq!(difficulty_bounds(DifficultyLevel::Medium, 3, 5), (5, 5));
        assert_eq!(difficulty_bounds(DifficultyLevel::Easy, 4, 20), (4, 5));
        assert_eq!(difficulty_bounds(DifficultyLevel::Hard, 3, 12), (10, 12));
        assert_eq!(difficulty_bounds(DifficultyLevel::Easy, 6, 8), (6, 6));
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let json = serde_json::to_value(
            SelfConsistencyConfig::default().with_per_call_timeout(Duration::from_millis(250)),
        )
        .unwrap();
        assert_eq!(json["timeout_ms"], 60_000);
        assert_eq!(json["per_call_timeout_ms"], 250);

        let parsed: SelfConsistencyConfig =
            serde_json::from_str(r#"{"min_candidates": 2, "timeout_ms": 1500}"#).unwrap();
        assert_eq!(parsed.min_candidates, 2);
        assert_eq!(parsed.timeout, Duration::from_millis(1500));
        assert_eq!(parsed.per_call_timeout, None);
    }

    // ==========================================
    // Sampling Loop Tests
    // ==========================================

    #[tokio::test]
    async fn test_unanimous_first_batch_stops_early() {
        let sampler = AdaptiveSelfConsistency::new(config(3, 5, 3)).unwrap();
        let result = sampler
            .run("2+2?", Arc::new(MockGenerator::constant("4")), None)
            .await
            .unwrap();

        assert!(result.early_stopped);
        assert_eq!(result.actual_n, 3);
        assert_eq!(result.consensus, Some(1.0));
        assert_eq!(result.best.content, "4");
        assert_eq!(result.batches, 1);
        assert_eq!(result.difficulty, DifficultyLevel::Medium);
    }

    #[tokio::test]
    async fn test_disagreement_runs_to_max() {
        let sampler = AdaptiveSelfConsistency::new(config(3, 20, 3)).unwrap();
        let result = sampler
            .run(
                "q",
                answers(&["a", "b", "c", "d"]),
                Some(DifficultyLevel::Easy),
            )
            .await
            .unwrap();

        assert!(!result.early_stopped);
        assert_eq!(result.actual_n, 5);
        assert_eq!(result.max_n, 5);
        assert_eq!(result.batches, 2);
        assert_eq!(result.consensus, Some(2.0 / 5.0));
    }

    #[tokio::test]
    async fn test_cap_below_min_candidates_is_honoured() {
        let sampler = AdaptiveSelfConsistency::new(config(3, 20, 3))
            .unwrap()
            .capped(5)
            .capped(1);
        assert_eq!(sampler.cap(), Some(1));

        let generator = answers(&["a", "b"]);
        let result = sampler
            .run("q", generator, Some(DifficultyLevel::Hard))
            .await
            .unwrap();

        assert_eq!(result.max_n, 1);
        assert_eq!(result.initial_n, 1);
        assert_eq!(result.actual_n, 1);
        assert_eq!(result.batches, 1);
        assert!(!result.early_stopped);
        assert_eq!(result.consensus, None);
        assert_eq!(result.best.content, "a");
    }

    #[tokio::test]
    async fn test_no_consensus_check_below_min() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let sampler = AdaptiveSelfConsistency::new(config(3, 10, 1))
            .unwrap()
            .with_event_bus(bus);

        let result = sampler
            .run("q", Arc::new(MockGenerator::constant("x")), None)
            .await
            .unwrap();
        assert_eq!(result.actual_n, 3);
        assert_eq!(result.batches, 3);

        let mut checks = 0;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::ConsensusChecked { total, .. } = event {
                assert!(total >= 3);
                checks += 1;
            }
        }
        assert_eq!(checks, 1);
    }

    #[tokio::test]
    async fn test_partial_failures_are_dropped() {
        let generator = Arc::new(MockGenerator::scripted(vec![
            "7".into(),
            MockStep::Fail("rate limited".into()),
            "7".into(),
        ]));
        let sampler = AdaptiveSelfConsistency::new(config(2, 10, 3)).unwrap();
        let result = sampler.run("q", generator, None).await.unwrap();

        assert_eq!(result.actual_n, 2);
        assert!(result.early_stopped);
        let ids: Vec<_> = result
            .candidates_generated
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["cand-0", "cand-2"]);
    }

    #[tokio::test]
    async fn test_all_generators_failed() {
        let sampler = AdaptiveSelfConsistency::new(config(3, 5, 3)).unwrap();
        let err = sampler
            .run("q", Arc::new(MockGenerator::failing("down")), None)
            .await
            .unwrap_err();
        match err {
            SelfConsistencyError::AllGeneratorsFailed {
                requested,
                last_error,
            } => {
                assert_eq!(requested, 3);
                assert!(last_error.unwrap().contains("down"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_consensus_check_keeps_sampling() {
        let checker = ConsensusChecker::with_aggregator(Arc::new(HighestScoreAggregator::new()));
        let sampler = AdaptiveSelfConsistency::new(config(3, 20, 3))
            .unwrap()
            .with_consensus_checker(checker);

        let result = sampler
            .run("q", Arc::new(MockGenerator::constant("4")), None)
            .await
            .unwrap();

        assert!(!result.early_stopped);
        assert_eq!(result.actual_n, 10);
        assert_eq!(result.consensus, None);
    }

    #[tokio::test]
    async fn test_aggregation_failure_falls_back_to_first() {
        let sampler = AdaptiveSelfConsistency::new(config(2, 4, 2))
            .unwrap()
            .with_aggregator(Arc::new(BrokenAggregator));
        let result = sampler
            .run("q", answers(&["first", "first"]), None)
            .await
            .unwrap();

        assert!(result.aggregation_error);
        assert_eq!(result.best.id, "cand-0");
        assert!(result.metadata.contains_key("aggregation_failure"));
    }

    #[tokio::test]
    async fn test_timeout_discards_partial_results() {
        let sampler = AdaptiveSelfConsistency::new(
            config(3, 5, 3).with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
        let generator =
            Arc::new(MockGenerator::constant("slow").with_delay(Duration::from_secs(5)));

        let err = sampler.run("q", generator, None).await.unwrap_err();
        assert!(err.is_resource());
        assert_eq!(
            err,
            SelfConsistencyError::Timeout {
                timeout: Duration::from_millis(50)
            }
        );
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_crash() {
        let generator = Arc::new(MockGenerator::scripted(vec![MockStep::Panic(
            "sampler blew up".into(),
        )]));
        let sampler = AdaptiveSelfConsistency::new(config(1, 3, 1)).unwrap();
        let err = sampler.run("q", generator, None).await.unwrap_err();
        assert_eq!(
            err,
            SelfConsistencyError::GeneratorCrashed {
                reason: "sampler blew up".into()
            }
        );
    }

    #[tokio::test]
    async fn test_per_call_timeout_drops_slow_calls_only() {
        let sampler = AdaptiveSelfConsistency::new(
            config(2, 3, 4).with_per_call_timeout(Duration::from_millis(50)),
        )
        .unwrap();
        let result = sampler
            .run("q", Arc::new(SlowOddGenerator), Some(DifficultyLevel::Easy))
            .await
            .unwrap();

        assert_eq!(result.actual_n, 2);
        assert!(result
            .candidates_generated
            .iter()
            .all(|c| c.id == "cand-0" || c.id == "cand-2"));
    }

    #[tokio::test]
    async fn test_highest_score_aggregator_selection() {
        let sampler = AdaptiveSelfConsistency::new(
            config(2, 3, 3).with_aggregator(AggregatorKind::HighestScore),
        )
        .unwrap();
        let result = sampler
            .run("q", answers(&["a", "a", "a"]), None)
            .await
            .unwrap();
        assert_eq!(result.metadata["aggregator"], "highest_score");
        assert!(result.votes.is_none());
    }
}
