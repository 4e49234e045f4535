//! Verification Runner
//!
//! Executes an ordered verifier list against a candidate, under one overall
//! deadline, and combines the survivors.
//!
//! - Sequential: remaining time is recomputed before every verifier, and each
//!   call is bounded by it. Time spent on one verifier shrinks the next one's
//!   window.
//! - Parallel: every verifier is spawned up front (at most `max_concurrency`
//!   running at once) and awaited in configuration order, each wait bounded
//!   by the global remaining time.
//!
//! Failures follow `on_error`: `continue` logs and drops the verifier,
//! `halt` aborts with `VerifierFailed` (and cancels in-flight siblings).

use super::aggregate::{combine, AggregationStrategy, ErrorPolicy};
use super::{
    VerificationContext, VerificationResult, Verifier, VerifierConfig, VerifierError,
    VerifierSource,
};
use crate::config::{duration_ms, option_duration_ms};
use crate::core::candidate::Candidate;
use crate::events::bus::emit;
use crate::events::{EventBus, PipelineEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Run verifiers concurrently
    pub parallel: bool,
    pub aggregation: AggregationStrategy,
    pub on_error: ErrorPolicy,
    /// Overall deadline for one candidate
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Bound on a single verifier call
    #[serde(rename = "per_verifier_timeout_ms", with = "option_duration_ms")]
    pub per_verifier_timeout: Option<Duration>,
    /// Parallel verifiers running at once
    pub max_concurrency: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            aggregation: AggregationStrategy::WeightedAvg,
            on_error: ErrorPolicy::Continue,
            timeout: Duration::from_secs(30),
            per_verifier_timeout: None,
            max_concurrency: 4,
        }
    }
}

impl VerificationConfig {
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationStrategy) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_on_error(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_per_verifier_timeout(mut self, timeout: Duration) -> Self {
        self.per_verifier_timeout = Some(timeout);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn validate(&self) -> Result<(), VerificationError> {
        if self.timeout.is_zero() || self.per_verifier_timeout.is_some_and(|t| t.is_zero()) {
            return Err(VerificationError::InvalidTimeout);
        }
        if self.max_concurrency == 0 {
            return Err(VerificationError::InvalidConcurrency);
        }
        Ok(())
    }
}

/// Errors from runner construction or a verification
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationError {
    /// Empty verifier list
    NoVerifiers,
    /// Negative or non-finite weight
    InvalidWeight { verifier_id: String, weight: f64 },
    /// Zero timeout
    InvalidTimeout,
    /// Zero concurrency
    InvalidConcurrency,
    /// A built-in verifier rejected its configuration
    VerifierConstruction { verifier_id: String, reason: String },
    /// The overall deadline passed
    Timeout { timeout: Duration, elapsed: Duration },
    /// A verifier failed under the `halt` policy
    VerifierFailed { verifier_id: String, reason: String },
}

impl VerificationError {
    /// Retrying with a larger timeout may succeed
    pub fn is_resource(&self) -> bool {
        matches!(self, VerificationError::Timeout { .. })
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::NoVerifiers => write!(f, "no verifiers configured"),
            VerificationError::InvalidWeight {
                verifier_id,
                weight,
            } => {
                write!(
                    f,
                    "verifier '{}' has invalid weight {} (must be finite and >= 0)",
                    verifier_id, weight
                )
            }
            VerificationError::InvalidTimeout => write!(f, "timeouts must be non-zero"),
            VerificationError::InvalidConcurrency => write!(f, "max_concurrency must be >= 1"),
            VerificationError::VerifierConstruction {
                verifier_id,
                reason,
            } => {
                write!(f, "cannot build verifier '{}': {}", verifier_id, reason)
            }
            VerificationError::Timeout { timeout, elapsed } => {
                write!(
                    f,
                    "verification timed out after {:?} (limit {:?})",
                    elapsed, timeout
                )
            }
            VerificationError::VerifierFailed {
                verifier_id,
                reason,
            } => {
                write!(f, "verifier '{}' failed: {}", verifier_id, reason)
            }
        }
    }
}

impl std::error::Error for VerificationError {}

/// A resolved verifier with its weight
#[derive(Clone)]
struct Member {
    id: String,
    verifier: Arc<dyn Verifier>,
    weight: f64,
}

/// Verifier tasks of one parallel run, aborted when dropped.
///
/// Each task reports its result with the time spent in the verifier itself.
struct VerifierTasks(Vec<JoinHandle<Result<(VerificationResult, Duration), VerifierError>>>);

impl Drop for VerifierTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Multi-verifier ensemble.
#[derive(Clone)]
pub struct VerificationRunner {
    config: VerificationConfig,
    members: Vec<Member>,
    events: Option<EventBus>,
}

impl fmt::Debug for VerificationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationRunner")
            .field("config", &self.config)
            .field(
                "verifiers",
                &self.members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl VerificationRunner {
    /// Validate settings and resolve built-in verifiers.
    ///
    /// # Errors
    ///
    /// `NoVerifiers`, `InvalidWeight`, `InvalidTimeout`, `InvalidConcurrency`,
    /// or `VerifierConstruction` when a built-in rejects its config.
    pub fn new(
        config: VerificationConfig,
        verifiers: Vec<VerifierConfig>,
    ) -> Result<Self, VerificationError> {
        config.validate()?;
        if verifiers.is_empty() {
            return Err(VerificationError::NoVerifiers);
        }

        let mut members = Vec::with_capacity(verifiers.len());
        for entry in verifiers {
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(VerificationError::InvalidWeight {
                    verifier_id: entry.id,
                    weight: entry.weight,
                });
            }
            let verifier = match entry.source {
                VerifierSource::Custom(verifier) => verifier,
                VerifierSource::Builtin(kind) => kind
                    .build(&entry.id, &entry.config)
                    .map_err(|e| VerificationError::VerifierConstruction {
                        verifier_id: entry.id.clone(),
                        reason: e.to_string(),
                    })?,
            };
            members.push(Member {
                id: entry.id,
                verifier,
                weight: entry.weight,
            });
        }

        Ok(Self {
            config,
            members,
            events: None,
        })
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Verifier ids in execution order
    pub fn verifier_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.id.as_str())
    }

    /// Verify one candidate with every configured verifier.
    pub async fn verify(
        &self,
        candidate: &Candidate,
        context: &VerificationContext,
    ) -> Result<VerificationResult, VerificationError> {
        let start = Instant::now();
        let survivors = if self.config.parallel {
            self.run_parallel(candidate, context, start).await?
        } else {
            self.run_sequential(candidate, context, start).await?
        };

        let result = combine(&candidate.id, &survivors, self.config.aggregation);
        let elapsed = start.elapsed();
        info!(
            candidate = %candidate.id,
            score = result.score,
            verifiers = survivors.len(),
            aggregation = %self.config.aggregation,
            "Verification finished"
        );
        emit(self.events.as_ref(), || {
            PipelineEvent::verification_finished(
                &candidate.id,
                result.score,
                result.confidence.unwrap_or(0.0),
                survivors.len(),
                elapsed,
            )
        });
        Ok(result)
    }

    /// Verify each candidate independently.
    ///
    /// A candidate whose verification fails gets a zero-score error result;
    /// the others are unaffected. Output order matches input order.
    pub async fn verify_all_candidates(
        &self,
        candidates: &[Candidate],
        context: &VerificationContext,
    ) -> Vec<VerificationResult> {
        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.verify(candidate, context).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(candidate = %candidate.id, error = %e, "Candidate verification failed");
                    results.push(VerificationResult::error(&candidate.id, e.to_string()));
                }
            }
        }
        results
    }

    fn timeout_error(&self, start: Instant) -> VerificationError {
        let elapsed = start.elapsed();
        warn!(
            timeout_ms = self.config.timeout.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "Verification deadline passed"
        );
        emit(self.events.as_ref(), || {
            PipelineEvent::timed_out("verification", self.config.timeout)
        });
        VerificationError::Timeout {
            timeout: self.config.timeout,
            elapsed,
        }
    }

    /// Apply the error policy to one failure
    fn on_failure(&self, verifier_id: &str, reason: String) -> Result<(), VerificationError> {
        warn!(verifier = %verifier_id, reason = %reason, policy = ?self.config.on_error, "Verifier failed");
        emit(self.events.as_ref(), || {
            PipelineEvent::verifier_failed(verifier_id, &reason)
        });
        match self.config.on_error {
            ErrorPolicy::Continue => Ok(()),
            ErrorPolicy::Halt => Err(VerificationError::VerifierFailed {
                verifier_id: verifier_id.to_string(),
                reason,
            }),
        }
    }

    fn on_success(&self, member: &Member, result: &VerificationResult, latency: Duration) {
        debug!(
            verifier = %member.id,
            score = result.score,
            latency_ms = latency.as_millis() as u64,
            "Verifier completed"
        );
        emit(self.events.as_ref(), || {
            PipelineEvent::verifier_completed(&member.id, &result.candidate_id, result.score, latency)
        });
    }

    async fn run_sequential(
        &self,
        candidate: &Candidate,
        context: &VerificationContext,
        start: Instant,
    ) -> Result<Vec<(VerificationResult, f64)>, VerificationError> {
        let mut survivors = Vec::with_capacity(self.members.len());

        for member in &self.members {
            let remaining = self.config.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(self.timeout_error(start));
            }
            let (limit, limited_by_deadline) = match self.config.per_verifier_timeout {
                Some(per) if per < remaining => (per, false),
                _ => (remaining, true),
            };

            let call_start = Instant::now();
            match tokio::time::timeout(limit, member.verifier.verify(candidate, context)).await {
                Ok(Ok(result)) => {
                    self.on_success(member, &result, call_start.elapsed());
                    survivors.push((result, member.weight));
                }
                Ok(Err(e)) => self.on_failure(&member.id, e.to_string())?,
                Err(_) if limited_by_deadline => return Err(self.timeout_error(start)),
                Err(_) => {
                    let reason = VerifierError::Timeout { limit }.to_string();
                    self.on_failure(&member.id, reason)?;
                }
            }
        }

        Ok(survivors)
    }

    async fn run_parallel(
        &self,
        candidate: &Candidate,
        context: &VerificationContext,
        start: Instant,
    ) -> Result<Vec<(VerificationResult, f64)>, VerificationError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let per_task = self.config.per_verifier_timeout.unwrap_or(self.config.timeout);
        let mut tasks = VerifierTasks(Vec::with_capacity(self.members.len()));

        for member in &self.members {
            let verifier = Arc::clone(&member.verifier);
            let candidate = candidate.clone();
            let context = context.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.0.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| VerifierError::failed(e.to_string()))?;
                let call_start = Instant::now();
                let result = tokio::time::timeout(per_task, verifier.verify(&candidate, &context))
                    .await
                    .unwrap_or(Err(VerifierError::Timeout { limit: per_task }))?;
                Ok((result, call_start.elapsed()))
            }));
        }

        let mut survivors = Vec::with_capacity(self.members.len());
        for (member, handle) in self.members.iter().zip(tasks.0.iter_mut()) {
            let remaining = self.config.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(self.timeout_error(start));
            }
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok((result, latency)))) => {
                    self.on_success(member, &result, latency);
                    survivors.push((result, member.weight));
                }
                Ok(Ok(Err(e))) => self.on_failure(&member.id, e.to_string())?,
                Ok(Err(join_error)) => {
                    self.on_failure(&member.id, format!("verifier task failed: {}", join_error))?
                }
                Err(_) => return Err(self.timeout_error(start)),
            }
        }

        Ok(survivors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BoxFuture;
    use crate::verification::builtin::BuiltinVerifier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed score after an optional delay, or fails
    struct FixedVerifier {
        id: String,
        score: Option<f64>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl FixedVerifier {
        fn scoring(id: &str, score: f64) -> Self {
            Self {
                id: id.to_string(),
                score: Some(score),
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(id: &str) -> Self {
            Self {
                score: None,
                ..Self::scoring(id, 0.0)
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl Verifier for FixedVerifier {
        fn id(&self) -> &str {
            &self.id
        }

        fn verify<'a>(
            &'a self,
            candidate: &'a Candidate,
            _context: &'a VerificationContext,
        ) -> BoxFuture<'a, Result<VerificationResult, VerifierError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                match self.score {
                    Some(score) => Ok(VerificationResult::new(&candidate.id, score)
                        .with_reasoning(format!("{} says {}", self.id, score))),
                    None => Err(VerifierError::failed(format!("{} is broken", self.id))),
                }
            })
        }
    }

    fn member(v: FixedVerifier, weight: f64) -> VerifierConfig {
        VerifierConfig::custom(Arc::new(v)).with_weight(weight)
    }

    fn candidate() -> Candidate {
        Candidate::new("c1", "42")
    }

    // ==========================================
    // Construction Tests
    // ==========================================

    #[test]
    fn test_construction_validation() {
        assert_eq!(
            VerificationRunner::new(VerificationConfig::default(), vec![]).unwrap_err(),
            VerificationError::NoVerifiers
        );
        assert!(matches!(
            VerificationRunner::new(
                VerificationConfig::default(),
                vec![member(FixedVerifier::scoring("a", 1.0), -1.0)]
            ),
            Err(VerificationError::InvalidWeight { .. })
        ));
        assert_eq!(
            VerificationRunner::new(
                VerificationConfig::default().with_timeout(Duration::ZERO),
                vec![member(FixedVerifier::scoring("a", 1.0), 1.0)]
            )
            .unwrap_err(),
            VerificationError::InvalidTimeout
        );
    }

    #[test]
    fn test_builtin_construction_error() {
        let bad = VerifierConfig::builtin(BuiltinVerifier::Prm).with_config("method", "median");
        let err = VerificationRunner::new(VerificationConfig::default(), vec![bad]).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::VerifierConstruction { ref verifier_id, .. } if verifier_id == "prm"
        ));
    }

    // ==========================================
    // Sequential Tests
    // ==========================================

    #[tokio::test]
    async fn test_weighted_average_of_two_verifiers() {
        let runner = VerificationRunner::new(
            VerificationConfig::default(),
            vec![
                member(FixedVerifier::scoring("a", 0.8), 1.0),
                member(FixedVerifier::scoring("b", 0.6), 0.5),
            ],
        )
        .unwrap();

        let result = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap();
        assert!((result.score - 0.7333333333).abs() < 1e-6);
        assert_eq!(result.reasoning, "a says 0.8; b says 0.6");
        assert_eq!(result.confidence, Some(0.5));
    }

    #[tokio::test]
    async fn test_continue_skips_failed_verifier() {
        let runner = VerificationRunner::new(
            VerificationConfig::default(),
            vec![
                member(FixedVerifier::failing("broken"), 5.0),
                member(FixedVerifier::scoring("ok", 0.9), 1.0),
            ],
        )
        .unwrap();

        let result = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap();
        assert_eq!(result.score, 0.9);
    }

    #[tokio::test]
    async fn test_halt_stops_at_first_failure() {
        let after = FixedVerifier::scoring("after", 1.0);
        let after_calls = Arc::clone(&after.calls);
        let runner = VerificationRunner::new(
            VerificationConfig::default().with_on_error(ErrorPolicy::Halt),
            vec![
                member(FixedVerifier::failing("broken"), 1.0),
                member(after, 1.0),
            ],
        )
        .unwrap();

        let err = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VerificationError::VerifierFailed {
                verifier_id: "broken".into(),
                reason: "broken is broken".into()
            }
        );
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_failed_under_continue_gives_empty_result() {
        let runner = VerificationRunner::new(
            VerificationConfig::default(),
            vec![member(FixedVerifier::failing("x"), 1.0)],
        )
        .unwrap();
        let result = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap();
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, Some(0.0));
    }

    #[tokio::test]
    async fn test_sequential_deadline_shrinks() {
        let last = FixedVerifier::scoring("last", 1.0);
        let last_calls = Arc::clone(&last.calls);
        let runner = VerificationRunner::new(
            VerificationConfig::default().with_timeout(Duration::from_millis(100)),
            vec![
                member(
                    FixedVerifier::scoring("slow", 0.5).slow(Duration::from_millis(60)),
                    1.0,
                ),
                member(
                    FixedVerifier::scoring("slower", 0.5).slow(Duration::from_millis(60)),
                    1.0,
                ),
                member(last, 1.0),
            ],
        )
        .unwrap();

        let err = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap_err();
        assert!(err.is_resource());
        assert_eq!(last_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_per_verifier_timeout_is_a_failure() {
        let runner = VerificationRunner::new(
            VerificationConfig::default().with_per_verifier_timeout(Duration::from_millis(20)),
            vec![
                member(
                    FixedVerifier::scoring("slow", 0.1).slow(Duration::from_millis(500)),
                    1.0,
                ),
                member(FixedVerifier::scoring("fast", 0.7), 1.0),
            ],
        )
        .unwrap();

        let result = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap();
        assert_eq!(result.score, 0.7);
    }

    // ==========================================
    // Parallel Tests
    // ==========================================

    #[tokio::test]
    async fn test_parallel_runs_concurrently() {
        let runner = VerificationRunner::new(
            VerificationConfig::default()
                .with_parallel(true)
                .with_timeout(Duration::from_millis(400))
                .with_aggregation(AggregationStrategy::Sum),
            vec![
                member(
                    FixedVerifier::scoring("a", 0.25).slow(Duration::from_millis(150)),
                    1.0,
                ),
                member(
                    FixedVerifier::scoring("b", 0.25).slow(Duration::from_millis(150)),
                    1.0,
                ),
                member(
                    FixedVerifier::scoring("c", 0.25).slow(Duration::from_millis(150)),
                    1.0,
                ),
            ],
        )
        .unwrap();

        let started = Instant::now();
        let result = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap();
        assert_eq!(result.score, 0.75);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_parallel_latency_is_per_verifier() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let runner = VerificationRunner::new(
            VerificationConfig::default()
                .with_parallel(true)
                .with_max_concurrency(1),
            vec![
                member(
                    FixedVerifier::scoring("slow", 1.0).slow(Duration::from_millis(200)),
                    1.0,
                ),
                member(FixedVerifier::scoring("fast", 1.0), 1.0),
            ],
        )
        .unwrap()
        .with_event_bus(bus);

        runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap();

        let mut latencies = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::VerifierCompleted {
                verifier_id,
                latency_ms,
                ..
            } = event
            {
                latencies.push((verifier_id, latency_ms));
            }
        }
        assert_eq!(latencies.len(), 2);
        assert_eq!(latencies[0].0, "slow");
        assert!(latencies[0].1 >= 200);
        // queued behind "slow" but timed from its own start
        assert_eq!(latencies[1].0, "fast");
        assert!(latencies[1].1 < 100, "fast reported {}ms", latencies[1].1);
    }

    #[tokio::test]
    async fn test_parallel_halt_reports_failure() {
        let runner = VerificationRunner::new(
            VerificationConfig::default()
                .with_parallel(true)
                .with_on_error(ErrorPolicy::Halt),
            vec![
                member(FixedVerifier::scoring("ok", 1.0), 1.0),
                member(FixedVerifier::failing("bad"), 1.0),
            ],
        )
        .unwrap();

        let err = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::VerifierFailed { ref verifier_id, .. } if verifier_id == "bad"
        ));
    }

    #[tokio::test]
    async fn test_parallel_global_timeout() {
        let runner = VerificationRunner::new(
            VerificationConfig::default()
                .with_parallel(true)
                .with_timeout(Duration::from_millis(50)),
            vec![member(
                FixedVerifier::scoring("slow", 1.0).slow(Duration::from_secs(5)),
                1.0,
            )],
        )
        .unwrap();

        let err = runner
            .verify(&candidate(), &VerificationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Timeout { .. }));
    }

    // ==========================================
    // Batch Tests
    // ==========================================

    #[tokio::test]
    async fn test_verify_all_candidates_isolates_failures() {
        let runner = VerificationRunner::new(
            VerificationConfig::default().with_on_error(ErrorPolicy::Halt),
            vec![VerifierConfig::builtin(BuiltinVerifier::Score)],
        )
        .unwrap();

        let candidates = vec![
            Candidate::new("a", "1").with_score(0.9),
            Candidate::new("b", "2"),
            Candidate::new("c", "3").with_score(0.4),
        ];
        let results = runner
            .verify_all_candidates(&candidates, &VerificationContext::new())
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 0.9);
        assert!(results[1].is_error());
        assert_eq!(results[1].candidate_id, "b");
        assert_eq!(results[2].score, 0.4);
    }

    #[test]
    fn test_config_serde() {
        let config: VerificationConfig = serde_json::from_str(
            r#"{"parallel": true, "aggregation": "max", "on_error": "halt", "timeout_ms": 250}"#,
        )
        .unwrap();
        assert!(config.parallel);
        assert_eq!(config.aggregation, AggregationStrategy::Max);
        assert_eq!(config.on_error, ErrorPolicy::Halt);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.max_concurrency, 4);
    }
}
