//! Logging Observer
//!
//! Logs every event through `tracing`:
//! - INFO: BudgetAllocated, SamplingFinished, VerificationFinished
//! - WARN: BudgetExhausted, VerifierFailed, TimedOut
//! - DEBUG: BatchGenerated, ConsensusChecked, VerifierCompleted

use crate::events::{EventBus, PipelineEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Observer that logs events using tracing
pub struct LoggingObserver {
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl LoggingObserver {
    /// Subscribe to `bus`; events emitted before this call are not seen
    pub fn new(bus: &EventBus) -> Self {
        Self {
            receiver: bus.subscribe(),
        }
    }

    /// Consume events until every bus handle is dropped
    ///
    /// Usually spawned next to the run it observes:
    /// ```rust,ignore
    /// tokio::spawn(observer.run());
    /// ```
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => Self::log_event(&event),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("event bus closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(
                        skipped = count,
                        "logging observer fell behind by {} events", count
                    );
                }
            }
        }
    }

    /// Failures and exhaustion log at warn, run summaries at info
    pub fn log_event(event: &PipelineEvent) {
        match event {
            PipelineEvent::BudgetAllocated {
                difficulty,
                num_candidates,
                cost,
                used_budget,
                ..
            } => {
                info!(
                    difficulty = %difficulty,
                    num_candidates = num_candidates,
                    cost = %cost,
                    used_budget = %used_budget,
                    "Budget allocated"
                );
            }

            PipelineEvent::BudgetExhausted {
                requested,
                used,
                limit,
                ..
            } => {
                warn!(
                    requested = %requested,
                    used = %used,
                    limit = %limit,
                    "Budget exhausted"
                );
            }

            PipelineEvent::BatchGenerated {
                batch,
                requested,
                succeeded,
                total,
                latency_ms,
                ..
            } => {
                debug!(
                    batch = batch,
                    requested = requested,
                    succeeded = succeeded,
                    total = total,
                    latency_ms = latency_ms,
                    "Batch generated"
                );
            }

            PipelineEvent::ConsensusChecked {
                total,
                agreement,
                reached,
                ..
            } => {
                debug!(
                    total = total,
                    agreement = ?agreement,
                    reached = reached,
                    "Consensus checked"
                );
            }

            PipelineEvent::SamplingFinished {
                actual_n,
                early_stopped,
                consensus,
                aggregation_error,
                elapsed_ms,
                ..
            } => {
                info!(
                    actual_n = actual_n,
                    early_stopped = early_stopped,
                    consensus = ?consensus,
                    aggregation_error = aggregation_error,
                    elapsed_ms = elapsed_ms,
                    "Sampling finished"
                );
            }

            PipelineEvent::VerifierCompleted {
                verifier_id,
                candidate_id,
                score,
                latency_ms,
                ..
            } => {
                debug!(
                    verifier = %verifier_id,
                    candidate = %candidate_id,
                    score = %score,
                    latency_ms = latency_ms,
                    "Verifier completed"
                );
            }

            PipelineEvent::VerifierFailed {
                verifier_id,
                reason,
                ..
            } => {
                warn!(verifier = %verifier_id, reason = %reason, "Verifier failed");
            }

            PipelineEvent::VerificationFinished {
                candidate_id,
                score,
                confidence,
                verifiers,
                elapsed_ms,
                ..
            } => {
                info!(
                    candidate = %candidate_id,
                    score = %score,
                    confidence = %confidence,
                    verifiers = verifiers,
                    elapsed_ms = elapsed_ms,
                    "Verification finished"
                );
            }

            PipelineEvent::TimedOut {
                stage, timeout_ms, ..
            } => {
                warn!(stage = %stage, timeout_ms = timeout_ms, "Stage timed out");
            }
        }
    }
}
