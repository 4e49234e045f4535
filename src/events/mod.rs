//! Event-Driven Observability
//!
//! Structured events for monitoring allocation, sampling and verification:
//! - Budget allocations and exhaustion
//! - Sampling batches, consensus checks and early stops
//! - Verifier completions and failures
//! - Timeouts
//!
//! # Architecture
//!
//! Events are emitted via an `EventBus` which uses a broadcast channel.
//! Multiple observers can subscribe to receive all events:
//!
//! ```text
//! Budgeter / Sampler / Runner → EventBus → [LoggingObserver, MetricsObserver, ...]
//! ```

pub mod bus;
pub mod observers;

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// All events emitted by the engine
///
/// Events are tagged with their type for JSON serialization and include
/// timestamps for latency tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A budget was handed out by the budgeter
    BudgetAllocated {
        /// Difficulty label the budget was allocated for
        difficulty: String,
        num_candidates: usize,
        cost: f64,
        /// Budgeter usage after this allocation
        used_budget: f64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// An allocation was refused by the global limit
    BudgetExhausted {
        requested: f64,
        used: f64,
        limit: f64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A sampling batch finished
    BatchGenerated {
        /// 0-based batch number
        batch: usize,
        requested: usize,
        succeeded: usize,
        /// Candidates accumulated after this batch
        total: usize,
        latency_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// Agreement was measured over the accumulated candidates
    ConsensusChecked {
        total: usize,
        /// None when the check itself failed
        #[serde(skip_serializing_if = "Option::is_none")]
        agreement: Option<f64>,
        reached: bool,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A self-consistency run returned a result
    SamplingFinished {
        actual_n: usize,
        early_stopped: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        consensus: Option<f64>,
        aggregation_error: bool,
        elapsed_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// One verifier produced a result
    VerifierCompleted {
        verifier_id: String,
        candidate_id: String,
        score: f64,
        latency_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// One verifier failed or timed out
    VerifierFailed {
        verifier_id: String,
        reason: String,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A verification ensemble produced its combined result
    VerificationFinished {
        candidate_id: String,
        score: f64,
        confidence: f64,
        /// Verifiers that contributed to the result
        verifiers: usize,
        elapsed_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },

    /// A stage exceeded its overall deadline
    TimedOut {
        /// "sampling" or "verification"
        stage: String,
        timeout_ms: u64,
        #[serde(with = "system_time_serde")]
        timestamp: SystemTime,
    },
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

impl PipelineEvent {
    /// Create a BudgetAllocated event
    pub fn budget_allocated(
        difficulty: &str,
        num_candidates: usize,
        cost: f64,
        used_budget: f64,
    ) -> Self {
        Self::BudgetAllocated {
            difficulty: difficulty.to_string(),
            num_candidates,
            cost,
            used_budget,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a BudgetExhausted event
    pub fn budget_exhausted(requested: f64, used: f64, limit: f64) -> Self {
        Self::BudgetExhausted {
            requested,
            used,
            limit,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a BatchGenerated event
    pub fn batch_generated(
        batch: usize,
        requested: usize,
        succeeded: usize,
        total: usize,
        latency: Duration,
    ) -> Self {
        Self::BatchGenerated {
            batch,
            requested,
            succeeded,
            total,
            latency_ms: millis(latency),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a ConsensusChecked event
    pub fn consensus_checked(total: usize, agreement: Option<f64>, reached: bool) -> Self {
        Self::ConsensusChecked {
            total,
            agreement,
            reached,
            timestamp: SystemTime::now(),
        }
    }

    /// Create a SamplingFinished event
    pub fn sampling_finished(
        actual_n: usize,
        early_stopped: bool,
        consensus: Option<f64>,
        aggregation_error: bool,
        elapsed: Duration,
    ) -> Self {
        Self::SamplingFinished {
            actual_n,
            early_stopped,
            consensus,
            aggregation_error,
            elapsed_ms: millis(elapsed),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a VerifierCompleted event
    pub fn verifier_completed(
        verifier_id: &str,
        candidate_id: &str,
        score: f64,
        latency: Duration,
    ) -> Self {
        Self::VerifierCompleted {
            verifier_id: verifier_id.to_string(),
            candidate_id: candidate_id.to_string(),
            score,
            latency_ms: millis(latency),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a VerifierFailed event
    pub fn verifier_failed(verifier_id: &str, reason: &str) -> Self {
        Self::VerifierFailed {
            verifier_id: verifier_id.to_string(),
            reason: reason.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a VerificationFinished event
    pub fn verification_finished(
        candidate_id: &str,
        score: f64,
        confidence: f64,
        verifiers: usize,
        elapsed: Duration,
    ) -> Self {
        Self::VerificationFinished {
            candidate_id: candidate_id.to_string(),
            score,
            confidence,
            verifiers,
            elapsed_ms: millis(elapsed),
            timestamp: SystemTime::now(),
        }
    }

    /// Create a TimedOut event
    pub fn timed_out(stage: &str, timeout: Duration) -> Self {
        Self::TimedOut {
            stage: stage.to_string(),
            timeout_ms: millis(timeout),
            timestamp: SystemTime::now(),
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BudgetAllocated { .. } => "BudgetAllocated",
            Self::BudgetExhausted { .. } => "BudgetExhausted",
            Self::BatchGenerated { .. } => "BatchGenerated",
            Self::ConsensusChecked { .. } => "ConsensusChecked",
            Self::SamplingFinished { .. } => "SamplingFinished",
            Self::VerifierCompleted { .. } => "VerifierCompleted",
            Self::VerifierFailed { .. } => "VerifierFailed",
            Self::VerificationFinished { .. } => "VerificationFinished",
            Self::TimedOut { .. } => "TimedOut",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            Self::BudgetAllocated { timestamp, .. }
            | Self::BudgetExhausted { timestamp, .. }
            | Self::BatchGenerated { timestamp, .. }
            | Self::ConsensusChecked { timestamp, .. }
            | Self::SamplingFinished { timestamp, .. }
            | Self::VerifierCompleted { timestamp, .. }
            | Self::VerifierFailed { timestamp, .. }
            | Self::VerificationFinished { timestamp, .. }
            | Self::TimedOut { timestamp, .. } => *timestamp,
        }
    }
}

/// Serde module for SystemTime serialization
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

pub use bus::EventBus;
