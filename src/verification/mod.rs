//! Verifier Ensembles
//!
//! Runs several verifiers over one candidate and combines their verdicts
//! into a single `VerificationResult`.
//!
//! - `aggregate`: score combination strategies and the error policy
//! - `builtin`: the closed registry of built-in verifiers
//! - `runner`: sequential and parallel execution under a deadline

pub mod aggregate;
pub mod builtin;
pub mod runner;

use crate::core::candidate::{Candidate, Metadata};
use crate::core::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use aggregate::{combine, AggregationStrategy, ErrorPolicy};
pub use builtin::{
    BuiltinVerifier, PrmVerifier, ReferenceMatchVerifier, ScoreVerifier, VerifierSpec,
};
pub use runner::{VerificationConfig, VerificationError, VerificationRunner};

/// One verifier's verdict on a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub candidate_id: String,
    pub score: f64,
    /// Confidence in `score`, in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
    /// Per-step scores, keyed by step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_scores: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VerificationResult {
    pub fn new(candidate_id: impl Into<String>, score: f64) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            score,
            confidence: None,
            reasoning: String::new(),
            step_scores: None,
            metadata: Metadata::new(),
        }
    }

    /// Result for a candidate nothing could be said about
    pub fn empty(candidate_id: impl Into<String>) -> Self {
        Self::new(candidate_id, 0.0).with_confidence(0.0)
    }

    /// Zero-score result recording why verification failed
    pub fn error(candidate_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::empty(candidate_id)
            .with_reasoning(format!("verification failed: {}", reason))
            .with_metadata("error", reason)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_step_scores(mut self, step_scores: BTreeMap<String, f64>) -> Self {
        self.step_scores = Some(step_scores);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this result records a failure
    pub fn is_error(&self) -> bool {
        self.metadata.contains_key("error")
    }

    /// Verifier results merged into this one, for results built by `combine`
    pub fn verifier_count(&self) -> Option<usize> {
        self.metadata
            .get(aggregate::VERIFIER_COUNT_KEY)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }
}

/// What the verifiers may consult besides the candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationContext {
    /// Original query
    #[serde(default)]
    pub query: Option<String>,
    /// Known-good answer, when there is one
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VerificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Errors from a single verifier
#[derive(Debug, Clone, PartialEq)]
pub enum VerifierError {
    /// Verifier reported a failure
    Failed { message: String },
    /// Call exceeded its bound
    Timeout { limit: Duration },
    /// Verifier configuration is unusable
    InvalidConfig { message: String },
}

impl VerifierError {
    pub fn failed(message: impl Into<String>) -> Self {
        VerifierError::Failed {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        VerifierError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierError::Failed { message } => write!(f, "{}", message),
            VerifierError::Timeout { limit } => write!(f, "timed out after {:?}", limit),
            VerifierError::InvalidConfig { message } => {
                write!(f, "invalid verifier config: {}", message)
            }
        }
    }
}

impl std::error::Error for VerifierError {}

/// Judges a candidate.
pub trait Verifier: Send + Sync {
    /// Stable identifier used in logs and errors
    fn id(&self) -> &str;

    /// Verify one candidate
    fn verify<'a>(
        &'a self,
        candidate: &'a Candidate,
        context: &'a VerificationContext,
    ) -> BoxFuture<'a, Result<VerificationResult, VerifierError>>;

    /// Verify several candidates, one at a time, in order
    fn verify_batch<'a>(
        &'a self,
        candidates: &'a [Candidate],
        context: &'a VerificationContext,
    ) -> BoxFuture<'a, Vec<Result<VerificationResult, VerifierError>>> {
        Box::pin(async move {
            let mut results = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                results.push(self.verify(candidate, context).await);
            }
            results
        })
    }
}

/// Where a configured verifier comes from
#[derive(Clone)]
pub enum VerifierSource {
    /// Resolved from the built-in registry at runner construction
    Builtin(BuiltinVerifier),
    /// Supplied by the caller
    Custom(Arc<dyn Verifier>),
}

impl fmt::Debug for VerifierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierSource::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            VerifierSource::Custom(v) => f.debug_tuple("Custom").field(&v.id()).finish(),
        }
    }
}

/// A verifier with its per-verifier settings and ensemble weight
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub id: String,
    pub source: VerifierSource,
    /// Passed to built-in verifiers at construction
    pub config: Metadata,
    /// Only used by `weighted_avg`; must be finite and non-negative
    pub weight: f64,
}

impl VerifierConfig {
    /// Built-in verifier with weight 1.0
    pub fn builtin(kind: BuiltinVerifier) -> Self {
        Self {
            id: kind.as_str().to_string(),
            source: VerifierSource::Builtin(kind),
            config: Metadata::new(),
            weight: 1.0,
        }
    }

    /// Caller-supplied verifier with weight 1.0
    pub fn custom(verifier: Arc<dyn Verifier>) -> Self {
        Self {
            id: verifier.id().to_string(),
            source: VerifierSource::Custom(verifier),
            config: Metadata::new(),
            weight: 1.0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}
