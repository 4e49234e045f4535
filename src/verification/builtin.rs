//! Built-in verifiers
//!
//! A closed registry resolved when a `VerificationRunner` is built:
//!
//! | kind | reads | score |
//! |------|-------|-------|
//! | `score` | `Candidate.score` | the score, confidence 1.0 |
//! | `reference_match` | `context.reference` | 1.0 on matching final answer, else 0.0 |
//! | `prm` | `metadata.step_scores` | step scores folded by a `PrmMethod` |

use super::{VerificationContext, VerificationResult, Verifier, VerifierConfig, VerifierError};
use crate::core::budget::DEFAULT_PRM_THRESHOLD;
use crate::core::candidate::{Candidate, Metadata};
use crate::core::matcher::{answer_matcher, default_matcher, CandidateMatcher};
use crate::core::prm::{self, PrmMethod};
use crate::core::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Registry of built-in verifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinVerifier {
    Score,
    ReferenceMatch,
    Prm,
}

impl BuiltinVerifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinVerifier::Score => "score",
            BuiltinVerifier::ReferenceMatch => "reference_match",
            BuiltinVerifier::Prm => "prm",
        }
    }

    /// Instantiate with per-verifier `config`
    pub fn build(&self, id: &str, config: &Metadata) -> Result<Arc<dyn Verifier>, VerifierError> {
        Ok(match self {
            BuiltinVerifier::Score => Arc::new(ScoreVerifier::new().with_id(id)),
            BuiltinVerifier::ReferenceMatch => {
                Arc::new(ReferenceMatchVerifier::from_config(config)?.with_id(id))
            }
            BuiltinVerifier::Prm => Arc::new(PrmVerifier::from_config(config)?.with_id(id)),
        })
    }
}

impl fmt::Display for BuiltinVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltinVerifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "score" => Ok(BuiltinVerifier::Score),
            "reference_match" | "reference" => Ok(BuiltinVerifier::ReferenceMatch),
            "prm" => Ok(BuiltinVerifier::Prm),
            other => Err(format!(
                "verifier must be score, reference_match or prm, got '{}'",
                other
            )),
        }
    }
}

/// Declarative verifier entry for configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierSpec {
    pub kind: BuiltinVerifier,
    /// Defaults to the kind's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub config: Metadata,
}

fn default_weight() -> f64 {
    1.0
}

impl VerifierSpec {
    pub fn new(kind: BuiltinVerifier) -> Self {
        Self {
            kind,
            id: None,
            weight: default_weight(),
            config: Metadata::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn to_config(&self) -> VerifierConfig {
        let mut config = VerifierConfig::builtin(self.kind).with_weight(self.weight);
        if let Some(id) = &self.id {
            config = config.with_id(id.clone());
        }
        config.config = self.config.clone();
        config
    }
}

/// Passes through the score a candidate already carries
#[derive(Debug, Clone)]
pub struct ScoreVerifier {
    id: String,
}

impl Default for ScoreVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreVerifier {
    pub fn new() -> Self {
        Self {
            id: BuiltinVerifier::Score.as_str().to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl Verifier for ScoreVerifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn verify<'a>(
        &'a self,
        candidate: &'a Candidate,
        _context: &'a VerificationContext,
    ) -> BoxFuture<'a, Result<VerificationResult, VerifierError>> {
        Box::pin(async move {
            let score = candidate.score.ok_or_else(|| {
                VerifierError::failed(format!("candidate '{}' has no score", candidate.id))
            })?;
            Ok(VerificationResult::new(&candidate.id, score)
                .with_confidence(1.0)
                .with_reasoning(format!("candidate score {:.3}", score)))
        })
    }
}

/// Compares the candidate's final answer with `context.reference`
#[derive(Debug, Clone)]
pub struct ReferenceMatchVerifier {
    id: String,
    matcher: Arc<dyn CandidateMatcher>,
}

impl Default for ReferenceMatchVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceMatchVerifier {
    /// Match on extracted final answers
    pub fn new() -> Self {
        Self {
            id: BuiltinVerifier::ReferenceMatch.as_str().to_string(),
            matcher: answer_matcher(),
        }
    }

    /// Reads `matcher`: `"answer"` (default) or `"exact"`
    pub fn from_config(config: &Metadata) -> Result<Self, VerifierError> {
        let matcher = match config.get("matcher").and_then(Value::as_str) {
            None | Some("answer") => answer_matcher(),
            Some("exact") => default_matcher(),
            Some(other) => {
                return Err(VerifierError::invalid_config(format!(
                    "matcher must be answer or exact, got '{}'",
                    other
                )))
            }
        };
        Ok(Self::new().with_matcher(matcher))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn CandidateMatcher>) -> Self {
        self.matcher = matcher;
        self
    }
}

impl Verifier for ReferenceMatchVerifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn verify<'a>(
        &'a self,
        candidate: &'a Candidate,
        context: &'a VerificationContext,
    ) -> BoxFuture<'a, Result<VerificationResult, VerifierError>> {
        Box::pin(async move {
            let reference = context
                .reference
                .as_deref()
                .ok_or_else(|| VerifierError::failed("no reference answer in context"))?;
            let answer = self.matcher.canonicalize(&candidate.content);
            let expected = self.matcher.canonicalize(reference);
            let matched = answer == expected;

            let reasoning = if matched {
                format!("answer '{}' matches reference", answer)
            } else {
                format!("answer '{}' differs from reference '{}'", answer, expected)
            };
            Ok(
                VerificationResult::new(&candidate.id, if matched { 1.0 } else { 0.0 })
                    .with_confidence(1.0)
                    .with_reasoning(reasoning)
                    .with_metadata("matched", matched)
                    .with_metadata("answer", answer),
            )
        })
    }
}

/// Scores a reasoning trace from per-step rewards.
///
/// Expects `candidate.metadata["step_scores"]` to be an array of numbers.
#[derive(Debug, Clone)]
pub struct PrmVerifier {
    id: String,
    method: PrmMethod,
    threshold: f64,
}

impl Default for PrmVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PrmVerifier {
    pub fn new() -> Self {
        Self {
            id: BuiltinVerifier::Prm.as_str().to_string(),
            method: PrmMethod::default(),
            threshold: DEFAULT_PRM_THRESHOLD,
        }
    }

    /// Reads `method` (a `PrmMethod` name) and `threshold` (in [0, 1])
    pub fn from_config(config: &Metadata) -> Result<Self, VerifierError> {
        let mut verifier = Self::new();
        if let Some(method) = config.get("method") {
            let name = method
                .as_str()
                .ok_or_else(|| VerifierError::invalid_config("method must be a string"))?;
            verifier.method = name
                .parse()
                .map_err(|e: prm::PrmError| VerifierError::invalid_config(e.to_string()))?;
        }
        if let Some(threshold) = config.get("threshold") {
            let value = threshold
                .as_f64()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| VerifierError::invalid_config("threshold must be in [0, 1]"))?;
            verifier.threshold = value;
        }
        Ok(verifier)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_method(mut self, method: PrmMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn step_scores(candidate: &Candidate) -> Result<Vec<f64>, VerifierError> {
        let steps = candidate
            .metadata
            .get("step_scores")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                VerifierError::failed(format!("candidate '{}' has no step_scores", candidate.id))
            })?;
        steps
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| VerifierError::failed("step_scores must be numbers"))
            })
            .collect()
    }
}

impl Verifier for PrmVerifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn verify<'a>(
        &'a self,
        candidate: &'a Candidate,
        _context: &'a VerificationContext,
    ) -> BoxFuture<'a, Result<VerificationResult, VerifierError>> {
        Box::pin(async move {
            let steps = Self::step_scores(candidate)?;
            let score = prm::aggregate(self.method, &steps)
                .ok_or_else(|| VerifierError::failed("step_scores is empty"))?;

            let passing = steps.iter().filter(|s| **s >= self.threshold).count();
            let by_step: BTreeMap<String, f64> = steps
                .iter()
                .enumerate()
                .map(|(i, s)| (format!("step_{}", i + 1), *s))
                .collect();

            Ok(VerificationResult::new(&candidate.id, score)
                .with_confidence(passing as f64 / steps.len() as f64)
                .with_reasoning(format!(
                    "{}/{} steps at or above {:.2} ({} = {:.3})",
                    passing,
                    steps.len(),
                    self.threshold,
                    self.method,
                    score
                ))
                .with_step_scores(by_step)
                .with_metadata("prm_method", self.method.as_str())
                .with_metadata("passed", score >= self.threshold))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> VerificationContext {
        VerificationContext::new()
    }

    // ==========================================
    // ScoreVerifier Tests
    // ==========================================

    #[tokio::test]
    async fn test_score_verifier() {
        let c = Candidate::new("c1", "x").with_score(0.65);
        let r = ScoreVerifier::new().verify(&c, &ctx()).await.unwrap();
        assert_eq!(r.score, 0.65);
        assert_eq!(r.confidence, Some(1.0));
    }

    #[tokio::test]
    async fn test_score_verifier_requires_score() {
        let c = Candidate::new("c1", "x");
        assert!(ScoreVerifier::new().verify(&c, &ctx()).await.is_err());
    }

    // ==========================================
    // ReferenceMatchVerifier Tests
    // ==========================================

    #[tokio::test]
    async fn test_reference_match() {
        let v = ReferenceMatchVerifier::new();
        let context = ctx().with_reference("42");

        let hit = Candidate::new("a", "Adding up...\nThe answer is 42.");
        let r = v.verify(&hit, &context).await.unwrap();
        assert_eq!(r.score, 1.0);
        assert_eq!(r.metadata["matched"], true);

        let miss = Candidate::new("b", "\\boxed{41}");
        let r = v.verify(&miss, &context).await.unwrap();
        assert_eq!(r.score, 0.0);
        assert!(r.reasoning.contains("differs"));
    }

    #[tokio::test]
    async fn test_reference_match_without_reference_fails() {
        let v = ReferenceMatchVerifier::new();
        let err = v.verify(&Candidate::new("a", "1"), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("reference"));
    }

    #[test]
    fn test_reference_match_config() {
        let mut config = Metadata::new();
        config.insert("matcher".into(), json!("fuzzy"));
        assert!(matches!(
            ReferenceMatchVerifier::from_config(&config),
            Err(VerifierError::InvalidConfig { .. })
        ));
    }

    // ==========================================
    // PrmVerifier Tests
    // ==========================================

    #[tokio::test]
    async fn test_prm_verifier_min() {
        let c = Candidate::new("c", "trace").with_metadata("step_scores", json!([0.9, 0.4, 0.8]));
        let r = PrmVerifier::new().verify(&c, &ctx()).await.unwrap();

        assert_eq!(r.score, 0.4);
        assert_eq!(r.metadata["passed"], false);
        let steps = r.step_scores.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps["step_2"], 0.4);
        assert!((r.confidence.unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_prm_verifier_from_config() {
        let mut config = Metadata::new();
        config.insert("method".into(), json!("average"));
        config.insert("threshold".into(), json!(0.6));
        let v = PrmVerifier::from_config(&config).unwrap();

        let c = Candidate::new("c", "trace").with_metadata("step_scores", json!([0.5, 0.9]));
        let r = v.verify(&c, &ctx()).await.unwrap();
        assert!((r.score - 0.7).abs() < 1e-12);
        assert_eq!(r.metadata["passed"], true);
    }

    #[tokio::test]
    async fn test_prm_verifier_rejects_bad_input() {
        let v = PrmVerifier::new();
        let missing = Candidate::new("c", "trace");
        assert!(v.verify(&missing, &ctx()).await.is_err());

        let empty = Candidate::new("c", "trace").with_metadata("step_scores", json!([]));
        assert!(v.verify(&empty, &ctx()).await.is_err());

        let text = Candidate::new("c", "trace").with_metadata("step_scores", json!(["high"]));
        assert!(v.verify(&text, &ctx()).await.is_err());
    }

    #[test]
    fn test_prm_config_validation() {
        let mut config = Metadata::new();
        config.insert("method".into(), json!("median"));
        assert!(PrmVerifier::from_config(&config).is_err());

        let mut config = Metadata::new();
        config.insert("threshold".into(), json!(3));
        assert!(PrmVerifier::from_config(&config).is_err());
    }

    // ==========================================
    // Registry Tests
    // ==========================================

    #[test]
    fn test_registry_builds_with_id() {
        let v = BuiltinVerifier::Prm.build("steps", &Metadata::new()).unwrap();
        assert_eq!(v.id(), "steps");
        assert_eq!(
            "reference-match".parse::<BuiltinVerifier>(),
            Ok(BuiltinVerifier::ReferenceMatch)
        );
    }

    #[test]
    fn test_verifier_spec_deserializes_with_defaults() {
        let spec: VerifierSpec = serde_json::from_str(r#"{"kind": "score"}"#).unwrap();
        assert_eq!(spec.weight, 1.0);
        let config = spec.to_config();
        assert_eq!(config.id, "score");
    }
}
