//! Combining verifier results
//!
//! `weighted_avg` is the only strategy that uses weights. The folding
//! strategies skip non-finite scores, and every strategy returns 0.0 when
//! nothing is left to combine (including `product`).

use super::VerificationResult;
use crate::core::candidate::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Confidence assumed for results that carry none
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Metadata key holding how many verifier results went into a combined one
pub const VERIFIER_COUNT_KEY: &str = "verifier_count";

/// How surviving scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// `Σ(score·weight) / Σweight`
    #[default]
    WeightedAvg,
    Max,
    Min,
    Sum,
    Product,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::WeightedAvg => "weighted_avg",
            AggregationStrategy::Max => "max",
            AggregationStrategy::Min => "min",
            AggregationStrategy::Sum => "sum",
            AggregationStrategy::Product => "product",
        }
    }

    /// Combine `(score, weight)` pairs
    pub fn apply(&self, scored: &[(f64, f64)]) -> f64 {
        match self {
            AggregationStrategy::WeightedAvg => {
                let total_weight: f64 = scored.iter().map(|(_, w)| w).sum();
                if total_weight <= 0.0 || !total_weight.is_finite() {
                    return 0.0;
                }
                let weighted: f64 = scored
                    .iter()
                    .map(|(s, w)| if s.is_finite() { s * w } else { 0.0 })
                    .sum();
                weighted / total_weight
            }
            AggregationStrategy::Max => fold_finite(scored, f64::max),
            AggregationStrategy::Min => fold_finite(scored, f64::min),
            AggregationStrategy::Sum => fold_finite(scored, |a, b| a + b),
            AggregationStrategy::Product => fold_finite(scored, |a, b| a * b),
        }
    }
}

fn fold_finite(scored: &[(f64, f64)], f: impl Fn(f64, f64) -> f64) -> f64 {
    scored
        .iter()
        .map(|(s, _)| *s)
        .filter(|s| s.is_finite())
        .reduce(f)
        .unwrap_or(0.0)
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "weighted_avg" | "weighted_average" => Ok(AggregationStrategy::WeightedAvg),
            "max" => Ok(AggregationStrategy::Max),
            "min" => Ok(AggregationStrategy::Min),
            "sum" => Ok(AggregationStrategy::Sum),
            "product" => Ok(AggregationStrategy::Product),
            other => Err(format!(
                "aggregation must be one of weighted_avg, max, min, sum, product; got '{}'",
                other
            )),
        }
    }
}

/// What to do when one verifier fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log the failure and leave the verifier out of aggregation
    #[default]
    Continue,
    /// Abort the whole verification
    Halt,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(ErrorPolicy::Continue),
            "halt" => Ok(ErrorPolicy::Halt),
            other => Err(format!("on_error must be continue or halt, got '{}'", other)),
        }
    }
}

/// Merge weighted results into one.
///
/// Confidence is the mean of per-result confidences (absent counts as 0.5),
/// reasoning strings are joined with `"; "`, and metadata and step scores
/// are shallow-merged with later results winning. No results gives score
/// 0.0 and confidence 0.0.
///
/// The number of combined results is recorded under [`VERIFIER_COUNT_KEY`].
pub fn combine(
    candidate_id: &str,
    results: &[(VerificationResult, f64)],
    strategy: AggregationStrategy,
) -> VerificationResult {
    if results.is_empty() {
        return VerificationResult::empty(candidate_id).with_metadata(VERIFIER_COUNT_KEY, 0);
    }

    let scored: Vec<(f64, f64)> = results.iter().map(|(r, w)| (r.score, *w)).collect();
    let score = strategy.apply(&scored);

    let confidence = results
        .iter()
        .map(|(r, _)| r.confidence.unwrap_or(DEFAULT_CONFIDENCE))
        .sum::<f64>()
        / results.len() as f64;

    let reasoning = results
        .iter()
        .map(|(r, _)| r.reasoning.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    let mut metadata = Metadata::new();
    let mut step_scores: Option<BTreeMap<String, f64>> = None;
    for (result, _) in results {
        for (key, value) in &result.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        if let Some(steps) = &result.step_scores {
            step_scores
                .get_or_insert_with(BTreeMap::new)
                .extend(steps.iter().map(|(k, v)| (k.clone(), *v)));
        }
    }
    metadata.insert(VERIFIER_COUNT_KEY.to_string(), results.len().into());

    VerificationResult {
        candidate_id: candidate_id.to_string(),
        score,
        confidence: Some(confidence),
        reasoning,
        step_scores,
        metadata,
    }
}
