//! Step-Score Combinators for Process Reward Models
//!
//! A process reward model scores every step of a reasoning trace. The
//! functions here fold those step scores into a single scalar. They are pure:
//! no state, no I/O, no concurrency.
//!
//! # Empty Inputs
//!
//! | function            | empty input |
//! |---------------------|-------------|
//! | `sum`               | 0.0         |
//! | `product`           | 1.0         |
//! | `min` / `max`       | `None`      |
//! | `average`           | `None`      |
//! | `normalize_weights` | `[]`        |
//!
//! `normalize_weights` over non-empty weights summing to zero gives `[0.0]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Allowed distance of a weight sum from 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

/// Errors from misuse of the combinators
#[derive(Debug, Clone, PartialEq)]
pub enum PrmError {
    /// Scores and weights have different lengths
    WeightLengthMismatch {
        scores: usize,
        weights: usize,
    },
    /// Weights do not sum to 1.0 within tolerance
    WeightsNotNormalized {
        sum: f64,
    },
    /// Unrecognized aggregation method name
    UnknownMethod {
        name: String,
    },
}

impl fmt::Display for PrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrmError::WeightLengthMismatch { scores, weights } => write!(
                f,
                "weights must match scores in length ({} scores, {} weights)",
                scores, weights
            ),
            PrmError::WeightsNotNormalized { sum } => {
                write!(f, "weights must sum to 1.0 (±{}), got {}", WEIGHT_SUM_TOLERANCE, sum)
            }
            PrmError::UnknownMethod { name } => {
                write!(
                    f,
                    "unknown PRM method '{}' (expected sum, product, min, max, average or last)",
                    name
                )
            }
        }
    }
}

impl std::error::Error for PrmError {}

/// Sum of scores (0.0 when empty)
pub fn sum(scores: &[f64]) -> f64 {
    scores.iter().sum()
}

/// Product of scores (1.0 when empty)
pub fn product(scores: &[f64]) -> f64 {
    scores.iter().product()
}

/// Smallest score
pub fn min(scores: &[f64]) -> Option<f64> {
    scores.iter().copied().reduce(f64::min)
}

/// Largest score
pub fn max(scores: &[f64]) -> Option<f64> {
    scores.iter().copied().reduce(f64::max)
}

/// Arithmetic mean
pub fn average(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        None
    } else {
        Some(sum(scores) / scores.len() as f64)
    }
}

/// Weighted mean with weights that already sum to 1.0.
///
/// # Errors
///
/// - `WeightLengthMismatch` if the slices differ in length
/// - `WeightsNotNormalized` if the weights sum outside `1.0 ± 0.001`
pub fn weighted_average(scores: &[f64], weights: &[f64]) -> Result<f64, PrmError> {
    if scores.len() != weights.len() {
        return Err(PrmError::WeightLengthMismatch {
            scores: scores.len(),
            weights: weights.len(),
        });
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(PrmError::WeightsNotNormalized { sum: total });
    }
    Ok(scores.iter().zip(weights).map(|(s, w)| s * w).sum())
}

/// Rescale weights to sum to 1.0.
///
/// Empty input stays empty; a zero total yields `[0.0]`.
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return vec![0.0];
    }
    weights.iter().map(|w| w / total).collect()
}

/// Linearly rescale scores into `range`.
///
/// When every score is equal, each maps to the midpoint of the range.
pub fn normalize_scores(scores: &[f64], range: (f64, f64)) -> Vec<f64> {
    let (low, high) = range;
    let (Some(lo), Some(hi)) = (min(scores), max(scores)) else {
        return Vec::new();
    };
    if hi == lo {
        let midpoint = (low + high) / 2.0;
        return vec![midpoint; scores.len()];
    }
    scores
        .iter()
        .map(|s| low + (s - lo) / (hi - lo) * (high - low))
        .collect()
}

/// Softmax, stabilized by subtracting the maximum before exponentiating
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    let Some(peak) = max(scores) else {
        return Vec::new();
    };
    let exps: Vec<f64> = scores.iter().map(|s| (s - peak).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// How a verifier folds step scores into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrmMethod {
    Sum,
    Product,
    /// Weakest step decides (default)
    #[default]
    Min,
    Max,
    Average,
    /// Score of the final step only
    Last,
}

impl PrmMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrmMethod::Sum => "sum",
            PrmMethod::Product => "product",
            PrmMethod::Min => "min",
            PrmMethod::Max => "max",
            PrmMethod::Average => "average",
            PrmMethod::Last => "last",
        }
    }
}

impl fmt::Display for PrmMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrmMethod {
    type Err = PrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(PrmMethod::Sum),
            "product" | "prod" => Ok(PrmMethod::Product),
            "min" => Ok(PrmMethod::Min),
            "max" => Ok(PrmMethod::Max),
            "average" | "mean" | "avg" => Ok(PrmMethod::Average),
            "last" => Ok(PrmMethod::Last),
            other => Err(PrmError::UnknownMethod {
                name: other.to_string(),
            }),
        }
    }
}

/// Fold `scores` with `method`; `None` when the method has no value for an empty list
pub fn aggregate(method: PrmMethod, scores: &[f64]) -> Option<f64> {
    match method {
        PrmMethod::Sum => Some(sum(scores)),
        PrmMethod::Product => Some(product(scores)),
        PrmMethod::Min => min(scores),
        PrmMethod::Max => max(scores),
        PrmMethod::Average => average(scores),
        PrmMethod::Last => scores.last().copied(),
    }
}
