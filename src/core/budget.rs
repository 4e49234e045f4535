//! Compute Budgets
//!
//! A `ComputeBudget` describes one allocation of test-time compute: how many
//! candidates to sample, whether to score them with a process reward model,
//! whether to run a search, and how many refinement rounds are allowed.
//!
//! # Cost Model
//!
//! ```text
//! cost = n * 1.0
//!      + (use_prm    ? n * 0.5                  : 0)
//!      + (use_search ? search_iterations * 0.01 : 0)
//!      + max_refinements * 1.0
//! ```
//!
//! The cost is always derived from the other fields. It is recomputed on
//! construction and on `from_map`, and cannot be set independently.

use crate::core::candidate::Metadata;
use crate::core::difficulty::DifficultyLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Search iterations used when search is enabled without an explicit count
pub const DEFAULT_SEARCH_ITERATIONS: usize = 50;

/// Default PRM acceptance threshold
pub const DEFAULT_PRM_THRESHOLD: f64 = 0.5;

const COST_PER_CANDIDATE: f64 = 1.0;
const PRM_COST_PER_CANDIDATE: f64 = 0.5;
const COST_PER_SEARCH_ITERATION: f64 = 0.01;
const COST_PER_REFINEMENT: f64 = 1.0;

/// Errors from budget construction and allocation
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetError {
    /// `num_candidates` missing, zero, negative or not an integer
    InvalidNumCandidates {
        /// The offending value, rendered for diagnostics
        found: String,
    },
    /// `search_iterations` was given but is not a positive integer
    InvalidSearchIterations {
        found: String,
    },
    /// Some other field in a budget map has the wrong type
    InvalidField {
        field: String,
        reason: String,
    },
    /// Global limit is negative or not finite
    InvalidLimit {
        limit: f64,
    },
    /// Usage to record is negative or not finite
    InvalidCost {
        cost: f64,
    },
    /// Allocation would push used budget past the global limit
    BudgetExhausted {
        requested: f64,
        used: f64,
        limit: f64,
    },
    /// Named custom level was never registered
    UnknownLevel {
        level: String,
    },
}

impl BudgetError {
    /// Resource errors may succeed on retry with a larger budget
    pub fn is_resource(&self) -> bool {
        matches!(self, BudgetError::BudgetExhausted { .. })
    }
}

impl std::fmt::Display for BudgetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetError::InvalidNumCandidates { found } => {
                write!(f, "num_candidates must be a positive integer, got {}", found)
            }
            BudgetError::InvalidSearchIterations { found } => {
                write!(
                    f,
                    "search_iterations must be a positive integer, got {}",
                    found
                )
            }
            BudgetError::InvalidField { field, reason } => {
                write!(f, "invalid budget field '{}': {}", field, reason)
            }
            BudgetError::InvalidLimit { limit } => {
                write!(f, "global limit must be finite and >= 0, got {}", limit)
            }
            BudgetError::InvalidCost { cost } => {
                write!(f, "tracked cost must be finite and >= 0, got {}", cost)
            }
            BudgetError::BudgetExhausted {
                requested,
                used,
                limit,
            } => {
                write!(
                    f,
                    "budget exhausted: requested {:.2} with {:.2} of {:.2} used",
                    requested, used, limit
                )
            }
            BudgetError::UnknownLevel { level } => {
                write!(f, "unknown difficulty level '{}'", level)
            }
        }
    }
}

impl std::error::Error for BudgetError {}

/// Inputs for building a `ComputeBudget`.
///
/// Deserializable so budgets can be declared in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetParams {
    pub num_candidates: usize,
    #[serde(default)]
    pub use_prm: bool,
    #[serde(default)]
    pub use_search: bool,
    #[serde(default)]
    pub max_refinements: usize,
    #[serde(default)]
    pub search_iterations: Option<usize>,
    #[serde(default)]
    pub prm_threshold: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl BudgetParams {
    /// Parameters for `num_candidates` plain samples
    pub fn new(num_candidates: usize) -> Self {
        Self {
            num_candidates,
            use_prm: false,
            use_search: false,
            max_refinements: 0,
            search_iterations: None,
            prm_threshold: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_prm(mut self, use_prm: bool) -> Self {
        self.use_prm = use_prm;
        self
    }

    pub fn with_search(mut self, use_search: bool) -> Self {
        self.use_search = use_search;
        self
    }

    pub fn with_search_iterations(mut self, iterations: usize) -> Self {
        self.search_iterations = Some(iterations);
        self
    }

    pub fn with_max_refinements(mut self, refinements: usize) -> Self {
        self.max_refinements = refinements;
        self
    }

    pub fn with_prm_threshold(mut self, threshold: f64) -> Self {
        self.prm_threshold = Some(threshold);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validate and build the budget
    pub fn build(self) -> Result<ComputeBudget, BudgetError> {
        ComputeBudget::new(self)
    }
}

/// One immutable allocation of compute for a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeBudget {
    num_candidates: usize,
    use_prm: bool,
    use_search: bool,
    max_refinements: usize,
    search_iterations: Option<usize>,
    prm_threshold: f64,
    cost: f64,
    metadata: Metadata,
}

impl ComputeBudget {
    /// Validate parameters and derive the cost.
    ///
    /// # Errors
    ///
    /// - `InvalidNumCandidates` when `num_candidates` is 0
    /// - `InvalidSearchIterations` when an explicit iteration count is 0
    pub fn new(params: BudgetParams) -> Result<Self, BudgetError> {
        if params.num_candidates == 0 {
            return Err(BudgetError::InvalidNumCandidates {
                found: "0".to_string(),
            });
        }
        if params.search_iterations == Some(0) {
            return Err(BudgetError::InvalidSearchIterations {
                found: "0".to_string(),
            });
        }

        Ok(Self::assemble(params))
    }

    /// 3 plain samples (cost 3.0)
    pub fn easy() -> Self {
        Self::assemble(BudgetParams::new(3))
    }

    /// 5 samples scored by a PRM with one refinement (cost 8.5)
    pub fn medium() -> Self {
        Self::assemble(BudgetParams::new(5).with_prm(true).with_max_refinements(1))
    }

    /// 10 PRM-scored samples, 50 search iterations, two refinements (cost 17.5)
    pub fn hard() -> Self {
        Self::assemble(
            BudgetParams::new(10)
                .with_prm(true)
                .with_search(true)
                .with_search_iterations(DEFAULT_SEARCH_ITERATIONS)
                .with_max_refinements(2),
        )
    }

    /// Preset for a difficulty level
    pub fn for_level(level: DifficultyLevel) -> Self {
        match level {
            DifficultyLevel::Easy => Self::easy(),
            DifficultyLevel::Medium => Self::medium(),
            DifficultyLevel::Hard => Self::hard(),
        }
    }

    // Callers guarantee `num_candidates >= 1` and no zero iteration count.
    fn assemble(params: BudgetParams) -> Self {
        let search_iterations = params
            .search_iterations
            .or(params.use_search.then_some(DEFAULT_SEARCH_ITERATIONS));
        let mut budget = Self {
            num_candidates: params.num_candidates,
            use_prm: params.use_prm,
            use_search: params.use_search,
            max_refinements: params.max_refinements,
            search_iterations,
            prm_threshold: params.prm_threshold.unwrap_or(DEFAULT_PRM_THRESHOLD),
            cost: 0.0,
            metadata: params.metadata,
        };
        budget.cost = budget.compute_cost();
        budget
    }

    fn compute_cost(&self) -> f64 {
        let n = self.num_candidates as f64;
        let mut cost = n * COST_PER_CANDIDATE;
        if self.use_prm {
            cost += n * PRM_COST_PER_CANDIDATE;
        }
        if self.use_search {
            let iterations = self.search_iterations.unwrap_or(DEFAULT_SEARCH_ITERATIONS);
            cost += iterations as f64 * COST_PER_SEARCH_ITERATION;
        }
        cost + self.max_refinements as f64 * COST_PER_REFINEMENT
    }

    pub fn num_candidates(&self) -> usize {
        self.num_candidates
    }

    pub fn use_prm(&self) -> bool {
        self.use_prm
    }

    pub fn use_search(&self) -> bool {
        self.use_search
    }

    pub fn max_refinements(&self) -> usize {
        self.max_refinements
    }

    pub fn search_iterations(&self) -> Option<usize> {
        self.search_iterations
    }

    pub fn prm_threshold(&self) -> f64 {
        self.prm_threshold
    }

    /// Derived cost of this allocation
    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Parameters that rebuild this budget
    pub fn to_params(&self) -> BudgetParams {
        BudgetParams {
            num_candidates: self.num_candidates,
            use_prm: self.use_prm,
            use_search: self.use_search,
            max_refinements: self.max_refinements,
            search_iterations: self.search_iterations,
            prm_threshold: Some(self.prm_threshold),
            metadata: self.metadata.clone(),
        }
    }

    /// Flatten into a JSON object, including the derived cost
    pub fn to_map(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("num_candidates".into(), Value::from(self.num_candidates));
        map.insert("use_prm".into(), Value::from(self.use_prm));
        map.insert("use_search".into(), Value::from(self.use_search));
        map.insert("max_refinements".into(), Value::from(self.max_refinements));
        map.insert(
            "search_iterations".into(),
            self.search_iterations.map(Value::from).unwrap_or(Value::Null),
        );
        map.insert("prm_threshold".into(), Value::from(self.prm_threshold));
        map.insert("cost".into(), Value::from(self.cost));
        map.insert("metadata".into(), Value::Object(self.metadata.clone()));
        map
    }

    /// Rebuild a budget from a JSON object.
    ///
    /// Any `cost` key is ignored and the cost is recomputed.
    pub fn from_map(map: &Metadata) -> Result<Self, BudgetError> {
        let num_candidates = match map.get("num_candidates") {
            Some(value) => match value.as_u64() {
                Some(n) => n as usize,
                None => {
                    return Err(BudgetError::InvalidNumCandidates {
                        found: value.to_string(),
                    })
                }
            },
            None => {
                return Err(BudgetError::InvalidNumCandidates {
                    found: "missing".to_string(),
                })
            }
        };

        let search_iterations = match map.get("search_iterations") {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_u64() {
                Some(n) => Some(n as usize),
                None => {
                    return Err(BudgetError::InvalidSearchIterations {
                        found: value.to_string(),
                    })
                }
            },
        };

        let metadata = match map.get("metadata") {
            None | Some(Value::Null) => Metadata::new(),
            Some(Value::Object(inner)) => inner.clone(),
            Some(other) => {
                return Err(BudgetError::InvalidField {
                    field: "metadata".to_string(),
                    reason: format!("expected an object, got {}", other),
                })
            }
        };

        Self::new(BudgetParams {
            num_candidates,
            use_prm: bool_field(map, "use_prm")?,
            use_search: bool_field(map, "use_search")?,
            max_refinements: count_field(map, "max_refinements")?,
            search_iterations,
            prm_threshold: float_field(map, "prm_threshold")?,
            metadata,
        })
    }
}

fn bool_field(map: &Metadata, field: &str) -> Result<bool, BudgetError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(BudgetError::InvalidField {
            field: field.to_string(),
            reason: format!("expected a boolean, got {}", other),
        }),
    }
}

fn count_field(map: &Metadata, field: &str) -> Result<usize, BudgetError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| BudgetError::InvalidField {
                field: field.to_string(),
                reason: format!("expected a non-negative integer, got {}", value),
            }),
    }
}

fn float_field(map: &Metadata, field: &str) -> Result<Option<f64>, BudgetError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| BudgetError::InvalidField {
                field: field.to_string(),
                reason: format!("expected a number, got {}", value),
            }),
    }
}
