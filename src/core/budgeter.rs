//! Functional Compute Budgeter
//!
//! Maps a difficulty level to a `ComputeBudget` and tracks cumulative spend
//! against an optional global limit.
//!
//! # Ownership
//!
//! `ComputeBudgeter` is a plain value. `allocate`, `track_usage` and
//! `reset_budget` never mutate `self`; they return an updated budgeter that
//! the caller threads into the next call. There is no internal locking:
//! callers sharing one budgeter across tasks must serialize the
//! read-modify-write themselves (an owning task or a mutex around it).
//!
//! ```rust
//! use convergence::core::{ComputeBudgeter, DifficultyLevel};
//!
//! let budgeter = ComputeBudgeter::new().with_global_limit(10.0).unwrap();
//! let (_, budgeter) = budgeter.allocate(DifficultyLevel::Medium).unwrap(); // 8.5
//! assert!(budgeter.allocate(DifficultyLevel::Easy).is_err()); // 8.5 + 3.0 > 10.0
//! ```

use crate::core::budget::{BudgetError, ComputeBudget};
use crate::core::difficulty::{DifficultyEstimate, DifficultyLevel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// What to allocate for: a standard level, a named custom allocation, or the
/// output of a difficulty estimator.
#[derive(Debug, Clone, PartialEq)]
pub enum DifficultyInput {
    Level(DifficultyLevel),
    Custom(String),
    Estimate(DifficultyEstimate),
}

impl From<DifficultyLevel> for DifficultyInput {
    fn from(level: DifficultyLevel) -> Self {
        DifficultyInput::Level(level)
    }
}

impl From<DifficultyEstimate> for DifficultyInput {
    fn from(estimate: DifficultyEstimate) -> Self {
        DifficultyInput::Estimate(estimate)
    }
}

impl From<&str> for DifficultyInput {
    /// Standard level names resolve to levels; anything else is a custom name
    fn from(name: &str) -> Self {
        match name.parse::<DifficultyLevel>() {
            Ok(level) => DifficultyInput::Level(level),
            Err(_) => DifficultyInput::Custom(name.to_string()),
        }
    }
}

impl From<String> for DifficultyInput {
    fn from(name: String) -> Self {
        DifficultyInput::from(name.as_str())
    }
}

impl fmt::Display for DifficultyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifficultyInput::Level(level) => write!(f, "{}", level),
            DifficultyInput::Custom(name) => f.write_str(name),
            DifficultyInput::Estimate(estimate) => {
                write!(f, "{} (score {:.2})", estimate.level, estimate.score)
            }
        }
    }
}

/// Budget left under the global limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Remaining {
    Finite(f64),
    /// No global limit configured
    Infinite,
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Finite(value) => write!(f, "{:.2}", value),
            Remaining::Infinite => f.write_str("infinite"),
        }
    }
}

/// Snapshot of budgeter usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub used_budget: f64,
    pub allocation_count: usize,
    pub remaining: Remaining,
    /// `used_budget / allocation_count`, or 0.0 before any allocation
    pub average_cost: f64,
}

/// Stateful allocator threaded by value through a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeBudgeter {
    easy: ComputeBudget,
    medium: ComputeBudget,
    hard: ComputeBudget,
    global_limit: Option<f64>,
    used_budget: f64,
    allocation_count: usize,
    custom: BTreeMap<String, ComputeBudget>,
}

impl Default for ComputeBudgeter {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBudgeter {
    /// Budgeter with the standard presets and no global limit
    pub fn new() -> Self {
        Self {
            easy: ComputeBudget::easy(),
            medium: ComputeBudget::medium(),
            hard: ComputeBudget::hard(),
            global_limit: None,
            used_budget: 0.0,
            allocation_count: 0,
            custom: BTreeMap::new(),
        }
    }

    /// Cap cumulative cost at `limit`.
    ///
    /// # Errors
    ///
    /// Returns `BudgetError::InvalidLimit` if the limit is negative or not finite
    pub fn with_global_limit(mut self, limit: f64) -> Result<Self, BudgetError> {
        if !limit.is_finite() || limit < 0.0 {
            return Err(BudgetError::InvalidLimit { limit });
        }
        self.global_limit = Some(limit);
        Ok(self)
    }

    /// Replace the budget used for one standard level
    pub fn with_level_budget(mut self, level: DifficultyLevel, budget: ComputeBudget) -> Self {
        match level {
            DifficultyLevel::Easy => self.easy = budget,
            DifficultyLevel::Medium => self.medium = budget,
            DifficultyLevel::Hard => self.hard = budget,
        }
        self
    }

    /// Register a named custom allocation
    pub fn with_custom_allocation(mut self, name: impl Into<String>, budget: ComputeBudget) -> Self {
        self.custom.insert(name.into(), budget);
        self
    }

    pub fn global_limit(&self) -> Option<f64> {
        self.global_limit
    }

    pub fn used_budget(&self) -> f64 {
        self.used_budget
    }

    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Budget configured for a standard level
    pub fn budget_for(&self, level: DifficultyLevel) -> &ComputeBudget {
        match level {
            DifficultyLevel::Easy => &self.easy,
            DifficultyLevel::Medium => &self.medium,
            DifficultyLevel::Hard => &self.hard,
        }
    }

    /// Names of registered custom allocations
    pub fn custom_levels(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    fn resolve(&self, input: &DifficultyInput) -> Result<&ComputeBudget, BudgetError> {
        match input {
            DifficultyInput::Level(level) => Ok(self.budget_for(*level)),
            DifficultyInput::Estimate(estimate) => Ok(self.budget_for(estimate.level)),
            DifficultyInput::Custom(name) => {
                self.custom
                    .get(name)
                    .ok_or_else(|| BudgetError::UnknownLevel {
                        level: name.clone(),
                    })
            }
        }
    }

    /// Allocate a budget for `input`.
    ///
    /// Returns the budget together with the updated budgeter. `self` is left
    /// untouched, so a failed allocation needs no rollback.
    ///
    /// # Errors
    ///
    /// - `UnknownLevel` for an unregistered custom name
    /// - `BudgetExhausted` when `used + cost` would exceed the global limit
    pub fn allocate(
        &self,
        input: impl Into<DifficultyInput>,
    ) -> Result<(ComputeBudget, ComputeBudgeter), BudgetError> {
        let input = input.into();
        let budget = self.resolve(&input)?.clone();
        let cost = budget.cost();

        if let Some(limit) = self.global_limit {
            if self.used_budget + cost > limit {
                warn!(
                    level = %input,
                    requested = cost,
                    used = self.used_budget,
                    limit,
                    "Compute budget exhausted"
                );
                return Err(BudgetError::BudgetExhausted {
                    requested: cost,
                    used: self.used_budget,
                    limit,
                });
            }
        }

        let mut next = self.clone();
        next.used_budget += cost;
        next.allocation_count += 1;

        debug!(
            level = %input,
            cost,
            used = next.used_budget,
            allocations = next.allocation_count,
            "Allocated compute budget"
        );

        Ok((budget, next))
    }

    /// Record compute spent outside `allocate` (e.g. an unplanned retry).
    ///
    /// Tracked usage counts as an allocation but is not checked against the
    /// global limit: it reports spend that already happened.
    pub fn track_usage(&self, cost: f64) -> Result<ComputeBudgeter, BudgetError> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(BudgetError::InvalidCost { cost });
        }
        let mut next = self.clone();
        next.used_budget += cost;
        next.allocation_count += 1;
        Ok(next)
    }

    /// Clear counters, keeping presets, custom allocations and the limit
    pub fn reset_budget(&self) -> ComputeBudgeter {
        let mut next = self.clone();
        next.used_budget = 0.0;
        next.allocation_count = 0;
        next
    }

    /// Current usage snapshot
    pub fn usage_stats(&self) -> UsageStats {
        let remaining = match self.global_limit {
            Some(limit) => Remaining::Finite((limit - self.used_budget).max(0.0)),
            None => Remaining::Infinite,
        };
        let average_cost = if self.allocation_count == 0 {
            0.0
        } else {
            self.used_budget / self.allocation_count as f64
        };
        UsageStats {
            used_budget: self.used_budget,
            allocation_count: self.allocation_count,
            remaining,
            average_cost,
        }
    }
}
