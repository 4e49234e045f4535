//! Pipeline Configuration
//!
//! One JSON document configures the budgeter, the sampler and the verifier
//! ensemble. Every field is optional and falls back to the documented
//! default. Durations are written in milliseconds (`timeout_ms`).
//!
//! ```json
//! {
//!   "budgeter": { "global_limit": 40.0, "custom": { "tiny": { "num_candidates": 1 } } },
//!   "self_consistency": { "min_candidates": 3, "early_stop_threshold": 0.8, "timeout_ms": 30000 },
//!   "verification": {
//!     "parallel": true,
//!     "aggregation": "weighted_avg",
//!     "verifiers": [{ "kind": "prm", "weight": 2.0, "config": { "method": "min" } }]
//!   },
//!   "default_difficulty": "medium"
//! }
//! ```

use crate::core::budget::{BudgetParams, ComputeBudget};
use crate::core::budgeter::ComputeBudgeter;
use crate::core::difficulty::DifficultyLevel;
use crate::core::self_consistency::{AdaptiveSelfConsistency, SelfConsistencyConfig};
use crate::verification::builtin::VerifierSpec;
use crate::verification::runner::{VerificationConfig, VerificationRunner};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Serialize a `Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serialize an optional `Duration` as milliseconds or `null`
pub mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis().min(u64::MAX as u128) as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

/// Errors from loading or validating configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Document is not valid JSON for this schema
    Parse { message: String },
    /// File could not be read
    Io { path: String, message: String },
    /// Document parsed but describes an unusable pipeline
    Invalid { errors: Vec<String> },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            errors: vec![message.into()],
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { message } => write!(f, "failed to parse config: {}", message),
            ConfigError::Io { path, message } => {
                write!(f, "failed to read config '{}': {}", path, message)
            }
            ConfigError::Invalid { errors } => {
                write!(f, "invalid config: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Budgeter section: preset overrides, custom levels and the global limit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgeterConfig {
    pub global_limit: Option<f64>,
    pub easy: Option<BudgetParams>,
    pub medium: Option<BudgetParams>,
    pub hard: Option<BudgetParams>,
    /// Named allocations reachable through `DifficultyInput::Custom`
    pub custom: BTreeMap<String, BudgetParams>,
}

impl BudgeterConfig {
    /// Build the configured budgeter
    pub fn build(&self) -> Result<ComputeBudgeter, ConfigError> {
        let mut budgeter = ComputeBudgeter::new();
        if let Some(limit) = self.global_limit {
            budgeter = budgeter
                .with_global_limit(limit)
                .map_err(|e| ConfigError::invalid(format!("budgeter: {}", e)))?;
        }

        let presets = [
            (DifficultyLevel::Easy, &self.easy),
            (DifficultyLevel::Medium, &self.medium),
            (DifficultyLevel::Hard, &self.hard),
        ];
        for (level, params) in presets {
            if let Some(params) = params {
                let budget = ComputeBudget::new(params.clone())
                    .map_err(|e| ConfigError::invalid(format!("budgeter.{}: {}", level, e)))?;
                budgeter = budgeter.with_level_budget(level, budget);
            }
        }

        for (name, params) in &self.custom {
            let budget = ComputeBudget::new(params.clone())
                .map_err(|e| ConfigError::invalid(format!("budgeter.custom.{}: {}", name, e)))?;
            budgeter = budgeter.with_custom_allocation(name.clone(), budget);
        }

        Ok(budgeter)
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if let Some(limit) = self.global_limit {
            if !limit.is_finite() || limit < 0.0 {
                errors.push(format!(
                    "budgeter.global_limit must be finite and >= 0, got {}",
                    limit
                ));
            }
        }
        let presets = [("easy", &self.easy), ("medium", &self.medium), ("hard", &self.hard)];
        let named = presets
            .into_iter()
            .filter_map(|(name, params)| params.as_ref().map(|p| (format!("budgeter.{}", name), p)))
            .chain(
                self.custom
                    .iter()
                    .map(|(name, p)| (format!("budgeter.custom.{}", name), p)),
            );
        for (path, params) in named {
            if let Err(e) = ComputeBudget::new(params.clone()) {
                errors.push(format!("{}: {}", path, e));
            }
        }
    }
}

/// Verification section: runner settings plus declarative verifiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSection {
    pub verifiers: Vec<VerifierSpec>,
    #[serde(flatten)]
    pub settings: VerificationConfig,
}

impl VerificationSection {
    fn collect_errors(&self, errors: &mut Vec<String>) {
        if let Err(e) = self.settings.validate() {
            errors.push(format!("verification: {}", e));
        }
        for (i, spec) in self.verifiers.iter().enumerate() {
            let id = spec.id.clone().unwrap_or_else(|| spec.kind.to_string());
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                errors.push(format!(
                    "verification.verifiers[{}] ({}): weight must be finite and >= 0, got {}",
                    i, id, spec.weight
                ));
            }
            if let Err(e) = spec.kind.build(&id, &spec.config) {
                errors.push(format!("verification.verifiers[{}] ({}): {}", i, id, e));
            }
        }
    }
}

/// Whole-pipeline configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub budgeter: BudgeterConfig,
    pub self_consistency: SelfConsistencyConfig,
    pub verification: VerificationSection,
    /// Used when no difficulty estimator is supplied
    pub default_difficulty: DifficultyLevel,
}

impl PipelineConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Read and parse a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    pub fn with_global_limit(mut self, limit: f64) -> Self {
        self.budgeter.global_limit = Some(limit);
        self
    }

    pub fn with_self_consistency(mut self, config: SelfConsistencyConfig) -> Self {
        self.self_consistency = config;
        self
    }

    pub fn with_verification(mut self, settings: VerificationConfig) -> Self {
        self.verification.settings = settings;
        self
    }

    pub fn with_verifier(mut self, spec: VerifierSpec) -> Self {
        self.verification.verifiers.push(spec);
        self
    }

    pub fn with_default_difficulty(mut self, level: DifficultyLevel) -> Self {
        self.default_difficulty = level;
        self
    }

    /// Check every section, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.budgeter.collect_errors(&mut errors);
        if let Err(e) = self.self_consistency.validate() {
            errors.push(format!("self_consistency: {}", e));
        }
        self.verification.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }

    pub fn budgeter(&self) -> Result<ComputeBudgeter, ConfigError> {
        self.budgeter.build()
    }

    pub fn sampler(&self) -> Result<AdaptiveSelfConsistency, ConfigError> {
        AdaptiveSelfConsistency::new(self.self_consistency.clone())
            .map_err(|e| ConfigError::invalid(format!("self_consistency: {}", e)))
    }

    /// Runner for the configured verifiers, `None` when there are none
    pub fn verification_runner(&self) -> Result<Option<VerificationRunner>, ConfigError> {
        if self.verification.verifiers.is_empty() {
            return Ok(None);
        }
        let verifiers = self
            .verification
            .verifiers
            .iter()
            .map(VerifierSpec::to_config)
            .collect();
        VerificationRunner::new(self.verification.settings.clone(), verifiers)
            .map(Some)
            .map_err(|e| ConfigError::invalid(format!("verification: {}", e)))
    }
}
