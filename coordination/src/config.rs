//! Router configuration: TOML file, environment overrides, load-time validation.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`ROUTER_SESSION_TIMEOUT_SECS`, ...)
//! 2. Values in the TOML file
//! 3. Built-in defaults (four-rung ladder, 10 minute sessions)
//!
//! ```toml
//! session_timeout_secs = 600
//! error_repeat_window = 2
//!
//! [[levels]]
//! name = "fast"
//! cost_weight = 1.0
//! confidence_threshold = 0.6
//! max_attempts = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::{
    CapabilityLevel, DetectionScope, DetectorConfig, EscalationHierarchy, EscalationPolicy,
    HierarchyError,
};
use crate::router::{ComplexityTable, ComplexityTableError};

const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_TOTAL_ATTEMPTS: u32 = 12;
const DEFAULT_ERROR_REPEAT_WINDOW: usize = 3;
const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CANCEL_GRACE_MS: u64 = 250;
const DEFAULT_RECENT_ERROR_COUNT: usize = 3;

pub const ENV_SESSION_TIMEOUT_SECS: &str = "ROUTER_SESSION_TIMEOUT_SECS";
pub const ENV_MAX_TOTAL_ATTEMPTS: &str = "ROUTER_MAX_TOTAL_ATTEMPTS";
pub const ENV_ERROR_REPEAT_WINDOW: &str = "ROUTER_ERROR_REPEAT_WINDOW";
pub const ENV_COST_BUDGET: &str = "ROUTER_COST_BUDGET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("invalid complexity table: {0}")]
    ComplexityTable(#[from] ComplexityTableError),

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("environment override {var}={value:?} is not a valid value")]
    EnvOverride { var: &'static str, value: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Static routing configuration, shared read-only across sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub levels: Vec<CapabilityLevel>,
    pub session_timeout_secs: u64,
    pub attempt_timeout_secs: u64,
    pub max_total_attempts: u32,
    /// K for the repeated-error check.
    pub error_repeat_window: usize,
    pub ledger_capacity: usize,
    pub classifier_timeout_secs: u64,
    /// Time a cancelled capability gets to return before it is dropped.
    pub cancel_grace_ms: u64,
    /// Accumulated cost above which the session ends `BudgetExceeded`.
    pub cost_budget: Option<f64>,
    pub detection_scope: DetectionScope,
    /// Non-terminal levels assessing below this are skipped. 0 disables.
    pub skip_below_assessment: f64,
    pub escalated_confidence_bonus: f64,
    pub recent_error_count: usize,
    /// Six level names, one per complexity bucket. Proportional when absent.
    pub complexity_table: Option<Vec<String>>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            levels: CapabilityLevel::default_ladder(),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            max_total_attempts: DEFAULT_MAX_TOTAL_ATTEMPTS,
            error_repeat_window: DEFAULT_ERROR_REPEAT_WINDOW,
            ledger_capacity: crate::ledger::DEFAULT_LEDGER_CAPACITY,
            classifier_timeout_secs: DEFAULT_CLASSIFIER_TIMEOUT_SECS,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
            cost_budget: None,
            detection_scope: DetectionScope::CurrentLevel,
            skip_below_assessment: 0.0,
            escalated_confidence_bonus: 0.0,
            recent_error_count: DEFAULT_RECENT_ERROR_COUNT,
            complexity_table: None,
        }
    }
}

impl RouterConfig {
    /// Parse TOML and validate. Does not read the environment.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            levels = config.levels.len(),
            "Loaded router config"
        );
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = override_value(&lookup, ENV_SESSION_TIMEOUT_SECS)? {
            self.session_timeout_secs = v;
        }
        if let Some(v) = override_value(&lookup, ENV_MAX_TOTAL_ATTEMPTS)? {
            self.max_total_attempts = v;
        }
        if let Some(v) = override_value(&lookup, ENV_ERROR_REPEAT_WINDOW)? {
            self.error_repeat_window = v;
        }
        if let Some(v) = override_value::<f64, _>(&lookup, ENV_COST_BUDGET)? {
            self.cost_budget = Some(v);
        }
        Ok(())
    }

    /// Fail fast on anything the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hierarchy = self.hierarchy()?;
        self.complexity_table_for(&hierarchy)?;

        if self.max_total_attempts == 0 {
            return Err(invalid("max_total_attempts", "must be >= 1"));
        }
        if self.error_repeat_window < 2 {
            return Err(invalid(
                "error_repeat_window",
                format!("must be >= 2, got {}", self.error_repeat_window),
            ));
        }
        if self.session_timeout_secs == 0 {
            return Err(invalid("session_timeout_secs", "must be > 0"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(invalid("attempt_timeout_secs", "must be > 0"));
        }
        if self.classifier_timeout_secs == 0 {
            return Err(invalid("classifier_timeout_secs", "must be > 0"));
        }
        if self.ledger_capacity == 0 {
            return Err(invalid("ledger_capacity", "must be >= 1"));
        }
        if let Some(budget) = self.cost_budget {
            if !budget.is_finite() || budget < 0.0 {
                return Err(invalid(
                    "cost_budget",
                    format!("must be finite and >= 0, got {}", budget),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.skip_below_assessment) {
            return Err(invalid(
                "skip_below_assessment",
                format!("must be within [0, 1], got {}", self.skip_below_assessment),
            ));
        }
        Ok(())
    }

    /// Build the validated hierarchy.
    pub fn hierarchy(&self) -> Result<EscalationHierarchy, ConfigError> {
        Ok(EscalationHierarchy::with_policy(
            self.levels.clone(),
            EscalationPolicy {
                escalated_confidence_bonus: self.escalated_confidence_bonus,
            },
        )?)
    }

    pub fn complexity_table_for(
        &self,
        hierarchy: &EscalationHierarchy,
    ) -> Result<ComplexityTable, ConfigError> {
        match &self.complexity_table {
            Some(names) => Ok(ComplexityTable::from_names(names, hierarchy)?),
            None => Ok(ComplexityTable::proportional(hierarchy.len())),
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            session_timeout: self.session_timeout(),
            max_total_attempts: self.max_total_attempts,
            error_repeat_window: self.error_repeat_window,
            scope: self.detection_scope,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn override_value<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::EnvOverride { var, value: raw })
}
