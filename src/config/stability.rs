//! Stabilization policy settings.
//!
//! These are calibration constants of the particular scale, so all of them
//! come from configuration.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Which stabilization policy the tracker applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityMode {
    /// Emit once per run of settled readings; any unsettled reading re-arms.
    #[default]
    RunLength,
    /// Latch a confirmed weight until it drops below `unlock_threshold`.
    Locking,
}

impl std::str::FromStr for StabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "run_length" | "run-length" | "runlength" => Ok(StabilityMode::RunLength),
            "locking" | "lock" => Ok(StabilityMode::Locking),
            other => Err(format!(
                "unknown stability mode '{}', expected 'run_length' or 'locking'",
                other
            )),
        }
    }
}

impl std::fmt::Display for StabilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StabilityMode::RunLength => f.write_str("run_length"),
            StabilityMode::Locking => f.write_str("locking"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_thresholds"))]
pub struct StabilityConfig {
    pub mode: StabilityMode,

    /// Consecutive settled readings required before a weight is trusted.
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Required stable count must be between 1 and 10000"
    ))]
    pub required_stable: u32,

    /// Locking mode: a stable weight must exceed this to lock.
    #[validate(range(min = 0.0, message = "Lock threshold must not be negative"))]
    pub lock_threshold: f64,

    /// Locking mode: a weight below this unlocks the tracker.
    #[validate(range(min = 0.0, message = "Unlock threshold must not be negative"))]
    pub unlock_threshold: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            mode: StabilityMode::RunLength,
            required_stable: 3,
            lock_threshold: 0.05,
            unlock_threshold: 0.02,
        }
    }
}

/// An unlock threshold above the lock threshold would let a single reading
/// lock and unlock at once.
fn validate_thresholds(config: &StabilityConfig) -> Result<(), ValidationError> {
    for (name, value) in [
        ("Lock", config.lock_threshold),
        ("Unlock", config.unlock_threshold),
    ] {
        if !value.is_finite() {
            let mut err = ValidationError::new("non_finite_threshold");
            err.message =
                Some(format!("{} threshold must be a finite number, got {}", name, value).into());
            return Err(err);
        }
    }
    if config.unlock_threshold > config.lock_threshold {
        let mut err = ValidationError::new("invalid_thresholds");
        err.message = Some(
            format!(
                "Unlock threshold ({}) must not exceed lock threshold ({})",
                config.unlock_threshold, config.lock_threshold
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}
