//! Canary and alarm configuration.

use std::time::Duration;

use canopy_core::config::{AlarmSection, CanarySection};
use canopy_core::{Comparison, ConfigError, TrafficWeight, parse_duration};

/// How much traffic the new version gets while baking, and for how long.
///
/// Validated on construction: the fraction must leave both versions a
/// share of traffic at the split's resolution of thousandths, and the bake
/// window is non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanaryConfig {
    canary_weight: TrafficWeight,
    bake_window: Duration,
}

impl CanaryConfig {
    pub const DEFAULT_PRESET: &'static str = "Canary10Percent5Minutes";

    pub fn new(canary_fraction: f64, bake_window: Duration) -> Result<Self, ConfigError> {
        if !(canary_fraction > 0.0 && canary_fraction < 1.0) {
            return Err(ConfigError::InvalidCanaryFraction(canary_fraction));
        }
        let canary_weight = TrafficWeight::new(canary_fraction)?;
        if !(1..1000).contains(&canary_weight.per_mille()) {
            return Err(ConfigError::InvalidCanaryFraction(canary_fraction));
        }
        if bake_window.is_zero() {
            return Err(ConfigError::ZeroBakeWindow);
        }
        Ok(Self {
            canary_weight,
            bake_window,
        })
    }

    /// Named presets: ten percent of traffic for 5, 10, 15 or 30 minutes.
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        let minutes = match name {
            "Canary10Percent5Minutes" => 5,
            "Canary10Percent10Minutes" => 10,
            "Canary10Percent15Minutes" => 15,
            "Canary10Percent30Minutes" => 30,
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        };
        Self::new(0.10, Duration::from_secs(minutes * 60))
    }

    /// Start from the named preset (or the default) and apply explicit
    /// overrides.
    pub fn from_section(section: &CanarySection) -> Result<Self, ConfigError> {
        let base = match &section.preset {
            Some(name) => Self::preset(name)?,
            None => Self::default(),
        };
        let fraction = section
            .canary_fraction
            .unwrap_or(base.canary_weight.value());
        let bake_window = match &section.bake_window {
            Some(window) => parse_duration(window)?,
            None => base.bake_window,
        };
        Self::new(fraction, bake_window)
    }

    pub fn canary_weight(&self) -> TrafficWeight {
        self.canary_weight
    }

    pub fn bake_window(&self) -> Duration {
        self.bake_window
    }
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            canary_weight: TrafficWeight::from_per_mille(100),
            bake_window: Duration::from_secs(5 * 60),
        }
    }
}

/// When an alarm on one metric dimension fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmConfig {
    evaluation_window: Duration,
    threshold: u64,
    evaluation_periods: u32,
    comparison: Comparison,
}

impl AlarmConfig {
    pub fn new(
        evaluation_window: Duration,
        threshold: u64,
        evaluation_periods: u32,
        comparison: Comparison,
    ) -> Result<Self, ConfigError> {
        if evaluation_window.is_zero() {
            return Err(ConfigError::invalid(
                "alarm.evaluation_window",
                "must be greater than zero",
            ));
        }
        if evaluation_periods == 0 {
            return Err(ConfigError::invalid(
                "alarm.evaluation_periods",
                "must be at least 1",
            ));
        }
        Ok(Self {
            evaluation_window,
            threshold,
            evaluation_periods,
            comparison,
        })
    }

    pub fn from_section(section: &AlarmSection) -> Result<Self, ConfigError> {
        Self::new(
            parse_duration(&section.evaluation_window)?,
            section.threshold,
            section.evaluation_periods,
            section.comparison,
        )
    }

    pub fn evaluation_window(&self) -> Duration {
        self.evaluation_window
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn evaluation_periods(&self) -> u32 {
        self.evaluation_periods
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }
}

impl Default for AlarmConfig {
    /// Any error in a one-minute window fires.
    fn default() -> Self {
        Self {
            evaluation_window: Duration::from_secs(60),
            threshold: 1,
            evaluation_periods: 1,
            comparison: Comparison::GreaterThanOrEqual,
        }
    }
}
