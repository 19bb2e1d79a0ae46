//! Shared types used across Canopy crates.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// An immutable, numbered snapshot of the compute unit.
///
/// Version ids are assigned monotonically by the compute origin that
/// published them; `code_ref` locates the unit that serves this version
/// (for HTTP compute units, the `host:port` it listens on).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeVersion {
    pub version_id: u64,
    /// Unix timestamp (seconds) when the version was published.
    pub published_at: u64,
    pub code_ref: String,
}

impl fmt::Display for ComputeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version_id)
    }
}

/// Fraction of alias traffic sent to the alias's target version.
///
/// Always within `[0, 1]`; there is no way to construct one outside it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct TrafficWeight(f64);

impl TrafficWeight {
    pub const ZERO: TrafficWeight = TrafficWeight(0.0);
    pub const FULL: TrafficWeight = TrafficWeight(1.0);

    pub fn new(value: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::InvalidWeight(value));
        }
        Ok(Self(value))
    }

    /// A weight from thousandths, saturating at 1000.
    pub const fn from_per_mille(per_mille: u16) -> Self {
        let clamped = if per_mille > 1000 { 1000 } else { per_mille };
        Self(clamped as f64 / 1000.0)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The weight in thousandths, used for deterministic traffic splits.
    pub fn per_mille(self) -> u32 {
        (self.0 * 1000.0).round() as u32
    }
}

impl TryFrom<f64> for TrafficWeight {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TrafficWeight> for f64 {
    fn from(w: TrafficWeight) -> Self {
        w.0
    }
}

impl fmt::Display for TrafficWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}%", self.0 * 100.0)
    }
}

/// Where an alias points: a target version receiving `weight` of the
/// traffic, and optionally the previous version receiving the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasBinding {
    pub target: ComputeVersion,
    pub previous: Option<ComputeVersion>,
    pub weight: TrafficWeight,
}

impl AliasBinding {
    /// A binding that sends all traffic to one version.
    pub fn single(version: ComputeVersion) -> Self {
        Self {
            target: version,
            previous: None,
            weight: TrafficWeight::FULL,
        }
    }

    /// The version that serves the majority of traffic.
    ///
    /// While a canary holds a minority weight, or after it was rolled back
    /// to zero, this is the previous version.
    pub fn live_version(&self) -> &ComputeVersion {
        match &self.previous {
            Some(previous) if self.weight.value() < 0.5 => previous,
            _ => &self.target,
        }
    }
}

/// The metric dimension an alarm observes: errors executed by one version
/// behind one alias of one compute function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmDimension {
    pub function: String,
    pub alias: String,
    pub executed_version: u64,
}

impl AlarmDimension {
    pub fn new(function: &str, alias: &str, executed_version: u64) -> Self {
        Self {
            function: function.to_string(),
            alias: alias.to_string(),
            executed_version,
        }
    }
}

impl fmt::Display for AlarmDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@v{}",
            self.function, self.alias, self.executed_version
        )
    }
}

/// Lifecycle of one canary deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Initiated,
    Shifting,
    Baking,
    Promoted,
    RolledBack,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Promoted | Self::RolledBack)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Shifting => "SHIFTING",
            Self::Baking => "BAKING",
            Self::Promoted => "PROMOTED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How an alarm compares a window's error count against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    GreaterThanOrEqual,
    GreaterThan,
}

impl Comparison {
    pub fn breaches(self, count: u64, threshold: u64) -> bool {
        match self {
            Self::GreaterThanOrEqual => count >= threshold,
            Self::GreaterThan => count > threshold,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
