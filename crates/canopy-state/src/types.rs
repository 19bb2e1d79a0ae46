//! Record types persisted by the Canopy store.
//!
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use canopy_core::{AliasBinding, ComputeVersion, DeploymentState, TrafficWeight};

/// Unique identifier for a canary deployment.
pub type DeploymentId = String;

// ── Parameters ─────────────────────────────────────────────────────

/// A named configuration value readable by downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    /// Incremented on every overwrite, starting at 1.
    pub version: u64,
    /// Unix timestamp (seconds) of the last write.
    pub updated_at: u64,
}

// ── Deployments ────────────────────────────────────────────────────

/// One state change in a deployment's life.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub from: DeploymentState,
    pub to: DeploymentState,
    /// Alias weight written by this transition, if any.
    pub weight: Option<TrafficWeight>,
    /// Unix timestamp (milliseconds).
    pub at_ms: u64,
}

/// The persisted outcome of a canary deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    /// Compute function the deployment targeted.
    pub target: String,
    pub alias: String,
    pub previous_version: Option<ComputeVersion>,
    pub new_version: Option<ComputeVersion>,
    pub state: DeploymentState,
    /// Weight of the new version when the record was written.
    pub weight: TrafficWeight,
    /// Why the deployment rolled back, if it did.
    pub reason: Option<String>,
    pub transitions: Vec<Transition>,
    /// Unix timestamp (seconds).
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

// ── Compute ────────────────────────────────────────────────────────

/// The persisted binding of one alias of one function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AliasRecord {
    pub function: String,
    pub alias: String,
    pub binding: AliasBinding,
    pub updated_at: u64,
}

impl AliasRecord {
    pub fn table_key(&self) -> String {
        alias_key(&self.function, &self.alias)
    }
}

pub(crate) fn alias_key(function: &str, alias: &str) -> String {
    format!("{function}/{alias}")
}

/// Versions sort by id under a fixed-width key.
pub(crate) fn version_key(function: &str, version_id: u64) -> String {
    format!("{function}:{version_id:020}")
}
