//! The deployment state machine.
//!
//! `Deployment` holds no handles and performs no I/O. Each trigger returns
//! the alias binding to write, if any; the controller applies it. Once a
//! deployment is terminal every trigger returns `None`, which makes repeated
//! alarms and late cancellations no-ops.

use tracing::{debug, info, warn};

use canopy_core::{
    AlarmDimension, AliasBinding, ComputeVersion, DeploymentState, TrafficWeight, epoch_millis,
    epoch_secs,
};
use canopy_state::{DeploymentRecord, Transition};

use crate::alarm::AlarmEvent;
use crate::strategy::CanaryConfig;

/// An alias write requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentAction {
    /// Send the canary fraction to the new version.
    Shift(AliasBinding),
    /// All traffic to the new version; the previous binding is retired.
    Promote(AliasBinding),
    /// No traffic to the new version.
    Rollback(AliasBinding),
}

impl DeploymentAction {
    pub fn binding(&self) -> &AliasBinding {
        match self {
            Self::Shift(b) | Self::Promote(b) | Self::Rollback(b) => b,
        }
    }

    pub fn into_binding(self) -> AliasBinding {
        match self {
            Self::Shift(b) | Self::Promote(b) | Self::Rollback(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deployment {
    id: String,
    function: String,
    alias: String,
    config: CanaryConfig,
    previous: ComputeVersion,
    new_version: Option<ComputeVersion>,
    state: DeploymentState,
    weight: TrafficWeight,
    reason: Option<String>,
    transitions: Vec<Transition>,
    started_at: u64,
    finished_at: Option<u64>,
}

impl Deployment {
    /// A deployment in `INITIATED`, replacing `previous`.
    pub fn new(
        id: &str,
        function: &str,
        alias: &str,
        previous: ComputeVersion,
        config: CanaryConfig,
    ) -> Self {
        Self {
            id: id.to_string(),
            function: function.to_string(),
            alias: alias.to_string(),
            config,
            previous,
            new_version: None,
            state: DeploymentState::Initiated,
            weight: TrafficWeight::ZERO,
            reason: None,
            transitions: Vec::new(),
            started_at: epoch_secs(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Weight of the new version as last written.
    pub fn weight(&self) -> TrafficWeight {
        self.weight
    }

    pub fn new_version(&self) -> Option<&ComputeVersion> {
        self.new_version.as_ref()
    }

    pub fn previous_version(&self) -> &ComputeVersion {
        &self.previous
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The only dimension whose alarms concern this deployment.
    pub fn dimension(&self) -> Option<AlarmDimension> {
        self.new_version
            .as_ref()
            .map(|v| AlarmDimension::new(&self.function, &self.alias, v.version_id))
    }

    /// `INITIATED → SHIFTING` once the new version is published.
    pub fn published(&mut self, version: ComputeVersion) -> bool {
        if self.state != DeploymentState::Initiated {
            return false;
        }
        info!(deployment = %self.id, version = %version, "new version published");
        self.new_version = Some(version);
        self.transition(DeploymentState::Shifting, None);
        true
    }

    /// `SHIFTING → BAKING`: route the canary fraction to the new version.
    pub fn shift(&mut self) -> Option<DeploymentAction> {
        if self.state != DeploymentState::Shifting {
            return None;
        }
        let target = self.new_version.clone()?;
        let weight = self.config.canary_weight();
        self.transition(DeploymentState::Baking, Some(weight));
        info!(deployment = %self.id, %weight, bake_window = ?self.config.bake_window(), "baking");
        Some(DeploymentAction::Shift(AliasBinding {
            target,
            previous: Some(self.previous.clone()),
            weight,
        }))
    }

    /// React to an alarm event. Events for other dimensions and events
    /// that are not breaches are ignored.
    pub fn on_alarm(&mut self, event: &AlarmEvent) -> Option<DeploymentAction> {
        if !event.threshold_breached || self.dimension().as_ref() != Some(&event.dimension) {
            debug!(deployment = %self.id, dimension = %event.dimension, "alarm event ignored");
            return None;
        }
        warn!(
            deployment = %self.id,
            dimension = %event.dimension,
            errors = event.current_count,
            "alarm fired, rolling back"
        );
        self.roll_back(format!(
            "alarm on {} ({} errors)",
            event.dimension, event.current_count
        ))
    }

    /// `BAKING → PROMOTED` after a quiet bake window.
    pub fn bake_elapsed(&mut self) -> Option<DeploymentAction> {
        if self.state != DeploymentState::Baking {
            return None;
        }
        let target = self.new_version.clone()?;
        self.transition(DeploymentState::Promoted, Some(TrafficWeight::FULL));
        info!(deployment = %self.id, version = %target, "promoted");
        Some(DeploymentAction::Promote(AliasBinding::single(target)))
    }

    /// Operator cancel; behaves like an alarm.
    pub fn cancel(&mut self) -> Option<DeploymentAction> {
        if self.state.is_terminal() {
            return None;
        }
        warn!(deployment = %self.id, state = %self.state, "cancelled by operator");
        self.roll_back("cancelled by operator".to_string())
    }

    /// End a deployment whose new version could not be published.
    pub fn abandon(&mut self, reason: String) -> Option<DeploymentAction> {
        if self.new_version.is_some() {
            return None;
        }
        warn!(deployment = %self.id, %reason, "deployment abandoned");
        self.roll_back(reason)
    }

    fn roll_back(&mut self, reason: String) -> Option<DeploymentAction> {
        if self.state.is_terminal() {
            return None;
        }
        self.reason = Some(reason);
        match self.new_version.clone() {
            // Nothing was published, nothing to unwind.
            None => {
                self.transition(DeploymentState::RolledBack, None);
                None
            }
            Some(target) => {
                self.transition(DeploymentState::RolledBack, Some(TrafficWeight::ZERO));
                Some(DeploymentAction::Rollback(AliasBinding {
                    target,
                    previous: Some(self.previous.clone()),
                    weight: TrafficWeight::ZERO,
                }))
            }
        }
    }

    fn transition(&mut self, to: DeploymentState, weight: Option<TrafficWeight>) {
        debug!(deployment = %self.id, from = %self.state, %to, "transition");
        self.transitions.push(Transition {
            from: self.state,
            to,
            weight,
            at_ms: epoch_millis(),
        });
        self.state = to;
        if let Some(weight) = weight {
            self.weight = weight;
        }
        if to.is_terminal() {
            self.finished_at = Some(epoch_secs());
        }
    }

    pub fn to_record(&self) -> DeploymentRecord {
        DeploymentRecord {
            id: self.id.clone(),
            target: self.function.clone(),
            alias: self.alias.clone(),
            previous_version: Some(self.previous.clone()),
            new_version: self.new_version.clone(),
            state: self.state,
            weight: self.weight,
            reason: self.reason.clone(),
            transitions: self.transitions.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
