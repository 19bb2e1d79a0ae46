//! One release, end to end.
//!
//! ```text
//! reserve ─▶ build ─▶ upload (new generation) ─▶ swap generation ─▶ canary ─▶ record ─▶ publish
//! ```
//!
//! The canary slot is claimed first, so a release that would conflict
//! changes nothing. A build or upload failure returns before anything
//! served is touched and frees the slot.
//! The canary's outcome, promoted or rolled back, is a result rather than
//! an error; so is a failed endpoint publish.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use canopy_bundle::{AssetBundle, UploadReport, is_generation};
use canopy_canary::{DeploymentHandle, Reservation};
use canopy_core::DeploymentState;
use canopy_state::{DeploymentRecord, Parameter, StateResult, StateStore};

use crate::error::ReleaseError;
use crate::publisher::PublishWarning;
use crate::topology::{ASSETS_ORIGIN, GENERATION_PARAMETER, Topology};

#[derive(Debug)]
pub struct ReleaseOutcome {
    pub upload: UploadReport,
    pub deployment: DeploymentRecord,
    pub endpoint: Result<Parameter, PublishWarning>,
}

impl ReleaseOutcome {
    pub fn promoted(&self) -> bool {
        self.deployment.state == DeploymentState::Promoted
    }
}

pub struct ReleasePipeline {
    topology: Arc<Topology>,
    bundle: AssetBundle,
}

impl ReleasePipeline {
    pub fn new(topology: Arc<Topology>, bundle: AssetBundle) -> Self {
        Self { topology, bundle }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Run a full release of `code_ref` as the next compute version.
    ///
    /// Setting `cancel` to `true` while the canary runs rolls it back.
    pub async fn run(
        &self,
        code_ref: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<ReleaseOutcome, ReleaseError> {
        let reservation = self
            .topology
            .controller
            .reserve(self.topology.compute.name())?;
        let upload = self.stage_assets().await?;
        let handle = self.launch_canary(reservation, code_ref);
        let deployment = self.await_deployment(handle, cancel).await?;
        let endpoint = self.topology.publisher.publish(&self.topology.config.site.domain_name);

        Ok(ReleaseOutcome {
            upload,
            deployment,
            endpoint,
        })
    }

    /// Build, upload under a new generation, then point the assets origin
    /// at it.
    ///
    /// The generation served before stays in the store for the previous
    /// compute version; older ones are deleted.
    pub async fn stage_assets(&self) -> Result<UploadReport, ReleaseError> {
        let bundle = self.bundle.clone();
        let files = tokio::task::spawn_blocking(move || bundle.build())
            .await
            .map_err(|e| ReleaseError::Task(e.to_string()))??;

        let bundle = self.bundle.clone();
        let store = self.topology.store.clone();
        let max_attempts = self.topology.config.upload.max_attempts;
        let report = tokio::task::spawn_blocking(move || bundle.upload(&files, &store, max_attempts))
            .await
            .map_err(|e| ReleaseError::Task(e.to_string()))??;

        let router = &self.topology.router;
        let previous = router.static_generation(ASSETS_ORIGIN);
        if previous.as_deref() == Some(report.generation.as_str()) {
            info!(generation = %report.generation, "static content unchanged");
        } else {
            router.swap_static_generation(ASSETS_ORIGIN, Some(report.generation.clone()))?;
        }
        self.topology
            .store
            .put_parameter(GENERATION_PARAMETER, &report.generation)?;

        let keep: Vec<String> = std::iter::once(report.generation.clone())
            .chain(previous)
            .collect();
        let store = self.topology.store.clone();
        match tokio::task::spawn_blocking(move || retire_generations(&store, &keep)).await {
            Ok(Ok(retired)) if !retired.is_empty() => {
                info!(?retired, "old static generations deleted");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "deleting old static generations failed"),
            Err(e) => warn!(error = %e, "deleting old static generations failed"),
        }
        Ok(report)
    }

    /// Start a canary of `code_ref`, outside a full release.
    pub fn start_canary(&self, code_ref: &str) -> Result<DeploymentHandle, ReleaseError> {
        let reservation = self
            .topology
            .controller
            .reserve(self.topology.compute.name())?;
        Ok(self.launch_canary(reservation, code_ref))
    }

    fn launch_canary(&self, reservation: Reservation, code_ref: &str) -> DeploymentHandle {
        let topology = &self.topology;
        topology.controller.launch(
            reservation,
            topology.compute.clone(),
            topology.canary,
            topology.alarm_source(),
            code_ref,
        )
    }

    /// Wait for the deployment to finish and persist its outcome.
    pub async fn await_deployment(
        &self,
        handle: DeploymentHandle,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DeploymentRecord, ReleaseError> {
        let cancel_handle = handle.cancel_handle();
        let id = handle.id().to_string();
        let watcher = tokio::spawn(async move {
            if cancel.wait_for(|c| *c).await.is_ok() {
                info!(deployment = %id, "cancellation requested");
                cancel_handle.cancel();
            }
        });

        let result = handle.wait().await;
        watcher.abort();
        let record = result?;

        self.topology.store.put_deployment_record(&record)?;
        // Catches up on any alias write the journal failed to record.
        self.topology.persist_compute()?;
        match record.state {
            DeploymentState::Promoted => info!(deployment = %record.id, "release promoted"),
            _ => warn!(
                deployment = %record.id,
                state = %record.state,
                reason = record.reason.as_deref().unwrap_or("-"),
                "release did not promote"
            ),
        }
        Ok(record)
    }
}

/// Delete every stored generation not named in `keep`. Objects outside a
/// generation prefix are left alone.
fn retire_generations(store: &StateStore, keep: &[String]) -> StateResult<Vec<String>> {
    let mut stale: Vec<String> = store
        .list_object_keys("")?
        .iter()
        .filter_map(|key| key.split_once('/').map(|(generation, _)| generation))
        .filter(|generation| is_generation(generation) && !keep.iter().any(|k| k == generation))
        .map(str::to_string)
        .collect();
    stale.dedup();
    for generation in &stale {
        store.delete_objects_with_prefix(&format!("{generation}/"))?;
    }
    Ok(stale)
}
