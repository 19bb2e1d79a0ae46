//! Canary controller. Runs one deployment at a time against a compute
//! origin's alias.
//!
//! `start` claims the active slot, then spawns a task that walks the
//! deployment through its states. The task applies every alias write from
//! a single place (`apply`) and frees the slot when it finishes, whether it
//! promoted, rolled back, or the task itself died.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use canopy_core::{ComputeVersion, DeploymentState, TrafficWeight, epoch_millis};
use canopy_edge::ComputeOrigin;
use canopy_state::DeploymentRecord;

use crate::alarm::{AlarmEvent, AlarmSource};
use crate::deployment::{Deployment, DeploymentAction};
use crate::error::CanaryError;
use crate::strategy::CanaryConfig;

const NOTIFICATION_BUFFER: usize = 64;

/// Lifecycle notifications for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Started { deployment: String, function: String },
    Baking { deployment: String, version: u64, weight: TrafficWeight },
    Promoted { deployment: String, version: u64 },
    RolledBack { deployment: String, reason: String },
}

struct ActiveDeployment {
    id: String,
    cancel: CancelHandle,
}

type ActiveSlot = Arc<Mutex<Option<ActiveDeployment>>>;

/// Frees the active slot when the deployment task ends, including by panic.
struct SlotGuard {
    slot: ActiveSlot,
    id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|a| a.id == self.id) {
            *slot = None;
            debug!(deployment = %self.id, "active slot released");
        }
    }
}

/// Requests cancellation of a running deployment.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// The active slot, claimed but not yet running a deployment.
pub struct Reservation {
    id: String,
    cancel: CancelHandle,
    cancel_rx: watch::Receiver<bool>,
    guard: SlotGuard,
}

impl Reservation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancels the deployment once launched; a cancel sent before launch
    /// makes it roll back without publishing.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

/// The caller's view of a running deployment.
pub struct DeploymentHandle {
    id: String,
    state: watch::Receiver<DeploymentState>,
    cancel: CancelHandle,
    task: JoinHandle<DeploymentRecord>,
}

impl DeploymentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> DeploymentState {
        *self.state.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait until the deployment reaches `state` or ends.
    pub async fn wait_for_state(&mut self, state: DeploymentState) -> DeploymentState {
        let reached = self
            .state
            .wait_for(|s| *s == state || s.is_terminal())
            .await
            .map(|s| *s);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Wait for the deployment to finish.
    pub async fn wait(self) -> Result<DeploymentRecord, CanaryError> {
        self.task
            .await
            .map_err(|e| CanaryError::TaskFailed(e.to_string()))
    }
}

/// Admits at most one deployment at a time and drives it to completion.
pub struct CanaryController {
    active: ActiveSlot,
    notifications: broadcast::Sender<Notification>,
}

impl CanaryController {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            active: Arc::new(Mutex::new(None)),
            notifications,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Id of the deployment holding the active slot.
    pub fn active(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.id.clone())
    }

    /// Cancel the active deployment if its id matches.
    pub fn cancel(&self, id: &str) -> Result<(), CanaryError> {
        let slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(active) if active.id == id => {
                active.cancel.cancel();
                Ok(())
            }
            _ => Err(CanaryError::NotFound(id.to_string())),
        }
    }

    /// Claim the active slot for a deployment of `function` without
    /// starting it. Dropping the reservation frees the slot again.
    ///
    /// Rejected with `Conflict` while another deployment is active; the
    /// active deployment is not touched.
    pub fn reserve(&self, function: &str) -> Result<Reservation, CanaryError> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = CancelHandle(Arc::new(cancel_tx));
        let id = format!("{function}-{}", epoch_millis());

        {
            let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(active) = slot.as_ref() {
                warn!(active = %active.id, "deployment rejected, another is in progress");
                return Err(CanaryError::Conflict {
                    active: active.id.clone(),
                });
            }
            *slot = Some(ActiveDeployment {
                id: id.clone(),
                cancel: cancel.clone(),
            });
        }
        debug!(deployment = %id, "active slot reserved");
        Ok(Reservation {
            guard: SlotGuard {
                slot: self.active.clone(),
                id: id.clone(),
            },
            id,
            cancel,
            cancel_rx,
        })
    }

    /// Begin rolling out `code_ref` as a new version of `origin`.
    pub fn start(
        &self,
        origin: Arc<ComputeOrigin>,
        config: CanaryConfig,
        alarms: Arc<dyn AlarmSource>,
        code_ref: &str,
    ) -> Result<DeploymentHandle, CanaryError> {
        let reservation = self.reserve(origin.name())?;
        Ok(self.launch(reservation, origin, config, alarms, code_ref))
    }

    /// Start a deployment in a slot claimed by [`reserve`](Self::reserve).
    pub fn launch(
        &self,
        reservation: Reservation,
        origin: Arc<ComputeOrigin>,
        config: CanaryConfig,
        alarms: Arc<dyn AlarmSource>,
        code_ref: &str,
    ) -> DeploymentHandle {
        let Reservation {
            id,
            cancel,
            cancel_rx,
            guard,
        } = reservation;

        let previous = origin.alias().binding().live_version().clone();
        let deployment = Deployment::new(
            &id,
            origin.name(),
            origin.alias().name(),
            previous,
            config,
        );
        let (state_tx, state_rx) = watch::channel(DeploymentState::Initiated);

        info!(deployment = %id, function = origin.name(), code_ref, "deployment initiated");
        let _ = self.notifications.send(Notification::Started {
            deployment: id.clone(),
            function: origin.name().to_string(),
        });

        let run = DeploymentRun {
            deployment,
            origin,
            alarms,
            config,
            code_ref: code_ref.to_string(),
            state_tx,
            notifications: self.notifications.clone(),
            slot: guard,
        };
        let task = tokio::spawn(run.execute(cancel_rx));

        DeploymentHandle {
            id,
            state: state_rx,
            cancel,
            task,
        }
    }
}

impl Default for CanaryController {
    fn default() -> Self {
        Self::new()
    }
}

struct DeploymentRun {
    deployment: Deployment,
    origin: Arc<ComputeOrigin>,
    alarms: Arc<dyn AlarmSource>,
    config: CanaryConfig,
    code_ref: String,
    state_tx: watch::Sender<DeploymentState>,
    notifications: broadcast::Sender<Notification>,
    slot: SlotGuard,
}

impl DeploymentRun {
    async fn execute(mut self, mut cancel: watch::Receiver<bool>) -> DeploymentRecord {
        if *cancel.borrow_and_update() {
            self.deployment.cancel();
            return self.finish();
        }

        let version = match self.origin.publish_version(&self.code_ref) {
            Ok(version) => version,
            Err(e) => {
                self.deployment.abandon(format!("publishing version failed: {e}"));
                return self.finish();
            }
        };
        self.deployment.published(version.clone());
        self.publish_state();
        let mut alarms = self.alarms.subscribe(self.origin.dimension(&version));

        if *cancel.borrow_and_update() {
            let action = self.deployment.cancel();
            self.apply(action);
            return self.finish();
        }

        let action = self.deployment.shift();
        self.apply(action);
        self.publish_state();
        let _ = self.notifications.send(Notification::Baking {
            deployment: self.deployment.id().to_string(),
            version: version.version_id,
            weight: self.deployment.weight(),
        });

        self.bake(&mut alarms, &mut cancel).await;
        self.finish()
    }

    /// Sleep until the bake window elapses, an alarm fires, or the
    /// operator cancels. Alarms win over the timer when both are ready.
    async fn bake(
        &mut self,
        alarms: &mut mpsc::Receiver<AlarmEvent>,
        cancel: &mut watch::Receiver<bool>,
    ) {
        let bake_timer = tokio::time::sleep(self.config.bake_window());
        tokio::pin!(bake_timer);

        loop {
            tokio::select! {
                biased;

                Some(event) = alarms.recv() => {
                    if let Some(action) = self.deployment.on_alarm(&event) {
                        self.apply(Some(action));
                        return;
                    }
                }
                Ok(_) = cancel.wait_for(|c| *c) => {
                    let action = self.deployment.cancel();
                    self.apply(action);
                    return;
                }
                _ = &mut bake_timer => {
                    // An alarm that raced the timer still counts.
                    while let Ok(event) = alarms.try_recv() {
                        if let Some(action) = self.deployment.on_alarm(&event) {
                            self.apply(Some(action));
                            return;
                        }
                    }
                    let action = self.deployment.bake_elapsed();
                    self.apply(action);
                    return;
                }
            }
        }
    }

    /// The one place the alias binding is written.
    fn apply(&self, action: Option<DeploymentAction>) {
        if let Some(action) = action {
            let kind = match &action {
                DeploymentAction::Shift(_) => "shift",
                DeploymentAction::Promote(_) => "promote",
                DeploymentAction::Rollback(_) => "rollback",
            };
            let binding = action.into_binding();
            info!(
                deployment = self.deployment.id(),
                action = kind,
                target = %binding.target,
                weight = %binding.weight,
                "alias weight write"
            );
            if let Err(e) = self.origin.bind_alias(binding) {
                warn!(deployment = self.deployment.id(), error = %e, "alias write not recorded");
            }
        }
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.deployment.state());
    }

    /// Free the slot, then announce the terminal state. Anyone who sees
    /// the terminal state can start the next deployment.
    fn finish(self) -> DeploymentRecord {
        drop(self.slot);
        self.state_tx.send_replace(self.deployment.state());
        let id = self.deployment.id().to_string();
        let notification = match self.deployment.state() {
            DeploymentState::Promoted => Some(Notification::Promoted {
                deployment: id,
                version: self
                    .deployment
                    .new_version()
                    .map(|v: &ComputeVersion| v.version_id)
                    .unwrap_or_default(),
            }),
            DeploymentState::RolledBack => {
                let reason = self.deployment.reason().unwrap_or("unknown").to_string();
                warn!(deployment = %id, %reason, "deployment rolled back");
                Some(Notification::RolledBack {
                    deployment: id,
                    reason,
                })
            }
            _ => None,
        };
        if let Some(notification) = notification {
            let _ = self.notifications.send(notification);
        }
        self.deployment.to_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use canopy_core::AlarmDimension;
    use canopy_edge::{BoxFuture, ComputeOriginSpec, EdgeError, EdgeResponse};
    use canopy_metrics::MetricsCollector;

    use crate::alarm::MetricsAlarmSource;
    use crate::strategy::AlarmConfig;

    /// Hands out a channel the test controls and remembers what was asked for.
    struct ScriptedAlarms {
        rx: Mutex<Option<mpsc::Receiver<AlarmEvent>>>,
        subscribed: Mutex<Vec<AlarmDimension>>,
    }

    impl ScriptedAlarms {
        fn new() -> (Arc<Self>, mpsc::Sender<AlarmEvent>) {
            let (tx, rx) = mpsc::channel(8);
            let source = Arc::new(Self {
                rx: Mutex::new(Some(rx)),
                subscribed: Mutex::new(Vec::new()),
            });
            (source, tx)
        }
    }

    impl AlarmSource for ScriptedAlarms {
        fn subscribe(&self, dimension: AlarmDimension) -> mpsc::Receiver<AlarmEvent> {
            self.subscribed.lock().unwrap().push(dimension);
            self.rx
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| mpsc::channel(1).1)
        }
    }

    struct OkUnit;

    impl canopy_edge::ComputeUnit for OkUnit {
        fn invoke<'a>(
            &'a self,
            version: &'a ComputeVersion,
            _request: canopy_edge::EdgeRequest,
        ) -> BoxFuture<'a, Result<EdgeResponse, EdgeError>> {
            let status = if version.code_ref == "broken" { 500 } else { 200 };
            Box::pin(async move { Ok(EdgeResponse::new(status, "ok")) })
        }
    }

    fn origin() -> Arc<ComputeOrigin> {
        Arc::new(ComputeOrigin::new(
            ComputeOriginSpec::new("request-handler", "live", "127.0.0.1:3000"),
            Arc::new(OkUnit),
            MetricsCollector::new(),
        ))
    }

    fn config() -> CanaryConfig {
        CanaryConfig::new(0.1, Duration::from_secs(300)).unwrap()
    }

    fn breach(version: u64) -> AlarmEvent {
        AlarmEvent {
            dimension: AlarmDimension::new("request-handler", "live", version),
            current_count: 1,
            threshold_breached: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn promotes_after_quiet_bake() {
        let controller = CanaryController::new();
        let mut notes = controller.subscribe();
        let origin = origin();
        let (alarms, _tx) = ScriptedAlarms::new();

        let mut handle = controller
            .start(origin.clone(), config(), alarms.clone(), "127.0.0.1:3001")
            .unwrap();
        assert_eq!(
            handle.wait_for_state(DeploymentState::Baking).await,
            DeploymentState::Baking
        );
        assert_eq!(origin.alias().weight().per_mille(), 100);
        assert_eq!(
            alarms.subscribed.lock().unwrap().as_slice(),
            &[AlarmDimension::new("request-handler", "live", 2)]
        );

        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::Promoted);
        let binding = origin.alias().binding();
        assert_eq!(binding.weight, TrafficWeight::FULL);
        assert_eq!(binding.target.version_id, 2);
        assert!(binding.previous.is_none());
        assert!(controller.active().is_none());

        assert!(matches!(notes.recv().await.unwrap(), Notification::Started { .. }));
        assert!(matches!(notes.recv().await.unwrap(), Notification::Baking { weight, .. } if weight.per_mille() == 100));
        assert!(matches!(notes.recv().await.unwrap(), Notification::Promoted { version: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_during_bake_rolls_back() {
        let controller = CanaryController::new();
        let origin = origin();
        let (alarms, tx) = ScriptedAlarms::new();

        let mut handle = controller
            .start(origin.clone(), config(), alarms, "127.0.0.1:3001")
            .unwrap();
        handle.wait_for_state(DeploymentState::Baking).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        tx.send(breach(2)).await.unwrap();
        tx.send(breach(2)).await.unwrap();

        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::RolledBack);
        assert_eq!(origin.alias().weight(), TrafficWeight::ZERO);
        assert_eq!(origin.alias().binding().live_version().version_id, 1);
        let weight_writes = record.transitions.iter().filter(|t| t.weight.is_some()).count();
        assert_eq!(weight_writes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_beats_timer_when_both_are_ready() {
        let controller = CanaryController::new();
        let origin = origin();
        let (alarms, tx) = ScriptedAlarms::new();

        let mut handle = controller
            .start(origin.clone(), config(), alarms, "127.0.0.1:3001")
            .unwrap();
        handle.wait_for_state(DeploymentState::Baking).await;

        tx.try_send(breach(2)).unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::RolledBack);
        assert_eq!(origin.alias().weight(), TrafficWeight::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_alarms_do_not_roll_back() {
        let controller = CanaryController::new();
        let origin = origin();
        let (alarms, tx) = ScriptedAlarms::new();

        let mut handle = controller
            .start(origin.clone(), config(), alarms, "127.0.0.1:3001")
            .unwrap();
        handle.wait_for_state(DeploymentState::Baking).await;

        // The previous version's own spike.
        tx.send(breach(1)).await.unwrap();
        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::Promoted);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_conflicts() {
        let controller = CanaryController::new();
        let origin = origin();
        let (alarms, _tx) = ScriptedAlarms::new();

        let mut first = controller
            .start(origin.clone(), config(), alarms.clone(), "127.0.0.1:3001")
            .unwrap();
        first.wait_for_state(DeploymentState::Baking).await;

        let err = controller
            .start(origin.clone(), config(), alarms, "127.0.0.1:3002")
            .err()
            .unwrap();
        assert!(matches!(err, CanaryError::Conflict { ref active } if active == first.id()));
        assert_eq!(first.state(), DeploymentState::Baking);
        assert_eq!(origin.versions().len(), 2);

        first.wait().await.unwrap();
        let (alarms, _tx) = ScriptedAlarms::new();
        assert!(controller.start(origin, config(), alarms, "127.0.0.1:3002").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_holds_the_slot() {
        let controller = CanaryController::new();
        let origin = origin();

        let reservation = controller.reserve(origin.name()).unwrap();
        assert_eq!(controller.active().as_deref(), Some(reservation.id()));
        let (alarms, _tx) = ScriptedAlarms::new();
        assert!(matches!(
            controller.start(origin.clone(), config(), alarms, "127.0.0.1:3001"),
            Err(CanaryError::Conflict { .. })
        ));
        assert_eq!(origin.versions().len(), 1);

        drop(reservation);
        assert!(controller.active().is_none());

        let reservation = controller.reserve(origin.name()).unwrap();
        let id = reservation.id().to_string();
        let (alarms, _tx) = ScriptedAlarms::new();
        let mut handle =
            controller.launch(reservation, origin.clone(), config(), alarms, "127.0.0.1:3001");
        assert_eq!(handle.id(), id);
        assert_eq!(
            handle.wait_for_state(DeploymentState::Baking).await,
            DeploymentState::Baking
        );
        assert_eq!(controller.active(), Some(id));
    }

    struct ReadOnlyJournal;

    impl canopy_state::ComputeJournal for ReadOnlyJournal {
        fn record_version(&self, _function: &str, _version: &ComputeVersion) -> canopy_state::StateResult<()> {
            Err(canopy_state::StateError::Write("read-only".into()))
        }

        fn record_alias(&self, _record: &canopy_state::AliasRecord) -> canopy_state::StateResult<()> {
            Err(canopy_state::StateError::Write("read-only".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unrecordable_version_is_never_served() {
        let controller = CanaryController::new();
        let origin = Arc::new(
            ComputeOrigin::new(
                ComputeOriginSpec::new("request-handler", "live", "127.0.0.1:3000"),
                Arc::new(OkUnit),
                MetricsCollector::new(),
            )
            .with_journal(Arc::new(ReadOnlyJournal)),
        );
        let before = origin.alias().binding();
        let (alarms, _tx) = ScriptedAlarms::new();

        let handle = controller
            .start(origin.clone(), config(), alarms.clone(), "127.0.0.1:3001")
            .unwrap();
        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::RolledBack);
        assert!(record.new_version.is_none());
        assert!(record.reason.unwrap().starts_with("publishing version failed"));
        assert_eq!(origin.alias().binding(), before);
        assert!(alarms.subscribed.lock().unwrap().is_empty());
        assert!(controller.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn operator_cancel_rolls_back() {
        let controller = CanaryController::new();
        let origin = origin();
        let (alarms, _tx) = ScriptedAlarms::new();

        let mut handle = controller
            .start(origin.clone(), config(), alarms, "127.0.0.1:3001")
            .unwrap();
        handle.wait_for_state(DeploymentState::Baking).await;
        assert!(controller.cancel("someone-else").is_err());
        controller.cancel(handle.id()).unwrap();

        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::RolledBack);
        assert_eq!(record.reason.as_deref(), Some("cancelled by operator"));
        assert_eq!(origin.alias().weight(), TrafficWeight::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start_touches_nothing() {
        let controller = CanaryController::new();
        let origin = origin();
        let before = origin.alias().binding();
        let (alarms, _tx) = ScriptedAlarms::new();

        let handle = controller
            .start(origin.clone(), config(), alarms, "127.0.0.1:3001")
            .unwrap();
        handle.cancel();
        let record = handle.wait().await.unwrap();

        assert_eq!(record.state, DeploymentState::RolledBack);
        assert!(record.new_version.is_none());
        assert_eq!(origin.alias().binding(), before);
        assert_eq!(origin.versions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_version_is_rolled_back_by_metrics() {
        let controller = CanaryController::new();
        let origin = origin();
        let alarms = Arc::new(MetricsAlarmSource::new(
            origin.metrics().clone(),
            AlarmConfig::default(),
        ));

        let mut handle = controller
            .start(origin.clone(), config(), alarms, "broken")
            .unwrap();
        handle.wait_for_state(DeploymentState::Baking).await;
        // Let the alarm monitor start its first window.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // Enough traffic for the 10% split to reach the new version.
        for _ in 0..20 {
            origin.invoke(canopy_edge::EdgeRequest::get("/")).await;
        }

        let record = handle.wait().await.unwrap();
        assert_eq!(record.state, DeploymentState::RolledBack);
        assert!(record.reason.unwrap().contains("request-handler:live@v2"));
        assert_eq!(origin.alias().weight(), TrafficWeight::ZERO);
    }
}
