//! Alarms on per-version error counts.
//!
//! An [`AlarmEvaluator`] turns a stream of per-window error counts into an
//! OK/ALARM state. [`MetricsAlarmSource`] runs one evaluator per subscribed
//! dimension on a timer and pushes an [`AlarmEvent`] whenever the state
//! changes.

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use canopy_core::AlarmDimension;
use canopy_metrics::MetricsCollector;

use crate::strategy::AlarmConfig;

const EVENT_BUFFER: usize = 16;

/// A change of alarm state for one dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEvent {
    pub dimension: AlarmDimension,
    /// Error count of the window that produced this event.
    pub current_count: u64,
    pub threshold_breached: bool,
}

/// Something that can push alarm events for a dimension.
///
/// The subscription lasts as long as the receiver; dropping it stops any
/// work done on its behalf.
pub trait AlarmSource: Send + Sync {
    fn subscribe(&self, dimension: AlarmDimension) -> mpsc::Receiver<AlarmEvent>;
}

/// Tracks consecutive breaching windows.
#[derive(Debug)]
pub struct AlarmEvaluator {
    config: AlarmConfig,
    consecutive_breaches: u32,
    in_alarm: bool,
}

impl AlarmEvaluator {
    pub fn new(config: AlarmConfig) -> Self {
        Self {
            config,
            consecutive_breaches: 0,
            in_alarm: false,
        }
    }

    /// Feed one window's error count. Returns whether the alarm is firing.
    pub fn observe(&mut self, errors: u64) -> bool {
        if self
            .config
            .comparison()
            .breaches(errors, self.config.threshold())
        {
            self.consecutive_breaches = self.consecutive_breaches.saturating_add(1);
        } else {
            self.consecutive_breaches = 0;
        }
        self.in_alarm = self.consecutive_breaches >= self.config.evaluation_periods();
        self.in_alarm
    }

    pub fn in_alarm(&self) -> bool {
        self.in_alarm
    }
}

/// Alarms evaluated from the invocation metrics collected at the edge.
#[derive(Clone)]
pub struct MetricsAlarmSource {
    metrics: MetricsCollector,
    config: AlarmConfig,
}

impl MetricsAlarmSource {
    pub fn new(metrics: MetricsCollector, config: AlarmConfig) -> Self {
        Self { metrics, config }
    }
}

impl AlarmSource for MetricsAlarmSource {
    fn subscribe(&self, dimension: AlarmDimension) -> mpsc::Receiver<AlarmEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let metrics = self.metrics.clone();
        let config = self.config;
        tokio::spawn(async move {
            run_alarm_monitor(dimension, metrics, config, tx).await;
        });
        rx
    }
}

/// Evaluate one dimension every window until the subscriber goes away.
async fn run_alarm_monitor(
    dimension: AlarmDimension,
    metrics: MetricsCollector,
    config: AlarmConfig,
    tx: mpsc::Sender<AlarmEvent>,
) {
    let window = config.evaluation_window();
    let mut evaluator = AlarmEvaluator::new(config);
    let mut ticker = tokio::time::interval_at(Instant::now() + window, window);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Counts recorded before the subscription belong to no window.
    metrics.drain_window(&dimension).await;
    debug!(%dimension, ?window, "alarm monitor started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let counts = metrics.drain_window(&dimension).await;
                let was_firing = evaluator.in_alarm();
                let firing = evaluator.observe(counts.errors);
                if firing == was_firing {
                    continue;
                }
                if firing {
                    warn!(%dimension, errors = counts.errors, threshold = config.threshold(), "alarm fired");
                } else {
                    debug!(%dimension, "alarm back to ok");
                }
                let event = AlarmEvent {
                    dimension: dimension.clone(),
                    current_count: counts.errors,
                    threshold_breached: firing,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }

    debug!(%dimension, "alarm monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use canopy_core::Comparison;

    fn config(threshold: u64, periods: u32, comparison: Comparison) -> AlarmConfig {
        AlarmConfig::new(Duration::from_secs(60), threshold, periods, comparison).unwrap()
    }

    #[test]
    fn fires_on_first_error_by_default() {
        let mut evaluator = AlarmEvaluator::new(AlarmConfig::default());
        assert!(!evaluator.observe(0));
        assert!(evaluator.observe(1));
        assert!(!evaluator.observe(0));
    }

    #[test]
    fn requires_consecutive_periods() {
        let mut evaluator = AlarmEvaluator::new(config(5, 3, Comparison::GreaterThanOrEqual));
        assert!(!evaluator.observe(5));
        assert!(!evaluator.observe(9));
        assert!(!evaluator.observe(4));
        assert!(!evaluator.observe(5));
        assert!(!evaluator.observe(6));
        assert!(evaluator.observe(7));
    }

    #[test]
    fn strict_comparison() {
        let mut evaluator = AlarmEvaluator::new(config(1, 1, Comparison::GreaterThan));
        assert!(!evaluator.observe(1));
        assert!(evaluator.observe(2));
    }

    fn dim() -> AlarmDimension {
        AlarmDimension::new("request-handler", "live", 2)
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_pushes_state_changes() {
        let metrics = MetricsCollector::new();
        let source = MetricsAlarmSource::new(metrics.clone(), AlarmConfig::default());
        let mut events = source.subscribe(dim());
        tokio::task::yield_now().await;

        // Errors on the old version never reach this dimension.
        metrics
            .record_invocation(&AlarmDimension::new("request-handler", "live", 1), true)
            .await;
        metrics.record_invocation(&dim(), false).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(events.try_recv().is_err());

        metrics.record_invocation(&dim(), true).await;
        let fired = events.recv().await.unwrap();
        assert_eq!(fired.dimension, dim());
        assert_eq!(fired.current_count, 1);
        assert!(fired.threshold_breached);

        let cleared = events.recv().await.unwrap();
        assert!(!cleared.threshold_breached);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_before_subscribing_are_ignored() {
        let metrics = MetricsCollector::new();
        metrics.record_invocation(&dim(), true).await;

        let source = MetricsAlarmSource::new(metrics.clone(), AlarmConfig::default());
        let mut events = source.subscribe(dim());
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(events.try_recv().is_err());
    }
}
