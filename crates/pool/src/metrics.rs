//! Metrics collection for pool events.
//!
//! Subscribes to the [`EventBus`] and translates events into counters,
//! gauges, and histograms via the `metrics` crate.
//!
//! Gated behind the `metrics` feature.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, PoolEvent};

/// Background collector that records pool events via the `metrics` crate.
///
/// # Usage
///
/// ```rust,ignore
/// let pool = Pool::new(PoolConfig::default())?;
/// let cancel = CancellationToken::new();
/// tokio::spawn(MetricsCollector::new(pool.events()).run(cancel));
/// ```
pub struct MetricsCollector {
    receiver: broadcast::Receiver<PoolEvent>,
}

impl MetricsCollector {
    /// Create a new collector subscribed to the given event bus.
    #[must_use]
    pub fn new(event_bus: &EventBus) -> Self {
        Self {
            receiver: event_bus.subscribe(),
        }
    }

    /// Consume events until the bus is dropped or `cancel` fires.
    /// Lagged events are skipped with a warning.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                result = self.receiver.recv() => {
                    match result {
                        Ok(event) => Self::record_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "MetricsCollector lagged behind event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    }

    fn record_event(event: &PoolEvent) {
        match event {
            PoolEvent::Minted { .. } => {
                metrics::counter!("pool.handle.created.total").increment(1);
            }
            PoolEvent::Acquired { waited, queued, .. } => {
                metrics::counter!("pool.acquire.total").increment(1);
                metrics::histogram!("pool.acquire.wait_seconds").record(waited.as_secs_f64());
                metrics::gauge!("pool.queue.depth").set(*queued as f64);
            }
            PoolEvent::Queued { queued } => {
                metrics::counter!("pool.queue.total").increment(1);
                metrics::gauge!("pool.queue.depth").set(*queued as f64);
            }
            PoolEvent::TimedOut { queued, .. } => {
                metrics::counter!("pool.acquire.timeout.total").increment(1);
                metrics::gauge!("pool.queue.depth").set(*queued as f64);
            }
            PoolEvent::Released { held, .. } => {
                metrics::counter!("pool.release.total").increment(1);
                metrics::histogram!("pool.hold.duration_seconds").record(held.as_secs_f64());
            }
            PoolEvent::InvalidRelease { .. } => {
                metrics::counter!("pool.release.invalid.total").increment(1);
            }
            PoolEvent::Closed { reason, .. } => {
                metrics::counter!("pool.handle.closed.total", "reason" => reason.as_str())
                    .increment(1);
            }
            PoolEvent::UtilizationWarning { .. } => {
                metrics::counter!("pool.utilization.warning.total").increment(1);
            }
            PoolEvent::HealthChecked {
                utilization,
                queued,
                ..
            } => {
                metrics::gauge!("pool.utilization").set(*utilization);
                metrics::gauge!("pool.queue.depth").set(*queued as f64);
            }
            PoolEvent::EmergencyShed { .. } => {
                metrics::counter!("pool.shed.total").increment(1);
            }
            PoolEvent::Reset { cancelled } => {
                metrics::counter!("pool.reset.total").increment(1);
                metrics::counter!("pool.reset.cancelled.total").increment(*cancelled as u64);
                metrics::gauge!("pool.queue.depth").set(0.0);
                metrics::gauge!("pool.utilization").set(0.0);
            }
            PoolEvent::ConfigUpdated => {
                metrics::counter!("pool.config.update.total").increment(1);
            }
        }
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish()
    }
}

/// Create a [`MetricsCollector`] and spawn it as a background task.
pub fn spawn_metrics_collector(
    event_bus: &EventBus,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let collector = MetricsCollector::new(event_bus);
    tokio::spawn(collector.run(cancel))
}
