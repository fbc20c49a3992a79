//! Utilization health checks and background maintenance
//!
//! This module provides:
//! - Utilization classification (`UtilizationLevel`)
//! - Reports produced by [`Pool::run_health_check`] and [`Pool::emergency_shed`]
//! - The idle sweeper and health monitor tasks started by
//!   [`Pool::start_maintenance`]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::handle::HandleId;
use crate::pool::{Pool, WeakPool};

// ---------------------------------------------------------------------------
// Health types
// ---------------------------------------------------------------------------

/// Utilization bands relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UtilizationLevel {
    /// Below the warning threshold
    Normal,
    /// At or above warning, below critical
    Warning,
    /// At or above critical
    Critical,
}

impl UtilizationLevel {
    /// Classify `utilization` against `config`'s thresholds.
    #[must_use]
    pub fn classify(utilization: f64, config: &PoolConfig) -> Self {
        if utilization >= config.critical_threshold {
            Self::Critical
        } else if utilization >= config.warning_threshold {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// Outcome of one emergency shed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShedReport {
    /// Active handles force-closed, longest checked out first
    pub force_closed: Vec<HandleId>,
    /// Idle handles dropped
    pub idle_cleared: usize,
    /// Queued acquisitions granted by the follow-up drain
    pub granted: usize,
}

/// Outcome of one health check pass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HealthReport {
    /// Utilization measured at the start of the pass
    pub utilization: f64,
    /// Band the utilization fell into
    pub level: UtilizationLevel,
    /// Idle handles dropped by the warning-level optimization
    pub idle_reclaimed: usize,
    /// Long-running handles force-closed
    pub long_running_closed: Vec<HandleId>,
    /// Present when the pass triggered emergency shedding
    pub shed: Option<ShedReport>,
}

impl HealthReport {
    pub(crate) fn new(utilization: f64, level: UtilizationLevel) -> Self {
        Self {
            utilization,
            level,
            idle_reclaimed: 0,
            long_running_closed: Vec::new(),
            shed: None,
        }
    }

    /// Whether the pass removed anything from the pool.
    #[must_use]
    pub fn took_action(&self) -> bool {
        self.idle_reclaimed > 0 || !self.long_running_closed.is_empty() || self.shed.is_some()
    }
}

// ---------------------------------------------------------------------------
// Background maintenance
// ---------------------------------------------------------------------------

/// Spawn the idle sweeper and the health monitor.
///
/// Both tasks hold only a weak reference to the pool, re-read their interval
/// from the live config every cycle, restart their sleep when the config
/// changes, and exit when `cancel` fires or the pool is gone.
pub(crate) fn spawn_maintenance(
    pool: &WeakPool,
    cancel: &CancellationToken,
    config_changed: &Arc<Notify>,
) {
    tokio::spawn(maintenance_loop(
        pool.clone(),
        cancel.child_token(),
        Arc::clone(config_changed),
        PoolConfig::idle_sweep_interval,
        |pool| {
            pool.sweep_idle();
        },
    ));

    tokio::spawn(maintenance_loop(
        pool.clone(),
        cancel.child_token(),
        Arc::clone(config_changed),
        |config| config.health_check_interval,
        |pool| {
            let report = pool.run_health_check();
            if report.took_action() {
                tracing::info!(
                    utilization = report.utilization,
                    level = ?report.level,
                    idle_reclaimed = report.idle_reclaimed,
                    long_running_closed = report.long_running_closed.len(),
                    shed = report.shed.is_some(),
                    "Health check reclaimed capacity"
                );
            } else {
                tracing::trace!(utilization = report.utilization, "Health check passed");
            }
        },
    ));
}

async fn maintenance_loop<I, T>(
    pool: WeakPool,
    cancel: CancellationToken,
    config_changed: Arc<Notify>,
    interval: I,
    tick: T,
) where
    I: Fn(&PoolConfig) -> Duration,
    T: Fn(&Pool),
{
    loop {
        let period = match pool.upgrade() {
            Some(pool) => interval(&pool.config()),
            None => break,
        };

        tokio::select! {
            () = tokio::time::sleep(period) => {}
            () = config_changed.notified() => continue,
            () = cancel.cancelled() => break,
        }

        match pool.upgrade() {
            Some(pool) => tick(&pool),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0 => UtilizationLevel::Normal ; "empty")]
    #[test_case(0.69 => UtilizationLevel::Normal ; "just below warning")]
    #[test_case(0.70 => UtilizationLevel::Warning ; "at warning")]
    #[test_case(0.84 => UtilizationLevel::Warning ; "just below critical")]
    #[test_case(0.85 => UtilizationLevel::Critical ; "at critical")]
    #[test_case(1.0 => UtilizationLevel::Critical ; "full")]
    fn classify_uses_default_thresholds(utilization: f64) -> UtilizationLevel {
        UtilizationLevel::classify(utilization, &PoolConfig::default())
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(UtilizationLevel::Normal < UtilizationLevel::Warning);
        assert!(UtilizationLevel::Warning < UtilizationLevel::Critical);
    }

    #[test]
    fn empty_report_took_no_action() {
        let report = HealthReport::new(0.1, UtilizationLevel::Normal);
        assert!(!report.took_action());
    }
}
