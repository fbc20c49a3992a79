//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`Pool`](crate::Pool).
///
/// Durations serialize in humantime form (`"30s"`, `"5m"`). Every field has
/// a default, so a partial document deserializes into a complete config.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Maximum number of handles checked out at once
    pub max_resources: usize,
    /// Time after which an idle handle is reclaimed
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub idle_timeout: Duration,
    /// How long a queued acquisition waits before failing
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub acquisition_timeout: Duration,
    /// Retries performed by [`Pool::acquire_with_retry`](crate::Pool::acquire_with_retry).
    /// The pool itself never retries.
    pub retry_attempts: u32,
    /// Delay between caller-side retries
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub retry_delay: Duration,
    /// Interval of the background health check
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub health_check_interval: Duration,
    /// Utilization at which the health check sweeps every idle handle
    pub warning_threshold: f64,
    /// Utilization at which the health check sheds active handles
    pub critical_threshold: f64,
    /// Checkout duration after which an active handle is presumed leaked
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub long_running_threshold: Duration,
    /// Cap on long-running handles force-closed per health check
    pub max_long_running_evictions: usize,
    /// Cap on active handles force-closed by one emergency shed
    pub max_emergency_evictions: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_resources: 80,
            idle_timeout: Duration::from_secs(30),
            acquisition_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(60),
            warning_threshold: 0.70,
            critical_threshold: 0.85,
            long_running_threshold: Duration::from_secs(300),
            max_long_running_evictions: 5,
            max_emergency_evictions: 10,
        }
    }
}

impl PoolConfig {
    /// Set the capacity.
    pub fn with_max_resources(mut self, max_resources: usize) -> Self {
        self.max_resources = max_resources;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the acquisition timeout.
    pub fn with_acquisition_timeout(mut self, acquisition_timeout: Duration) -> Self {
        self.acquisition_timeout = acquisition_timeout;
        self
    }

    /// Set the caller-side retry policy.
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Set the health check interval.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the warning and critical utilization thresholds.
    pub fn with_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    /// Set the long-running checkout threshold.
    pub fn with_long_running_threshold(mut self, threshold: Duration) -> Self {
        self.long_running_threshold = threshold;
        self
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_resources == 0 {
            return Err(Error::configuration("max_resources must be greater than 0"));
        }
        for (name, value) in [
            ("idle_timeout", self.idle_timeout),
            ("acquisition_timeout", self.acquisition_timeout),
            ("health_check_interval", self.health_check_interval),
            ("long_running_threshold", self.long_running_threshold),
        ] {
            if value.is_zero() {
                return Err(Error::configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        for (name, value) in [
            ("warning_threshold", self.warning_threshold),
            ("critical_threshold", self.critical_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::configuration(format!(
                    "{name} must be within (0, 1], got {value}"
                )));
            }
        }
        if self.warning_threshold > self.critical_threshold {
            return Err(Error::configuration(format!(
                "warning_threshold ({}) must not exceed critical_threshold ({})",
                self.warning_threshold, self.critical_threshold
            )));
        }
        Ok(())
    }

    /// Interval of the idle sweeper: half the idle timeout, never below 1ms.
    #[must_use]
    pub fn idle_sweep_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(1))
    }

    /// Return a copy of this config with `update` applied on top.
    #[must_use]
    pub fn merged(&self, update: &PoolConfigUpdate) -> Self {
        Self {
            max_resources: update.max_resources.unwrap_or(self.max_resources),
            idle_timeout: update.idle_timeout.unwrap_or(self.idle_timeout),
            acquisition_timeout: update
                .acquisition_timeout
                .unwrap_or(self.acquisition_timeout),
            retry_attempts: update.retry_attempts.unwrap_or(self.retry_attempts),
            retry_delay: update.retry_delay.unwrap_or(self.retry_delay),
            health_check_interval: update
                .health_check_interval
                .unwrap_or(self.health_check_interval),
            warning_threshold: update.warning_threshold.unwrap_or(self.warning_threshold),
            critical_threshold: update
                .critical_threshold
                .unwrap_or(self.critical_threshold),
            long_running_threshold: update
                .long_running_threshold
                .unwrap_or(self.long_running_threshold),
            max_long_running_evictions: update
                .max_long_running_evictions
                .unwrap_or(self.max_long_running_evictions),
            max_emergency_evictions: update
                .max_emergency_evictions
                .unwrap_or(self.max_emergency_evictions),
        }
    }
}

/// Partial configuration applied by [`Pool::update_config`](crate::Pool::update_config).
///
/// `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfigUpdate {
    pub max_resources: Option<usize>,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub idle_timeout: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub acquisition_timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub retry_delay: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub health_check_interval: Option<Duration>,
    pub warning_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub long_running_threshold: Option<Duration>,
    pub max_long_running_evictions: Option<usize>,
    pub max_emergency_evictions: Option<usize>,
}

impl PoolConfigUpdate {
    /// Update only the capacity.
    #[must_use]
    pub fn max_resources(max_resources: usize) -> Self {
        Self {
            max_resources: Some(max_resources),
            ..Self::default()
        }
    }

    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
