//! Event broadcasting for pool lifecycle observability.
//!
//! Provides [`PoolEvent`] variants emitted as handles move through the pool
//! and an [`EventBus`] backed by `tokio::sync::broadcast`.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::handle::HandleId;
use crate::health::UtilizationLevel;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted by the pool.
///
/// Subscribers receive cloned copies via [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// A fresh handle was minted.
    Minted {
        /// The new handle.
        handle: HandleId,
    },
    /// A handle was checked out to a caller.
    Acquired {
        /// The handle granted.
        handle: HandleId,
        /// Time spent in the wait queue (zero for immediate grants).
        waited: Duration,
        /// Requests still queued after this grant.
        queued: usize,
    },
    /// The pool was at capacity and the caller joined the wait queue.
    Queued {
        /// Queue length including the new entry.
        queued: usize,
    },
    /// A queued acquisition passed its deadline.
    TimedOut {
        /// How long the request waited.
        waited: Duration,
        /// Requests still queued after this one left.
        queued: usize,
    },
    /// A handle was returned to the idle set.
    Released {
        /// The handle released.
        handle: HandleId,
        /// How long the caller held it.
        held: Duration,
    },
    /// A caller released a handle the pool does not consider active.
    InvalidRelease {
        /// The offending handle.
        handle: HandleId,
    },
    /// A handle was permanently removed from the pool.
    Closed {
        /// The handle removed.
        handle: HandleId,
        /// Why it was removed.
        reason: CloseReason,
    },
    /// The health check found utilization at or above the warning threshold.
    UtilizationWarning {
        /// Utilization at the time of the check.
        utilization: f64,
    },
    /// A health check pass finished.
    HealthChecked {
        /// Band the utilization fell into when the pass started.
        level: UtilizationLevel,
        /// Utilization left after the pass acted.
        utilization: f64,
        /// Requests still queued after the pass.
        queued: usize,
    },
    /// Emergency shedding ran.
    EmergencyShed {
        /// Active handles force-closed.
        force_closed: usize,
        /// Idle handles dropped.
        idle_cleared: usize,
    },
    /// The pool was reset.
    Reset {
        /// Queued requests rejected by the reset.
        cancelled: usize,
    },
    /// The configuration was replaced.
    ConfigUpdated,
}

// ---------------------------------------------------------------------------
// CloseReason
// ---------------------------------------------------------------------------

/// Reason a handle left the pool for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Idle longer than the idle timeout.
    IdleTimeout,
    /// Idle handle dropped by the warning-level optimization pass.
    Optimized,
    /// Checked out longer than the long-running threshold.
    LongRunning,
    /// Removed by emergency shedding.
    Emergency,
    /// Closed through [`Pool::force_close`](crate::Pool::force_close).
    Administrative,
    /// Dropped by a reset or shutdown.
    Reset,
}

impl CloseReason {
    /// Stable lowercase name, used as a metrics label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdleTimeout => "idle_timeout",
            Self::Optimized => "optimized",
            Self::LongRunning => "long_running",
            Self::Emergency => "emergency",
            Self::Administrative => "administrative",
            Self::Reset => "reset",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are dropped (no backpressure on the pool).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// Subscribers falling behind by more than `buffer_size` events lag and
    /// lose the oldest ones.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
