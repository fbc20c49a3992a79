//! Bounded handle pool with FIFO admission.
//!
//! All bookkeeping (active set, idle set, wait queue, config, counters) lives
//! in one [`State`] behind a single mutex. Caller-facing operations and the
//! background maintenance tasks take the same lock, so the capacity check
//! and the checkout it guards always happen atomically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{PoolConfig, PoolConfigUpdate};
use crate::error::{Error, Result};
use crate::events::{CloseReason, EventBus, PoolEvent};
use crate::guard::PoolGuard;
use crate::handle::{Handle, HandleId, HandleState};
use crate::health::{self, HealthReport, ShedReport, UtilizationLevel};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Pool statistics, computed from live state on every call.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolStats {
    /// Handles currently checked out.
    pub active: usize,
    /// Handles parked for reuse.
    pub idle: usize,
    /// Acquisitions waiting for capacity.
    pub queued: usize,
    /// Configured capacity.
    pub max_capacity: usize,
    /// `active / max_capacity`.
    pub utilization: f64,
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total valid releases.
    pub total_releases: u64,
    /// Handles ever minted.
    pub created: u64,
    /// Idle handles reclaimed by expiry or optimization.
    pub reclaimed: u64,
    /// Handles removed by force-close, long-running eviction or shedding.
    pub force_closed: u64,
    /// Queued acquisitions that hit their deadline.
    pub timed_out: u64,
    /// Releases of handles that were not active.
    pub invalid_releases: u64,
    /// Highest active count observed.
    pub peak_active: usize,
}

/// Stats plus raw handle ids and a config snapshot, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetailedStats {
    /// Same numbers as [`Pool::stats`].
    pub stats: PoolStats,
    /// Checked-out handles, sorted by id.
    pub active_handles: Vec<HandleId>,
    /// Parked handles, oldest release first.
    pub idle_handles: Vec<HandleId>,
    /// Config in effect when the snapshot was taken.
    pub config: PoolConfig,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total_acquisitions: u64,
    total_releases: u64,
    created: u64,
    reclaimed: u64,
    force_closed: u64,
    timed_out: u64,
    invalid_releases: u64,
    peak_active: usize,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct ActiveEntry {
    handle: Handle,
    acquired_at: Instant,
}

struct IdleEntry {
    handle: Handle,
    released_at: Instant,
}

/// A queued acquisition.
struct Waiter {
    id: u64,
    enqueued_at: Instant,
    tx: oneshot::Sender<Result<Handle>>,
}

struct State {
    config: PoolConfig,
    active: HashMap<HandleId, ActiveEntry>,
    /// Oldest release at the front.
    idle: VecDeque<IdleEntry>,
    /// Oldest arrival at the front.
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    counters: Counters,
    shut_down: bool,
}

impl State {
    fn new(config: PoolConfig) -> Self {
        let capacity = config.max_resources;
        Self {
            config,
            active: HashMap::with_capacity(capacity),
            idle: VecDeque::with_capacity(capacity),
            waiters: VecDeque::new(),
            next_waiter_id: 0,
            counters: Counters::default(),
            shut_down: false,
        }
    }

    fn utilization(&self) -> f64 {
        self.active.len() as f64 / self.config.max_resources as f64
    }

    fn has_capacity(&self) -> bool {
        self.active.len() < self.config.max_resources
    }

    /// Move the oldest non-expired idle handle (or a fresh one) into the
    /// active set. Caller must have checked capacity.
    fn checkout(&mut self, waited: Duration, events: &EventBus) -> Handle {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let handle = loop {
            match self.idle.pop_front() {
                Some(entry) if now.saturating_duration_since(entry.released_at) > idle_timeout => {
                    self.counters.reclaimed += 1;
                    tracing::debug!(handle = %entry.handle.id(), "Reclaimed expired idle handle at checkout");
                    events.emit(PoolEvent::Closed {
                        handle: entry.handle.id(),
                        reason: CloseReason::IdleTimeout,
                    });
                }
                Some(entry) => break entry.handle,
                None => {
                    let handle = Handle::mint();
                    self.counters.created += 1;
                    events.emit(PoolEvent::Minted {
                        handle: handle.id(),
                    });
                    break handle;
                }
            }
        };

        self.active.insert(
            handle.id(),
            ActiveEntry {
                handle,
                acquired_at: now,
            },
        );
        self.counters.total_acquisitions += 1;
        self.counters.peak_active = self.counters.peak_active.max(self.active.len());
        events.emit(PoolEvent::Acquired {
            handle: handle.id(),
            waited,
            queued: self.waiters.len(),
        });
        handle
    }

    fn enqueue(&mut self, tx: oneshot::Sender<Result<Handle>>) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter {
            id,
            enqueued_at: Instant::now(),
            tx,
        });
        id
    }

    fn remove_waiter(&mut self, id: u64) -> Option<Waiter> {
        let position = self.waiters.iter().position(|w| w.id == id)?;
        self.waiters.remove(position)
    }

    /// Grant queued acquisitions, oldest first, while capacity allows.
    fn drain_waiters(&mut self, events: &EventBus) -> usize {
        let mut granted = 0;
        while self.has_capacity() {
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if waiter.tx.is_closed() {
                tracing::debug!(waiter = waiter.id, "Skipped abandoned waiter");
                continue;
            }

            let handle = self.checkout(waiter.enqueued_at.elapsed(), events);
            if waiter.tx.send(Ok(handle)).is_err() {
                tracing::warn!(handle = %handle.id(), "Waiter vanished during grant, parking handle");
                self.active.remove(&handle.id());
                self.counters.total_acquisitions = self.counters.total_acquisitions.saturating_sub(1);
                self.idle.push_front(IdleEntry {
                    handle,
                    released_at: Instant::now(),
                });
                continue;
            }
            tracing::debug!(handle = %handle.id(), waiter = waiter.id, "Granted handle to queued acquisition");
            granted += 1;
        }
        granted
    }

    fn release(&mut self, id: HandleId, events: &EventBus) -> bool {
        let Some(entry) = self.active.remove(&id) else {
            self.counters.invalid_releases += 1;
            tracing::warn!(handle = %id, "Ignoring release of a handle that is not active");
            events.emit(PoolEvent::InvalidRelease { handle: id });
            return false;
        };

        let now = Instant::now();
        self.counters.total_releases += 1;
        events.emit(PoolEvent::Released {
            handle: id,
            held: now.saturating_duration_since(entry.acquired_at),
        });
        self.idle.push_back(IdleEntry {
            handle: entry.handle,
            released_at: now,
        });
        self.drain_waiters(events);
        true
    }

    /// Remove a handle from whichever set holds it. Does not drain.
    fn force_close(&mut self, id: HandleId, reason: CloseReason, events: &EventBus) -> bool {
        let found = if self.active.remove(&id).is_some() {
            true
        } else if let Some(position) = self.idle.iter().position(|e| e.handle.id() == id) {
            self.idle.remove(position);
            true
        } else {
            false
        };

        if found {
            self.counters.force_closed += 1;
            events.emit(PoolEvent::Closed { handle: id, reason });
        }
        found
    }

    /// Drop idle handles idle longer than `older_than`, or all of them.
    fn reclaim_idle(
        &mut self,
        older_than: Option<Duration>,
        reason: CloseReason,
        events: &EventBus,
    ) -> usize {
        let now = Instant::now();
        let mut reclaimed = Vec::new();
        self.idle.retain(|entry| {
            let expired = older_than
                .is_none_or(|limit| now.saturating_duration_since(entry.released_at) > limit);
            if expired {
                reclaimed.push(entry.handle.id());
            }
            !expired
        });

        self.counters.reclaimed += reclaimed.len() as u64;
        for handle in &reclaimed {
            events.emit(PoolEvent::Closed {
                handle: *handle,
                reason,
            });
        }
        reclaimed.len()
    }

    /// Active handles sorted by checkout time, oldest first, optionally
    /// limited to those held longer than `held_longer_than`.
    fn oldest_active(&self, held_longer_than: Option<Duration>) -> Vec<HandleId> {
        let now = Instant::now();
        let mut entries: Vec<(Instant, HandleId)> = self
            .active
            .values()
            .filter(|e| {
                held_longer_than
                    .is_none_or(|limit| now.saturating_duration_since(e.acquired_at) > limit)
            })
            .map(|e| (e.acquired_at, e.handle.id()))
            .collect();
        entries.sort_unstable();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    fn shed(&mut self, events: &EventBus) -> ShedReport {
        let mut victims = self.oldest_active(None);
        victims.truncate(self.config.max_emergency_evictions);
        for id in &victims {
            self.force_close(*id, CloseReason::Emergency, events);
        }

        let idle_cleared = self.idle.len();
        for entry in self.idle.drain(..) {
            events.emit(PoolEvent::Closed {
                handle: entry.handle.id(),
                reason: CloseReason::Emergency,
            });
        }
        self.counters.force_closed += idle_cleared as u64;

        let granted = self.drain_waiters(events);
        events.emit(PoolEvent::EmergencyShed {
            force_closed: victims.len(),
            idle_cleared,
        });
        ShedReport {
            force_closed: victims,
            idle_cleared,
            granted,
        }
    }

    fn evict_long_running(&mut self, events: &EventBus) -> Vec<HandleId> {
        let mut stale = self.oldest_active(Some(self.config.long_running_threshold));
        if stale.is_empty() {
            return stale;
        }
        stale.truncate(self.config.max_long_running_evictions);
        for id in &stale {
            tracing::warn!(handle = %id, "Force-closing long-running handle");
            self.force_close(*id, CloseReason::LongRunning, events);
        }
        self.drain_waiters(events);
        stale
    }

    /// Empty both sets and reject every waiter. Returns the number rejected.
    fn reset(&mut self, events: &EventBus) -> usize {
        for (id, _) in self.active.drain() {
            events.emit(PoolEvent::Closed {
                handle: id,
                reason: CloseReason::Reset,
            });
        }
        for entry in self.idle.drain(..) {
            events.emit(PoolEvent::Closed {
                handle: entry.handle.id(),
                reason: CloseReason::Reset,
            });
        }

        let cancelled = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            // A dropped receiver needs no notification.
            let _ = waiter.tx.send(Err(Error::PoolReset));
        }
        events.emit(PoolEvent::Reset { cancelled });
        cancelled
    }

    fn stats(&self) -> PoolStats {
        let c = self.counters;
        PoolStats {
            active: self.active.len(),
            idle: self.idle.len(),
            queued: self.waiters.len(),
            max_capacity: self.config.max_resources,
            utilization: self.utilization(),
            total_acquisitions: c.total_acquisitions,
            total_releases: c.total_releases,
            created: c.created,
            reclaimed: c.reclaimed,
            force_closed: c.force_closed,
            timed_out: c.timed_out,
            invalid_releases: c.invalid_releases,
            peak_active: c.peak_active,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

struct PoolInner {
    state: Mutex<State>,
    events: EventBus,
    /// Parent of every maintenance task token.
    cancel: CancellationToken,
    /// Wakes maintenance tasks so a new interval applies immediately.
    config_changed: Arc<Notify>,
    maintenance_started: AtomicBool,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bounded pool of [`Handle`]s.
///
/// Cheap to clone; every clone shares the same state. Construct one per
/// logical resource and pass it to callers explicitly.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// Non-owning reference used by maintenance tasks so they never keep a
/// pool alive on their own.
#[derive(Clone)]
pub(crate) struct WeakPool(Weak<PoolInner>);

impl WeakPool {
    pub(crate) fn upgrade(&self) -> Option<Pool> {
        self.0.upgrade().map(|inner| Pool { inner })
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

impl Pool {
    /// Create a pool. No background tasks run until
    /// [`start_maintenance`](Self::start_maintenance) is called.
    ///
    /// # Errors
    /// Returns error if `config` is invalid (e.g. `max_resources == 0`).
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_event_bus(config, EventBus::default())
    }

    /// Create a pool that publishes to the given event bus.
    pub fn with_event_bus(config: PoolConfig, events: EventBus) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(State::new(config)),
                events,
                cancel: CancellationToken::new(),
                config_changed: Arc::new(Notify::new()),
                maintenance_started: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the idle sweeper and the health monitor.
    ///
    /// Idempotent. The tasks stop on [`shutdown`](Self::shutdown) or once
    /// every clone of the pool is dropped.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start_maintenance(&self) {
        if self.inner.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }
        health::spawn_maintenance(
            &self.downgrade(),
            &self.inner.cancel,
            &self.inner.config_changed,
        );
        tracing::debug!("Started pool maintenance tasks");
    }

    pub(crate) fn downgrade(&self) -> WeakPool {
        WeakPool(Arc::downgrade(&self.inner))
    }

    /// Acquire a handle.
    ///
    /// Returns immediately when capacity is available and nobody is queued.
    /// Otherwise the caller joins the FIFO wait queue until a handle is
    /// granted or `acquisition_timeout` elapses. Dropping the returned
    /// future while queued withdraws the request.
    ///
    /// # Errors
    /// - [`Error::AcquisitionTimeout`] if the deadline passes while queued
    /// - [`Error::PoolReset`] if the pool is reset while queued
    /// - [`Error::Shutdown`] if the pool has been shut down
    pub async fn acquire(&self) -> Result<Handle> {
        let (id, rx, timeout) = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return Err(Error::Shutdown);
            }
            if state.waiters.is_empty() && state.has_capacity() {
                let handle = state.checkout(Duration::ZERO, &self.inner.events);
                tracing::debug!(
                    handle = %handle.id(),
                    active = state.active.len(),
                    "Acquired handle"
                );
                return Ok(handle);
            }

            let (tx, rx) = oneshot::channel();
            let id = state.enqueue(tx);
            let queued = state.waiters.len();
            tracing::debug!(
                queued,
                active = state.active.len(),
                max_resources = state.config.max_resources,
                "Pool at capacity, queueing acquisition"
            );
            self.inner.events.emit(PoolEvent::Queued { queued });
            (id, rx, state.config.acquisition_timeout)
        };

        let mut waiting = Waiting {
            pool: self,
            id,
            rx,
            settled: false,
        };
        waiting.wait(timeout).await
    }

    /// Acquire a handle wrapped in a guard that releases it on drop.
    pub async fn acquire_guard(&self) -> Result<PoolGuard> {
        let handle = self.acquire().await?;
        Ok(PoolGuard::new(self.clone(), handle))
    }

    /// Return a handle to the idle set and serve the wait queue.
    ///
    /// Releasing a handle that is not active (double release, or a handle
    /// force-closed under the caller) is logged and otherwise ignored.
    pub fn release(&self, handle: Handle) {
        let mut state = self.inner.state.lock();
        if state.release(handle.id(), &self.inner.events) {
            tracing::debug!(
                handle = %handle.id(),
                idle = state.idle.len(),
                queued = state.waiters.len(),
                "Released handle"
            );
        }
    }

    /// Remove a handle from the pool without returning it to the idle set.
    ///
    /// Administrative path. Returns `false` if the handle is neither active
    /// nor idle.
    pub fn force_close(&self, id: HandleId) -> bool {
        let mut state = self.inner.state.lock();
        if !state.force_close(id, CloseReason::Administrative, &self.inner.events) {
            tracing::warn!(handle = %id, "Force-close of unknown handle ignored");
            return false;
        }
        tracing::info!(handle = %id, "Force-closed handle");
        state.drain_waiters(&self.inner.events);
        true
    }

    /// Reclaim idle handles unused for longer than `idle_timeout`.
    ///
    /// Returns the number reclaimed. Run periodically by the idle sweeper.
    pub fn sweep_idle(&self) -> usize {
        let mut state = self.inner.state.lock();
        let limit = state.config.idle_timeout;
        let reclaimed = state.reclaim_idle(Some(limit), CloseReason::IdleTimeout, &self.inner.events);
        if reclaimed > 0 {
            tracing::debug!(reclaimed, idle = state.idle.len(), "Idle sweep reclaimed handles");
        }
        reclaimed
    }

    /// Run one health check pass.
    ///
    /// - utilization ≥ critical: emergency shedding
    /// - utilization ≥ warning: every idle handle is dropped
    /// - in either case, up to `max_long_running_evictions` handles checked
    ///   out longer than `long_running_threshold` are force-closed
    ///
    /// Long-running eviction is a lossy safety valve against leaked
    /// handles; it can interrupt legitimate long work.
    pub fn run_health_check(&self) -> HealthReport {
        let events = &self.inner.events;
        let mut state = self.inner.state.lock();
        let utilization = state.utilization();
        let level = UtilizationLevel::classify(utilization, &state.config);
        let mut report = HealthReport::new(utilization, level);

        match level {
            UtilizationLevel::Critical => {
                tracing::error!(
                    utilization,
                    active = state.active.len(),
                    max_resources = state.config.max_resources,
                    "Pool utilization critical, shedding handles"
                );
                report.shed = Some(state.shed(events));
            }
            UtilizationLevel::Warning => {
                tracing::warn!(utilization, idle = state.idle.len(), "Pool utilization high, dropping idle handles");
                events.emit(PoolEvent::UtilizationWarning { utilization });
                report.idle_reclaimed = state.reclaim_idle(None, CloseReason::Optimized, events);
            }
            UtilizationLevel::Normal => {}
        }

        if level != UtilizationLevel::Normal {
            report.long_running_closed = state.evict_long_running(events);
        }
        events.emit(PoolEvent::HealthChecked {
            level,
            utilization: state.utilization(),
            queued: state.waiters.len(),
        });
        report
    }

    /// Force-close up to `max_emergency_evictions` active handles (longest
    /// checked out first), drop every idle handle, then serve the queue.
    ///
    /// Normally triggered by the health check; exposed for operators.
    pub fn emergency_shed(&self) -> ShedReport {
        let mut state = self.inner.state.lock();
        tracing::error!(active = state.active.len(), idle = state.idle.len(), "Emergency shedding");
        state.shed(&self.inner.events)
    }

    /// Live statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats()
    }

    /// Statistics plus the raw handle ids in each set and the config.
    #[must_use]
    pub fn detailed_stats(&self) -> DetailedStats {
        let state = self.inner.state.lock();
        let mut active_handles: Vec<HandleId> = state.active.keys().copied().collect();
        active_handles.sort_unstable();
        DetailedStats {
            stats: state.stats(),
            active_handles,
            idle_handles: state.idle.iter().map(|e| e.handle.id()).collect(),
            config: state.config.clone(),
        }
    }

    /// Where a handle currently sits, or `None` if it is closed or unknown.
    #[must_use]
    pub fn handle_state(&self, id: HandleId) -> Option<HandleState> {
        let state = self.inner.state.lock();
        if state.active.contains_key(&id) {
            Some(HandleState::Active)
        } else if state.idle.iter().any(|e| e.handle.id() == id) {
            Some(HandleState::Idle)
        } else {
            None
        }
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }

    /// Apply a partial configuration update.
    ///
    /// Takes effect immediately: a raised capacity admits queued callers
    /// right away and maintenance tasks pick up new intervals.
    ///
    /// A lowered capacity never revokes handles already checked out. It
    /// bounds future admissions only, so `active` may exceed
    /// `max_resources` (and `utilization` read above 1.0) until enough
    /// handles are released.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the merged config is invalid; the
    /// current config is left untouched.
    pub fn update_config(&self, update: PoolConfigUpdate) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let next = state.config.merged(&update);
            next.validate()?;
            tracing::info!(
                max_resources = next.max_resources,
                acquisition_timeout_ms = next.acquisition_timeout.as_millis() as u64,
                idle_timeout_ms = next.idle_timeout.as_millis() as u64,
                "Pool configuration updated"
            );
            state.config = next;
            self.inner.events.emit(PoolEvent::ConfigUpdated);
            state.drain_waiters(&self.inner.events);
        }
        self.inner.config_changed.notify_waiters();
        Ok(())
    }

    /// Drop every active and idle handle and reject queued acquisitions
    /// with [`Error::PoolReset`]. The pool stays usable.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let active = state.active.len();
        let idle = state.idle.len();
        let cancelled = state.reset(&self.inner.events);
        tracing::info!(active, idle, cancelled, "Pool reset");
    }

    /// Stop maintenance tasks, then reset. Later acquisitions fail with
    /// [`Error::Shutdown`].
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.state.lock().shut_down = true;
        self.reset();
        tracing::info!("Pool shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// The event bus this pool publishes to.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to pool events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// A queued acquisition owned by the `acquire` future.
///
/// Dropping it before it settles removes the queue entry; a grant that
/// raced the drop goes straight back to the idle set.
struct Waiting<'a> {
    pool: &'a Pool,
    id: u64,
    rx: oneshot::Receiver<Result<Handle>>,
    settled: bool,
}

impl Waiting<'_> {
    async fn wait(&mut self, timeout: Duration) -> Result<Handle> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
        self.settled = true;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::warn!(waiter = self.id, "Wait queue entry dropped without an answer");
                Err(Error::Shutdown)
            }
            Err(_) => self.expire(started),
        }
    }

    fn expire(&mut self, started: Instant) -> Result<Handle> {
        let inner = &self.pool.inner;
        let mut state = inner.state.lock();
        if state.remove_waiter(self.id).is_some() {
            let waited = started.elapsed();
            state.counters.timed_out += 1;
            inner.events.emit(PoolEvent::TimedOut {
                waited,
                queued: state.waiters.len(),
            });
            tracing::warn!(
                waited_ms = waited.as_millis() as u64,
                active = state.active.len(),
                queued = state.waiters.len(),
                "Acquisition timed out"
            );
            return Err(Error::AcquisitionTimeout {
                waited_ms: waited.as_millis() as u64,
                active: state.active.len(),
                max_resources: state.config.max_resources,
                queued: state.waiters.len(),
            });
        }
        drop(state);

        // Answered between the deadline and taking the lock: the answer wins.
        match self.rx.try_recv() {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(waiter = self.id, "Timed-out waiter missing from queue");
                Err(Error::Shutdown)
            }
        }
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let inner = &self.pool.inner;
        let mut state = inner.state.lock();
        if state.remove_waiter(self.id).is_some() {
            tracing::debug!(waiter = self.id, "Queued acquisition abandoned");
            return;
        }
        if let Ok(Ok(handle)) = self.rx.try_recv() {
            tracing::debug!(handle = %handle.id(), "Returning handle granted to an abandoned acquisition");
            state.release(handle.id(), &inner.events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_resources: usize) -> Pool {
        Pool::new(
            PoolConfig::default()
                .with_max_resources(max_resources)
                .with_acquisition_timeout(Duration::from_millis(100)),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_invalid_config() {
        let result = Pool::new(PoolConfig::default().with_max_resources(0));
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn acquire_mints_then_reuses() {
        let pool = pool(2);
        let first = pool.acquire().await.unwrap();
        assert_eq!(pool.handle_state(first.id()), Some(HandleState::Active));

        pool.release(first);
        assert_eq!(pool.handle_state(first.id()), Some(HandleState::Idle));

        let again = pool.acquire().await.unwrap();
        assert_eq!(again, first);
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.total_acquisitions, 2);
    }

    #[tokio::test]
    async fn idle_reuse_takes_oldest_release_first() {
        let pool = pool(3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(b);
        pool.release(a);

        assert_eq!(pool.acquire().await.unwrap(), b);
        assert_eq!(pool.acquire().await.unwrap(), a);
    }

    #[tokio::test]
    async fn double_release_is_ignored() {
        let pool = pool(1);
        let handle = pool.acquire().await.unwrap();
        pool.release(handle);
        pool.release(handle);

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.total_releases, 1);
        assert_eq!(stats.invalid_releases, 1);
    }

    #[tokio::test]
    async fn force_close_removes_from_either_set() {
        let pool = pool(2);
        let active = pool.acquire().await.unwrap();
        let idle = pool.acquire().await.unwrap();
        pool.release(idle);

        assert!(pool.force_close(active.id()));
        assert!(pool.force_close(idle.id()));
        assert!(!pool.force_close(idle.id()));

        let stats = pool.stats();
        assert_eq!((stats.active, stats.idle), (0, 0));
        assert_eq!(stats.force_closed, 2);
        assert_eq!(pool.handle_state(active.id()), None);

        // Releasing a force-closed handle must not resurrect it.
        pool.release(active);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_only_reclaims_expired_idle_handles() {
        let pool = Pool::new(
            PoolConfig::default()
                .with_max_resources(4)
                .with_idle_timeout(Duration::from_secs(30)),
        )
        .unwrap();
        let old = pool.acquire().await.unwrap();
        let fresh = pool.acquire().await.unwrap();
        let busy = pool.acquire().await.unwrap();
        pool.release(old);
        tokio::time::advance(Duration::from_secs(20)).await;
        pool.release(fresh);
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(pool.sweep_idle(), 1);
        let detailed = pool.detailed_stats();
        assert_eq!(detailed.idle_handles, vec![fresh.id()]);
        assert_eq!(detailed.active_handles, vec![busy.id()]);
        assert_eq!(detailed.stats.reclaimed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_skips_expired_idle_handle() {
        let pool = Pool::new(
            PoolConfig::default()
                .with_max_resources(1)
                .with_idle_timeout(Duration::from_secs(1)),
        )
        .unwrap();
        let stale = pool.acquire().await.unwrap();
        pool.release(stale);
        tokio::time::advance(Duration::from_secs(2)).await;

        let handle = pool.acquire().await.unwrap();
        assert_ne!(handle, stale);
        assert_eq!(pool.stats().reclaimed, 1);
    }

    #[tokio::test]
    async fn raising_capacity_admits_waiters() {
        let pool = Pool::new(
            PoolConfig::default()
                .with_max_resources(1)
                .with_acquisition_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        while pool.stats().queued == 0 {
            tokio::task::yield_now().await;
        }

        pool.update_config(PoolConfigUpdate::max_resources(2)).unwrap();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(pool.stats().active, 2);
    }

    #[tokio::test]
    async fn invalid_update_leaves_config_untouched() {
        let pool = pool(3);
        let err = pool
            .update_config(PoolConfigUpdate::max_resources(0))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(pool.config().max_resources, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_capacity_keeps_active_handles() {
        let pool = pool(4);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let _c = pool.acquire().await.unwrap();

        pool.update_config(PoolConfigUpdate::max_resources(2)).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.utilization, 1.5);

        // Admissions resume only once active drops below the new bound.
        pool.release(a);
        assert!(matches!(
            pool.acquire().await,
            Err(Error::AcquisitionTimeout { active: 2, max_resources: 2, .. })
        ));
        pool.release(b);
        assert!(pool.acquire().await.is_ok());
        assert_eq!(pool.stats().active, 2);
    }

    #[tokio::test]
    async fn dropped_acquire_withdraws_from_queue() {
        let pool = pool(1);
        let held = pool.acquire().await.unwrap();

        let pending = pool.acquire();
        let outcome = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(outcome.is_err(), "acquire should still be pending");
        assert_eq!(pool.stats().queued, 0);

        pool.release(held);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn stats_report_utilization() {
        let pool = pool(4);
        let _a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        pool.release(b);

        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.max_capacity, 4);
        assert_eq!(stats.utilization, 0.25);
        assert_eq!(stats.peak_active, 2);
    }
}
