//! # Nebula Pool
//!
//! A bounded pool of opaque [`Handle`]s shared by concurrent async callers.
//!
//! - At most `max_resources` handles are checked out at once.
//! - Callers that find the pool full wait in a FIFO queue until a handle is
//!   released or `acquisition_timeout` elapses.
//! - Released handles are parked and reused, oldest release first; handles
//!   idle past `idle_timeout` are reclaimed.
//! - A periodic health check drops idle handles under pressure, force-closes
//!   handles held past `long_running_threshold`, and sheds load when
//!   utilization turns critical.
//!
//! ```rust,ignore
//! let pool = Pool::new(PoolConfig::default().with_max_resources(10))?;
//! pool.start_maintenance();
//!
//! let guard = pool.acquire_guard().await?;
//! // use guard.id() ...
//! drop(guard); // back to the idle set
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod handle;
pub mod health;
pub mod pool;
pub mod retry;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use config::{PoolConfig, PoolConfigUpdate};
pub use error::{Error, Result};
pub use events::{CloseReason, EventBus, PoolEvent};
pub use guard::PoolGuard;
pub use handle::{Handle, HandleId, HandleState};
pub use health::{HealthReport, ShedReport, UtilizationLevel};
pub use pool::{DetailedStats, Pool, PoolStats};
pub use retry::RetryPolicy;

#[cfg(feature = "metrics")]
pub use crate::metrics::{MetricsCollector, spawn_metrics_collector};
