//! Opaque handles handed out by the pool.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier of a pooled handle. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct HandleId(Uuid);

impl HandleId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Token granting exclusive use of one pooled slot.
///
/// A handle carries only its identity and creation time. Once it is
/// reclaimed or force-closed it is never handed out again, so releasing a
/// stale copy is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: HandleId,
    created_at: Instant,
}

impl Handle {
    pub(crate) fn mint() -> Self {
        Self {
            id: HandleId::new(),
            created_at: Instant::now(),
        }
    }

    /// The handle identifier.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// When the handle was minted.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the handle was minted.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle:{}", self.id)
    }
}

/// Where a live handle currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HandleState {
    /// Checked out to a caller
    Active,
    /// Parked for reuse
    Idle,
}
