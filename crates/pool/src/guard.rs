//! RAII guard for pooled handles

use crate::handle::Handle;
use crate::pool::Pool;

/// RAII guard around an acquired [`Handle`].
///
/// Dropping the guard releases the handle back to the pool. Use
/// [`detach`](Self::detach) to take the raw handle and manage the release
/// yourself.
pub struct PoolGuard {
    pool: Pool,
    handle: Handle,
    armed: bool,
}

impl PoolGuard {
    pub(crate) fn new(pool: Pool, handle: Handle) -> Self {
        Self {
            pool,
            handle,
            armed: true,
        }
    }

    /// The guarded handle.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Take the handle out of the guard without releasing it.
    #[must_use]
    pub fn detach(mut self) -> Handle {
        self.armed = false;
        self.handle
    }
}

impl std::ops::Deref for PoolGuard {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release(self.handle);
        }
    }
}

impl std::fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("handle", &self.handle)
            .field("armed", &self.armed)
            .finish()
    }
}
