//! Scoped non-reentrancy lock.
//!
//! Operations that move reserves or pool balances hold a
//! [`ReentrancyGuard`] for their whole body. A hook or external call that
//! tries to enter another guarded operation in the meantime fails with
//! `ReentrantCall`. The guard releases the lock on drop, including on early
//! return through `?`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use poolvault_types::{Result, VaultError};

#[derive(Debug, Clone, Default)]
pub struct ReentrancyLock {
    entered: Arc<AtomicBool>,
}

impl ReentrancyLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for the lifetime of the returned guard.
    ///
    /// # Errors
    /// `ReentrantCall` if a guarded operation is already running.
    pub fn enter(&self) -> Result<ReentrancyGuard> {
        if self
            .entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Reentrant call rejected");
            return Err(VaultError::ReentrantCall);
        }
        Ok(ReentrancyGuard {
            entered: Arc::clone(&self.entered),
        })
    }

    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

/// Releases the lock when dropped.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrancyGuard {
    entered: Arc<AtomicBool>,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        self.entered.store(false, Ordering::Release);
    }
}
