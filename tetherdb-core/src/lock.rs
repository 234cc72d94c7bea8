// src/lock.rs
//! Process-local advisory lock.
//!
//! Serializes master-index mutations between handles inside one process; it
//! is *not* the cross-instance lock (that one lives in the persisted
//! collection metadata, see `master_index`). Release is tied to guard drop,
//! so double-release cannot happen.

use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, TetherDbError};

/// Advisory in-process mutex with timeout acquisition.
#[derive(Default)]
pub struct ProcessLock {
    inner: Mutex<()>,
}

/// Held lock; dropping it releases.
pub struct ProcessLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free, up to `timeout`.
    pub fn acquire(&self, timeout: Duration) -> Result<ProcessLockGuard<'_>> {
        self.inner
            .try_lock_for(timeout)
            .map(|guard| ProcessLockGuard { _guard: guard })
            .ok_or_else(|| TetherDbError::LockTimeout(timeout.as_millis() as u64))
    }

    /// Non-blocking acquisition attempt.
    pub fn try_acquire(&self) -> Option<ProcessLockGuard<'_>> {
        self.inner
            .try_lock()
            .map(|guard| ProcessLockGuard { _guard: guard })
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_drop_releases() {
        let lock = ProcessLock::new();
        {
            let _guard = lock.acquire(Duration::from_millis(10)).unwrap();
            assert!(lock.is_held());
            assert!(lock.try_acquire().is_none());
        }
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_contended_acquire_times_out() {
        let lock = ProcessLock::new();
        let _guard = lock.acquire(Duration::from_millis(10)).unwrap();

        match lock.acquire(Duration::from_millis(20)) {
            Err(TetherDbError::LockTimeout(ms)) => assert_eq!(ms, 20),
            other => panic!("expected LockTimeout, got {:?}", other.map(|_| ())),
        };
    }
}
