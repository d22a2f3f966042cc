//! Non-blocking per-object lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// A test-and-set lock guarding ownership of one object during commit.
///
/// Acquisition is a single compare-and-swap from unlocked to locked.
/// There is no fairness and no poisoning. The lock carries no data: the
/// version chain it guards lives behind its own short-lived mutex, so
/// readers never wait on a committing writer.
///
/// ```rust
/// use snapdb_core::SpinLock;
///
/// let lock = SpinLock::new();
/// let guard = lock.try_lock().unwrap();
/// assert!(lock.try_lock().is_none());
/// drop(guard);
/// assert!(!lock.is_locked());
/// ```
#[derive(Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Attempts to take the lock without waiting.
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    /// Takes the lock, yielding the thread between attempts.
    pub fn lock(&self) -> SpinGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            std::thread::yield_now();
        }
    }

    /// Returns true if the lock is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl fmt::Debug for SpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Releases a [`SpinLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl fmt::Debug for SpinGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SpinGuard")
    }
}
