//! Test-and-set spin lock without a protected payload.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};

/// Minimal mutual-exclusion lock.
///
/// Acquisition spins with exponential backoff and yields the thread once
/// spinning stops paying off. There is no waiter queue; release simply
/// clears the flag and whichever spinner sees it first wins.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until exclusive ownership is obtained.
    #[inline]
    pub fn acquire(&self) -> SpinGuard<'_> {
        let backoff = Backoff::new();
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
            // Wait on a plain load so contended spinners do not bounce the
            // cache line with failed writes.
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    /// Take the lock if it is free.
    #[inline]
    pub fn try_acquire(&self) -> Option<SpinGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    /// Check if some context currently holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    #[inline]
    fn unlock(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        assert!(was_locked, "released a SpinLock that was not held");
    }
}

/// Proof of ownership of a [`SpinLock`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl SpinGuard<'_> {
    /// Release the lock explicitly.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
