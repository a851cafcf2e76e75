//! Single-slot hand-off channel with blocking and suspending waits.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::pin::pin;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::Error;

/// A write to a completed channel. Carries the rejected item back to the
/// writer.
pub struct WriteError<T>(pub T);

impl<T> WriteError<T> {
    /// Recover the item that was not written.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for WriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WriteError(..)")
    }
}

impl<T> fmt::Display for WriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Error::ChannelCompleted)
    }
}

impl<T> std::error::Error for WriteError<T> {}

impl<T> From<WriteError<T>> for Error {
    fn from(_: WriteError<T>) -> Self {
        Error::ChannelCompleted
    }
}

/// Slot state guarded by the channel mutex.
struct Slot<T> {
    item: Option<T>,
    completed: bool,
    writes: u64,
    reads: u64,
}

/// Bounded channel of capacity one between a producer and a consumer.
///
/// A writer waits until the slot is empty, a reader waits until it is full or
/// the channel is completed. Both waits come in two flavours that share the
/// same slot: `*_blocking` parks the calling thread on a condition variable,
/// the async ones suspend the task on a [`Notify`]. Every state change wakes
/// both kinds of waiter.
pub struct HandoffChannel<T> {
    slot: Mutex<Slot<T>>,
    /// Wakes blocked threads.
    changed: Condvar,
    /// Wakes suspended tasks.
    notify: Notify,
}

impl<T: Send> HandoffChannel<T> {
    /// Create an open, empty channel.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                completed: false,
                writes: 0,
                reads: 0,
            }),
            changed: Condvar::new(),
            notify: Notify::new(),
        }
    }

    fn signal(&self) {
        self.changed.notify_all();
        self.notify.notify_waiters();
    }

    /// Deposit `item`, parking the thread while the slot is occupied.
    ///
    /// Fails once the channel is completed, handing `item` back.
    pub fn write_blocking(&self, item: T) -> Result<(), WriteError<T>> {
        let mut slot = self.slot.lock();
        loop {
            if slot.completed {
                return Err(WriteError(item));
            }
            if slot.item.is_none() {
                slot.item = Some(item);
                slot.writes += 1;
                drop(slot);
                self.signal();
                return Ok(());
            }
            self.changed.wait(&mut slot);
        }
    }

    /// Deposit `item`, suspending the task while the slot is occupied.
    pub async fn write(&self, item: T) -> Result<(), WriteError<T>> {
        loop {
            // Register interest before checking so a wakeup between the
            // check and the await is not lost.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut slot = self.slot.lock();
                if slot.completed {
                    return Err(WriteError(item));
                }
                if slot.item.is_none() {
                    slot.item = Some(item);
                    slot.writes += 1;
                    drop(slot);
                    self.signal();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Take the pending item without waiting.
    pub fn try_read(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        let item = slot.item.take();
        if item.is_some() {
            slot.reads += 1;
            drop(slot);
            self.signal();
        }
        item
    }

    /// Park until an item is pending (`true`) or the channel is completed
    /// and drained (`false`).
    pub fn wait_until_readable_blocking(&self) -> bool {
        let mut slot = self.slot.lock();
        loop {
            if slot.item.is_some() {
                return true;
            }
            if slot.completed {
                return false;
            }
            self.changed.wait(&mut slot);
        }
    }

    /// Suspend until an item is pending (`true`) or the channel is completed
    /// and drained (`false`).
    pub async fn wait_until_readable(&self) -> bool {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let slot = self.slot.lock();
                if slot.item.is_some() {
                    return true;
                }
                if slot.completed {
                    return false;
                }
            }

            notified.await;
        }
    }

    /// Mark that no further writes will happen. Idempotent; a pending item
    /// stays readable.
    pub fn complete(&self) {
        let mut slot = self.slot.lock();
        if slot.completed {
            return;
        }
        slot.completed = true;
        debug!(writes = slot.writes, reads = slot.reads, "hand-off channel completed");
        drop(slot);
        self.signal();
    }

    /// Check if `complete` has been called.
    pub fn is_completed(&self) -> bool {
        self.slot.lock().completed
    }

    /// Snapshot of the channel counters, taken atomically.
    pub fn stats(&self) -> HandoffStats {
        let slot = self.slot.lock();
        HandoffStats {
            writes: slot.writes,
            reads: slot.reads,
            pending: slot.item.is_some(),
            completed: slot.completed,
        }
    }
}

impl<T: Send> Default for HandoffChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand-off channel counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffStats {
    /// Items deposited.
    pub writes: u64,
    /// Items taken.
    pub reads: u64,
    /// Whether the slot currently holds an item.
    pub pending: bool,
    /// Whether the channel has been completed.
    pub completed: bool,
}

impl HandoffStats {
    /// Items written but not yet read. Never more than one.
    pub fn in_flight(&self) -> u64 {
        self.writes - self.reads
    }
}
