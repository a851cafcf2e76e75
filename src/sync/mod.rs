//! Synchronization primitives measured in isolation.

mod spin_lock;

pub use spin_lock::{SpinGuard, SpinLock};
