//! Observation hooks for strategy runs.

use crate::types::BufferId;

/// Callbacks invoked at the ownership boundaries of a run.
///
/// All methods default to no-ops; [`NoProbe`] compiles away entirely.
pub trait Probe: Send + Sync + 'static {
    /// A buffer was rented.
    #[inline]
    fn on_rent(&self, _id: BufferId) {}

    /// A buffer is about to be returned to the pool.
    #[inline]
    fn on_return(&self, _id: BufferId) {}

    /// The consumer took a buffer out of the hand-off channel.
    #[inline]
    fn on_handoff(&self, _id: BufferId) {}

    /// The consumer saw the channel completed and drained.
    #[inline]
    fn on_drained(&self) {}
}

/// Probe that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl Probe for NoProbe {}
