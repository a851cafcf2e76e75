//! Bounded producer-to-consumer hand-off.

mod handoff;

pub use handoff::{HandoffChannel, HandoffStats, WriteError};
