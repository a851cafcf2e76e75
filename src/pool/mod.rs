//! Buffer pooling.
//!
//! [`ArrayPool`] recycles fixed-length arrays by size class. Every element
//! type has one process-wide instance reachable through [`shared_pool`];
//! any number of private instances can be created alongside it.

mod buffer;
mod shared;

pub use buffer::{
    ArrayPool, Buffer, Element, PoolStats, DEFAULT_MAX_ARRAYS_PER_BUCKET,
    DEFAULT_MAX_ARRAY_LENGTH, MIN_BUCKET_LENGTH,
};
pub use shared::shared_pool;
