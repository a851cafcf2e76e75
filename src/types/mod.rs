mod buffer_id;
mod pool_id;

pub use buffer_id::BufferId;
pub use pool_id::PoolId;
