use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Next identifier handed out by [`PoolId::next`]. Zero is never issued.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Compact identifier of an [`ArrayPool`](crate::pool::ArrayPool) instance.
///
/// Every buffer remembers the id of the pool that allocated it so that
/// returning it to a different pool can be detected and rejected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PoolId(u32);

impl PoolId {
    /// Create a PoolId from a raw u32 value
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Allocate a process-unique PoolId
    pub fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying u32 value
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PoolId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}
