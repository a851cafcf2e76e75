//! Process-wide pool registry.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::{ArrayPool, Element};

type AnyPool = Arc<dyn Any + Send + Sync>;

/// Shared pools keyed by element type. Never torn down.
static SHARED_POOLS: OnceLock<RwLock<FxHashMap<TypeId, AnyPool>>> = OnceLock::new();

/// Get the shared pool for element type `T`, creating it on first use.
pub fn shared_pool<T: Element>() -> Arc<ArrayPool<T>> {
    let registry = SHARED_POOLS.get_or_init(Default::default);
    let key = TypeId::of::<T>();

    if let Some(pool) = registry.read().get(&key) {
        return downcast(pool.clone());
    }

    let pool = registry
        .write()
        .entry(key)
        .or_insert_with(|| {
            let pool = ArrayPool::<T>::new();
            debug!(pool = %pool.id(), "created shared pool for {}", std::any::type_name::<T>());
            Arc::new(pool) as AnyPool
        })
        .clone();
    downcast(pool)
}

fn downcast<T: Element>(pool: AnyPool) -> Arc<ArrayPool<T>> {
    match pool.downcast::<ArrayPool<T>>() {
        Ok(pool) => pool,
        Err(_) => unreachable!("shared pool registered under a foreign TypeId"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_pool_is_singleton() {
        let a = shared_pool::<u16>();
        let b = shared_pool::<u16>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_shared_pool_per_element_type() {
        let bytes = shared_pool::<i8>();
        let words = shared_pool::<i64>();
        assert_ne!(bytes.id(), words.id());
    }

    #[test]
    fn test_shared_pool_concurrent_init() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| shared_pool::<u128>().id()))
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
