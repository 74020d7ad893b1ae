//! Per-page memoization of fold results.

use parking_lot::RwLock;
use std::any::Any;

/// Cached fold result of one page.
///
/// The cache is keyed by the id of the [`Reducer`](crate::Reducer) that
/// produced the value. A page built by a mutation starts
/// with an empty cache, so a cached value is valid for the page's lifetime.
pub(crate) struct FoldCache {
    slot: RwLock<Option<(u64, Box<dyn Any + Send + Sync>)>>,
}

impl FoldCache {
    /// Creates an empty cache.
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached result if it was produced by the reducer `id`.
    #[inline]
    pub(crate) fn load<U: Clone + 'static>(&self, id: u64) -> Option<U> {
        let slot = self.slot.read();
        match &*slot {
            Some((cached, value)) if *cached == id => value.downcast_ref::<U>().cloned(),
            _ => None,
        }
    }

    /// Stores a result, replacing whatever another reducer left behind.
    #[inline]
    pub(crate) fn store<U: Send + Sync + 'static>(&self, id: u64, value: U) {
        *self.slot.write() = Some((id, Box::new(value)));
    }

    /// Returns true if a result for `id` is cached.
    #[cfg(test)]
    pub(crate) fn holds(&self, id: u64) -> bool {
        matches!(&*self.slot.read(), Some((cached, _)) if *cached == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_cache_empty() {
        let cache = FoldCache::new();
        assert_eq!(cache.load::<i64>(7), None);
        assert!(!cache.holds(7));
    }

    #[test]
    fn test_fold_cache_store_load() {
        let cache = FoldCache::new();
        cache.store(1, 42i64);
        assert_eq!(cache.load::<i64>(1), Some(42));
        assert!(cache.holds(1));
    }

    #[test]
    fn test_fold_cache_other_reducer_misses() {
        let cache = FoldCache::new();
        cache.store(1, 42i64);
        assert_eq!(cache.load::<i64>(2), None);

        // A second reducer evicts the first.
        cache.store(2, String::from("x"));
        assert_eq!(cache.load::<i64>(1), None);
        assert_eq!(
            cache.load::<String>(2),
            Some(String::from("x"))
        );
    }
}
