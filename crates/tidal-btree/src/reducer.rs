//! Reducer handles for [`Tree::reduced`](crate::Tree::reduced).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of reducer identities. Ids are never reused within a process.
static NEXT_REDUCER_ID: AtomicU64 = AtomicU64::new(1);

/// An associative fold: an identity value, a function folding one value into
/// a page-local result, and a function joining the results of sibling pages.
///
/// Every reducer gets a unique id at construction. Pages cache fold results
/// under that id, so two reducers never read each other's results even when
/// their functions share a type. Fold with the same reducer instance to hit
/// the cache; a fresh instance always starts cold.
///
/// ```
/// use tidal_btree::{Reducer, Tree};
///
/// let tree = (1..=10).fold(Tree::new(), |t, k| t.set(k, k));
/// let sum = Reducer::new(0, |acc: i32, v: &i32| acc + v, |a: i32, b: i32| a + b);
/// assert_eq!(tree.reduced(&sum), 55);
/// ```
pub struct Reducer<U, A, C> {
    pub(crate) id: u64,
    pub(crate) identity: U,
    pub(crate) accumulate: A,
    pub(crate) combine: C,
}

impl<U, A, C> Reducer<U, A, C> {
    /// Creates a reducer with a fresh cache identity.
    pub fn new(identity: U, accumulate: A, combine: C) -> Self {
        Self {
            id: NEXT_REDUCER_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            accumulate,
            combine,
        }
    }

    /// Cache identity of this reducer.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Result of folding an empty tree.
    #[inline]
    pub fn identity(&self) -> &U {
        &self.identity
    }
}

impl<U: fmt::Debug, A, C> fmt::Debug for Reducer<U, A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reducer")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reducer_ids_unique() {
        let a = Reducer::new(0, |acc: i32, v: &i32| acc + v, |x: i32, y: i32| x + y);
        let b = Reducer::new(0, |acc: i32, v: &i32| acc + v, |x: i32, y: i32| x + y);
        assert_ne!(a.id(), b.id());
        assert_eq!(*a.identity(), 0);
    }
}
