//! Persistent ordered map handle.

use super::cursor::{self, Cursor};
use super::page::{Page, PageRef};
use super::reducer::Reducer;
use std::fmt;
use std::sync::Arc;
use tidal_common::{Result, TreeConfig};
use tracing::debug;

/// Persistent, copy-on-write ordered map.
///
/// A `Tree` owns one immutable root page. Mutating operations return a new
/// handle that shares every untouched page with `self`; `clone` is O(1).
/// An operation that changes nothing returns a handle with the *same* root,
/// which [`Tree::ptr_eq`] detects.
pub struct Tree<K, V> {
    root: PageRef<K, V>,
    config: TreeConfig,
}

impl<K, V> Clone for Tree<K, V> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            config: self.config,
        }
    }
}

impl<K, V> Tree<K, V> {
    /// Creates an empty tree with the default page split size.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Page::empty()),
            config: TreeConfig::default(),
        }
    }

    /// Creates an empty tree after validating `config`.
    pub fn with_config(config: &TreeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root: Arc::new(Page::empty()),
            config: *config,
        })
    }

    /// Creates an empty tree whose pages split past `page_split_size` entries.
    ///
    /// # Panics
    ///
    /// Panics if `page_split_size` is rejected by [`TreeConfig::validate`].
    pub fn with_page_split_size(page_split_size: usize) -> Self {
        let config = TreeConfig::new(page_split_size);
        assert!(
            config.validate().is_ok(),
            "invalid page split size {}",
            page_split_size
        );
        Self {
            root: Arc::new(Page::empty()),
            config,
        }
    }

    /// Returns the page layout configuration.
    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.root.size()
    }

    /// Returns true if the tree holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.size() == 0
    }

    /// Returns the number of page levels (1 for a single leaf).
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Returns true if both handles share the same root page.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    /// Returns an empty tree with the same configuration.
    pub fn clear(&self) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        Self {
            root: Arc::new(Page::empty()),
            config: self.config,
        }
    }

    pub fn first_entry(&self) -> Option<(&K, &V)> {
        self.root.first_entry()
    }

    pub fn last_entry(&self) -> Option<(&K, &V)> {
        self.root.last_entry()
    }

    pub fn first_key(&self) -> Option<&K> {
        self.first_entry().map(|(k, _)| k)
    }

    pub fn last_key(&self) -> Option<&K> {
        self.last_entry().map(|(k, _)| k)
    }

    pub fn first_value(&self) -> Option<&V> {
        self.first_entry().map(|(_, v)| v)
    }

    pub fn last_value(&self) -> Option<&V> {
        self.last_entry().map(|(_, v)| v)
    }

    /// Returns the entry at ordinal position `index`, or `None` past the end.
    pub fn get_entry(&self, index: usize) -> Option<(&K, &V)> {
        self.root.get_entry(index)
    }

    fn with_root(&self, root: PageRef<K, V>) -> Self {
        Self {
            root,
            config: self.config,
        }
    }
}

impl<K: Ord + Clone, V: Clone> Tree<K, V> {
    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.root.get(key)
    }

    /// Returns true if `key` is present.
    pub fn has(&self, key: &K) -> bool {
        self.root.get(key).is_some()
    }

    /// Returns the ordinal position of `key`.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        self.root.index_of(key)
    }

    /// Returns the entry with the smallest key strictly greater than `key`.
    pub fn next_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.root.next_entry(key)
    }

    /// Returns the entry with the largest key strictly less than `key`.
    pub fn previous_entry(&self, key: &K) -> Option<(&K, &V)> {
        self.root.previous_entry(key)
    }

    /// Returns a tree with `key` mapped to `value`.
    ///
    /// If `key` already maps to an equal value the returned handle shares
    /// this tree's root.
    pub fn set(&self, key: K, value: V) -> Self
    where
        V: PartialEq,
    {
        match self.root.updated(key, value, self.config.page_split_size) {
            Some(root) => self.with_root(self.balanced(root)),
            None => self.clone(),
        }
    }

    /// Removes `key`. Returns whether it was present and the resulting tree,
    /// which shares this tree's root when nothing was removed.
    pub fn delete(&self, key: &K) -> (bool, Self) {
        let min = self.config.min_occupancy();
        match self.root.removed(key, min, self.config.page_split_size) {
            Some(root) => (true, self.with_root(Self::collapsed(root))),
            None => (false, self.clone()),
        }
    }

    /// Returns a tree without its first `count` entries.
    pub fn drop(&self, count: usize) -> Self {
        if count == 0 {
            return self.clone();
        }
        if count >= self.len() {
            return self.clear();
        }
        let root = self.root.dropped(
            count,
            self.config.min_occupancy(),
            self.config.page_split_size,
        );
        self.with_root(Self::collapsed(root))
    }

    /// Returns a tree holding only the first `count` entries.
    pub fn take(&self, count: usize) -> Self {
        if count >= self.len() {
            return self.clone();
        }
        if count == 0 {
            return self.clear();
        }
        let root = self.root.taken(
            count,
            self.config.min_occupancy(),
            self.config.page_split_size,
        );
        self.with_root(Self::collapsed(root))
    }

    /// Associative fold over all values, memoized per page.
    ///
    /// The reducer's `accumulate` folds one value into a page-local result and
    /// its `combine` joins the results of sibling subtrees. Folding a subtree
    /// that has not changed since the last fold with the same reducer is O(1).
    /// Results are cached under the reducer's id, so the reducer's functions
    /// must be pure.
    pub fn reduced<U, A, C>(&self, reducer: &Reducer<U, A, C>) -> U
    where
        U: Clone + Send + Sync + 'static,
        A: Fn(U, &V) -> U,
        C: Fn(U, U) -> U,
    {
        self.root.reduced(reducer)
    }

    /// Cursor over `(key, value)` pairs in ascending key order.
    pub fn entries(&self) -> Cursor<K, V, (K, V)> {
        Cursor::forward(self.root.clone(), cursor::entry)
    }

    /// Cursor over keys in ascending order.
    pub fn keys(&self) -> Cursor<K, V, K> {
        Cursor::forward(self.root.clone(), cursor::key)
    }

    /// Cursor over values in ascending key order.
    pub fn values(&self) -> Cursor<K, V, V> {
        Cursor::forward(self.root.clone(), cursor::value)
    }

    /// Cursor over `(key, value)` pairs in descending key order.
    pub fn reverse_entries(&self) -> Cursor<K, V, (K, V)> {
        Cursor::reverse(self.root.clone(), cursor::entry)
    }

    /// Cursor over keys in descending order.
    pub fn reverse_keys(&self) -> Cursor<K, V, K> {
        Cursor::reverse(self.root.clone(), cursor::key)
    }

    /// Cursor over values in descending key order.
    pub fn reverse_values(&self) -> Cursor<K, V, V> {
        Cursor::reverse(self.root.clone(), cursor::value)
    }

    /// Cursor over entries whose key is `>= key`, ascending.
    pub fn entries_from(&self, key: K) -> Cursor<K, V, (K, V)> {
        Cursor::from_key(self.root.clone(), key, cursor::entry)
    }

    /// Panics if any structural invariant is violated.
    ///
    /// Checks ordering, cached sizes, separator bounds, uniform leaf depth,
    /// and page occupancy for every non-root page.
    pub fn assert_invariants(&self) {
        self.root.check(
            None,
            None,
            true,
            self.config.min_occupancy(),
            self.config.page_split_size,
        );
    }

    /// Promotes a new root when the current one overflows.
    fn balanced(&self, root: PageRef<K, V>) -> PageRef<K, V> {
        if root.arity() <= self.config.page_split_size {
            return root;
        }
        let (left, separator, right) = root.split();
        let root = Arc::new(Page::branch(vec![separator], vec![left, right]));
        debug!(depth = root.depth(), size = root.size(), "tree root split");
        root
    }

    /// Replaces single-child branch roots by their child.
    fn collapsed(mut root: PageRef<K, V>) -> PageRef<K, V> {
        while let Some(child) = root.sole_child().cloned() {
            debug!(depth = child.depth(), size = child.size(), "tree root collapsed");
            root = child;
        }
        root
    }
}

impl<K, V> Default for Tree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> FromIterator<(K, V)> for Tree<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |tree, (key, value)| tree.set(key, value))
    }
}

impl<'a, K: Ord + Clone, V: Clone> IntoIterator for &'a Tree<K, V> {
    type Item = (K, V);
    type IntoIter = Cursor<K, V, (K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries()
    }
}

impl<K: Ord + Clone + fmt::Debug, V: Clone + fmt::Debug> fmt::Debug for Tree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}
