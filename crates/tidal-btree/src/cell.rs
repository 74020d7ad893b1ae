//! Shared tree handle with atomic root replacement.

use super::tree::Tree;
use parking_lot::RwLock;

/// A tree handle shared between threads.
///
/// Readers take O(1) snapshots and iterate them without holding the lock.
/// Writers compute the next tree under the write lock and swap the root, so
/// concurrent writers are serialized and a reader never observes a partially
/// applied mutation.
pub struct TreeCell<K, V> {
    current: RwLock<Tree<K, V>>,
}

impl<K, V> TreeCell<K, V> {
    /// Wraps an existing tree.
    pub fn new(tree: Tree<K, V>) -> Self {
        Self {
            current: RwLock::new(tree),
        }
    }

    /// Returns the current tree. The snapshot is unaffected by later writes.
    #[inline]
    pub fn snapshot(&self) -> Tree<K, V> {
        self.current.read().clone()
    }

    /// Replaces the current tree, returning the previous one.
    pub fn replace(&self, tree: Tree<K, V>) -> Tree<K, V> {
        std::mem::replace(&mut *self.current.write(), tree)
    }

    /// Applies `f` to the current tree and installs its result.
    ///
    /// Returns true if the root changed.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Tree<K, V>) -> Tree<K, V>,
    {
        let mut current = self.current.write();
        let next = f(&current);
        if next.ptr_eq(&current) {
            return false;
        }
        *current = next;
        true
    }
}

impl<K: Ord + Clone, V: Clone> TreeCell<K, V> {
    /// Maps `key` to `value`. Returns true if the tree changed.
    pub fn set(&self, key: K, value: V) -> bool
    where
        V: PartialEq,
    {
        self.update(|tree| tree.set(key, value))
    }

    /// Removes `key`. Returns true if it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.update(|tree| tree.delete(key).1)
    }

    /// Looks up `key` in the current tree.
    pub fn get(&self, key: &K) -> Option<V> {
        self.current.read().get(key).cloned()
    }

    /// Returns the number of entries in the current tree.
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Returns true if the current tree is empty.
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

impl<K, V> Default for TreeCell<K, V> {
    fn default() -> Self {
        Self::new(Tree::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tree_cell_set_delete() {
        let cell: TreeCell<u32, u32> = TreeCell::default();
        assert!(cell.is_empty());
        assert!(cell.set(1, 10));
        assert!(!cell.set(1, 10));
        assert_eq!(cell.get(&1), Some(10));
        assert!(cell.delete(&1));
        assert!(!cell.delete(&1));
        assert_eq!(cell.len(), 0);
    }

    #[test]
    fn test_tree_cell_snapshot_isolated() {
        let cell = TreeCell::new(Tree::with_page_split_size(4));
        for k in 0..20u32 {
            cell.set(k, k);
        }
        let snapshot = cell.snapshot();
        for k in 0..20u32 {
            cell.delete(&k);
        }
        assert!(cell.is_empty());
        assert_eq!(snapshot.len(), 20);
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_tree_cell_replace() {
        let cell = TreeCell::new(Tree::new());
        cell.set("a", 1);
        let old = cell.replace(Tree::new().set("b", 2));
        assert!(old.has(&"a"));
        assert_eq!(cell.get(&"b"), Some(2));
        assert_eq!(cell.get(&"a"), None);
    }

    #[test]
    fn test_tree_cell_concurrent_readers() {
        let cell = Arc::new(TreeCell::new(Tree::with_page_split_size(8)));
        for k in 0..256u64 {
            cell.set(k, k * 2);
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    let snapshot = cell.snapshot();
                    let len = snapshot.len();
                    let keys: Vec<u64> = snapshot.keys().collect();
                    assert_eq!(keys.len(), len);
                    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
                    len
                })
            })
            .collect();

        for k in 0..128u64 {
            cell.delete(&k);
        }

        for reader in readers {
            let len = reader.join().unwrap();
            assert!((128..=256).contains(&len));
        }
        assert_eq!(cell.len(), 128);
    }
}
