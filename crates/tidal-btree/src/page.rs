//! Immutable tree pages (leaf and branch).
//!
//! Pages are never modified after construction. Every mutating operation
//! returns a fresh page for each level it touches and shares the untouched
//! children with the page it was derived from. Operations that would not
//! change anything return `None` so callers can keep the original reference.
//!
//! Branch layout:
//! ```text
//! children: [c0]   [c1]   [c2]  ...  [cn]
//! knots:        k0     k1    ...  kn-1
//! ```
//! `knots[i]` is a lower bound for every key in `children[i + 1]` and an
//! exclusive upper bound for every key in `children[i]`.

use super::fold::FoldCache;
use super::reducer::Reducer;
use std::sync::Arc;

/// Shared reference to a page.
pub(crate) type PageRef<K, V> = Arc<Page<K, V>>;

/// Page contents.
pub(crate) enum PageKind<K, V> {
    /// Sorted entries.
    Leaf { entries: Vec<(K, V)> },
    /// Sorted child pages and their separator keys.
    Branch {
        knots: Vec<K>,
        children: Vec<PageRef<K, V>>,
    },
}

/// Immutable tree node.
pub(crate) struct Page<K, V> {
    kind: PageKind<K, V>,
    /// Number of entries in this subtree.
    size: usize,
    /// Memoized fold over this subtree.
    fold: FoldCache,
}

impl<K, V> Page<K, V> {
    /// Creates an empty leaf (the root of an empty tree).
    pub(crate) fn empty() -> Self {
        Self::leaf(Vec::new())
    }

    /// Creates a leaf page from sorted entries.
    pub(crate) fn leaf(entries: Vec<(K, V)>) -> Self {
        let size = entries.len();
        Self {
            kind: PageKind::Leaf { entries },
            size,
            fold: FoldCache::new(),
        }
    }

    /// Creates a branch page. `knots` must hold one key fewer than `children`.
    pub(crate) fn branch(knots: Vec<K>, children: Vec<PageRef<K, V>>) -> Self {
        debug_assert!(!children.is_empty(), "branch without children");
        debug_assert_eq!(knots.len() + 1, children.len(), "knot/child count");
        let size = children.iter().map(|child| child.size).sum();
        Self {
            kind: PageKind::Branch { knots, children },
            size,
            fold: FoldCache::new(),
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> &PageKind<K, V> {
        &self.kind
    }

    /// Number of entries in this subtree.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Number of entries (leaf) or children (branch) held directly by this page.
    #[inline]
    pub(crate) fn arity(&self) -> usize {
        match &self.kind {
            PageKind::Leaf { entries } => entries.len(),
            PageKind::Branch { children, .. } => children.len(),
        }
    }

    /// Height of this subtree (a leaf has depth 1).
    pub(crate) fn depth(&self) -> usize {
        let mut depth = 1;
        let mut page = self;
        while let PageKind::Branch { children, .. } = &page.kind {
            depth += 1;
            page = &children[0];
        }
        depth
    }

    /// Returns the only child of a single-child branch.
    pub(crate) fn sole_child(&self) -> Option<&PageRef<K, V>> {
        match &self.kind {
            PageKind::Branch { children, .. } if children.len() == 1 => Some(&children[0]),
            _ => None,
        }
    }

    pub(crate) fn first_entry(&self) -> Option<(&K, &V)> {
        let mut page = self;
        loop {
            match &page.kind {
                PageKind::Leaf { entries } => return entries.first().map(|(k, v)| (k, v)),
                PageKind::Branch { children, .. } => page = &children[0],
            }
        }
    }

    pub(crate) fn last_entry(&self) -> Option<(&K, &V)> {
        let mut page = self;
        loop {
            match &page.kind {
                PageKind::Leaf { entries } => return entries.last().map(|(k, v)| (k, v)),
                PageKind::Branch { children, .. } => page = &children[children.len() - 1],
            }
        }
    }

    /// Entry at ordinal position `index`.
    pub(crate) fn get_entry(&self, mut index: usize) -> Option<(&K, &V)> {
        if index >= self.size {
            return None;
        }
        let mut page = self;
        loop {
            match &page.kind {
                PageKind::Leaf { entries } => return entries.get(index).map(|(k, v)| (k, v)),
                PageKind::Branch { children, .. } => {
                    let mut next = &children[children.len() - 1];
                    for child in children {
                        if index < child.size {
                            next = child;
                            break;
                        }
                        index -= child.size;
                    }
                    page = next;
                }
            }
        }
    }
}

/// Index of the child whose key range covers `key`.
#[inline]
pub(crate) fn child_index<K: Ord>(knots: &[K], key: &K) -> usize {
    match knots.binary_search(key) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

#[inline]
fn search<K: Ord, V>(entries: &[(K, V)], key: &K) -> Result<usize, usize> {
    entries.binary_search_by(|(k, _)| k.cmp(key))
}

impl<K: Ord + Clone, V: Clone> Page<K, V> {
    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        let mut page = self;
        loop {
            match &page.kind {
                PageKind::Leaf { entries } => {
                    return search(entries, key).ok().map(|i| &entries[i].1);
                }
                PageKind::Branch { knots, children } => {
                    page = &children[child_index(knots, key)];
                }
            }
        }
    }

    /// Ordinal position of `key`.
    pub(crate) fn index_of(&self, key: &K) -> Option<usize> {
        let mut base = 0;
        let mut page = self;
        loop {
            match &page.kind {
                PageKind::Leaf { entries } => return search(entries, key).ok().map(|i| base + i),
                PageKind::Branch { knots, children } => {
                    let idx = child_index(knots, key);
                    base += children[..idx].iter().map(|c| c.size).sum::<usize>();
                    page = &children[idx];
                }
            }
        }
    }

    /// Number of entries whose key is strictly less than `key`.
    pub(crate) fn rank(&self, key: &K) -> usize {
        let mut base = 0;
        let mut page = self;
        loop {
            match &page.kind {
                PageKind::Leaf { entries } => {
                    let (Ok(i) | Err(i)) = search(entries, key);
                    return base + i;
                }
                PageKind::Branch { knots, children } => {
                    let idx = child_index(knots, key);
                    base += children[..idx].iter().map(|c| c.size).sum::<usize>();
                    page = &children[idx];
                }
            }
        }
    }

    /// Smallest entry whose key is strictly greater than `key`.
    pub(crate) fn next_entry(&self, key: &K) -> Option<(&K, &V)> {
        match &self.kind {
            PageKind::Leaf { entries } => {
                let idx = match search(entries, key) {
                    Ok(i) => i + 1,
                    Err(i) => i,
                };
                entries.get(idx).map(|(k, v)| (k, v))
            }
            PageKind::Branch { knots, children } => {
                let idx = child_index(knots, key);
                children[idx]
                    .next_entry(key)
                    .or_else(|| children.get(idx + 1).and_then(|c| c.first_entry()))
            }
        }
    }

    /// Largest entry whose key is strictly less than `key`.
    pub(crate) fn previous_entry(&self, key: &K) -> Option<(&K, &V)> {
        match &self.kind {
            PageKind::Leaf { entries } => {
                let (Ok(idx) | Err(idx)) = search(entries, key);
                idx.checked_sub(1)
                    .and_then(|i| entries.get(i))
                    .map(|(k, v)| (k, v))
            }
            PageKind::Branch { knots, children } => {
                let idx = child_index(knots, key);
                children[idx].previous_entry(key).or_else(|| {
                    idx.checked_sub(1)
                        .and_then(|i| children[i].last_entry())
                })
            }
        }
    }

    /// Inserts or replaces `key`. Returns `None` when the value is already present.
    ///
    /// The returned page may exceed `split` entries; the caller splits it.
    pub(crate) fn updated(&self, key: K, value: V, split: usize) -> Option<PageRef<K, V>>
    where
        V: PartialEq,
    {
        match &self.kind {
            PageKind::Leaf { entries } => match search(entries, &key) {
                Ok(i) => {
                    if entries[i].1 == value {
                        return None;
                    }
                    let mut entries = entries.clone();
                    entries[i].1 = value;
                    Some(Arc::new(Self::leaf(entries)))
                }
                Err(i) => {
                    let mut next = Vec::with_capacity(entries.len() + 1);
                    next.extend_from_slice(&entries[..i]);
                    next.push((key, value));
                    next.extend_from_slice(&entries[i..]);
                    Some(Arc::new(Self::leaf(next)))
                }
            },
            PageKind::Branch { knots, children } => {
                let idx = child_index(knots, &key);
                let child = children[idx].updated(key, value, split)?;
                let mut knots = knots.clone();
                let mut children = children.clone();
                if child.arity() > split {
                    let (left, separator, right) = child.split();
                    children[idx] = left;
                    children.insert(idx + 1, right);
                    knots.insert(idx, separator);
                } else {
                    children[idx] = child;
                }
                Some(Arc::new(Self::branch(knots, children)))
            }
        }
    }

    /// Removes `key`. Returns `None` when the key is absent.
    ///
    /// Children that fall below `min` entries are merged with, or refilled
    /// from, an adjacent sibling.
    pub(crate) fn removed(&self, key: &K, min: usize, split: usize) -> Option<PageRef<K, V>> {
        match &self.kind {
            PageKind::Leaf { entries } => {
                let i = search(entries, key).ok()?;
                let mut entries = entries.clone();
                entries.remove(i);
                Some(Arc::new(Self::leaf(entries)))
            }
            PageKind::Branch { knots, children } => {
                let idx = child_index(knots, key);
                let child = children[idx].removed(key, min, split)?;
                let mut knots = knots.clone();
                let mut children = children.clone();
                if child.size() == 0 {
                    children.remove(idx);
                    if !knots.is_empty() {
                        knots.remove(idx.saturating_sub(1));
                    }
                    if children.is_empty() {
                        return Some(Arc::new(Self::empty()));
                    }
                } else {
                    children[idx] = child;
                    rebalance(&mut knots, &mut children, idx, min, split);
                }
                Some(Arc::new(Self::branch(knots, children)))
            }
        }
    }

    /// Drops the first `count` entries. Requires `0 < count < size`.
    pub(crate) fn dropped(&self, count: usize, min: usize, split: usize) -> PageRef<K, V> {
        debug_assert!(count > 0 && count < self.size);
        match &self.kind {
            PageKind::Leaf { entries } => Arc::new(Self::leaf(entries[count..].to_vec())),
            PageKind::Branch { knots, children } => {
                let mut skip = count;
                let mut idx = 0;
                while skip >= children[idx].size {
                    skip -= children[idx].size;
                    idx += 1;
                }
                let mut knots = knots[idx..].to_vec();
                let mut children = children[idx..].to_vec();
                if skip > 0 {
                    children[0] = children[0].dropped(skip, min, split);
                }
                rebalance(&mut knots, &mut children, 0, min, split);
                Arc::new(Self::branch(knots, children))
            }
        }
    }

    /// Keeps the first `count` entries. Requires `0 < count < size`.
    pub(crate) fn taken(&self, count: usize, min: usize, split: usize) -> PageRef<K, V> {
        debug_assert!(count > 0 && count < self.size);
        match &self.kind {
            PageKind::Leaf { entries } => Arc::new(Self::leaf(entries[..count].to_vec())),
            PageKind::Branch { knots, children } => {
                let mut keep = count;
                let mut idx = 0;
                while keep > children[idx].size {
                    keep -= children[idx].size;
                    idx += 1;
                }
                let mut knots = knots[..idx].to_vec();
                let mut children = children[..=idx].to_vec();
                if keep < children[idx].size {
                    children[idx] = children[idx].taken(keep, min, split);
                }
                rebalance(&mut knots, &mut children, idx, min, split);
                Arc::new(Self::branch(knots, children))
            }
        }
    }

    /// Splits an overfull page in half. Returns (left, separator, right).
    pub(crate) fn split(&self) -> (PageRef<K, V>, K, PageRef<K, V>) {
        match &self.kind {
            PageKind::Leaf { entries } => {
                let mid = entries.len() / 2;
                let right = entries[mid..].to_vec();
                let separator = right[0].0.clone();
                (
                    Arc::new(Self::leaf(entries[..mid].to_vec())),
                    separator,
                    Arc::new(Self::leaf(right)),
                )
            }
            PageKind::Branch { knots, children } => {
                let mid = children.len() / 2;
                let separator = knots[mid - 1].clone();
                let left = Self::branch(knots[..mid - 1].to_vec(), children[..mid].to_vec());
                let right = Self::branch(knots[mid..].to_vec(), children[mid..].to_vec());
                (Arc::new(left), separator, Arc::new(right))
            }
        }
    }

    /// Concatenates this page with its right sibling of the same height.
    fn merged(&self, separator: &K, right: &Self) -> Self {
        match (&self.kind, &right.kind) {
            (PageKind::Leaf { entries: left }, PageKind::Leaf { entries: right }) => {
                let mut entries = Vec::with_capacity(left.len() + right.len());
                entries.extend_from_slice(left);
                entries.extend_from_slice(right);
                Self::leaf(entries)
            }
            (
                PageKind::Branch {
                    knots: left_knots,
                    children: left_children,
                },
                PageKind::Branch {
                    knots: right_knots,
                    children: right_children,
                },
            ) => {
                let mut knots = Vec::with_capacity(left_knots.len() + right_knots.len() + 1);
                knots.extend_from_slice(left_knots);
                knots.push(separator.clone());
                knots.extend_from_slice(right_knots);
                let mut children = left_children.clone();
                children.extend_from_slice(right_children);
                Self::branch(knots, children)
            }
            _ => panic!("tree corrupted: sibling pages at different heights"),
        }
    }

    /// Associative fold over every value in this subtree, memoized per page.
    pub(crate) fn reduced<U, A, C>(&self, reducer: &Reducer<U, A, C>) -> U
    where
        U: Clone + Send + Sync + 'static,
        A: Fn(U, &V) -> U,
        C: Fn(U, U) -> U,
    {
        if let Some(cached) = self.fold.load::<U>(reducer.id) {
            return cached;
        }
        let result = match &self.kind {
            PageKind::Leaf { entries } => entries
                .iter()
                .fold(reducer.identity.clone(), |acc, (_, value)| {
                    (reducer.accumulate)(acc, value)
                }),
            PageKind::Branch { children, .. } => {
                children.iter().fold(reducer.identity.clone(), |acc, child| {
                    (reducer.combine)(acc, child.reduced(reducer))
                })
            }
        };
        self.fold.store(reducer.id, result.clone());
        result
    }

    #[cfg(test)]
    pub(crate) fn fold_cached(&self, id: u64) -> bool {
        self.fold.holds(id)
    }

    /// Verifies ordering, sizes, separator keys, heights and occupancy.
    /// Returns the subtree height.
    pub(crate) fn check(
        &self,
        lower: Option<&K>,
        upper: Option<&K>,
        is_root: bool,
        min: usize,
        split: usize,
    ) -> usize {
        let arity = self.arity();
        assert!(arity <= split, "page arity {} exceeds split size {}", arity, split);
        if !is_root {
            assert!(arity >= min, "page arity {} below minimum {}", arity, min);
        }
        let in_bounds = |key: &K| {
            lower.is_none_or(|lower| key >= lower) && upper.is_none_or(|upper| key < upper)
        };
        match &self.kind {
            PageKind::Leaf { entries } => {
                assert_eq!(self.size, entries.len(), "leaf size mismatch");
                assert!(
                    entries.windows(2).all(|pair| pair[0].0 < pair[1].0),
                    "leaf entries out of order"
                );
                assert!(
                    entries.iter().all(|(key, _)| in_bounds(key)),
                    "leaf key outside separator bounds"
                );
                1
            }
            PageKind::Branch { knots, children } => {
                assert_eq!(knots.len() + 1, children.len(), "knot count mismatch");
                if is_root {
                    assert!(children.len() >= 2, "root branch with a single child");
                }
                assert!(
                    knots.windows(2).all(|pair| pair[0] < pair[1]),
                    "branch knots out of order"
                );
                assert!(knots.iter().all(|knot| in_bounds(knot)), "knot outside bounds");
                let size: usize = children.iter().map(|child| child.size).sum();
                assert_eq!(self.size, size, "branch size mismatch");

                let mut depth = None;
                for (i, child) in children.iter().enumerate() {
                    assert!(child.size > 0, "empty child page");
                    let child_lower = if i == 0 { lower } else { Some(&knots[i - 1]) };
                    let child_upper = if i + 1 == children.len() {
                        upper
                    } else {
                        Some(&knots[i])
                    };
                    let child_depth = child.check(child_lower, child_upper, false, min, split);
                    match depth {
                        None => depth = Some(child_depth),
                        Some(d) => assert_eq!(d, child_depth, "unbalanced branch"),
                    }
                }
                depth.unwrap_or(0) + 1
            }
        }
    }
}

/// Restores minimum occupancy of `children[idx]` by merging it with an
/// adjacent sibling, splitting the merged page again if it overflows.
///
/// A page cut by `dropped` or `taken` may also be underfull further down
/// along the cut edge, so the merged page is repaired on that edge too.
fn rebalance<K: Ord + Clone, V: Clone>(
    knots: &mut Vec<K>,
    children: &mut Vec<PageRef<K, V>>,
    idx: usize,
    min: usize,
    split: usize,
) {
    if children.len() < 2 || children[idx].arity() >= min {
        return;
    }
    let left = if idx + 1 < children.len() { idx } else { idx - 1 };
    let mut merged = children[left].merged(&knots[left], &children[left + 1]);
    if let PageKind::Branch {
        knots: inner_knots,
        children: inner_children,
    } = &mut merged.kind
    {
        let edge = if left == idx { 0 } else { inner_children.len() - 1 };
        rebalance(inner_knots, inner_children, edge, min, split);
    }
    if merged.arity() > split {
        let (l, separator, r) = merged.split();
        children[left] = l;
        children[left + 1] = r;
        knots[left] = separator;
    } else {
        children[left] = Arc::new(merged);
        children.remove(left + 1);
        knots.remove(left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[i32]) -> Page<i32, i32> {
        Page::leaf(keys.iter().map(|&k| (k, k * 10)).collect())
    }

    #[test]
    fn test_leaf_get_and_arity() {
        let page = leaf(&[1, 3, 5]);
        assert_eq!(page.arity(), 3);
        assert_eq!(page.size(), 3);
        assert_eq!(page.get(&3), Some(&30));
        assert_eq!(page.get(&4), None);
        assert_eq!(page.depth(), 1);
    }

    #[test]
    fn test_leaf_updated_identical_value_is_none() {
        let page = leaf(&[1, 2]);
        assert!(page.updated(2, 20, 4).is_none());
        let replaced = page.updated(2, 21, 4).unwrap();
        assert_eq!(replaced.get(&2), Some(&21));
    }

    #[test]
    fn test_leaf_split() {
        let page = leaf(&[1, 2, 3, 4, 5]);
        let (left, separator, right) = page.split();
        assert_eq!(left.arity(), 2);
        assert_eq!(right.arity(), 3);
        assert_eq!(separator, 3);
        assert_eq!(right.first_entry(), Some((&3, &30)));
    }

    #[test]
    fn test_branch_child_index() {
        let knots = vec![10, 20];
        assert_eq!(child_index(&knots, &5), 0);
        assert_eq!(child_index(&knots, &10), 1);
        assert_eq!(child_index(&knots, &15), 1);
        assert_eq!(child_index(&knots, &20), 2);
        assert_eq!(child_index(&knots, &99), 2);
    }

    #[test]
    fn test_branch_navigation() {
        let branch = Page::branch(
            vec![3, 6],
            vec![
                Arc::new(leaf(&[1, 2])),
                Arc::new(leaf(&[3, 4, 5])),
                Arc::new(leaf(&[6, 7])),
            ],
        );
        assert_eq!(branch.size(), 7);
        assert_eq!(branch.depth(), 2);
        assert_eq!(branch.get(&5), Some(&50));
        assert_eq!(branch.next_entry(&2), Some((&3, &30)));
        assert_eq!(branch.next_entry(&7), None);
        assert_eq!(branch.previous_entry(&3), Some((&2, &20)));
        assert_eq!(branch.previous_entry(&1), None);
        assert_eq!(branch.get_entry(5), Some((&6, &60)));
        assert_eq!(branch.get_entry(7), None);
        assert_eq!(branch.index_of(&4), Some(3));
        assert_eq!(branch.rank(&6), 5);
        branch.check(None, None, true, 2, 4);
    }

    #[test]
    fn test_removed_merges_underfull_leaf() {
        let branch = Page::branch(
            vec![3],
            vec![Arc::new(leaf(&[1, 2])), Arc::new(leaf(&[3, 4]))],
        );
        let removed = branch.removed(&1, 2, 4).unwrap();
        // [2] underflows and merges into [2, 3, 4]
        assert_eq!(removed.arity(), 1);
        assert_eq!(removed.size(), 3);
        assert!(removed.sole_child().is_some());
    }

    #[test]
    fn test_removed_redistributes_when_merge_overflows() {
        let branch = Page::branch(
            vec![3],
            vec![Arc::new(leaf(&[1, 2])), Arc::new(leaf(&[3, 4, 5, 6]))],
        );
        let removed = branch.removed(&1, 2, 4).unwrap();
        // [2] + [3, 4, 5, 6] = 5 entries > split, so it is split in two again.
        assert_eq!(removed.arity(), 2);
        assert_eq!(removed.size(), 5);
        removed.check(None, None, true, 2, 4);
    }

    #[test]
    fn test_removed_absent_is_none() {
        let page = leaf(&[1, 2, 3]);
        assert!(page.removed(&9, 2, 4).is_none());
    }

    #[test]
    fn test_reduced_caches_per_page() {
        let branch = Page::branch(
            vec![3],
            vec![Arc::new(leaf(&[1, 2])), Arc::new(leaf(&[3, 4]))],
        );
        let reducer = Reducer::new(0, |acc: i32, v: &i32| acc + v, |a: i32, b: i32| a + b);
        assert_eq!(branch.reduced(&reducer), 100);
        assert!(branch.fold_cached(reducer.id()));
        if let PageKind::Branch { children, .. } = branch.kind() {
            assert!(children.iter().all(|child| child.fold_cached(reducer.id())));
        }

        let other = Reducer::new(0, |acc: i32, v: &i32| acc + v, |a: i32, b: i32| a + b);
        assert!(!branch.fold_cached(other.id()));
    }
}
