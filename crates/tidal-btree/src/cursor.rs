//! Restartable cursors over immutable tree snapshots.

use super::page::{PageKind, PageRef, child_index};
use std::iter::FusedIterator;

/// Where a cursor (re)starts.
#[derive(Clone)]
enum Origin<K> {
    /// First entry (forward) or last entry (reverse).
    Edge,
    /// First entry whose key is `>=` the given key (forward only).
    From(K),
}

/// Cursor over the entries of one tree snapshot.
///
/// The cursor holds its own reference to the snapshot's root page, so the
/// handle it came from may be mutated or dropped while iteration continues.
/// `T` is the projection yielded per entry (entry, key or value).
pub struct Cursor<K, V, T> {
    root: PageRef<K, V>,
    /// Path of (page, position) pairs from root to the current leaf.
    /// Forward cursors store the next index to visit; reverse cursors store
    /// the number of items still unvisited on that page.
    stack: Vec<(PageRef<K, V>, usize)>,
    reverse: bool,
    origin: Origin<K>,
    remaining: usize,
    project: fn(&K, &V) -> T,
}

impl<K: Ord + Clone, V: Clone, T> Cursor<K, V, T> {
    pub(crate) fn forward(root: PageRef<K, V>, project: fn(&K, &V) -> T) -> Self {
        Self::build(root, false, Origin::Edge, project)
    }

    pub(crate) fn reverse(root: PageRef<K, V>, project: fn(&K, &V) -> T) -> Self {
        Self::build(root, true, Origin::Edge, project)
    }

    pub(crate) fn from_key(root: PageRef<K, V>, key: K, project: fn(&K, &V) -> T) -> Self {
        Self::build(root, false, Origin::From(key), project)
    }

    fn build(root: PageRef<K, V>, reverse: bool, origin: Origin<K>, project: fn(&K, &V) -> T) -> Self {
        let mut cursor = Self {
            root,
            stack: Vec::new(),
            reverse,
            origin,
            remaining: 0,
            project,
        };
        cursor.rewind();
        cursor
    }

    /// Restarts the cursor at its origin.
    pub fn rewind(&mut self) {
        self.stack.clear();
        match &self.origin {
            Origin::Edge => {
                let start = if self.reverse { self.root.arity() } else { 0 };
                self.stack.push((self.root.clone(), start));
                self.remaining = self.root.size();
            }
            Origin::From(key) => {
                self.remaining = self.root.size() - self.root.rank(key);
                let mut page = self.root.clone();
                loop {
                    let step = match page.kind() {
                        PageKind::Leaf { entries } => {
                            let (Ok(pos) | Err(pos)) =
                                entries.binary_search_by(|(k, _)| k.cmp(key));
                            Err(pos)
                        }
                        PageKind::Branch { knots, children } => {
                            let idx = child_index(knots, key);
                            Ok((children[idx].clone(), idx + 1))
                        }
                    };
                    match step {
                        Ok((child, next)) => {
                            self.stack.push((page, next));
                            page = child;
                        }
                        Err(pos) => {
                            self.stack.push((page, pos));
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Number of entries this cursor has not yielded yet.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn step_forward(&mut self) -> Option<T> {
        loop {
            let (page, pos) = self.stack.last_mut()?;
            let descend = match page.kind() {
                PageKind::Leaf { entries } => {
                    if let Some((key, value)) = entries.get(*pos) {
                        *pos += 1;
                        self.remaining -= 1;
                        return Some((self.project)(key, value));
                    }
                    None
                }
                PageKind::Branch { children, .. } => {
                    let child = children.get(*pos).cloned();
                    *pos += 1;
                    child
                }
            };
            match descend {
                Some(child) => self.stack.push((child, 0)),
                None => {
                    self.stack.pop();
                }
            }
        }
    }

    fn step_reverse(&mut self) -> Option<T> {
        loop {
            let (page, pos) = self.stack.last_mut()?;
            if *pos == 0 {
                self.stack.pop();
                continue;
            }
            *pos -= 1;
            let child = match page.kind() {
                PageKind::Leaf { entries } => {
                    let (key, value) = &entries[*pos];
                    self.remaining -= 1;
                    return Some((self.project)(key, value));
                }
                PageKind::Branch { children, .. } => children[*pos].clone(),
            };
            let start = child.arity();
            self.stack.push((child, start));
        }
    }
}

impl<K: Ord + Clone, V: Clone, T> Iterator for Cursor<K, V, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.reverse {
            self.step_reverse()
        } else {
            self.step_forward()
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: Ord + Clone, V: Clone, T> ExactSizeIterator for Cursor<K, V, T> {}

impl<K: Ord + Clone, V: Clone, T> FusedIterator for Cursor<K, V, T> {}

impl<K: Clone, V, T> Clone for Cursor<K, V, T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            stack: self.stack.clone(),
            reverse: self.reverse,
            origin: self.origin.clone(),
            remaining: self.remaining,
            project: self.project,
        }
    }
}

pub(crate) fn entry<K: Clone, V: Clone>(key: &K, value: &V) -> (K, V) {
    (key.clone(), value.clone())
}

pub(crate) fn key<K: Clone, V>(key: &K, _value: &V) -> K {
    key.clone()
}

pub(crate) fn value<K, V: Clone>(_key: &K, value: &V) -> V {
    value.clone()
}
