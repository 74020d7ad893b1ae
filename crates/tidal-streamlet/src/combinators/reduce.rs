//! Keyed reduction.

use crate::inlet::KeyedInput;
use crate::streamlet::{
    Coherence, Inlet, KeyEffect, MapInlet, MapOutlet, Outlet, OutputSet, Streamlet, Version,
};
use crate::wave;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tidal_btree::{Reducer, Tree};
use tracing::trace;

/// Plain outlet folding every value of a keyed input.
///
/// The node mirrors its input into a private [`Tree`] and answers
/// [`Outlet::get`] with [`Tree::reduced`]. Each page of the mirror caches
/// its partial fold, so after one key changes only the pages on that key's
/// path are folded again.
///
/// The mirror only changes while recohering. Until then `get` keeps
/// returning the fold of the last settled wave, and before the first settle
/// it returns `None`.
pub struct ReduceOutlet<K, V, U, A, C> {
    this: Weak<Self>,
    input: KeyedInput<K, V>,
    state: RefCell<Tree<K, V>>,
    reducer: Reducer<U, A, C>,
    coherence: Coherence,
    resync: Cell<bool>,
    /// Set by the first recohere; cleared by disconnection.
    settled: Cell<bool>,
    outputs: OutputSet,
}

impl<K, V, U, A, C> ReduceOutlet<K, V, U, A, C>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
    U: Clone + Send + Sync + 'static,
    A: Fn(U, &V) -> U + 'static,
    C: Fn(U, U) -> U + 'static,
{
    /// `accumulate` folds one value into a partial result; `combine` joins
    /// two partial results. Both must be associative with `identity` as the
    /// neutral element.
    pub fn new(identity: U, accumulate: A, combine: C) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            input: KeyedInput::new(),
            state: RefCell::new(Tree::new()),
            reducer: Reducer::new(identity, accumulate, combine),
            coherence: Coherence::new(),
            resync: Cell::new(false),
            settled: Cell::new(false),
            outputs: OutputSet::new(),
        })
    }

    /// Binds `input`, replacing any previous input.
    pub fn bind_input(&self, input: Rc<dyn MapOutlet<K, V>>) {
        let stale = input.is_stale();
        self.input.bind(input, self.as_map_inlet());
        if stale {
            self.decohere();
        } else if !self.input.seed(self.mirrored_keys()).is_empty() {
            self.mark_stale();
        }
    }

    pub fn input(&self) -> Option<Rc<dyn MapOutlet<K, V>>> {
        self.input.get()
    }

    /// O(1) snapshot of the mirrored input.
    pub fn snapshot(&self) -> Tree<K, V> {
        self.state.borrow().clone()
    }

    fn as_map_inlet(&self) -> Weak<dyn MapInlet<K>> {
        self.this.clone()
    }

    fn mirrored_keys(&self) -> Vec<K> {
        self.state.borrow().keys().collect()
    }

    /// Key-level staleness still invalidates the folded value as a whole.
    fn mark_stale(&self) {
        if self.coherence.force_stale() {
            trace!(node = "reduce", "decohere");
            self.outputs.decohere_all();
        }
    }

    fn settle_key(&self, key: &K, version: Version) {
        let Some(effect) = self.input.take(key) else {
            return;
        };
        trace!(node = "reduce", ?effect, version, "settle key");
        let fresh = match self.input.get() {
            Some(input) => {
                input.recohere_input_key(key, version);
                match effect {
                    KeyEffect::Update => input.get_key(key),
                    KeyEffect::Remove => None,
                }
            }
            None => None,
        };
        let mut state = self.state.borrow_mut();
        let next = match fresh {
            Some(value) => state.set(key.clone(), value),
            None => state.delete(key).1,
        };
        *state = next;
        wave::note_write();
    }
}

impl<K, V, U, A, C> Outlet<U> for ReduceOutlet<K, V, U, A, C>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
    U: Clone + Send + Sync + 'static,
    A: Fn(U, &V) -> U + 'static,
    C: Fn(U, U) -> U + 'static,
{
    fn get(&self) -> Option<U> {
        if !self.settled.get() {
            return None;
        }
        Some(self.state.borrow().reduced(&self.reducer))
    }
}

impl<K, V, U, A, C> Streamlet for ReduceOutlet<K, V, U, A, C>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
    U: Clone + Send + Sync + 'static,
    A: Fn(U, &V) -> U + 'static,
    C: Fn(U, U) -> U + 'static,
{
    fn version(&self) -> Version {
        self.coherence.version()
    }

    fn bind_output(&self, output: Weak<dyn Inlet>) {
        self.outputs.bind(output);
    }

    fn unbind_output(&self, output: &Weak<dyn Inlet>) {
        self.outputs.unbind(output);
    }

    fn unbind_outputs(&self) {
        self.outputs.clear();
    }

    fn disconnect_outputs(&self) {
        self.outputs.disconnect();
    }

    fn disconnect_inputs(&self) {
        if let Some(input) = self.input.detach() {
            input.unbind_map_output(&self.as_map_inlet());
            wave::schedule(move || input.disconnect_inputs());
            wave::run();
        }
        *self.state.borrow_mut() = Tree::new();
        self.resync.set(false);
        self.settled.set(false);
        self.coherence.reset();
    }

    fn decohere(&self) {
        if self.resync.replace(true) {
            return;
        }
        self.coherence.force_stale();
        trace!(node = "reduce", "decohere");
        self.outputs.decohere_all();
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "reduce", version, "recohere");
        wave::settle(self.inputs(), version);
        if self.resync.replace(false) {
            self.input.seed(self.mirrored_keys());
        }
        for key in self.input.pending_keys() {
            self.settle_key(&key, version);
        }
        self.settled.set(true);
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
    }

    fn inputs(&self) -> Vec<Rc<dyn Streamlet>> {
        self.input
            .get()
            .map(|input| input as Rc<dyn Streamlet>)
            .into_iter()
            .collect()
    }
}

impl<K, V, U, A, C> Inlet for ReduceOutlet<K, V, U, A, C>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
    U: Clone + Send + Sync + 'static,
    A: Fn(U, &V) -> U + 'static,
    C: Fn(U, U) -> U + 'static,
{
    fn decohere_output(&self) {
        self.decohere();
    }

    fn recohere_output(&self, version: Version) {
        self.recohere(version);
    }

    fn unbind_input(&self) {
        let mirrored = self.mirrored_keys();
        if !self.input.unbind(&self.as_map_inlet(), mirrored).is_empty() {
            self.mark_stale();
        }
    }

    fn disconnect_output(&self) {
        self.input.detach();
        *self.state.borrow_mut() = Tree::new();
        self.resync.set(false);
        self.settled.set(false);
        self.coherence.reset();
        self.disconnect_outputs();
    }
}

impl<K, V, U, A, C> MapInlet<K> for ReduceOutlet<K, V, U, A, C>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
    U: Clone + Send + Sync + 'static,
    A: Fn(U, &V) -> U + 'static,
    C: Fn(U, U) -> U + 'static,
{
    fn decohere_output_key(&self, key: &K, effect: KeyEffect) {
        if self.input.record(key, effect) {
            trace!(node = "reduce", ?effect, "decohere key");
            self.mark_stale();
        }
    }

    fn recohere_output_key(&self, key: &K, version: Version) {
        self.settle_key(key, version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinators::FilterOutlet;
    use crate::input::MapInput;

    fn sum() -> Rc<ReduceOutlet<String, i64, i64, impl Fn(i64, &i64) -> i64, impl Fn(i64, i64) -> i64>> {
        ReduceOutlet::new(0i64, |acc: i64, v: &i64| acc + v, |a: i64, b: i64| a + b)
    }

    #[test]
    fn test_reduce_sums_input() {
        let map = MapInput::new();
        map.set("a".to_string(), 1);
        map.set("b".to_string(), 2);
        let total = sum();
        total.bind_input(map.clone());
        assert!(total.is_stale());
        assert_eq!(total.get(), None);

        total.recohere(0);
        assert_eq!(total.get(), Some(3));
    }

    #[test]
    fn test_reduce_empty_input_settles_to_identity() {
        let map: Rc<MapInput<String, i64>> = MapInput::new();
        let total = sum();
        assert_eq!(total.get(), None);
        total.bind_input(map.clone());
        total.recohere(0);
        assert_eq!(total.get(), Some(0));

        total.disconnect_inputs();
        assert_eq!(total.get(), None);
    }

    #[test]
    fn test_reduce_holds_value_until_recohere() {
        let map = MapInput::new();
        map.set("a".to_string(), 1);
        map.set("b".to_string(), 2);
        let total = sum();
        total.bind_input(map.clone());
        total.recohere(0);

        map.set("a".to_string(), 5);
        assert!(total.is_stale());
        assert_eq!(total.get(), Some(3));

        total.recohere(1);
        assert_eq!(total.get(), Some(7));

        map.remove(&"b".to_string());
        total.recohere(2);
        assert_eq!(total.get(), Some(5));
    }

    #[test]
    fn test_reduce_over_filter() {
        let map = MapInput::new();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            map.set(name.to_string(), i as i64 + 1);
        }
        let big = FilterOutlet::new(|_: &String, v: &i64| *v > 2);
        big.bind_input(map.clone());
        let total = sum();
        total.bind_input(big.clone());

        total.recohere(0);
        assert_eq!(total.get(), Some(7));

        map.set("a".to_string(), 10);
        total.recohere(1);
        assert_eq!(total.get(), Some(17));

        map.set("d".to_string(), 0);
        total.recohere(2);
        assert_eq!(total.get(), Some(13));
    }

    #[test]
    fn test_reduce_mirror_snapshot() {
        let map = MapInput::new();
        map.set("x".to_string(), 4);
        let total = sum();
        total.bind_input(map.clone());
        total.recohere(0);
        let snapshot = total.snapshot();
        assert_eq!(snapshot.get(&"x".to_string()), Some(&4));
    }
}
