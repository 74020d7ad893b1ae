//! Keyed stage: a materialized, per-key derived map.

use crate::inlet::KeyedInput;
use crate::key_outlet::{KeyOutlet, KeyOutlets};
use crate::streamlet::{
    Coherence, Inlet, KeyEffect, MapInlet, MapOutlet, OutputSet, Streamlet, Version,
};
use crate::wave;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tidal_btree::Tree;
use tracing::trace;

/// Per-entry function applied by a [`MapStage`].
///
/// Returning `None` leaves the key out of the stage's output.
pub trait StageFn<K, V> {
    type Output: Clone + PartialEq;

    fn apply(&self, key: &K, value: V) -> Option<Self::Output>;
}

/// Keyed outlet mirroring its input through a [`StageFn`].
///
/// The mirror is a [`Tree`] that only changes while recohering, one key at
/// a time, for the keys whose effects were recorded since the last wave.
pub struct MapStage<K, V, S: StageFn<K, V>> {
    this: Weak<Self>,
    stage: S,
    input: KeyedInput<K, V>,
    state: RefCell<Tree<K, S::Output>>,
    coherence: Coherence,
    /// Set by a whole-input decohere: every key must be re-examined.
    resync: Cell<bool>,
    outputs: OutputSet<K>,
    key_outlets: KeyOutlets<K, S::Output>,
}

impl<K, V, S> MapStage<K, V, S>
where
    K: Ord + Clone + 'static,
    V: 'static,
    S: StageFn<K, V> + 'static,
    S::Output: 'static,
{
    /// Stage applying a custom [`StageFn`].
    pub fn with_stage(stage: S) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            stage,
            input: KeyedInput::new(),
            state: RefCell::new(Tree::new()),
            coherence: Coherence::new(),
            resync: Cell::new(false),
            outputs: OutputSet::new(),
            key_outlets: KeyOutlets::new(),
        })
    }

    /// Binds `input`, replacing any previous input. Every input key is
    /// scheduled for the next recohere.
    ///
    /// A stale input has not materialized its keys yet, so the keys are
    /// collected when this stage next recoheres, after the input has settled.
    pub fn bind_input(&self, input: Rc<dyn MapOutlet<K, V>>) {
        let stale = input.is_stale();
        self.input.bind(input, self.as_map_inlet());
        if stale {
            self.decohere();
        } else {
            let seeded = self.input.seed(self.mirrored_keys());
            self.propagate_seeded(seeded);
        }
    }

    /// The bound input, if any.
    pub fn input(&self) -> Option<Rc<dyn MapOutlet<K, V>>> {
        self.input.get()
    }

    /// O(1) snapshot of the materialized output.
    pub fn snapshot(&self) -> Tree<K, S::Output> {
        self.state.borrow().clone()
    }

    fn as_map_inlet(&self) -> Weak<dyn MapInlet<K>> {
        self.this.clone()
    }

    fn mirrored_keys(&self) -> Vec<K> {
        self.state.borrow().keys().collect()
    }

    fn propagate_seeded(&self, seeded: Vec<(K, KeyEffect)>) {
        for (key, effect) in seeded {
            self.decohere_input_key(&key, effect);
        }
    }

    /// Applies the pending effect for `key`, pulling the fresh upstream value.
    fn settle_key(&self, key: &K, version: Version) {
        let Some(effect) = self.input.take(key) else {
            return;
        };
        trace!(node = "map_stage", ?effect, version, "settle key");
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
        let output = fresh.and_then(|value| self.stage.apply(key, value));
        {
            let mut state = self.state.borrow_mut();
            let next = match output {
                Some(value) => state.set(key.clone(), value),
                None => state.delete(key).1,
            };
            *state = next;
        }
        wave::note_write();
        self.outputs.recohere_key(key, version);
        self.key_outlets.recohere(key, version);
    }
}

impl<K, V, S> MapOutlet<K, S::Output> for MapStage<K, V, S>
where
    K: Ord + Clone + 'static,
    V: 'static,
    S: StageFn<K, V> + 'static,
    S::Output: 'static,
{
    fn has(&self, key: &K) -> bool {
        self.state.borrow().has(key)
    }

    fn get_key(&self, key: &K) -> Option<S::Output> {
        self.state.borrow().get(key).cloned()
    }

    fn keys(&self) -> Vec<K> {
        self.mirrored_keys()
    }

    fn len(&self) -> usize {
        self.state.borrow().len()
    }

    fn bind_map_output(&self, output: Weak<dyn MapInlet<K>>) {
        self.outputs.bind_keyed(output);
    }

    fn unbind_map_output(&self, output: &Weak<dyn MapInlet<K>>) {
        self.outputs.unbind_keyed(output);
    }

    fn decohere_input_key(&self, key: &K, effect: KeyEffect) {
        trace!(node = "map_stage", ?effect, "decohere key");
        self.coherence.force_stale();
        self.outputs.decohere_key(key, effect);
        self.key_outlets.decohere(key);
    }

    fn recohere_input_key(&self, key: &K, version: Version) {
        self.settle_key(key, version);
    }

    fn outlet(&self, key: &K) -> Rc<KeyOutlet<K, S::Output>> {
        let map: Weak<dyn MapOutlet<K, S::Output>> = self.this.clone();
        self.key_outlets.get_or_create(map, key)
    }
}

impl<K, V, S> Streamlet for MapStage<K, V, S>
where
    K: Ord + Clone + 'static,
    V: 'static,
    S: StageFn<K, V> + 'static,
    S::Output: 'static,
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
        self.key_outlets.disconnect_all();
    }

    fn disconnect_inputs(&self) {
        if let Some(input) = self.input.detach() {
            input.unbind_map_output(&self.as_map_inlet());
            wave::schedule(move || input.disconnect_inputs());
            wave::run();
        }
        *self.state.borrow_mut() = Tree::new();
        self.resync.set(false);
        self.coherence.reset();
    }

    fn decohere(&self) {
        if self.resync.replace(true) {
            return;
        }
        trace!(node = "map_stage", "decohere");
        self.coherence.force_stale();
        self.outputs.decohere_all();
        self.key_outlets.decohere_all();
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "map_stage", version, "recohere");
        wave::settle(self.inputs(), version);
        let whole = self.resync.replace(false);
        if whole {
            self.input.seed(self.mirrored_keys());
        }
        for key in self.input.pending_keys() {
            self.settle_key(&key, version);
        }
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
        if whole {
            self.key_outlets.recohere_all(version);
        }
    }

    fn inputs(&self) -> Vec<Rc<dyn Streamlet>> {
        self.input
            .get()
            .map(|input| input as Rc<dyn Streamlet>)
            .into_iter()
            .collect()
    }
}

impl<K, V, S> Inlet for MapStage<K, V, S>
where
    K: Ord + Clone + 'static,
    V: 'static,
    S: StageFn<K, V> + 'static,
    S::Output: 'static,
{
    fn decohere_output(&self) {
        self.decohere();
    }

    fn recohere_output(&self, version: Version) {
        self.recohere(version);
    }

    fn unbind_input(&self) {
        let mirrored = self.mirrored_keys();
        let seeded = self.input.unbind(&self.as_map_inlet(), mirrored);
        self.propagate_seeded(seeded);
    }

    fn disconnect_output(&self) {
        self.input.detach();
        *self.state.borrow_mut() = Tree::new();
        self.resync.set(false);
        self.coherence.reset();
        self.disconnect_outputs();
    }
}

impl<K, V, S> MapInlet<K> for MapStage<K, V, S>
where
    K: Ord + Clone + 'static,
    V: 'static,
    S: StageFn<K, V> + 'static,
    S::Output: 'static,
{
    fn decohere_output_key(&self, key: &K, effect: KeyEffect) {
        if self.input.record(key, effect) {
            self.decohere_input_key(key, effect);
        }
    }

    fn recohere_output_key(&self, key: &K, version: Version) {
        self.settle_key(key, version);
    }
}
