//! Settable source nodes.

use crate::key_outlet::{KeyOutlet, KeyOutlets};
use crate::streamlet::{
    Coherence, Inlet, KeyEffect, MapInlet, MapOutlet, Outlet, OutputSet, STALE, Streamlet, Version,
};
use crate::wave;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tidal_btree::Tree;
use tracing::trace;

// =============================================================================
// ValueInput
// =============================================================================

/// Source of a plain value set from outside the graph.
pub struct ValueInput<T> {
    value: RefCell<Option<T>>,
    coherence: Coherence,
    outputs: OutputSet,
}

impl<T: Clone> ValueInput<T> {
    pub fn new(value: T) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(Some(value)),
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
        })
    }

    /// Source with no value yet.
    pub fn empty() -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(None),
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
        })
    }

    /// Replaces the value and decoheres consumers. Returns the old value.
    pub fn set(&self, value: T) -> Option<T> {
        let previous = self.value.replace(Some(value));
        wave::note_write();
        self.decohere();
        previous
    }

    /// Clears the value and decoheres consumers. Returns the old value.
    pub fn take(&self) -> Option<T> {
        let previous = self.value.replace(None);
        if previous.is_some() {
            wave::note_write();
            self.decohere();
        }
        previous
    }
}

impl<T: Clone> Outlet<T> for ValueInput<T> {
    fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

impl<T> Streamlet for ValueInput<T> {
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
        self.coherence.reset();
    }

    fn disconnect_inputs(&self) {}

    fn decohere(&self) {
        if self.coherence.invalidate() {
            trace!(node = "value_input", "decohere");
            self.outputs.decohere_all();
        }
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "value_input", version, "recohere");
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
    }
}

// =============================================================================
// MapInput
// =============================================================================

/// Source of a keyed map set from outside the graph.
///
/// Every write records a [`KeyEffect`] and notifies consumers of exactly the
/// key that changed. Writing an equal value is a no-op.
pub struct MapInput<K, V> {
    this: Weak<Self>,
    state: RefCell<Tree<K, V>>,
    effects: RefCell<Tree<K, KeyEffect>>,
    coherence: Coherence,
    outputs: OutputSet<K>,
    key_outlets: KeyOutlets<K, V>,
}

impl<K, V> MapInput<K, V>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new() -> Rc<Self> {
        Self::with_tree(Tree::new())
    }

    /// Source whose initial contents are `tree`. Every key starts pending.
    pub fn with_tree(tree: Tree<K, V>) -> Rc<Self> {
        let effects = tree
            .keys()
            .fold(Tree::new(), |effects, key| effects.set(key, KeyEffect::Update));
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            state: RefCell::new(tree),
            effects: RefCell::new(effects),
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
            key_outlets: KeyOutlets::new(),
        })
    }

    /// Maps `key` to `value`. Returns false if the value was already equal.
    pub fn set(&self, key: K, value: V) -> bool {
        let changed = {
            let mut state = self.state.borrow_mut();
            let next = state.set(key.clone(), value);
            let changed = !next.ptr_eq(&state);
            *state = next;
            changed
        };
        if changed {
            wave::note_write();
            self.decohere_input_key(&key, KeyEffect::Update);
        }
        changed
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            let (removed, next) = state.delete(key);
            *state = next;
            removed
        };
        if removed {
            wave::note_write();
            self.decohere_input_key(key, KeyEffect::Remove);
        }
        removed
    }

    /// Removes every key.
    pub fn clear(&self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    /// O(1) snapshot of the current contents.
    pub fn snapshot(&self) -> Tree<K, V> {
        self.state.borrow().clone()
    }

    fn record(&self, key: &K, effect: KeyEffect) -> bool {
        let mut effects = self.effects.borrow_mut();
        let next = effects.set(key.clone(), effect);
        if next.ptr_eq(&effects) {
            return false;
        }
        *effects = next;
        true
    }

    fn take(&self, key: &K) -> bool {
        let mut effects = self.effects.borrow_mut();
        let (taken, next) = effects.delete(key);
        *effects = next;
        taken
    }
}

impl<K, V> MapOutlet<K, V> for MapInput<K, V>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn has(&self, key: &K) -> bool {
        self.state.borrow().has(key)
    }

    fn get_key(&self, key: &K) -> Option<V> {
        self.state.borrow().get(key).cloned()
    }

    fn keys(&self) -> Vec<K> {
        self.state.borrow().keys().collect()
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
        if !self.record(key, effect) {
            return;
        }
        trace!(node = "map_input", ?effect, "decohere key");
        self.coherence.force_stale();
        self.outputs.decohere_key(key, effect);
        self.key_outlets.decohere(key);
    }

    fn recohere_input_key(&self, key: &K, version: Version) {
        if !self.take(key) {
            return;
        }
        trace!(node = "map_input", version, "recohere key");
        self.outputs.recohere_key(key, version);
        self.key_outlets.recohere(key, version);
    }

    fn outlet(&self, key: &K) -> Rc<KeyOutlet<K, V>> {
        let map: Weak<dyn MapOutlet<K, V>> = self.this.clone();
        self.key_outlets.get_or_create(map, key)
    }
}

impl<K, V> Streamlet for MapInput<K, V>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
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
        *self.effects.borrow_mut() = Tree::new();
        self.coherence.reset();
    }

    fn disconnect_inputs(&self) {}

    fn decohere(&self) {
        if self.coherence.invalidate() {
            trace!(node = "map_input", "decohere");
            self.outputs.decohere_all();
            self.key_outlets.decohere_all();
        }
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "map_input", version, "recohere");
        let pending: Vec<K> = self.effects.borrow().keys().collect();
        for key in &pending {
            self.recohere_input_key(key, version);
        }
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
        self.key_outlets.recohere_all(version);
    }
}

impl<K, V> std::fmt::Debug for MapInput<K, V>
where
    K: Ord + Clone + std::fmt::Debug,
    V: Clone + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.coherence.version();
        f.debug_struct("MapInput")
            .field("version", &if version == STALE { None } else { Some(version) })
            .field("state", &*self.state.borrow())
            .finish()
    }
}
