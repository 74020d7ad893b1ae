//! Per-key projection of a keyed outlet.

use crate::streamlet::{Coherence, Inlet, MapOutlet, Outlet, OutputSet, Streamlet, Version};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tidal_btree::Tree;
use tracing::trace;

/// Plain outlet exposing one key of a [`MapOutlet`].
///
/// Created through [`MapOutlet::outlet`]; the map keeps one instance per key
/// and only notifies the instance whose key changed.
pub struct KeyOutlet<K, V> {
    map: Weak<dyn MapOutlet<K, V>>,
    key: K,
    coherence: Coherence,
    outputs: OutputSet,
}

impl<K, V> KeyOutlet<K, V> {
    pub(crate) fn new(map: Weak<dyn MapOutlet<K, V>>, key: K) -> Self {
        Self {
            map,
            key,
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
        }
    }

    /// The projected key.
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, V> Outlet<V> for KeyOutlet<K, V> {
    fn get(&self) -> Option<V> {
        self.map.upgrade()?.get_key(&self.key)
    }
}

impl<K, V> Streamlet for KeyOutlet<K, V> {
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

    fn disconnect_inputs(&self) {}

    fn decohere(&self) {
        if self.coherence.invalidate() {
            trace!(node = "key_outlet", "decohere");
            self.outputs.decohere_all();
        }
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "key_outlet", version, "recohere");
        if let Some(map) = self.map.upgrade() {
            map.recohere_input_key(&self.key, version);
        }
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
    }
}

/// Memoized key outlets of one keyed node.
///
/// `PartialEq` compares by identity so that the memo tree treats
/// re-inserting the same outlet as a no-op.
pub(crate) struct KeyOutletRef<K, V>(Rc<KeyOutlet<K, V>>);

impl<K, V> Clone for KeyOutletRef<K, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K, V> PartialEq for KeyOutletRef<K, V> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

pub(crate) struct KeyOutlets<K, V> {
    outlets: RefCell<Tree<K, KeyOutletRef<K, V>>>,
}

impl<K: Ord + Clone, V> KeyOutlets<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            outlets: RefCell::new(Tree::new()),
        }
    }

    /// Returns the outlet for `key`, creating it on first request.
    pub(crate) fn get_or_create(&self, map: Weak<dyn MapOutlet<K, V>>, key: &K) -> Rc<KeyOutlet<K, V>> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let outlet = Rc::new(KeyOutlet::new(map, key.clone()));
        let mut outlets = self.outlets.borrow_mut();
        let next = outlets.set(key.clone(), KeyOutletRef(outlet.clone()));
        *outlets = next;
        outlet
    }

    fn get(&self, key: &K) -> Option<Rc<KeyOutlet<K, V>>> {
        self.outlets.borrow().get(key).map(|outlet| outlet.0.clone())
    }

    fn all(&self) -> Vec<Rc<KeyOutlet<K, V>>> {
        self.outlets.borrow().values().map(|outlet| outlet.0).collect()
    }

    pub(crate) fn decohere(&self, key: &K) {
        if let Some(outlet) = self.get(key) {
            outlet.decohere();
        }
    }

    pub(crate) fn recohere(&self, key: &K, version: Version) {
        if let Some(outlet) = self.get(key) {
            outlet.recohere(version);
        }
    }

    pub(crate) fn decohere_all(&self) {
        for outlet in self.all() {
            outlet.decohere();
        }
    }

    pub(crate) fn recohere_all(&self, version: Version) {
        for outlet in self.all() {
            outlet.recohere(version);
        }
    }

    pub(crate) fn disconnect_all(&self) {
        let outlets = self.all();
        *self.outlets.borrow_mut() = Tree::new();
        for outlet in outlets {
            outlet.disconnect_outputs();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MapInput;
    use crate::streamlet::{MapOutlet, Outlet, Streamlet};

    #[test]
    fn test_key_outlet_memoized_per_key() {
        let map = MapInput::new();
        map.set("a".to_string(), 1);
        let first = map.outlet(&"a".to_string());
        let again = map.outlet(&"a".to_string());
        let other = map.outlet(&"b".to_string());
        assert!(Rc::ptr_eq(&first, &again));
        assert!(!Rc::ptr_eq(&first, &other));
        assert_eq!(first.key(), "a");
    }

    #[test]
    fn test_key_outlet_projects_value() {
        let map = MapInput::new();
        let a = map.outlet(&"a".to_string());
        assert_eq!(a.get(), None);

        map.set("a".to_string(), 10);
        assert_eq!(a.get(), Some(10));
        map.remove(&"a".to_string());
        assert_eq!(a.get(), None);
    }

    #[test]
    fn test_key_outlet_tracks_only_its_key() {
        let map = MapInput::new();
        map.set(1u32, 1u32);
        map.set(2, 2);
        map.recohere(0);
        let one = map.outlet(&1);
        let two = map.outlet(&2);
        one.recohere(0);
        two.recohere(0);
        assert!(!one.is_stale());

        map.set(1, 11);
        assert!(one.is_stale());
        assert!(!two.is_stale());

        one.recohere(1);
        assert_eq!(one.version(), 1);
        assert_eq!(one.get(), Some(11));
    }

    #[test]
    fn test_key_outlet_outlives_map() {
        let outlet = {
            let map = MapInput::new();
            map.set(1u32, 1u32);
            map.outlet(&1)
        };
        assert_eq!(outlet.get(), None);
        outlet.recohere(0);
        assert_eq!(outlet.version(), 0);
    }
}
