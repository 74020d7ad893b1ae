//! Input side of keyed combinators.

use crate::streamlet::{KeyEffect, MapInlet, MapOutlet};
use crate::wave;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tidal_btree::Tree;

/// Binding to one upstream [`MapOutlet`] plus the pending effect per key.
///
/// Effects are recorded during decohere and consumed one key at a time
/// during recohere, so a recohere only visits keys that actually changed.
pub(crate) struct KeyedInput<K, V> {
    input: RefCell<Option<Rc<dyn MapOutlet<K, V>>>>,
    effects: RefCell<Tree<K, KeyEffect>>,
}

impl<K: Ord + Clone, V> KeyedInput<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            input: RefCell::new(None),
            effects: RefCell::new(Tree::new()),
        }
    }

    /// The bound producer, if any. The returned handle is detached from the
    /// internal borrow.
    pub(crate) fn get(&self) -> Option<Rc<dyn MapOutlet<K, V>>> {
        self.input.borrow().clone()
    }

    /// Records `effect` for `key`. Returns false if it was already recorded.
    pub(crate) fn record(&self, key: &K, effect: KeyEffect) -> bool {
        let mut effects = self.effects.borrow_mut();
        let next = effects.set(key.clone(), effect);
        if next.ptr_eq(&effects) {
            return false;
        }
        *effects = next;
        true
    }

    /// Removes and returns the pending effect for `key`.
    pub(crate) fn take(&self, key: &K) -> Option<KeyEffect> {
        let mut effects = self.effects.borrow_mut();
        let effect = effects.get(key).copied()?;
        *effects = effects.delete(key).1;
        Some(effect)
    }

    pub(crate) fn pending_keys(&self) -> Vec<K> {
        self.effects.borrow().keys().collect()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        !self.effects.borrow().is_empty()
    }

    /// Records `Update` for every key of the producer and `Remove` for every
    /// mirrored key the producer no longer has. Returns the newly recorded
    /// effects.
    pub(crate) fn seed(&self, mirrored: Vec<K>) -> Vec<(K, KeyEffect)> {
        let mut seeded = Vec::new();
        let input = self.get();
        if let Some(input) = &input {
            for key in input.keys() {
                if self.record(&key, KeyEffect::Update) {
                    seeded.push((key, KeyEffect::Update));
                }
            }
        }
        for key in mirrored {
            let present = input.as_ref().is_some_and(|input| input.has(&key));
            if !present && self.record(&key, KeyEffect::Remove) {
                seeded.push((key, KeyEffect::Remove));
            }
        }
        seeded
    }

    /// Binds `consumer` to `input`, replacing any previous binding.
    pub(crate) fn bind(&self, input: Rc<dyn MapOutlet<K, V>>, consumer: Weak<dyn MapInlet<K>>) {
        if let Some(previous) = self.input.replace(None) {
            previous.unbind_map_output(&consumer);
        }
        input.bind_map_output(consumer);
        *self.input.borrow_mut() = Some(input);
        wave::note_write();
    }

    /// Drops the binding and seeds `Remove` for every mirrored key.
    pub(crate) fn unbind(&self, consumer: &Weak<dyn MapInlet<K>>, mirrored: Vec<K>) -> Vec<(K, KeyEffect)> {
        if let Some(previous) = self.input.replace(None) {
            previous.unbind_map_output(consumer);
            wave::note_write();
        }
        self.seed(mirrored)
    }

    /// Drops the binding without notifying the producer or seeding effects.
    pub(crate) fn detach(&self) -> Option<Rc<dyn MapOutlet<K, V>>> {
        *self.effects.borrow_mut() = Tree::new();
        self.input.replace(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MapInput;

    #[test]
    fn test_record_and_take() {
        let input: KeyedInput<u32, u32> = KeyedInput::new();
        assert!(input.record(&1, KeyEffect::Update));
        assert!(!input.record(&1, KeyEffect::Update));
        assert!(input.record(&1, KeyEffect::Remove));
        assert!(input.record(&2, KeyEffect::Update));
        assert_eq!(input.pending_keys(), vec![1, 2]);

        assert_eq!(input.take(&1), Some(KeyEffect::Remove));
        assert_eq!(input.take(&1), None);
        assert!(input.has_pending());
        assert_eq!(input.take(&2), Some(KeyEffect::Update));
        assert!(!input.has_pending());
    }

    #[test]
    fn test_seed_against_producer() {
        let map = MapInput::new();
        map.set(1u32, 10u32);
        map.set(2, 20);

        let input: KeyedInput<u32, u32> = KeyedInput::new();
        *input.input.borrow_mut() = Some(map as Rc<dyn MapOutlet<u32, u32>>);

        let seeded = input.seed(vec![2, 3]);
        assert_eq!(
            seeded,
            vec![(1, KeyEffect::Update), (2, KeyEffect::Update), (3, KeyEffect::Remove)]
        );
        assert!(input.seed(vec![2, 3]).is_empty());
    }

    #[test]
    fn test_detach_clears_effects() {
        let input: KeyedInput<u32, u32> = KeyedInput::new();
        input.record(&5, KeyEffect::Update);
        assert!(input.detach().is_none());
        assert!(!input.has_pending());
    }
}
