//! Keyed filter.

use super::stage::{MapStage, StageFn};
use std::rc::Rc;

/// Predicate stage: keeps entries for which the predicate holds.
pub struct Filter<P>(P);

impl<K, V, P> StageFn<K, V> for Filter<P>
where
    V: Clone + PartialEq,
    P: Fn(&K, &V) -> bool,
{
    type Output = V;

    fn apply(&self, key: &K, value: V) -> Option<V> {
        (self.0)(key, &value).then_some(value)
    }
}

/// Keyed outlet holding the entries of its input that satisfy a predicate.
pub type FilterOutlet<K, V, P> = MapStage<K, V, Filter<P>>;

impl<K, V, P> MapStage<K, V, Filter<P>>
where
    K: Ord + Clone + 'static,
    V: Clone + PartialEq + 'static,
    P: Fn(&K, &V) -> bool + 'static,
{
    pub fn new(predicate: P) -> Rc<Self> {
        Self::with_stage(Filter(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MapInput;
    use crate::streamlet::{MapOutlet, Streamlet};

    #[test]
    fn test_filter_keeps_matching_entries() {
        let map = MapInput::new();
        for k in 0..10u32 {
            map.set(k, k * 10);
        }
        let evens = FilterOutlet::new(|_: &u32, v: &u32| v % 20 == 0);
        evens.bind_input(map.clone());
        assert!(evens.is_empty());

        evens.recohere(0);
        assert_eq!(evens.keys(), vec![0, 2, 4, 6, 8]);
        assert_eq!(evens.get_key(&4), Some(40));
        assert_eq!(evens.get_key(&5), None);
    }

    #[test]
    fn test_filter_drops_key_that_stops_matching() {
        let map = MapInput::new();
        map.set("x".to_string(), 2);
        let evens = FilterOutlet::new(|_: &String, v: &i32| v % 2 == 0);
        evens.bind_input(map.clone());
        evens.recohere(0);
        assert!(evens.has(&"x".to_string()));

        map.set("x".to_string(), 3);
        assert!(evens.has(&"x".to_string()));
        evens.recohere(1);
        assert!(!evens.has(&"x".to_string()));

        map.set("x".to_string(), 4);
        evens.recohere(2);
        assert_eq!(evens.get_key(&"x".to_string()), Some(4));

        map.remove(&"x".to_string());
        evens.recohere(3);
        assert!(evens.is_empty());
    }
}
