//! Keyed transform.

use super::stage::{MapStage, StageFn};
use std::marker::PhantomData;
use std::rc::Rc;

/// Mapping stage: replaces each value with `func(key, value)`.
pub struct Transform<F, W> {
    func: F,
    _output: PhantomData<fn() -> W>,
}

impl<K, V, W, F> StageFn<K, V> for Transform<F, W>
where
    W: Clone + PartialEq,
    F: Fn(&K, V) -> W,
{
    type Output = W;

    fn apply(&self, key: &K, value: V) -> Option<W> {
        Some((self.func)(key, value))
    }
}

/// Keyed outlet whose values are a function of its input's entries.
pub type TransformOutlet<K, V, W, F> = MapStage<K, V, Transform<F, W>>;

impl<K, V, W, F> MapStage<K, V, Transform<F, W>>
where
    K: Ord + Clone + 'static,
    V: 'static,
    W: Clone + PartialEq + 'static,
    F: Fn(&K, V) -> W + 'static,
{
    pub fn new(func: F) -> Rc<Self> {
        Self::with_stage(Transform {
            func,
            _output: PhantomData,
        })
    }
}
