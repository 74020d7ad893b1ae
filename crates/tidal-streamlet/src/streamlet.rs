//! Capability traits and shared node plumbing for the dataflow graph.
//!
//! A graph node is a [`Streamlet`]. Nodes that produce a plain value also
//! implement [`Outlet`]; nodes that produce a keyed map implement
//! [`MapOutlet`]. Consumers implement [`Inlet`] (or [`MapInlet`] to receive
//! per-key notifications).
//!
//! Ownership: a consumer holds an `Rc` to its input; a producer holds only
//! `Weak` references to its outputs. Dropping the last handle to a consumer
//! therefore unhooks it without any explicit teardown.
//!
//! Fan-out goes through the [`wave`](crate::wave) worklist, so notifying a
//! long chain of consumers does not grow the stack.

use crate::key_outlet::KeyOutlet;
use crate::wave;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

/// Identifier of one decohere/recohere wave.
pub type Version = i64;

/// Version of a node whose value is out of date.
pub const STALE: Version = -1;

/// Source of monotonically increasing wave versions.
#[derive(Debug)]
pub struct VersionClock {
    last: Cell<Version>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            last: Cell::new(STALE),
        }
    }

    /// Returns a version never handed out by this clock before.
    pub fn tick(&self) -> Version {
        let next = self.last.get() + 1;
        self.last.set(next);
        next
    }

    /// Last version handed out, or `STALE` if none.
    pub fn current(&self) -> Version {
        self.last.get()
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a key of a keyed outlet changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEffect {
    /// The key was inserted or its value replaced.
    Update,
    /// The key was deleted.
    Remove,
}

// =============================================================================
// Capability traits
// =============================================================================

/// Lifecycle shared by every graph node.
pub trait Streamlet {
    /// Wave this node last settled at, or [`STALE`].
    fn version(&self) -> Version;

    /// Registers a consumer to be notified of changes.
    fn bind_output(&self, output: Weak<dyn Inlet>);

    /// Removes one registration of `output`.
    fn unbind_output(&self, output: &Weak<dyn Inlet>);

    /// Removes every registered consumer without notifying them.
    fn unbind_outputs(&self);

    /// Detaches every consumer and recursively tears down everything
    /// downstream of this node.
    fn disconnect_outputs(&self);

    /// Detaches this node from its inputs and recursively tears down
    /// everything upstream of it.
    fn disconnect_inputs(&self);

    /// Marks this node and its transitive consumers stale.
    ///
    /// Does nothing if the node is already stale.
    fn decohere(&self);

    /// Brings a stale node up to date for `version`, settling its inputs
    /// first, then propagates `version` to its consumers.
    ///
    /// A clean node ignores the call whatever `version` is, as does a node
    /// that is already settling.
    fn recohere(&self, version: Version);

    fn is_stale(&self) -> bool {
        self.version() < 0
    }

    /// Nodes this node settles before itself when it recoheres.
    fn inputs(&self) -> Vec<Rc<dyn Streamlet>> {
        Vec::new()
    }

    /// True while reading this node would evaluate it against its inputs.
    fn read_pending(&self) -> bool {
        false
    }

    /// Evaluates and memoizes the value a read returns while the node is
    /// stale. Called once the node's own inputs no longer have reads pending.
    fn prime_read(&self) {}
}

/// Pull-based source of a plain value.
pub trait Outlet<O>: Streamlet {
    /// Current value. Absent if the node has no value or no input.
    fn get(&self) -> Option<O>;
}

/// Consumer bound to exactly one producer per input slot.
pub trait Inlet {
    /// The producer became stale.
    fn decohere_output(&self);

    /// The producer settled at `version`.
    fn recohere_output(&self, version: Version);

    /// Drops the binding to the producer.
    fn unbind_input(&self);

    /// The producer is tearing down its outputs: drop the binding and
    /// disconnect everything downstream of this consumer.
    fn disconnect_output(&self);
}

/// Consumer of a keyed outlet that tracks which keys changed.
pub trait MapInlet<K>: Inlet {
    /// `key` of the producer became stale for the given reason.
    fn decohere_output_key(&self, key: &K, effect: KeyEffect);

    /// `key` of the producer settled at `version`.
    fn recohere_output_key(&self, key: &K, version: Version);
}

/// Pull-based source of a keyed map.
pub trait MapOutlet<K, V>: Streamlet {
    fn has(&self, key: &K) -> bool;

    /// Current value of `key`.
    fn get_key(&self, key: &K) -> Option<V>;

    /// Snapshot of the current keys in ascending order.
    fn keys(&self) -> Vec<K>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a consumer that receives per-key notifications.
    fn bind_map_output(&self, output: Weak<dyn MapInlet<K>>);

    /// Removes one registration of `output`.
    fn unbind_map_output(&self, output: &Weak<dyn MapInlet<K>>);

    /// Marks `key` stale and notifies consumers.
    fn decohere_input_key(&self, key: &K, effect: KeyEffect);

    /// Settles `key` for `version` and notifies consumers.
    fn recohere_input_key(&self, key: &K, version: Version);

    /// Plain outlet projecting `key`. Repeated calls return the same node.
    fn outlet(&self, key: &K) -> Rc<KeyOutlet<K, V>>;
}

// =============================================================================
// Coherence state
// =============================================================================

/// Version bookkeeping for one node.
///
/// `settling` is set while the node recoheres so that a wave reaching the
/// node again through another path does not recompute it twice.
#[derive(Debug)]
pub(crate) struct Coherence {
    version: Cell<Version>,
    settling: Cell<bool>,
}

impl Coherence {
    pub(crate) fn new() -> Self {
        Self {
            version: Cell::new(STALE),
            settling: Cell::new(false),
        }
    }

    #[inline]
    pub(crate) fn version(&self) -> Version {
        self.version.get()
    }

    #[inline]
    pub(crate) fn is_stale(&self) -> bool {
        self.version.get() < 0
    }

    /// Marks the node stale. Returns false if it already was.
    pub(crate) fn invalidate(&self) -> bool {
        if self.is_stale() {
            return false;
        }
        self.version.set(STALE);
        wave::note_write();
        true
    }

    /// Marks the node stale and reports whether it was clean before.
    pub(crate) fn force_stale(&self) -> bool {
        wave::note_write();
        self.version.replace(STALE) >= 0
    }

    /// Starts a recohere. Returns false if the node is clean or already
    /// settling.
    pub(crate) fn begin(&self) -> bool {
        self.is_stale() && !self.settling.replace(true)
    }

    /// Completes a recohere started with [`Coherence::begin`].
    pub(crate) fn finish(&self, version: Version) {
        self.version.set(version);
        self.settling.set(false);
        wave::note_write();
    }

    /// Returns the node to its unbound state.
    pub(crate) fn reset(&self) {
        self.version.set(STALE);
        self.settling.set(false);
        wave::note_write();
    }
}

// =============================================================================
// Output fan-out
// =============================================================================

/// One registered consumer.
pub(crate) enum Output<K> {
    Value(Weak<dyn Inlet>),
    Keyed(Weak<dyn MapInlet<K>>),
}

impl<K> Output<K> {
    fn addr(&self) -> *const () {
        match self {
            Output::Value(weak) => weak.as_ptr().cast(),
            Output::Keyed(weak) => weak.as_ptr().cast(),
        }
    }

    fn upgrade(&self) -> Option<Consumer<K>> {
        match self {
            Output::Value(weak) => weak.upgrade().map(Consumer::Value),
            Output::Keyed(weak) => weak.upgrade().map(Consumer::Keyed),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Output::Value(weak) => weak.strong_count() > 0,
            Output::Keyed(weak) => weak.strong_count() > 0,
        }
    }
}

/// A live consumer, upgraded until its queued notification has run.
pub(crate) enum Consumer<K> {
    Value(Rc<dyn Inlet>),
    Keyed(Rc<dyn MapInlet<K>>),
}

impl<K> Consumer<K> {
    fn decohere_output(&self) {
        match self {
            Consumer::Value(inlet) => inlet.decohere_output(),
            Consumer::Keyed(inlet) => inlet.decohere_output(),
        }
    }

    fn recohere_output(&self, version: Version) {
        match self {
            Consumer::Value(inlet) => inlet.recohere_output(version),
            Consumer::Keyed(inlet) => inlet.recohere_output(version),
        }
    }

    fn disconnect_output(&self) {
        match self {
            Consumer::Value(inlet) => inlet.disconnect_output(),
            Consumer::Keyed(inlet) => inlet.disconnect_output(),
        }
    }
}

/// Registered consumers of one producer.
///
/// Every notification first snapshots the live consumers and releases the
/// borrow, so consumers may bind or unbind while being notified. Dead
/// registrations are pruned on each snapshot. Notifications are queued on the
/// wave worklist and have all run by the time the outermost call returns.
pub(crate) struct OutputSet<K = ()> {
    outputs: RefCell<Vec<Output<K>>>,
}

impl<K> OutputSet<K> {
    pub(crate) fn new() -> Self {
        Self {
            outputs: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn bind(&self, output: Weak<dyn Inlet>) {
        self.outputs.borrow_mut().push(Output::Value(output));
    }

    pub(crate) fn bind_keyed(&self, output: Weak<dyn MapInlet<K>>) {
        self.outputs.borrow_mut().push(Output::Keyed(output));
    }

    /// Removes the first registration whose target is `addr`.
    fn unbind_addr(&self, addr: *const ()) {
        let mut outputs = self.outputs.borrow_mut();
        if let Some(pos) = outputs.iter().position(|o| std::ptr::eq(o.addr(), addr)) {
            outputs.remove(pos);
        }
    }

    pub(crate) fn unbind(&self, output: &Weak<dyn Inlet>) {
        self.unbind_addr(output.as_ptr().cast());
    }

    pub(crate) fn unbind_keyed(&self, output: &Weak<dyn MapInlet<K>>) {
        self.unbind_addr(output.as_ptr().cast());
    }

    pub(crate) fn clear(&self) {
        self.outputs.borrow_mut().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.outputs.borrow().iter().filter(|o| o.is_live()).count()
    }

    fn live(&self) -> Vec<Consumer<K>> {
        let mut outputs = self.outputs.borrow_mut();
        outputs.retain(Output::is_live);
        outputs.iter().filter_map(Output::upgrade).collect()
    }
}

impl<K: Clone + 'static> OutputSet<K> {
    pub(crate) fn decohere_all(&self) {
        for consumer in self.live() {
            wave::schedule(move || consumer.decohere_output());
        }
        wave::run();
    }

    pub(crate) fn recohere_all(&self, version: Version) {
        for consumer in self.live() {
            wave::schedule(move || consumer.recohere_output(version));
        }
        wave::run();
    }

    /// Key-aware consumers hear about `key`; plain consumers are decohered
    /// as a whole.
    pub(crate) fn decohere_key(&self, key: &K, effect: KeyEffect) {
        for consumer in self.live() {
            let key = key.clone();
            wave::schedule(move || match consumer {
                Consumer::Keyed(inlet) => inlet.decohere_output_key(&key, effect),
                Consumer::Value(inlet) => inlet.decohere_output(),
            });
        }
        wave::run();
    }

    /// Plain consumers wait for the whole-node recohere.
    pub(crate) fn recohere_key(&self, key: &K, version: Version) {
        for consumer in self.live() {
            if let Consumer::Keyed(inlet) = consumer {
                let key = key.clone();
                wave::schedule(move || inlet.recohere_output_key(&key, version));
            }
        }
        wave::run();
    }

    /// Unregisters every consumer and tears each one down.
    pub(crate) fn disconnect(&self) {
        let consumers = self.live();
        self.clear();
        if !consumers.is_empty() {
            debug!(outputs = consumers.len(), "disconnect outputs");
        }
        for consumer in consumers {
            wave::schedule(move || consumer.disconnect_output());
        }
        wave::run();
    }
}

impl<K> Default for OutputSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        decohered: Cell<usize>,
        recohered: Cell<usize>,
        keyed: RefCell<Vec<(u32, KeyEffect)>>,
        settled: RefCell<Vec<(u32, Version)>>,
        disconnected: Cell<bool>,
    }

    impl Inlet for Recorder {
        fn decohere_output(&self) {
            self.decohered.set(self.decohered.get() + 1);
        }
        fn recohere_output(&self, _version: Version) {
            self.recohered.set(self.recohered.get() + 1);
        }
        fn unbind_input(&self) {}
        fn disconnect_output(&self) {
            self.disconnected.set(true);
        }
    }

    impl MapInlet<u32> for Recorder {
        fn decohere_output_key(&self, key: &u32, effect: KeyEffect) {
            self.keyed.borrow_mut().push((*key, effect));
        }
        fn recohere_output_key(&self, key: &u32, version: Version) {
            self.settled.borrow_mut().push((*key, version));
        }
    }

    #[test]
    fn test_version_clock() {
        let clock = VersionClock::new();
        assert_eq!(clock.current(), STALE);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.current(), 1);
    }

    #[test]
    fn test_coherence_transitions() {
        let state = Coherence::new();
        assert!(state.is_stale());
        assert!(!state.invalidate());

        assert!(state.begin());
        assert!(!state.begin());
        state.finish(3);
        assert_eq!(state.version(), 3);
        assert!(!state.begin());

        assert!(state.invalidate());
        assert!(state.is_stale());
        assert!(!state.force_stale());
    }

    #[test]
    fn test_output_set_dispatch() {
        let plain = Rc::new(Recorder::default());
        let keyed = Rc::new(Recorder::default());
        let outputs: OutputSet<u32> = OutputSet::new();
        let plain_weak: Weak<dyn Inlet> = Rc::downgrade(&plain) as Weak<dyn Inlet>;
        outputs.bind(plain_weak);
        outputs.bind_keyed(Rc::downgrade(&keyed) as Weak<dyn MapInlet<u32>>);

        outputs.decohere_key(&7, KeyEffect::Update);
        assert_eq!(plain.decohered.get(), 1);
        assert_eq!(keyed.decohered.get(), 0);
        assert_eq!(*keyed.keyed.borrow(), vec![(7, KeyEffect::Update)]);

        outputs.recohere_key(&7, 2);
        assert_eq!(plain.recohered.get(), 0);
        assert_eq!(*keyed.settled.borrow(), vec![(7, 2)]);

        outputs.recohere_all(2);
        assert_eq!(plain.recohered.get(), 1);
        assert_eq!(keyed.recohered.get(), 1);
    }

    #[test]
    fn test_output_set_unbind_and_prune() {
        let outputs: OutputSet = OutputSet::new();
        let kept = Rc::new(Recorder::default());
        let kept_weak: Weak<dyn Inlet> = Rc::downgrade(&kept) as Weak<dyn Inlet>;
        outputs.bind(kept_weak.clone());
        {
            let dropped = Rc::new(Recorder::default());
            outputs.bind(Rc::downgrade(&dropped) as Weak<dyn Inlet>);
            assert_eq!(outputs.len(), 2);
        }
        assert_eq!(outputs.len(), 1);

        outputs.decohere_all();
        assert_eq!(kept.decohered.get(), 1);

        outputs.unbind(&kept_weak);
        outputs.decohere_all();
        assert_eq!(kept.decohered.get(), 1);
        assert_eq!(outputs.len(), 0);
    }

    #[test]
    fn test_output_set_disconnect() {
        let outputs: OutputSet = OutputSet::new();
        let recorder = Rc::new(Recorder::default());
        outputs.bind(Rc::downgrade(&recorder) as Weak<dyn Inlet>);
        outputs.disconnect();
        assert!(recorder.disconnected.get());
        assert_eq!(outputs.len(), 0);
    }
}
