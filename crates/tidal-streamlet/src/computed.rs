//! Plain derived values.
//!
//! A computed node recomputes its memo only while recohering. Pulling
//! [`Outlet::get`] on a stale node evaluates the function against the
//! current inputs without touching the memo, so reads during the stale
//! window always reflect the latest upstream values. That read is kept until
//! the next write anywhere on the thread, so repeated reads and diamonds
//! evaluate each stale node once.

use crate::streamlet::{Coherence, Inlet, Outlet, OutputSet, Streamlet, Version};
use crate::wave;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Value read from a stale node, tagged with the write count it saw.
struct StaleRead<O> {
    slot: RefCell<Option<(u64, Option<O>)>>,
}

impl<O: Clone> StaleRead<O> {
    fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    /// The memoized read, if nothing was written since it was taken.
    fn load(&self) -> Option<Option<O>> {
        match &*self.slot.borrow() {
            Some((writes, value)) if *writes == wave::writes() => Some(value.clone()),
            _ => None,
        }
    }

    fn is_current(&self) -> bool {
        matches!(&*self.slot.borrow(), Some((writes, _)) if *writes == wave::writes())
    }

    fn store(&self, value: Option<O>) {
        *self.slot.borrow_mut() = Some((wave::writes(), value));
    }

    fn clear(&self) {
        self.slot.replace(None);
    }
}

/// Shared input slot of a plain consumer.
struct Slot<I> {
    input: RefCell<Option<Rc<dyn Outlet<I>>>>,
}

impl<I: 'static> Slot<I> {
    fn new() -> Self {
        Self {
            input: RefCell::new(None),
        }
    }

    fn get(&self) -> Option<Rc<dyn Outlet<I>>> {
        self.input.borrow().clone()
    }

    fn value(&self) -> Option<I> {
        self.get()?.get()
    }

    fn upstream(&self) -> Option<Rc<dyn Streamlet>> {
        self.get().map(|input| input as Rc<dyn Streamlet>)
    }

    fn bind(&self, input: Rc<dyn Outlet<I>>, consumer: Weak<dyn Inlet>) {
        if let Some(previous) = self.input.replace(None) {
            previous.unbind_output(&consumer);
        }
        input.bind_output(consumer);
        *self.input.borrow_mut() = Some(input);
        wave::note_write();
    }

    fn unbind(&self, consumer: &Weak<dyn Inlet>) -> bool {
        match self.input.replace(None) {
            Some(previous) => {
                previous.unbind_output(consumer);
                wave::note_write();
                true
            }
            None => false,
        }
    }

    fn disconnect(&self, consumer: &Weak<dyn Inlet>) {
        if let Some(input) = self.input.replace(None) {
            input.unbind_output(consumer);
            wave::schedule(move || input.disconnect_inputs());
            wave::run();
        }
    }
}

// =============================================================================
// ComputedOutlet
// =============================================================================

/// Value computed from one input.
pub struct ComputedOutlet<I, O, F> {
    this: Weak<Self>,
    input: Slot<I>,
    func: F,
    memo: RefCell<Option<O>>,
    stale_read: StaleRead<O>,
    coherence: Coherence,
    outputs: OutputSet,
}

impl<I, O, F> ComputedOutlet<I, O, F>
where
    I: 'static,
    O: Clone + 'static,
    F: Fn(Option<I>) -> Option<O> + 'static,
{
    pub fn new(func: F) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            input: Slot::new(),
            func,
            memo: RefCell::new(None),
            stale_read: StaleRead::new(),
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
        })
    }

    /// Binds `input`, replacing any previous input, and decoheres.
    pub fn bind_input(&self, input: Rc<dyn Outlet<I>>) {
        self.input.bind(input, self.as_inlet());
        self.decohere();
    }

    /// The bound input, if any.
    pub fn input(&self) -> Option<Rc<dyn Outlet<I>>> {
        self.input.get()
    }

    fn as_inlet(&self) -> Weak<dyn Inlet> {
        self.this.clone()
    }

    fn evaluate(&self) -> Option<O> {
        (self.func)(self.input.value())
    }
}

impl<I, O, F> Outlet<O> for ComputedOutlet<I, O, F>
where
    I: 'static,
    O: Clone + 'static,
    F: Fn(Option<I>) -> Option<O> + 'static,
{
    fn get(&self) -> Option<O> {
        if !self.coherence.is_stale() {
            return self.memo.borrow().clone();
        }
        if let Some(value) = self.stale_read.load() {
            return value;
        }
        wave::prime(self.inputs());
        let value = self.evaluate();
        self.stale_read.store(value.clone());
        value
    }
}

impl<I, O, F> Streamlet for ComputedOutlet<I, O, F>
where
    I: 'static,
    O: Clone + 'static,
    F: Fn(Option<I>) -> Option<O> + 'static,
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
        self.input.disconnect(&self.as_inlet());
        self.memo.replace(None);
        self.stale_read.clear();
        self.coherence.reset();
    }

    fn decohere(&self) {
        if self.coherence.invalidate() {
            trace!(node = "computed", "decohere");
            self.outputs.decohere_all();
        }
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "computed", version, "recohere");
        wave::settle(self.inputs(), version);
        let value = self.evaluate();
        self.memo.replace(value);
        self.stale_read.clear();
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
    }

    fn inputs(&self) -> Vec<Rc<dyn Streamlet>> {
        self.input.upstream().into_iter().collect()
    }

    fn read_pending(&self) -> bool {
        self.coherence.is_stale() && !self.stale_read.is_current()
    }

    fn prime_read(&self) {
        if self.read_pending() {
            self.stale_read.store(self.evaluate());
        }
    }
}

impl<I, O, F> Inlet for ComputedOutlet<I, O, F>
where
    I: 'static,
    O: Clone + 'static,
    F: Fn(Option<I>) -> Option<O> + 'static,
{
    fn decohere_output(&self) {
        self.decohere();
    }

    fn recohere_output(&self, version: Version) {
        self.recohere(version);
    }

    fn unbind_input(&self) {
        if self.input.unbind(&self.as_inlet()) {
            self.decohere();
        }
    }

    fn disconnect_output(&self) {
        self.input.input.replace(None);
        self.memo.replace(None);
        self.stale_read.clear();
        self.coherence.reset();
        self.outputs.disconnect();
    }
}

// =============================================================================
// JoinOutlet
// =============================================================================

/// Value computed from two inputs.
pub struct JoinOutlet<A, B, O, F> {
    this: Weak<Self>,
    left: Slot<A>,
    right: Slot<B>,
    func: F,
    memo: RefCell<Option<O>>,
    stale_read: StaleRead<O>,
    coherence: Coherence,
    outputs: OutputSet,
}

impl<A, B, O, F> JoinOutlet<A, B, O, F>
where
    A: 'static,
    B: 'static,
    O: Clone + 'static,
    F: Fn(Option<A>, Option<B>) -> Option<O> + 'static,
{
    pub fn new(func: F) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            left: Slot::new(),
            right: Slot::new(),
            func,
            memo: RefCell::new(None),
            stale_read: StaleRead::new(),
            coherence: Coherence::new(),
            outputs: OutputSet::new(),
        })
    }

    pub fn bind_left(&self, input: Rc<dyn Outlet<A>>) {
        self.left.bind(input, self.as_inlet());
        self.decohere();
    }

    pub fn bind_right(&self, input: Rc<dyn Outlet<B>>) {
        self.right.bind(input, self.as_inlet());
        self.decohere();
    }

    fn as_inlet(&self) -> Weak<dyn Inlet> {
        self.this.clone()
    }

    fn evaluate(&self) -> Option<O> {
        (self.func)(self.left.value(), self.right.value())
    }
}

impl<A, B, O, F> Outlet<O> for JoinOutlet<A, B, O, F>
where
    A: 'static,
    B: 'static,
    O: Clone + 'static,
    F: Fn(Option<A>, Option<B>) -> Option<O> + 'static,
{
    fn get(&self) -> Option<O> {
        if !self.coherence.is_stale() {
            return self.memo.borrow().clone();
        }
        if let Some(value) = self.stale_read.load() {
            return value;
        }
        wave::prime(self.inputs());
        let value = self.evaluate();
        self.stale_read.store(value.clone());
        value
    }
}

impl<A, B, O, F> Streamlet for JoinOutlet<A, B, O, F>
where
    A: 'static,
    B: 'static,
    O: Clone + 'static,
    F: Fn(Option<A>, Option<B>) -> Option<O> + 'static,
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
        let inlet = self.as_inlet();
        self.left.disconnect(&inlet);
        self.right.disconnect(&inlet);
        self.memo.replace(None);
        self.stale_read.clear();
        self.coherence.reset();
    }

    fn decohere(&self) {
        if self.coherence.invalidate() {
            trace!(node = "join", "decohere");
            self.outputs.decohere_all();
        }
    }

    fn recohere(&self, version: Version) {
        if !self.coherence.begin() {
            return;
        }
        trace!(node = "join", version, "recohere");
        wave::settle(self.inputs(), version);
        let value = self.evaluate();
        self.memo.replace(value);
        self.stale_read.clear();
        self.coherence.finish(version);
        self.outputs.recohere_all(version);
    }

    fn inputs(&self) -> Vec<Rc<dyn Streamlet>> {
        self.left
            .upstream()
            .into_iter()
            .chain(self.right.upstream())
            .collect()
    }

    fn read_pending(&self) -> bool {
        self.coherence.is_stale() && !self.stale_read.is_current()
    }

    fn prime_read(&self) {
        if self.read_pending() {
            self.stale_read.store(self.evaluate());
        }
    }
}

impl<A, B, O, F> Inlet for JoinOutlet<A, B, O, F>
where
    A: 'static,
    B: 'static,
    O: Clone + 'static,
    F: Fn(Option<A>, Option<B>) -> Option<O> + 'static,
{
    fn decohere_output(&self) {
        self.decohere();
    }

    fn recohere_output(&self, version: Version) {
        self.recohere(version);
    }

    fn unbind_input(&self) {
        let inlet = self.as_inlet();
        let left = self.left.unbind(&inlet);
        let right = self.right.unbind(&inlet);
        if left || right {
            self.decohere();
        }
    }

    fn disconnect_output(&self) {
        self.left.input.replace(None);
        self.right.input.replace(None);
        self.memo.replace(None);
        self.stale_read.clear();
        self.coherence.reset();
        self.outputs.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ValueInput;
    use std::cell::Cell;

    #[test]
    fn test_computed_recomputes_on_recohere_only() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let input = ValueInput::new(2);
        let doubled = ComputedOutlet::new(move |x: Option<i32>| {
            counter.set(counter.get() + 1);
            x.map(|x| x * 2)
        });
        doubled.bind_input(input.clone());

        doubled.recohere(0);
        assert_eq!(calls.get(), 1);
        assert_eq!(doubled.get(), Some(4));
        assert_eq!(doubled.get(), Some(4));
        assert_eq!(calls.get(), 1);

        input.set(5);
        assert!(doubled.is_stale());
        assert_eq!(doubled.get(), Some(10));
        doubled.recohere(1);
        assert_eq!(doubled.version(), 1);
        assert_eq!(doubled.get(), Some(10));
    }

    #[test]
    fn test_stale_get_evaluates_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let input = ValueInput::new(1);
        let node = ComputedOutlet::new(move |x: Option<i32>| {
            counter.set(counter.get() + 1);
            x.map(|x| x + 100)
        });
        node.bind_input(input.clone());
        node.recohere(0);
        calls.set(0);

        input.set(2);
        for _ in 0..5 {
            assert_eq!(node.get(), Some(102));
        }
        assert_eq!(calls.get(), 1);

        // A later write while still stale is seen by the next read.
        input.set(3);
        assert_eq!(node.get(), Some(103));
        assert_eq!(node.get(), Some(103));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_stale_diamond_ladder_evaluates_each_level_once() {
        let calls = Rc::new(Cell::new(0));
        let source = ValueInput::new(1i64);
        let mut top: Rc<dyn Outlet<i64>> = source.clone();
        for _ in 0..12 {
            let counter = calls.clone();
            let level = JoinOutlet::new(move |a: Option<i64>, b: Option<i64>| {
                counter.set(counter.get() + 1);
                Some(a? + b?)
            });
            level.bind_left(top.clone());
            level.bind_right(top.clone());
            top = level;
        }
        top.recohere(0);
        assert_eq!(top.get(), Some(4096));
        calls.set(0);

        source.set(2);
        assert!(top.is_stale());
        assert_eq!(top.get(), Some(8192));
        assert!(calls.get() <= 12, "{} evaluations", calls.get());

        top.recohere(1);
        assert_eq!(top.get(), Some(8192));
        assert!(calls.get() <= 24, "{} evaluations", calls.get());
    }

    #[test]
    fn test_recohere_clean_node_ignores_any_version() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let node = ComputedOutlet::new(move |x: Option<i32>| {
            counter.set(counter.get() + 1);
            x
        });
        node.bind_input(ValueInput::new(7));
        node.recohere(3);
        assert_eq!(calls.get(), 1);

        for version in [3, 4, 100, 0] {
            node.recohere(version);
        }
        assert_eq!(node.version(), 3);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_computed_without_input() {
        let node = ComputedOutlet::new(|x: Option<i32>| Some(x.unwrap_or(-1)));
        assert_eq!(node.get(), Some(-1));
        node.recohere(0);
        assert_eq!(node.get(), Some(-1));
        assert!(node.input().is_none());
    }

    #[test]
    fn test_computed_unbind_input() {
        let input = ValueInput::new(3);
        let node = ComputedOutlet::new(|x: Option<i32>| x);
        node.bind_input(input.clone());
        node.recohere(0);
        assert_eq!(node.get(), Some(3));

        Inlet::unbind_input(&*node);
        assert!(node.is_stale());
        assert_eq!(node.get(), None);

        input.recohere(1);
        input.set(4);
        assert!(node.is_stale());
    }

    #[test]
    fn test_join_combines_both_sides() {
        let left = ValueInput::new(1);
        let right = ValueInput::new(10);
        let sum = JoinOutlet::new(|a: Option<i32>, b: Option<i32>| Some(a? + b?));
        sum.bind_left(left.clone());
        sum.bind_right(right.clone());

        sum.recohere(0);
        assert_eq!(sum.get(), Some(11));

        right.set(20);
        assert!(sum.is_stale());
        sum.recohere(1);
        assert_eq!(sum.get(), Some(21));
    }

    #[test]
    fn test_disconnect_inputs_tears_down_upstream() {
        let source = ValueInput::new(1);
        let first = ComputedOutlet::new(|x: Option<i32>| x);
        let second = ComputedOutlet::new(|x: Option<i32>| x);
        first.bind_input(source.clone());
        second.bind_input(first.clone());
        second.recohere(0);

        second.disconnect_inputs();
        assert!(second.input().is_none());
        assert!(first.input().is_none());
        assert_eq!(second.get(), None);
    }
}
