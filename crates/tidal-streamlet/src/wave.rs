//! Propagation scheduling.
//!
//! Waves never recurse through the graph. Notifications to consumers are
//! queued on a per-thread worklist and run by whichever call started the
//! wave. Settling and stale reads walk stale inputs with an explicit stack,
//! so the native stack stays flat no matter how deep the graph is.
//!
//! The module also keeps a per-thread write counter. It advances on every
//! change that can alter what a node reads from its inputs, which lets a
//! stale node memoize a read until the next write.

use crate::streamlet::{Streamlet, Version};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

type Job = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Job>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static WRITES: Cell<u64> = const { Cell::new(0) };
}

/// Queues a notification for the current wave.
pub(crate) fn schedule(job: impl FnOnce() + 'static) {
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(job)));
}

/// Runs queued notifications until the worklist is empty.
///
/// Nested calls return at once and leave the work to the outermost drain.
pub(crate) fn run() {
    if DRAINING.with(|draining| draining.replace(true)) {
        return;
    }
    let _guard = Drain;
    while let Some(job) = QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        job();
    }
}

/// Ends a drain, dropping unrun work if a notification panicked.
struct Drain;

impl Drop for Drain {
    fn drop(&mut self) {
        if std::thread::panicking() {
            QUEUE.with(|queue| queue.borrow_mut().clear());
        }
        DRAINING.with(|draining| draining.set(false));
    }
}

/// Records a change visible to readers.
#[inline]
pub(crate) fn note_write() {
    WRITES.with(|writes| writes.set(writes.get() + 1));
}

/// Number of changes recorded on this thread.
#[inline]
pub(crate) fn writes() -> u64 {
    WRITES.with(Cell::get)
}

/// Settles every stale node upstream of `inputs` for `version`, each node
/// after all of its own inputs.
pub(crate) fn settle(inputs: Vec<Rc<dyn Streamlet>>, version: Version) {
    walk(inputs, |node| node.is_stale(), |node| node.recohere(version));
}

/// Memoizes the stale read of every node upstream of `inputs` that would
/// otherwise evaluate on demand, each node after all of its own inputs.
pub(crate) fn prime(inputs: Vec<Rc<dyn Streamlet>>) {
    walk(inputs, |node| node.read_pending(), |node| node.prime_read());
}

/// Post-order walk over the nodes reachable from `inputs` through nodes
/// that are still `pending`.
fn walk(
    inputs: Vec<Rc<dyn Streamlet>>,
    pending: impl Fn(&dyn Streamlet) -> bool,
    visit: impl Fn(&dyn Streamlet),
) {
    let mut stack: Vec<(Rc<dyn Streamlet>, bool)> = Vec::new();
    stack.extend(
        inputs
            .into_iter()
            .rev()
            .filter(|node| pending(&**node))
            .map(|node| (node, false)),
    );
    while let Some((node, expanded)) = stack.pop() {
        if !pending(&*node) {
            continue;
        }
        if expanded {
            visit(&*node);
            continue;
        }
        let upstream = node.inputs();
        stack.push((node, true));
        stack.extend(
            upstream
                .into_iter()
                .rev()
                .filter(|node| pending(&**node))
                .map(|node| (node, false)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_drains_nested_jobs_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        schedule(move || {
            outer.borrow_mut().push(1);
            let inner = outer.clone();
            schedule(move || inner.borrow_mut().push(3));
            run();
            outer.borrow_mut().push(2);
        });
        run();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_writes_advance() {
        let before = writes();
        note_write();
        assert_eq!(writes(), before + 1);
    }
}
