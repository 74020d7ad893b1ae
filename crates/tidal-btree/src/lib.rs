//! Persistent ordered map for tidal.
//!
//! This crate provides:
//! - `Tree`, an immutable copy-on-write B-tree keyed by `Ord` keys
//! - Successor/predecessor, ordinal and prefix/suffix trim queries
//! - Memoized associative folds cached on immutable pages
//! - Restartable forward and reverse cursors over snapshots
//! - `TreeCell`, a shared handle with atomic root replacement
//!
//! ## Structural sharing
//!
//! ```text
//! T1 = root ──┬── leaf [1 2 3]
//!             └── leaf [4 5 6]
//!
//! T2 = T1.set(5, x)
//!    = root' ─┬── leaf [1 2 3]        (shared with T1)
//!             └── leaf' [4 5' 6]      (new)
//! ```
//!
//! Each mutation allocates one new page per level it touches. Pages are never
//! written after construction, so any number of handles may alias them and a
//! page's cached fold stays valid for as long as the page lives.

mod cell;
mod cursor;
mod fold;
mod page;
mod reducer;
mod tree;

pub use cell::TreeCell;
pub use cursor::Cursor;
pub use reducer::Reducer;
pub use tree::Tree;
