//! Incremental dataflow graph for tidal.
//!
//! This crate provides:
//! - Capability traits for plain (`Outlet`/`Inlet`) and keyed
//!   (`MapOutlet`/`MapInlet`) nodes
//! - A two-phase protocol: `decohere` eagerly marks nodes stale, `recohere`
//!   lazily settles them for one version
//! - Per-key change tracking so keyed nodes only recompute changed keys
//! - Sources, plain and keyed combinators, and nested reactive records
//!
//! ## Protocol
//!
//! ```text
//!  source.set(k)            consumer.recohere(v)
//!      │                           │
//!      ▼ decohere (push)           ▼ recohere inputs first (pull)
//!  ┌────────┐  decohere_output ┌──────────┐  recohere_output ┌─────────┐
//!  │ source │ ───────────────▶ │  stage   │ ───────────────▶ │  reduce │
//!  └────────┘  (key, effect)   └──────────┘     (version)    └─────────┘
//! ```
//!
//! Decohere only marks state and fans out; it never recomputes. Recohere
//! settles a node at most once per version no matter how many paths reach
//! it. Both run off a per-thread worklist rather than the call stack, so
//! graph depth is bounded by memory alone. The graph is single-threaded: nodes are `Rc`-shared, consumers own
//! their inputs and producers hold `Weak` references to their outputs.

pub mod combinators;
mod computed;
mod inlet;
mod input;
mod key_outlet;
mod record;
mod streamlet;
mod value;
mod wave;

pub use combinators::{
    Filter, FilterOutlet, MapStage, ReduceOutlet, StageFn, Transform, TransformOutlet,
};
pub use computed::{ComputedOutlet, JoinOutlet};
pub use input::{MapInput, ValueInput};
pub use key_outlet::KeyOutlet;
pub use record::RecordOutlet;
pub use streamlet::{
    Inlet, KeyEffect, MapInlet, MapOutlet, Outlet, STALE, Streamlet, Version, VersionClock,
};
pub use value::Value;
