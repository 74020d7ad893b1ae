//! Derived keyed outlets.

mod filter;
mod reduce;
mod stage;
mod transform;

pub use filter::{Filter, FilterOutlet};
pub use reduce::ReduceOutlet;
pub use stage::{MapStage, StageFn};
pub use transform::{Transform, TransformOutlet};
