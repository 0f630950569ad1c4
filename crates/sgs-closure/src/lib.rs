//! Transitive-closure derivation for scene-graph objects.
//!
//! An object's closure lists every object reachable through its child
//! references together with the shortest path length. Closures are derived
//! bottom-up: an object's closure is its direct children at depth 1 plus
//! each child's closure one level deeper.
//!
//! [`ingest_order`] puts a batch into an order where children come first,
//! then [`ClosureBuilder`] derives each closure from those already known.

pub mod builder;
pub mod error;
pub mod order;

pub use builder::{Closure, ClosureBuilder};
pub use error::{ClosureError, ClosureResult};
pub use order::{ingest_order, BatchNode};
