//! Collision detection subsystem.
//!
//! [`CollisionIndex`] is a binary-space-partition index over actor bounding
//! rectangles, answering point, intersection, range, neighbourhood, and
//! directional queries with rotation and torus wrap support.
//! [`CollisionManager`] sits in front of it and defers indexing of each
//! actor kind until a query first names that kind, so scenarios that never
//! ask about a kind never pay for indexing it.
//!
//! Both types assume single-threaded access; the tick scheduler serializes
//! all calls.

mod bsp;
mod manager;

pub use bsp::CollisionIndex;
pub use manager::CollisionManager;
