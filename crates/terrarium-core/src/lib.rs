//! Core types shared across the Terrarium workspace.
//!
//! The simulation side of Terrarium is a grid world populated by actors.
//! This crate owns the world model (geometry, configuration, the actor
//! arena) and the collision subsystem that answers spatial queries over the
//! live actor set every tick: a binary-space-partition index plus a manager
//! that defers indexing of actor kinds until a query first names them.
//!
//! Everything here is single-threaded by contract: the tick scheduler calls
//! into the world synchronously and must serialize access across actor act
//! passes. The inter-process channel that drives the tick loop lives in
//! `terrarium-comms`.

pub mod actor;
pub mod collision;
pub mod geometry;
pub mod kind;
pub mod world;

pub use actor::{ActorArena, ActorData, ActorId, ActorMap};
pub use collision::{CollisionIndex, CollisionManager};
pub use geometry::{Cell, Extent, Rect, WorldGeometry};
pub use kind::{KindId, KindRegistry, KindSet};
pub use world::{TerrariumConfig, Tick, TickSummary, WorldError, WorldState};
