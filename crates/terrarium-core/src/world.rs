//! World state and configuration.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::{ActorArena, ActorData, ActorId};
use crate::collision::CollisionManager;
use crate::geometry::{Cell, Extent, Rect, WorldGeometry};
use crate::kind::{KindId, KindRegistry};

/// Errors raised when building or mutating world state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Summary recorded after each processed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub actor_count: usize,
}

/// Tunable world parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerrariumConfig {
    /// Width of the world in cells.
    pub world_width: i32,
    /// Height of the world in cells.
    pub world_height: i32,
    /// Edge length of one cell in pixels.
    pub cell_size: i32,
    /// Whether world edges connect to the opposite edge.
    pub wrap: bool,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
}

impl Default for TerrariumConfig {
    fn default() -> Self {
        Self {
            world_width: 100,
            world_height: 100,
            cell_size: 8,
            wrap: false,
            history_capacity: 256,
        }
    }
}

impl TerrariumConfig {
    /// Validates the configuration, returning the derived geometry.
    pub fn geometry(&self) -> Result<WorldGeometry, WorldError> {
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        WorldGeometry::new(self.world_width, self.world_height, self.cell_size, self.wrap)
    }
}

/// Aggregate world state driven by the simulation tick loop.
///
/// Single-threaded by contract: the tick scheduler owns the world and
/// serializes all access, including the act passes it runs through
/// [`WorldState::step`].
pub struct WorldState {
    config: TerrariumConfig,
    geometry: WorldGeometry,
    tick: Tick,
    actors: ActorArena,
    collision: CollisionManager,
    history: VecDeque<TickSummary>,
}

impl std::fmt::Debug for WorldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("actor_count", &self.actors.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate a new world using the supplied configuration.
    pub fn new(config: TerrariumConfig) -> Result<Self, WorldError> {
        let geometry = config.geometry()?;
        Ok(Self {
            config,
            geometry,
            tick: Tick::zero(),
            actors: ActorArena::new(),
            collision: CollisionManager::new(geometry),
            history: VecDeque::new(),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TerrariumConfig {
        &self.config
    }

    /// The validated world geometry.
    #[must_use]
    pub fn geometry(&self) -> &WorldGeometry {
        &self.geometry
    }

    /// The current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of live actors.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Borrow the actor arena.
    #[must_use]
    pub fn actors(&self) -> &ActorArena {
        &self.actors
    }

    /// Borrow the kind registry.
    #[must_use]
    pub fn kinds(&self) -> &KindRegistry {
        self.collision.registry()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &TickSummary> + '_ {
        self.history.iter()
    }

    /// Register a new actor kind, optionally below a parent kind.
    pub fn register_kind(&mut self, name: impl Into<String>, parent: Option<KindId>) -> KindId {
        self.collision.register_kind(name, parent)
    }

    /// Insert a new actor, keeping the collision view synchronized.
    ///
    /// The location is normalized (wrapped onto the torus, or clamped to
    /// the grid on bounded worlds) and rotation folded into `0..360`.
    pub fn spawn_actor(&mut self, actor: ActorData) -> ActorId {
        let actor = ActorData {
            location: self.geometry.normalize_cell(actor.location),
            rotation: actor.rotation.rem_euclid(360),
            size: Extent::new(actor.size.w.max(1), actor.size.h.max(1)),
            kind: actor.kind,
        };
        let id = self.actors.insert(actor);
        self.collision.add(id, actor);
        id
    }

    /// Remove an actor from the world and the collision view.
    pub fn remove_actor(&mut self, id: ActorId) -> Option<ActorData> {
        let removed = self.actors.remove(id)?;
        self.collision.remove(id);
        Some(removed)
    }

    /// Move an actor to a new cell, re-bucketing its collision entry.
    pub fn move_actor(&mut self, id: ActorId, location: Cell) -> bool {
        let Some(index) = self.actors.index_of(id) else {
            return false;
        };
        let location = self.geometry.normalize_cell(location);
        self.actors.columns_mut().locations_mut()[index] = location;
        self.collision.update_location(id, location)
    }

    /// Rotate an actor, re-bucketing its collision entry.
    pub fn turn_actor(&mut self, id: ActorId, rotation: i32) -> bool {
        let Some(index) = self.actors.index_of(id) else {
            return false;
        };
        let rotation = rotation.rem_euclid(360);
        self.actors.columns_mut().rotations_mut()[index] = rotation;
        self.collision.update_rotation(id, rotation)
    }

    /// Resize an actor's sprite, re-bucketing its collision entry.
    pub fn resize_actor(&mut self, id: ActorId, size: Extent) -> bool {
        let Some(index) = self.actors.index_of(id) else {
            return false;
        };
        let size = Extent::new(size.w.max(1), size.h.max(1));
        self.actors.columns_mut().sizes_mut()[index] = size;
        self.collision.update_size(id, size)
    }

    /// Return a copy of the scalar fields for `id`, if alive.
    #[must_use]
    pub fn snapshot_actor(&self, id: ActorId) -> Option<ActorData> {
        self.actors.snapshot(id)
    }

    /// Actors of `kind` (or any kind when `None`) covering cell `(x, y)`.
    pub fn objects_at(&mut self, x: i32, y: i32, kind: Option<KindId>) -> Vec<ActorId> {
        self.collision.objects_at(x, y, kind)
    }

    /// Short-circuiting variant of [`Self::objects_at`].
    pub fn one_object_at(&mut self, x: i32, y: i32, kind: Option<KindId>) -> Option<ActorId> {
        self.collision.one_object_at(x, y, kind)
    }

    /// Actors overlapping the bounds of `id`.
    pub fn intersecting(&mut self, id: ActorId, kind: Option<KindId>) -> Vec<ActorId> {
        self.collision.intersecting(id, kind)
    }

    /// Short-circuiting variant of [`Self::intersecting`].
    pub fn one_intersecting(&mut self, id: ActorId, kind: Option<KindId>) -> Option<ActorId> {
        self.collision.one_intersecting(id, kind)
    }

    /// Actors within `radius` cells of `(x, y)`, center-to-center.
    pub fn in_range(&mut self, x: i32, y: i32, radius: i32, kind: Option<KindId>) -> Vec<ActorId> {
        self.collision.in_range(x, y, radius, kind)
    }

    /// Actors in the grid neighbourhood of `id`.
    pub fn neighbours(
        &mut self,
        id: ActorId,
        distance: i32,
        diagonal: bool,
        kind: Option<KindId>,
    ) -> Vec<ActorId> {
        self.collision.neighbours(id, distance, diagonal, kind)
    }

    /// Actors along a ray from `(x, y)`.
    pub fn in_direction(
        &mut self,
        x: i32,
        y: i32,
        angle: i32,
        length: i32,
        kind: Option<KindId>,
    ) -> Vec<ActorId> {
        self.collision.in_direction(x, y, angle, length, kind)
    }

    /// Diagnostic hook: visit the collision index's leaf partitions.
    pub fn visit_partitions<F: FnMut(&Rect, usize, usize)>(&self, f: F) {
        self.collision.visit_partitions(f);
    }

    /// Run one act pass over a stable snapshot of the live handles, then
    /// advance the tick and record a summary.
    ///
    /// Actors spawned during the pass act from the next tick; actors
    /// removed mid-pass are skipped.
    pub fn step<F>(&mut self, mut act: F) -> TickSummary
    where
        F: FnMut(&mut WorldState, ActorId),
    {
        let handles: Vec<ActorId> = self.actors.iter_handles().collect();
        for id in handles {
            if self.actors.contains(id) {
                act(self, id);
            }
        }
        self.tick = self.tick.next();
        let summary = TickSummary {
            tick: self.tick,
            actor_count: self.actors.len(),
        };
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        summary
    }
}
