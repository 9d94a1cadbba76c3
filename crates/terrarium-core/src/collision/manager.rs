//! Deferred kind activation in front of the collision index.
//!
//! Indexing a kind has a real upfront cost and most scenarios only ever
//! query a handful of kinds, so actors start out on a per-kind free list
//! and migrate into the [`CollisionIndex`] the first time a query names
//! their kind. An actor is in exactly one of {index, its kind's free list}
//! at all times; removal from the world is the only way out of both.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::actor::{ActorData, ActorId, ActorMap};
use crate::collision::CollisionIndex;
use crate::geometry::{Cell, Extent, Rect, WorldGeometry};
use crate::kind::{KindId, KindRegistry, KindSet};

/// Façade over the collision index that activates actor kinds lazily.
#[derive(Debug)]
pub struct CollisionManager {
    index: CollisionIndex,
    registry: KindRegistry,
    free: HashMap<KindId, Vec<ActorId>>,
    free_data: ActorMap<ActorData>,
    activated: HashSet<KindId>,
}

impl CollisionManager {
    /// Create a manager with an empty index over the given world.
    #[must_use]
    pub fn new(geometry: WorldGeometry) -> Self {
        Self {
            index: CollisionIndex::new(geometry),
            registry: KindRegistry::new(),
            free: HashMap::new(),
            free_data: ActorMap::new(),
            activated: HashSet::new(),
        }
    }

    /// The world geometry the index was built for.
    #[must_use]
    pub fn geometry(&self) -> &WorldGeometry {
        self.index.geometry()
    }

    /// Borrow the kind registry.
    #[must_use]
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Register a new actor kind, optionally below a parent kind.
    pub fn register_kind(&mut self, name: impl Into<String>, parent: Option<KindId>) -> KindId {
        self.registry.register(name, parent)
    }

    /// Whether a kind has been migrated into the index.
    #[must_use]
    pub fn is_activated(&self, kind: KindId) -> bool {
        self.activated.contains(&kind)
    }

    /// Number of actors still waiting on free lists.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_data.len()
    }

    /// Number of actors tracked in total, free or indexed.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.free_data.len() + self.index.len()
    }

    /// Track a new actor: indexed immediately when its kind is already
    /// activated, parked on the kind's free list otherwise.
    pub fn add(&mut self, id: ActorId, actor: ActorData) {
        if self.activated.contains(&actor.kind) {
            self.index.add(id, actor);
        } else {
            self.free.entry(actor.kind).or_default().push(id);
            self.free_data.insert(id, actor);
        }
    }

    /// Stop tracking an actor, wherever it currently lives.
    pub fn remove(&mut self, id: ActorId) -> bool {
        if let Some(actor) = self.free_data.remove(id) {
            if let Some(list) = self.free.get_mut(&actor.kind) {
                if let Some(position) = list.iter().position(|&other| other == id) {
                    list.swap_remove(position);
                }
            }
            true
        } else {
            self.index.remove(id)
        }
    }

    /// Record a position change. Free actors just update their parked
    /// snapshot; indexed actors re-bucket.
    pub fn update_location(&mut self, id: ActorId, location: Cell) -> bool {
        if let Some(actor) = self.free_data.get_mut(id) {
            actor.location = location;
            true
        } else {
            self.index.update_location(id, location)
        }
    }

    /// Record a rotation change.
    pub fn update_rotation(&mut self, id: ActorId, rotation: i32) -> bool {
        if let Some(actor) = self.free_data.get_mut(id) {
            actor.rotation = rotation.rem_euclid(360);
            true
        } else {
            self.index.update_rotation(id, rotation)
        }
    }

    /// Record a sprite size change.
    pub fn update_size(&mut self, id: ActorId, size: Extent) -> bool {
        if let Some(actor) = self.free_data.get_mut(id) {
            actor.size = size;
            true
        } else {
            self.index.update_size(id, size)
        }
    }

    /// Migrate every free actor of `kind` (and of kinds descended from it
    /// when `include_subkinds`) into the index. `None` migrates everything
    /// still free. Activating an already-activated kind is a no-op.
    pub fn activate(&mut self, kind: Option<KindId>, include_subkinds: bool) {
        match kind {
            None => {
                let all: Vec<KindId> = self.registry.iter().collect();
                for kind in all {
                    self.activate_one(kind);
                }
            }
            Some(kind) if include_subkinds => {
                let targets = self.registry.assignable_set(kind);
                for &target in targets.iter() {
                    self.activate_one(target);
                }
            }
            Some(kind) => self.activate_one(kind),
        }
    }

    fn activate_one(&mut self, kind: KindId) {
        if !self.activated.insert(kind) {
            return;
        }
        let Some(waiting) = self.free.remove(&kind) else {
            return;
        };
        for id in waiting {
            if let Some(actor) = self.free_data.remove(id) {
                self.index.add(id, actor);
            }
        }
    }

    /// Actors of `kind` (or any kind when `None`) whose bounds cover the
    /// center of cell `(x, y)`.
    pub fn objects_at(&mut self, x: i32, y: i32, kind: Option<KindId>) -> Vec<ActorId> {
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.objects_at(x, y, filter.as_deref())
    }

    /// Short-circuiting variant of [`Self::objects_at`].
    pub fn one_object_at(&mut self, x: i32, y: i32, kind: Option<KindId>) -> Option<ActorId> {
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.one_object_at(x, y, filter.as_deref())
    }

    /// Actors overlapping the bounds of `id`, excluding `id` itself.
    pub fn intersecting(&mut self, id: ActorId, kind: Option<KindId>) -> Vec<ActorId> {
        self.prepare_subject(id);
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.intersecting(id, filter.as_deref())
    }

    /// Short-circuiting variant of [`Self::intersecting`].
    pub fn one_intersecting(&mut self, id: ActorId, kind: Option<KindId>) -> Option<ActorId> {
        self.prepare_subject(id);
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.one_intersecting(id, filter.as_deref())
    }

    /// Actors whose cell center lies within `radius` cells of `(x, y)`.
    pub fn in_range(&mut self, x: i32, y: i32, radius: i32, kind: Option<KindId>) -> Vec<ActorId> {
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.in_range(x, y, radius, filter.as_deref())
    }

    /// Actors in the grid neighbourhood of `id`.
    pub fn neighbours(
        &mut self,
        id: ActorId,
        distance: i32,
        diagonal: bool,
        kind: Option<KindId>,
    ) -> Vec<ActorId> {
        self.prepare_subject(id);
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.neighbours(id, distance, diagonal, filter.as_deref())
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
        self.activate(kind, true);
        let filter = self.resolve_filter(kind);
        self.index.in_direction(x, y, angle, length, filter.as_deref())
    }

    /// Diagnostic hook: visit the index's leaf partitions.
    pub fn visit_partitions<F: FnMut(&Rect, usize, usize)>(&self, f: F) {
        self.index.visit_partitions(f);
    }

    /// A query about a specific actor needs that actor in the index even
    /// when the query's target kind differs; activating its exact kind
    /// drains that kind's free list.
    fn prepare_subject(&mut self, id: ActorId) {
        if let Some(actor) = self.free_data.get(id) {
            let kind = actor.kind;
            self.activate(Some(kind), false);
        }
    }

    fn resolve_filter(&mut self, kind: Option<KindId>) -> Option<Arc<KindSet>> {
        kind.map(|kind| self.registry.assignable_set(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    struct Fixture {
        manager: CollisionManager,
        ids: SlotMap<ActorId, ()>,
        creature: KindId,
        bug: KindId,
        rock: KindId,
    }

    fn fixture() -> Fixture {
        let geometry = WorldGeometry::new(20, 20, 10, false).expect("geometry");
        let mut manager = CollisionManager::new(geometry);
        let creature = manager.register_kind("creature", None);
        let bug = manager.register_kind("bug", Some(creature));
        let rock = manager.register_kind("rock", None);
        Fixture {
            manager,
            ids: SlotMap::with_key(),
            creature,
            bug,
            rock,
        }
    }

    fn spawn(f: &mut Fixture, cell: Cell, kind: KindId) -> ActorId {
        let id = f.ids.insert(());
        f.manager
            .add(id, ActorData::new(cell, 0, Extent::new(10, 10), kind));
        id
    }

    #[test]
    fn actors_start_free_and_activate_on_first_query() {
        let mut f = fixture();
        let (bug_kind, rock_kind) = (f.bug, f.rock);
        let bug = spawn(&mut f, Cell::new(3, 3), bug_kind);
        let rock = spawn(&mut f, Cell::new(5, 5), rock_kind);
        assert_eq!(f.manager.free_count(), 2);
        assert!(!f.manager.is_activated(f.bug));

        let found = f.manager.objects_at(3, 3, Some(f.bug));
        assert_eq!(found, vec![bug]);
        assert!(f.manager.is_activated(f.bug));
        assert_eq!(f.manager.free_count(), 1, "rock stays on its free list");
        assert!(!f.manager.is_activated(f.rock));

        let rocks = f.manager.objects_at(5, 5, Some(f.rock));
        assert_eq!(rocks, vec![rock]);
        assert_eq!(f.manager.free_count(), 0);
    }

    #[test]
    fn activation_is_idempotent() {
        let mut f = fixture();
        let (bug_kind, rock_kind) = (f.bug, f.rock);
        spawn(&mut f, Cell::new(3, 3), bug_kind);
        spawn(&mut f, Cell::new(7, 7), rock_kind);

        f.manager.activate(Some(f.creature), true);
        let activated_once: Vec<bool> = [f.creature, f.bug, f.rock]
            .iter()
            .map(|&k| f.manager.is_activated(k))
            .collect();
        let free_once = f.manager.free_count();

        f.manager.activate(Some(f.creature), true);
        let activated_twice: Vec<bool> = [f.creature, f.bug, f.rock]
            .iter()
            .map(|&k| f.manager.is_activated(k))
            .collect();
        assert_eq!(activated_once, activated_twice);
        assert_eq!(free_once, f.manager.free_count());
        assert_eq!(activated_once, vec![true, true, false]);
    }

    #[test]
    fn subkind_activation_follows_the_hierarchy() {
        let mut f = fixture();
        let bug_kind = f.bug;
        let bug = spawn(&mut f, Cell::new(3, 3), bug_kind);

        // Querying the parent kind must surface free subkind actors.
        let found = f.manager.objects_at(3, 3, Some(f.creature));
        assert_eq!(found, vec![bug]);
        assert!(f.manager.is_activated(f.bug));

        // And the filter accepts the subkind under the parent query.
        let in_range = f.manager.in_range(3, 3, 1, Some(f.creature));
        assert_eq!(in_range, vec![bug]);
    }

    #[test]
    fn none_kind_activates_everything() {
        let mut f = fixture();
        let (bug_kind, rock_kind) = (f.bug, f.rock);
        let bug = spawn(&mut f, Cell::new(2, 2), bug_kind);
        let rock = spawn(&mut f, Cell::new(2, 2), rock_kind);

        let mut found = f.manager.objects_at(2, 2, None);
        found.sort_unstable();
        let mut expected = vec![bug, rock];
        expected.sort_unstable();
        assert_eq!(found, expected);
        assert_eq!(f.manager.free_count(), 0);
    }

    #[test]
    fn free_actors_keep_their_snapshot_current() {
        let mut f = fixture();
        let bug_kind = f.bug;
        let bug = spawn(&mut f, Cell::new(1, 1), bug_kind);
        // Updates before activation must not be lost.
        assert!(f.manager.update_location(bug, Cell::new(9, 9)));
        assert!(f.manager.update_rotation(bug, 90));

        assert!(f.manager.objects_at(1, 1, Some(f.bug)).is_empty());
        assert_eq!(f.manager.objects_at(9, 9, Some(f.bug)), vec![bug]);
    }

    #[test]
    fn removal_works_from_both_homes() {
        let mut f = fixture();
        let (bug_kind, rock_kind) = (f.bug, f.rock);
        let free = spawn(&mut f, Cell::new(1, 1), bug_kind);
        let indexed = spawn(&mut f, Cell::new(2, 2), rock_kind);
        f.manager.activate(Some(f.rock), false);

        assert!(f.manager.remove(free));
        assert!(f.manager.remove(indexed));
        assert!(!f.manager.remove(free));
        assert_eq!(f.manager.actor_count(), 0);
        assert!(f.manager.objects_at(1, 1, None).is_empty());
        assert!(f.manager.objects_at(2, 2, None).is_empty());
    }

    #[test]
    fn subject_queries_index_the_subject_kind() {
        let mut f = fixture();
        let bug_kind = f.bug;
        let a = spawn(&mut f, Cell::new(4, 4), bug_kind);
        let b = spawn(&mut f, Cell::new(4, 4), bug_kind);

        // Neither kind is activated yet; an intersection query about `a`
        // must still see `b`.
        assert_eq!(f.manager.intersecting(a, Some(f.bug)), vec![b]);
        assert_eq!(f.manager.one_intersecting(a, None), Some(b));
    }

    #[test]
    fn unknown_targets_yield_empty_results() {
        let mut f = fixture();
        let ghost = f.ids.insert(());
        assert!(f.manager.intersecting(ghost, None).is_empty());
        assert!(f.manager.neighbours(ghost, 2, true, None).is_empty());
        assert!(f.manager.one_intersecting(ghost, Some(f.bug)).is_none());
    }
}
