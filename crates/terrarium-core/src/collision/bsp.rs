//! Binary space partition index over actor bounding rectangles.
//!
//! The partition splits pixel space recursively on the longer axis of each
//! region. Actors live in leaves; an actor whose bounds span a split lives
//! in every overlapping leaf, and a per-actor leaf list makes removal and
//! re-bucketing O(leaves) rather than a tree search. Node storage is a flat
//! vector of nodes addressed by index, so the tree owns no references into
//! itself.
//!
//! A move that leaves an actor's leaf set unchanged only rewrites its
//! cached bounds; the common one-cell step therefore costs a descent plus a
//! field update, never a restructure.

use slotmap::SecondaryMap;
use smallvec::SmallVec;

use crate::actor::{ActorData, ActorId};
use crate::geometry::{Cell, Extent, Rect, WorldGeometry};
use crate::kind::{KindId, KindSet};

/// Leaves split once they hold more actors than this.
const LEAF_CAPACITY: usize = 8;

/// Regions thinner than twice this never split further.
const MIN_LEAF_SIDE: i32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

#[derive(Debug)]
enum NodeKind {
    Leaf { actors: Vec<ActorId> },
    Split { low: usize, high: usize },
}

#[derive(Debug)]
struct Node {
    region: Rect,
    kind: NodeKind,
}

/// Cached collision view of one actor.
#[derive(Debug)]
struct Entry {
    kind: KindId,
    cell: Cell,
    rotation: i32,
    size: Extent,
    fragments: SmallVec<[Rect; 4]>,
    leaves: SmallVec<[usize; 4]>,
}

/// Spatial index over all indexed actors of one world.
///
/// Construction is initialization: the geometry is fixed for the life of
/// the index and queries are valid immediately. Swapping worlds means
/// building a fresh index.
#[derive(Debug)]
pub struct CollisionIndex {
    geometry: WorldGeometry,
    nodes: Vec<Node>,
    root: usize,
    entries: SecondaryMap<ActorId, Entry>,
}

impl CollisionIndex {
    /// Create an empty index covering the given world.
    #[must_use]
    pub fn new(geometry: WorldGeometry) -> Self {
        let root_node = Node {
            region: geometry.world_rect(),
            kind: NodeKind::Leaf { actors: Vec::new() },
        };
        Self {
            geometry,
            nodes: vec![root_node],
            root: 0,
            entries: SecondaryMap::new(),
        }
    }

    /// The world geometry this index was built for.
    #[must_use]
    pub fn geometry(&self) -> &WorldGeometry {
        &self.geometry
    }

    /// Number of indexed actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no actors are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: ActorId) -> bool {
        self.entries.contains_key(id)
    }

    /// The normalized cell an indexed actor occupies.
    #[must_use]
    pub fn cell_of(&self, id: ActorId) -> Option<Cell> {
        self.entries.get(id).map(|entry| entry.cell)
    }

    /// The current bounding rectangle of an indexed actor.
    #[must_use]
    pub fn bounds_of(&self, id: ActorId) -> Option<Rect> {
        self.entries.get(id).map(|entry| {
            self.geometry
                .bounds_for(entry.cell, entry.size, entry.rotation)
        })
    }

    /// Insert an actor at its current position and bounds.
    ///
    /// A bounding box spanning several partitions lands in every
    /// overlapping leaf. Re-adding an id replaces its previous entry.
    pub fn add(&mut self, id: ActorId, actor: ActorData) {
        self.remove(id);
        let cell = self.geometry.normalize_cell(actor.location);
        let rotation = actor.rotation.rem_euclid(360);
        let fragments = self
            .geometry
            .fragments(self.geometry.bounds_for(cell, actor.size, rotation));
        let leaves = self.target_leaves(&fragments);
        for &leaf in &leaves {
            self.leaf_actors_mut(leaf).push(id);
        }
        self.entries.insert(
            id,
            Entry {
                kind: actor.kind,
                cell,
                rotation,
                size: actor.size,
                fragments,
                leaves: leaves.clone(),
            },
        );
        for leaf in leaves {
            self.maybe_split(leaf);
        }
    }

    /// Remove every index entry referencing `id`.
    pub fn remove(&mut self, id: ActorId) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        for leaf in entry.leaves {
            let actors = self.leaf_actors_mut(leaf);
            if let Some(position) = actors.iter().position(|&other| other == id) {
                actors.swap_remove(position);
            }
        }
        true
    }

    /// Re-bucket an actor after a position change.
    pub fn update_location(&mut self, id: ActorId, location: Cell) -> bool {
        let cell = self.geometry.normalize_cell(location);
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.cell = cell;
        self.refresh(id);
        true
    }

    /// Re-bucket an actor after a rotation change.
    pub fn update_rotation(&mut self, id: ActorId, rotation: i32) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.rotation = rotation.rem_euclid(360);
        self.refresh(id);
        true
    }

    /// Re-bucket an actor after a sprite size change.
    pub fn update_size(&mut self, id: ActorId, size: Extent) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.size = size;
        self.refresh(id);
        true
    }

    /// Actors whose bounds cover the center of cell `(x, y)`.
    #[must_use]
    pub fn objects_at(&self, x: i32, y: i32, filter: Option<&KindSet>) -> Vec<ActorId> {
        let Some(cell) = self.query_cell(Cell::new(x, y)) else {
            return Vec::new();
        };
        let (px, py) = self.geometry.cell_center(cell);
        self.matches(
            &[Rect::new(px, py, 1, 1)],
            filter,
            |_, entry| entry.fragments.iter().any(|f| f.contains(px, py)),
        )
    }

    /// Short-circuiting variant of [`Self::objects_at`].
    #[must_use]
    pub fn one_object_at(&self, x: i32, y: i32, filter: Option<&KindSet>) -> Option<ActorId> {
        let cell = self.query_cell(Cell::new(x, y))?;
        let (px, py) = self.geometry.cell_center(cell);
        self.first_match(
            &[Rect::new(px, py, 1, 1)],
            filter,
            |_, entry| entry.fragments.iter().any(|f| f.contains(px, py)),
        )
    }

    /// Actors whose bounds overlap the bounds of `id`, excluding `id`.
    #[must_use]
    pub fn intersecting(&self, id: ActorId, filter: Option<&KindSet>) -> Vec<ActorId> {
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let subject: SmallVec<[Rect; 4]> = entry.fragments.clone();
        self.matches(&subject, filter, |other, entry| {
            other != id && overlaps(&subject, &entry.fragments)
        })
    }

    /// Short-circuiting variant of [`Self::intersecting`].
    #[must_use]
    pub fn one_intersecting(&self, id: ActorId, filter: Option<&KindSet>) -> Option<ActorId> {
        let entry = self.entries.get(id)?;
        let subject: SmallVec<[Rect; 4]> = entry.fragments.clone();
        self.first_match(&subject, filter, |other, entry| {
            other != id && overlaps(&subject, &entry.fragments)
        })
    }

    /// Actors whose cell center lies within `radius` cells of `(x, y)`,
    /// measured center-to-center (not edge-to-edge).
    #[must_use]
    pub fn in_range(&self, x: i32, y: i32, radius: i32, filter: Option<&KindSet>) -> Vec<ActorId> {
        if radius < 0 {
            return Vec::new();
        }
        let Some(cell) = self.query_cell(Cell::new(x, y)) else {
            return Vec::new();
        };
        let (px, py) = self.geometry.cell_center(cell);
        let limit = {
            let r = f64::from(radius) * f64::from(self.geometry.cell_size());
            r * r
        };
        // A radius beyond the world size covers every cell already; keep
        // the search window inside arithmetic range.
        let span = radius.min(self.geometry.width() + self.geometry.height());
        let window_r = span * self.geometry.cell_size();
        let window = Rect::new(px - window_r, py - window_r, 2 * window_r + 1, 2 * window_r + 1);
        let windows = self.geometry.fragments(window);
        self.matches(&windows, filter, |_, entry| {
            self.geometry.center_distance_sq(cell, entry.cell) <= limit
        })
    }

    /// Actors occupying the grid neighbourhood of `id`: cells within
    /// `distance` of its cell, excluding the cell itself. `diagonal`
    /// selects the Chebyshev disc; without it the Manhattan disc.
    #[must_use]
    pub fn neighbours(
        &self,
        id: ActorId,
        distance: i32,
        diagonal: bool,
        filter: Option<&KindSet>,
    ) -> Vec<ActorId> {
        if distance <= 0 {
            return Vec::new();
        }
        let Some(entry) = self.entries.get(id) else {
            return Vec::new();
        };
        let origin = entry.cell;
        let cs = self.geometry.cell_size();
        let span = distance.min(self.geometry.width() + self.geometry.height());
        let window = Rect::new(
            (origin.x - span) * cs,
            (origin.y - span) * cs,
            (2 * span + 1) * cs,
            (2 * span + 1) * cs,
        );
        let windows = self.geometry.fragments(window);
        self.matches(&windows, filter, |other, entry| {
            if other == id {
                return false;
            }
            let (dx, dy) = self.geometry.cell_delta(origin, entry.cell);
            if dx == 0 && dy == 0 {
                return false;
            }
            if diagonal {
                dx.abs().max(dy.abs()) <= distance
            } else {
                dx.abs() + dy.abs() <= distance
            }
        })
    }

    /// Actors covering any cell along a ray from `(x, y)` at `angle`
    /// degrees (clockwise from the positive x axis, y growing downward)
    /// for up to `length` cells starting at the origin cell.
    #[must_use]
    pub fn in_direction(
        &self,
        x: i32,
        y: i32,
        angle: i32,
        length: i32,
        filter: Option<&KindSet>,
    ) -> Vec<ActorId> {
        let (sin, cos) = f64::from(angle.rem_euclid(360)).to_radians().sin_cos();
        let mut out = Vec::new();
        let mut previous: Option<Cell> = None;
        for step in 0..length.max(0) {
            let cx = x + (cos * f64::from(step)).round() as i32;
            let cy = y + (sin * f64::from(step)).round() as i32;
            let Some(cell) = self.query_cell(Cell::new(cx, cy)) else {
                continue;
            };
            if previous == Some(cell) {
                continue;
            }
            previous = Some(cell);
            out.extend(self.objects_at(cell.x, cell.y, filter));
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Visit every leaf partition with its depth and actor count.
    ///
    /// Diagnostic hook for rendering the internal structure; not used on
    /// the query path.
    pub fn visit_partitions<F: FnMut(&Rect, usize, usize)>(&self, mut f: F) {
        self.visit_node(self.root, 0, &mut f);
    }

    fn visit_node<F: FnMut(&Rect, usize, usize)>(&self, node: usize, depth: usize, f: &mut F) {
        match &self.nodes[node].kind {
            NodeKind::Leaf { actors } => f(&self.nodes[node].region, depth, actors.len()),
            NodeKind::Split { low, high } => {
                self.visit_node(*low, depth + 1, f);
                self.visit_node(*high, depth + 1, f);
            }
        }
    }

    /// Resolve a query cell: wrapped worlds fold onto the torus, bounded
    /// worlds reject coordinates outside the grid.
    fn query_cell(&self, cell: Cell) -> Option<Cell> {
        if self.geometry.wrap() {
            Some(self.geometry.normalize_cell(cell))
        } else if cell.x >= 0
            && cell.x < self.geometry.width()
            && cell.y >= 0
            && cell.y < self.geometry.height()
        {
            Some(cell)
        } else {
            None
        }
    }

    fn leaf_actors_mut(&mut self, leaf: usize) -> &mut Vec<ActorId> {
        match &mut self.nodes[leaf].kind {
            NodeKind::Leaf { actors } => actors,
            NodeKind::Split { .. } => unreachable!("leaf list points at a split node"),
        }
    }

    /// Leaves overlapping any of the given rectangles, clamped to the
    /// world area, sorted and deduplicated.
    fn target_leaves(&self, windows: &[Rect]) -> SmallVec<[usize; 4]> {
        let world = self.geometry.world_rect();
        let mut leaves = SmallVec::new();
        for window in windows {
            if let Some(clamped) = window.intersection(&world) {
                self.collect_leaves(self.root, &clamped, &mut leaves);
            }
        }
        leaves.sort_unstable();
        leaves.dedup();
        leaves
    }

    fn collect_leaves(&self, node: usize, window: &Rect, out: &mut SmallVec<[usize; 4]>) {
        let current = &self.nodes[node];
        if !current.region.intersects(window) {
            return;
        }
        match &current.kind {
            NodeKind::Leaf { .. } => out.push(node),
            NodeKind::Split { low, high } => {
                self.collect_leaves(*low, window, out);
                self.collect_leaves(*high, window, out);
            }
        }
    }

    /// Recompute an actor's fragments from its entry fields and move it
    /// between leaves if its footprint changed partitions.
    fn refresh(&mut self, id: ActorId) {
        let (cell, size, rotation, current) = {
            let entry = &self.entries[id];
            (entry.cell, entry.size, entry.rotation, entry.leaves.clone())
        };
        let fragments = self
            .geometry
            .fragments(self.geometry.bounds_for(cell, size, rotation));
        let target = self.target_leaves(&fragments);

        if target == current {
            self.entries[id].fragments = fragments;
            return;
        }

        for &leaf in &current {
            if !target.contains(&leaf) {
                let actors = self.leaf_actors_mut(leaf);
                if let Some(position) = actors.iter().position(|&other| other == id) {
                    actors.swap_remove(position);
                }
            }
        }
        let added: SmallVec<[usize; 4]> = target
            .iter()
            .copied()
            .filter(|leaf| !current.contains(leaf))
            .collect();
        for &leaf in &added {
            self.leaf_actors_mut(leaf).push(id);
        }
        {
            let entry = &mut self.entries[id];
            entry.fragments = fragments;
            entry.leaves = target;
        }
        for leaf in added {
            self.maybe_split(leaf);
        }
    }

    /// Split an over-full leaf on the longer axis of its region and
    /// redistribute its actors, recursing while children stay over-full.
    fn maybe_split(&mut self, node: usize) {
        let (region, count) = match &self.nodes[node].kind {
            NodeKind::Leaf { actors } => (self.nodes[node].region, actors.len()),
            NodeKind::Split { .. } => return,
        };
        if count <= LEAF_CAPACITY || region.w.max(region.h) < MIN_LEAF_SIDE * 2 {
            return;
        }
        let axis = if region.w >= region.h { Axis::X } else { Axis::Y };
        let (low_region, high_region) = match axis {
            Axis::X => {
                let at = region.x + region.w / 2;
                (
                    Rect::new(region.x, region.y, at - region.x, region.h),
                    Rect::new(at, region.y, region.right() - at, region.h),
                )
            }
            Axis::Y => {
                let at = region.y + region.h / 2;
                (
                    Rect::new(region.x, region.y, region.w, at - region.y),
                    Rect::new(region.x, at, region.w, region.bottom() - at),
                )
            }
        };
        let members = match &mut self.nodes[node].kind {
            NodeKind::Leaf { actors } => std::mem::take(actors),
            NodeKind::Split { .. } => unreachable!(),
        };
        let low = self.alloc_leaf(low_region);
        let high = self.alloc_leaf(high_region);
        self.nodes[node].kind = NodeKind::Split { low, high };

        let world = self.geometry.world_rect();
        for id in members {
            let windows: SmallVec<[Rect; 4]> = self.entries[id]
                .fragments
                .iter()
                .filter_map(|f| f.intersection(&world))
                .filter_map(|f| f.intersection(&region))
                .collect();
            let into_low = windows.iter().any(|w| w.intersects(&low_region));
            let into_high = windows.iter().any(|w| w.intersects(&high_region));
            debug_assert!(into_low || into_high, "actor lost during leaf split");

            let entry = &mut self.entries[id];
            if let Some(position) = entry.leaves.iter().position(|&leaf| leaf == node) {
                entry.leaves.swap_remove(position);
            }
            if into_low {
                entry.leaves.push(low);
            }
            if into_high {
                entry.leaves.push(high);
            }
            entry.leaves.sort_unstable();
            if into_low {
                self.leaf_actors_mut(low).push(id);
            }
            if into_high {
                self.leaf_actors_mut(high).push(id);
            }
        }
        self.maybe_split(low);
        self.maybe_split(high);
    }

    fn alloc_leaf(&mut self, region: Rect) -> usize {
        self.nodes.push(Node {
            region,
            kind: NodeKind::Leaf { actors: Vec::new() },
        });
        self.nodes.len() - 1
    }

    fn matches<F>(&self, windows: &[Rect], filter: Option<&KindSet>, pred: F) -> Vec<ActorId>
    where
        F: Fn(ActorId, &Entry) -> bool,
    {
        let leaves = self.target_leaves(windows);
        let mut out = Vec::new();
        for &leaf in &leaves {
            let NodeKind::Leaf { actors } = &self.nodes[leaf].kind else {
                continue;
            };
            for &id in actors {
                let entry = &self.entries[id];
                if kind_allowed(filter, entry.kind) && pred(id, entry) {
                    out.push(id);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn first_match<F>(&self, windows: &[Rect], filter: Option<&KindSet>, pred: F) -> Option<ActorId>
    where
        F: Fn(ActorId, &Entry) -> bool,
    {
        let leaves = self.target_leaves(windows);
        let mut seen: SmallVec<[ActorId; 16]> = SmallVec::new();
        for &leaf in &leaves {
            let NodeKind::Leaf { actors } = &self.nodes[leaf].kind else {
                continue;
            };
            for &id in actors {
                if seen.contains(&id) {
                    continue;
                }
                seen.push(id);
                let entry = &self.entries[id];
                if kind_allowed(filter, entry.kind) && pred(id, entry) {
                    return Some(id);
                }
            }
        }
        None
    }
}

fn kind_allowed(filter: Option<&KindSet>, kind: KindId) -> bool {
    filter.is_none_or(|set| set.contains(&kind))
}

fn overlaps(a: &[Rect], b: &[Rect]) -> bool {
    a.iter().any(|ra| b.iter().any(|rb| ra.intersects(rb)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::KindRegistry;

    struct Fixture {
        index: CollisionIndex,
        kinds: KindRegistry,
        bug: KindId,
        rock: KindId,
    }

    fn fixture(width: i32, height: i32, cell: i32, wrap: bool) -> Fixture {
        let geometry = WorldGeometry::new(width, height, cell, wrap).expect("geometry");
        let mut kinds = KindRegistry::new();
        let bug = kinds.register("bug", None);
        let rock = kinds.register("rock", None);
        Fixture {
            index: CollisionIndex::new(geometry),
            kinds,
            bug,
            rock,
        }
    }

    fn fresh_id(counter: &mut slotmap::SlotMap<ActorId, ()>) -> ActorId {
        counter.insert(())
    }

    fn actor(cell: Cell, size: Extent, kind: KindId) -> ActorData {
        ActorData::new(cell, 0, size, kind)
    }

    #[test]
    fn empty_index_answers_everything_with_nothing() {
        let f = fixture(10, 10, 10, false);
        assert!(f.index.objects_at(3, 3, None).is_empty());
        assert!(f.index.in_range(5, 5, 3, None).is_empty());
        assert!(f.index.one_object_at(0, 0, None).is_none());
        assert!(f.index.in_direction(0, 0, 45, 10, None).is_empty());
    }

    #[test]
    fn add_then_remove_leaves_no_trace() {
        let mut f = fixture(10, 10, 10, false);
        let mut ids = slotmap::SlotMap::with_key();
        let a = fresh_id(&mut ids);
        f.index.add(a, actor(Cell::new(4, 4), Extent::new(10, 10), f.bug));
        assert_eq!(f.index.objects_at(4, 4, None), vec![a]);
        assert!(f.index.remove(a));
        assert!(f.index.objects_at(4, 4, None).is_empty());
        assert!(f.index.in_range(4, 4, 5, None).is_empty());
        assert!(!f.index.remove(a));
    }

    #[test]
    fn kind_filter_selects_and_none_unions() {
        let mut f = fixture(10, 10, 10, false);
        let mut ids = slotmap::SlotMap::with_key();
        let a = fresh_id(&mut ids);
        let b = fresh_id(&mut ids);
        f.index.add(a, actor(Cell::new(2, 2), Extent::new(10, 10), f.bug));
        f.index.add(b, actor(Cell::new(2, 2), Extent::new(10, 10), f.rock));

        let bugs: KindSet = [f.bug].into_iter().collect();
        assert_eq!(f.index.objects_at(2, 2, Some(&bugs)), vec![a]);
        let mut all = f.index.objects_at(2, 2, None);
        all.sort_unstable();
        let mut expected = vec![a, b];
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn even_sized_sprite_spans_two_cells() {
        let mut f = fixture(10, 10, 10, false);
        let mut ids = slotmap::SlotMap::with_key();
        let a = fresh_id(&mut ids);
        // 20px wide at cell 5: pixels 45..64, covering cell centers 45 and 55.
        f.index.add(a, actor(Cell::new(5, 5), Extent::new(20, 10), f.bug));
        assert_eq!(f.index.objects_at(4, 5, None), vec![a]);
        assert_eq!(f.index.objects_at(5, 5, None), vec![a]);
        assert!(f.index.objects_at(3, 5, None).is_empty());
        assert!(f.index.objects_at(6, 5, None).is_empty());
    }

    #[test]
    fn odd_sized_sprite_spans_adjacent_cells() {
        let mut f = fixture(10, 10, 10, false);
        let mut ids = slotmap::SlotMap::with_key();
        let a = fresh_id(&mut ids);
        // 21px wide at cell 5: pixels 45..66, covering centers 45, 55, 65.
        f.index.add(a, actor(Cell::new(5, 5), Extent::new(21, 11), f.bug));
        assert_eq!(f.index.objects_at(4, 5, None), vec![a]);
        assert_eq!(f.index.objects_at(5, 5, None), vec![a]);
        assert_eq!(f.index.objects_at(6, 5, None), vec![a]);
        assert!(f.index.objects_at(7, 5, None).is_empty());
    }

    #[test]
    fn rotation_moves_the_covered_cells() {
        let mut f = fixture(100, 100, 1, false);
        let mut ids = slotmap::SlotMap::with_key();
        let a = fresh_id(&mut ids);
        f.index.add(a, actor(Cell::new(50, 50), Extent::new(40, 20), f.bug));

        // Unrotated: cells (30,40)-(69,59).
        assert_eq!(f.index.objects_at(42, 50, None), vec![a]);
        assert!(f.index.objects_at(42, 32, None).is_empty());

        // Rotated a quarter turn: cells (40,30)-(59,69).
        assert!(f.index.update_rotation(a, 90));
        assert_eq!(f.index.objects_at(42, 32, None), vec![a]);
        assert!(f.index.objects_at(32, 50, None).is_empty());
    }

    #[test]
    fn range_wraps_around_the_torus() {
        let mut f = fixture(10, 10, 10, true);
        let mut ids = slotmap::SlotMap::with_key();
        let near = fresh_id(&mut ids);
        let far = fresh_id(&mut ids);
        f.index
            .add(near, actor(Cell::new(0, 2), Extent::new(10, 10), f.bug));
        f.index
            .add(far, actor(Cell::new(8, 2), Extent::new(10, 10), f.bug));

        // Across the seam the distance is 2 cells, not 8.
        assert!(f.index.in_range(0, 2, 2, None).contains(&far));
        assert!(f.index.in_range(8, 2, 2, None).contains(&near));
        assert!(!f.index.in_range(0, 2, 1, None).contains(&far));
    }

    #[test]
    fn range_does_not_wrap_on_bounded_worlds() {
        let mut f = fixture(10, 10, 10, false);
        let mut ids = slotmap::SlotMap::with_key();
        let far = fresh_id(&mut ids);
        f.index
            .add(far, actor(Cell::new(8, 2), Extent::new(10, 10), f.bug));
        assert!(!f.index.in_range(0, 2, 2, None).contains(&far));
        assert!(f.index.in_range(0, 2, 8, None).contains(&far));
    }

    #[test]
    fn neighbours_respect_diagonal_flag_and_wrap() {
        let mut f = fixture(10, 10, 10, true);
        let mut ids = slotmap::SlotMap::with_key();
        let subject = fresh_id(&mut ids);
        let corner = fresh_id(&mut ids);
        let side = fresh_id(&mut ids);
        let same_cell = fresh_id(&mut ids);
        f.index
            .add(subject, actor(Cell::new(0, 0), Extent::new(10, 10), f.bug));
        f.index
            .add(corner, actor(Cell::new(9, 9), Extent::new(10, 10), f.bug));
        f.index
            .add(side, actor(Cell::new(9, 0), Extent::new(10, 10), f.bug));
        f.index
            .add(same_cell, actor(Cell::new(0, 0), Extent::new(10, 10), f.bug));

        let diagonal = f.index.neighbours(subject, 1, true, None);
        assert!(diagonal.contains(&corner));
        assert!(diagonal.contains(&side));
        assert!(!diagonal.contains(&subject));
        assert!(!diagonal.contains(&same_cell), "own cell is not a neighbour");

        let orthogonal = f.index.neighbours(subject, 1, false, None);
        assert!(orthogonal.contains(&side));
        assert!(!orthogonal.contains(&corner));
    }

    #[test]
    fn intersection_uses_rotated_bounds_and_excludes_self() {
        let mut f = fixture(100, 100, 1, false);
        let mut ids = slotmap::SlotMap::with_key();
        let wide = fresh_id(&mut ids);
        let other = fresh_id(&mut ids);
        f.index
            .add(wide, actor(Cell::new(50, 50), Extent::new(40, 4), f.bug));
        // Sits beside the wide actor's unrotated footprint, above its
        // rotated one.
        f.index
            .add(other, actor(Cell::new(50, 40), Extent::new(4, 4), f.bug));

        assert!(f.index.intersecting(wide, None).is_empty());
        assert!(f.index.update_rotation(wide, 90));
        assert_eq!(f.index.intersecting(wide, None), vec![other]);
        assert_eq!(f.index.one_intersecting(wide, None), Some(other));
        assert!(!f.index.intersecting(wide, None).contains(&wide));
    }

    #[test]
    fn directional_ray_walks_cells_and_wraps() {
        let mut f = fixture(10, 10, 10, true);
        let mut ids = slotmap::SlotMap::with_key();
        let ahead = fresh_id(&mut ids);
        let behind = fresh_id(&mut ids);
        let wrapped = fresh_id(&mut ids);
        f.index
            .add(ahead, actor(Cell::new(4, 2), Extent::new(10, 10), f.bug));
        f.index
            .add(behind, actor(Cell::new(2, 6), Extent::new(10, 10), f.bug));
        f.index
            .add(wrapped, actor(Cell::new(1, 2), Extent::new(10, 10), f.bug));

        let east = f.index.in_direction(2, 2, 0, 5, None);
        assert!(east.contains(&ahead));
        assert!(!east.contains(&behind));

        let south = f.index.in_direction(2, 2, 90, 5, None);
        assert!(south.contains(&behind));

        let across_seam = f.index.in_direction(8, 2, 0, 4, None);
        assert!(across_seam.contains(&wrapped));
    }

    #[test]
    fn dense_population_splits_and_stays_consistent() {
        let mut f = fixture(64, 64, 8, false);
        let mut ids = slotmap::SlotMap::with_key();
        let mut handles = Vec::new();
        for i in 0..200 {
            let id = fresh_id(&mut ids);
            let cell = Cell::new(i % 64, (i * 7) % 64);
            f.index.add(id, actor(cell, Extent::new(8, 8), f.bug));
            handles.push((id, cell));
        }

        let mut leaves = 0;
        f.index.visit_partitions(|_, _, _| leaves += 1);
        assert!(leaves > 1, "200 actors should force at least one split");

        for (id, cell) in &handles {
            assert!(
                f.index.objects_at(cell.x, cell.y, None).contains(id),
                "actor at {cell:?} lost after splits"
            );
        }
    }

    #[test]
    fn repeated_moves_keep_the_index_exact() {
        let mut f = fixture(32, 32, 8, true);
        let mut ids = slotmap::SlotMap::with_key();
        let roamer = fresh_id(&mut ids);
        f.index
            .add(roamer, actor(Cell::new(0, 0), Extent::new(8, 8), f.bug));
        for step in 1..200 {
            let cell = Cell::new(step % 32, (step * 3) % 32);
            assert!(f.index.update_location(roamer, cell));
            assert_eq!(f.index.objects_at(cell.x, cell.y, None), vec![roamer]);
            assert_eq!(f.index.cell_of(roamer), Some(cell));
        }
        // Registry is only here to keep kinds alive for the fixture.
        assert_eq!(f.kinds.len(), 2);
    }
}
