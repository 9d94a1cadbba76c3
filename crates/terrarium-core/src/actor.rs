//! Dense actor storage with generational handles.
//!
//! Actors live in a slot-map-backed arena: stable [`ActorId`] handles map
//! to dense column storage for the hot per-tick scans. The collision
//! subsystem and free lists hold only handles, never owning references.

use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::geometry::{Cell, Extent};
use crate::kind::KindId;

new_key_type! {
    /// Stable handle for actors backed by a generational slot map.
    pub struct ActorId;
}

/// Convenience alias for associating side data with actors.
pub type ActorMap<T> = SecondaryMap<ActorId, T>;

/// Collision-relevant scalar fields of a single actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorData {
    /// Grid cell the actor occupies.
    pub location: Cell,
    /// Rotation in degrees, normalized to `0..360`.
    pub rotation: i32,
    /// Sprite extent in pixels.
    pub size: Extent,
    /// Registered kind of the actor.
    pub kind: KindId,
}

impl ActorData {
    /// Creates a new actor payload.
    #[must_use]
    pub const fn new(location: Cell, rotation: i32, size: Extent, kind: KindId) -> Self {
        Self {
            location,
            rotation,
            size,
            kind,
        }
    }
}

/// Per-actor columns for hot-path iteration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ActorColumns {
    locations: Vec<Cell>,
    rotations: Vec<i32>,
    sizes: Vec<Extent>,
    kinds: Vec<KindId>,
}

impl ActorColumns {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Returns true if there are no active rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a new row onto each column.
    pub fn push(&mut self, actor: ActorData) {
        self.locations.push(actor.location);
        self.rotations.push(actor.rotation);
        self.sizes.push(actor.size);
        self.kinds.push(actor.kind);
        self.debug_assert_coherent();
    }

    /// Swap-remove the row at `index` and return its scalar fields.
    pub fn swap_remove(&mut self, index: usize) -> ActorData {
        let removed = ActorData {
            location: self.locations.swap_remove(index),
            rotation: self.rotations.swap_remove(index),
            size: self.sizes.swap_remove(index),
            kind: self.kinds.swap_remove(index),
        };
        self.debug_assert_coherent();
        removed
    }

    /// Return a copy of the scalar fields at `index`.
    #[must_use]
    pub fn snapshot(&self, index: usize) -> ActorData {
        ActorData {
            location: self.locations[index],
            rotation: self.rotations[index],
            size: self.sizes[index],
            kind: self.kinds[index],
        }
    }

    /// Immutable access to the location column.
    #[must_use]
    pub fn locations(&self) -> &[Cell] {
        &self.locations
    }

    /// Mutable access to the location column.
    #[must_use]
    pub fn locations_mut(&mut self) -> &mut [Cell] {
        &mut self.locations
    }

    /// Immutable access to the rotation column.
    #[must_use]
    pub fn rotations(&self) -> &[i32] {
        &self.rotations
    }

    /// Mutable access to the rotation column.
    #[must_use]
    pub fn rotations_mut(&mut self) -> &mut [i32] {
        &mut self.rotations
    }

    /// Immutable access to the size column.
    #[must_use]
    pub fn sizes(&self) -> &[Extent] {
        &self.sizes
    }

    /// Mutable access to the size column.
    #[must_use]
    pub fn sizes_mut(&mut self) -> &mut [Extent] {
        &mut self.sizes
    }

    /// Immutable access to the kind column.
    #[must_use]
    pub fn kinds(&self) -> &[KindId] {
        &self.kinds
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.locations.len(), self.rotations.len());
        debug_assert_eq!(self.locations.len(), self.sizes.len());
        debug_assert_eq!(self.locations.len(), self.kinds.len());
    }
}

/// Dense SoA storage with generational handles for actor access.
#[derive(Debug)]
pub struct ActorArena {
    slots: SlotMap<ActorId, usize>,
    handles: Vec<ActorId>,
    columns: ActorColumns,
}

impl Default for ActorArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            handles: Vec::new(),
            columns: ActorColumns::new(),
        }
    }

    /// Number of active actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when no actors are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate over active actor handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.handles.iter().copied()
    }

    /// Borrow the underlying column storage.
    #[must_use]
    pub fn columns(&self) -> &ActorColumns {
        &self.columns
    }

    /// Mutably borrow the underlying column storage.
    #[must_use]
    pub fn columns_mut(&mut self) -> &mut ActorColumns {
        &mut self.columns
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: ActorId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a live actor.
    #[must_use]
    pub fn contains(&self, id: ActorId) -> bool {
        self.slots.contains_key(id)
    }

    /// Insert a new actor and return its handle.
    pub fn insert(&mut self, actor: ActorData) -> ActorId {
        let index = self.columns.len();
        self.columns.push(actor);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove `id`, returning its scalar data if it was present.
    pub fn remove(&mut self, id: ActorId) -> Option<ActorData> {
        let index = self.slots.remove(id)?;
        let removed = self.columns.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    /// Return a copy of the scalar fields for `id`, if present.
    #[must_use]
    pub fn snapshot(&self, id: ActorId) -> Option<ActorData> {
        self.index_of(id).map(|index| self.columns.snapshot(index))
    }
}
