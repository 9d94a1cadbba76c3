//! Actor kind registry.
//!
//! Kinds are the runtime "classes" of actors. Scenarios register every kind
//! once, optionally naming a parent kind, and collision queries match
//! either a single kind or a kind together with everything descended from
//! it. The descendant sets are computed on first use and cached, so the
//! per-query cost is one hash lookup rather than a hierarchy walk.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque handle for a registered actor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KindId(u32);

/// Set of kind handles accepted by a collision query.
pub type KindSet = HashSet<KindId>;

#[derive(Debug)]
struct KindInfo {
    name: String,
    parent: Option<KindId>,
}

/// Registry owning the kind hierarchy for one world.
///
/// Owned per world rather than held in process-wide state, so independent
/// worlds (and tests) never share or collide on kind handles.
#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: Vec<KindInfo>,
    descendants: HashMap<KindId, Arc<KindSet>>,
}

impl KindRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true when no kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Register a new kind, optionally below a parent kind.
    ///
    /// Registration invalidates the cached descendant sets: a new kind may
    /// extend the subtree of any existing one.
    pub fn register(&mut self, name: impl Into<String>, parent: Option<KindId>) -> KindId {
        if let Some(parent) = parent {
            debug_assert!(
                (parent.0 as usize) < self.kinds.len(),
                "parent kind must be registered first"
            );
        }
        let id = KindId(self.kinds.len() as u32);
        self.kinds.push(KindInfo {
            name: name.into(),
            parent,
        });
        self.descendants.clear();
        id
    }

    /// The display name of a kind, if registered.
    #[must_use]
    pub fn name(&self, kind: KindId) -> Option<&str> {
        self.kinds.get(kind.0 as usize).map(|info| info.name.as_str())
    }

    /// The parent of a kind, if it has one.
    #[must_use]
    pub fn parent(&self, kind: KindId) -> Option<KindId> {
        self.kinds.get(kind.0 as usize).and_then(|info| info.parent)
    }

    /// Iterate over every registered kind handle.
    pub fn iter(&self) -> impl Iterator<Item = KindId> + '_ {
        (0..self.kinds.len() as u32).map(KindId)
    }

    /// Whether `candidate` is `target` or descends from it.
    #[must_use]
    pub fn is_assignable(&self, target: KindId, candidate: KindId) -> bool {
        let mut current = Some(candidate);
        while let Some(kind) = current {
            if kind == target {
                return true;
            }
            current = self.parent(kind);
        }
        false
    }

    /// The cached set of `target` plus all kinds descended from it.
    #[must_use]
    pub fn assignable_set(&mut self, target: KindId) -> Arc<KindSet> {
        if let Some(cached) = self.descendants.get(&target) {
            return Arc::clone(cached);
        }
        let set: KindSet = self
            .iter()
            .filter(|&kind| self.is_assignable(target, kind))
            .collect();
        let set = Arc::new(set);
        self.descendants.insert(target, Arc::clone(&set));
        set
    }
}
