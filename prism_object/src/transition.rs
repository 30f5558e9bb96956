//! Shape transitions and the per-shape transition cache.
//!
//! A [`Transition`] names one logical mutation of a shape. It is the key of
//! the edge from a shape to the shape that results from applying the
//! mutation, so two requests for the same mutation land on the same cached
//! successor and objects built the same way end up sharing shapes.
//!
//! The [`TransitionCache`] holds these edges. Most shapes have at most one
//! outgoing edge, so the cache starts with a single inline entry and is only
//! promoted to a concurrent map on the second distinct transition:
//!
//! ```text
//! Empty --insert--> Single(t, s) --insert t'--> Map { t: s, t': s' }
//! ```
//!
//! Cached shapes are held weakly; a shape nobody references any more is
//! reclaimed together with its edge.

use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::layout::ObjectType;
use crate::location::LocationType;
use crate::property::{Property, PropertyKey};
use crate::shape::Shape;

// =============================================================================
// Transition
// =============================================================================

/// A shape-to-shape edge.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Append a property.
    AddProperty {
        key: PropertyKey,
        flags: u32,
        location_type: LocationType,
    },
    /// Remove a property. Direct removals drop the entry and leave its slot
    /// unused; indirect removals rebuild the lineage without it.
    RemoveProperty { property: Property, direct: bool },
    /// Swap a property for another with the same key.
    ReplaceProperty { before: Property, after: Property },
    /// Change the dynamic type.
    ObjectType(ObjectType),
    /// Change the 16-bit shape flags.
    ObjectFlags(u16),
    /// Mark the lineage shared.
    Share,
}

impl Transition {
    /// Create the add transition for `property`.
    pub fn add(property: &Property) -> Self {
        Transition::AddProperty {
            key: property.key().clone(),
            flags: property.flags(),
            location_type: property.location().location_type(),
        }
    }

    /// Check if the target of this transition is a direct child of its
    /// origin.
    pub fn is_direct(&self) -> bool {
        !matches!(self, Transition::RemoveProperty { direct: false, .. })
    }

    /// Key of the property this transition touches, if any.
    pub fn property_key(&self) -> Option<&PropertyKey> {
        match self {
            Transition::AddProperty { key, .. } => Some(key),
            Transition::RemoveProperty { property, .. } => Some(property.key()),
            Transition::ReplaceProperty { before, .. } => Some(before.key()),
            Transition::ObjectType(_) | Transition::ObjectFlags(_) | Transition::Share => None,
        }
    }

    /// Check if this adds `key`.
    #[inline]
    pub fn is_add_of(&self, key: &PropertyKey) -> bool {
        matches!(self, Transition::AddProperty { key: k, .. } if k == key)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::AddProperty {
                key,
                flags,
                location_type,
            } => write!(f, "add({:?}, {}, {:?})", key, flags, location_type),
            Transition::RemoveProperty { property, direct } => {
                write!(f, "remove({:?}, direct={})", property, direct)
            }
            Transition::ReplaceProperty { before, after } => {
                write!(f, "replace({:?} => {:?})", before, after)
            }
            Transition::ObjectType(object_type) => write!(f, "type({:?})", object_type),
            Transition::ObjectFlags(flags) => write!(f, "flags({:#06x})", flags),
            Transition::Share => write!(f, "share"),
        }
    }
}

// =============================================================================
// Transition Cache
// =============================================================================

type EdgeMap = DashMap<Transition, Weak<Shape>, FxBuildHasher>;

enum CacheState {
    Empty,
    Single(Transition, Weak<Shape>),
    Map(EdgeMap),
}

/// Weak `Transition -> Shape` edges of one shape.
///
/// The slot is swapped atomically: lookups never lock, and every change of
/// state (first insert, replacing a dead single entry, promotion to a map)
/// is a compare-and-swap of the whole slot.
pub struct TransitionCache {
    state: ArcSwap<CacheState>,
}

impl TransitionCache {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(CacheState::Empty),
        }
    }

    /// Look up the shape cached for `transition`.
    pub fn get(&self, transition: &Transition) -> Option<Arc<Shape>> {
        match &**self.state.load() {
            CacheState::Empty => None,
            CacheState::Single(t, shape) if t == transition => shape.upgrade(),
            CacheState::Single(..) => None,
            CacheState::Map(map) => map.get(transition).and_then(|entry| entry.value().upgrade()),
        }
    }

    /// Cache `shape` for `transition` unless a live entry exists.
    ///
    /// Returns the cached shape after the call: `shape` itself, or the shape
    /// a racing thread installed first.
    pub fn put_if_absent(&self, transition: Transition, shape: &Arc<Shape>) -> Arc<Shape> {
        loop {
            let current = self.state.load_full();
            let next = match &*current {
                CacheState::Map(map) => return Self::put_in_map(map, transition, shape),
                CacheState::Empty => CacheState::Single(transition.clone(), Arc::downgrade(shape)),
                CacheState::Single(t, existing) if *t == transition => match existing.upgrade() {
                    Some(winner) => return winner,
                    None => CacheState::Single(transition.clone(), Arc::downgrade(shape)),
                },
                CacheState::Single(t, existing) => {
                    let map = EdgeMap::default();
                    if existing.strong_count() > 0 {
                        map.insert(t.clone(), existing.clone());
                    }
                    map.insert(transition.clone(), Arc::downgrade(shape));
                    CacheState::Map(map)
                }
            };
            let promoted = matches!(next, CacheState::Map(_));
            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                if promoted {
                    log::trace!("promoted transition cache to map");
                }
                return Arc::clone(shape);
            }
        }
    }

    fn put_in_map(map: &EdgeMap, transition: Transition, shape: &Arc<Shape>) -> Arc<Shape> {
        let mut entry = map.entry(transition).or_insert_with(|| Arc::downgrade(shape));
        match entry.value().upgrade() {
            Some(winner) => winner,
            None => {
                *entry.value_mut() = Arc::downgrade(shape);
                Arc::clone(shape)
            }
        }
    }

    /// Snapshot of all live edges.
    pub fn entries(&self) -> Vec<(Transition, Arc<Shape>)> {
        match &**self.state.load() {
            CacheState::Empty => Vec::new(),
            CacheState::Single(t, shape) => shape
                .upgrade()
                .map(|shape| vec![(t.clone(), shape)])
                .unwrap_or_default(),
            CacheState::Map(map) => map
                .iter()
                .filter_map(|entry| {
                    entry
                        .value()
                        .upgrade()
                        .map(|shape| (entry.key().clone(), shape))
                })
                .collect(),
        }
    }

    /// Number of live edges.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransitionCache {
    fn default() -> Self {
        Self::new()
    }
}
