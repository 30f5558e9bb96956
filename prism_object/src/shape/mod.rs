//! Shapes: immutable, shared descriptions of an object's layout.
//!
//! Every dynamic object points at exactly one [`Shape`]. A shape records the
//! object's property table, storage sizes, dynamic type and flags, and is
//! shared by every object that was built through the same sequence of
//! mutations. Shapes form a tree: each non-root shape was derived from its
//! parent by one [`Transition`], and the edge is cached on the parent so the
//! next object performing the same mutation lands on the same shape.
//!
//! ```text
//!          root
//!           |  add(x, int)
//!         {x}
//!        /    \
//!  add(y,int)  add(y,object)
//!      /          \
//!   {x,y}        {x,y'}
//! ```
//!
//! Shapes are never mutated after construction, except for three one-way
//! state changes:
//!
//! - the **validity** token is invalidated when the shape is obsoleted;
//! - the **leaf** token is invalidated when the first child is created;
//! - the **successor** is set once, when the shape is obsoleted or resolved.
//!
//! Mutations live in [`crate::strategy`]; this module holds the node itself
//! and its queries.

mod builder;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bitflags::bitflags;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use rustc_hash::FxBuildHasher;

use crate::assumption::Assumption;
use crate::error::{ObjectModelError, ObjectModelResult};
use crate::layout::{Layout, ObjectType, RootKey};
use crate::property::{Property, PropertyKey};
use crate::property_map::PropertyMap;
use crate::stats::stats;
use crate::strategy;
use crate::transition::{Transition, TransitionCache};
use crate::value::Value;

pub use builder::{ShapeBuilder, SharedData};

/// Largest value of the user-visible shape flags.
pub const MAX_SHAPE_FLAGS: u32 = u16::MAX as u32;

// =============================================================================
// Shape ID
// =============================================================================

/// Unique shape identifier.
///
/// Cheap to compare; suitable as an inline cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ShapeId(pub u32);

static NEXT_SHAPE_ID: AtomicU32 = AtomicU32::new(0);

impl ShapeId {
    fn next() -> Self {
        Self(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get raw value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Internal Flags
// =============================================================================

bitflags! {
    /// Shape bits managed by the object model, separate from the 16 user
    /// flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InternalFlags: u8 {
        /// Objects may be accessed by several threads; slots are never
        /// reused.
        const SHARED = 1 << 0;
        /// Per-key stability tokens are handed out.
        const PROPERTY_ASSUMPTIONS = 1 << 1;
        /// At least one property lives in per-object storage.
        const HAS_INSTANCE_PROPERTIES = 1 << 2;
    }
}

// =============================================================================
// Storage Sizes
// =============================================================================

/// Storage counters of a shape.
///
/// `*_fields` count the in-object fields in use. Array sizes count used
/// slots (words for the primitive array); capacities are what objects of the
/// shape allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StorageSizes {
    pub object_fields: usize,
    pub primitive_fields: usize,
    pub object_array_size: usize,
    pub object_array_capacity: usize,
    pub primitive_array_size: usize,
    pub primitive_array_capacity: usize,
}

impl StorageSizes {
    /// Number of storage slots in use, fields included.
    #[inline]
    pub fn used_slots(&self) -> usize {
        self.object_fields + self.primitive_fields + self.object_array_size + self.primitive_array_size
    }
}

// =============================================================================
// Shape
// =============================================================================

/// Everything a shape carries that a transition may change.
#[derive(Clone)]
pub(crate) struct ShapeData {
    pub(crate) property_map: PropertyMap,
    pub(crate) object_type: ObjectType,
    pub(crate) flags: u16,
    pub(crate) internal: InternalFlags,
    pub(crate) shared_data: Option<SharedData>,
    pub(crate) sizes: StorageSizes,
}

/// State shared by all shapes with the same root.
struct Lineage {
    /// Serializes obsolescence, merging and reshape.
    lock: ReentrantMutex<()>,
    property_assumptions: Option<DashMap<PropertyKey, Assumption, FxBuildHasher>>,
}

/// Immutable layout descriptor shared by objects.
pub struct Shape {
    id: ShapeId,
    layout: Arc<Layout>,
    /// `None` for roots.
    parent: Option<Arc<Shape>>,
    /// `None` for roots, which are their own root.
    root: Option<Arc<Shape>>,
    depth: usize,
    data: ShapeData,
    transition_from_parent: Option<Transition>,
    transitions: TransitionCache,
    valid: Assumption,
    leaf: Assumption,
    lineage: Arc<Lineage>,
    successor: OnceLock<Arc<Shape>>,
    /// Obsoleted shapes that resolved to this one. Weak: an obsolete shape
    /// already holds its successor strongly.
    predecessors: Mutex<Vec<Weak<Shape>>>,
    key_array: OnceLock<Arc<[PropertyKey]>>,
    property_array: OnceLock<Arc<[Property]>>,
}

impl Shape {
    /// Create a root shape.
    pub(crate) fn new_root(layout: Arc<Layout>, key: &RootKey) -> Arc<Self> {
        let property_assumptions = key
            .internal
            .contains(InternalFlags::PROPERTY_ASSUMPTIONS)
            .then(DashMap::default);
        stats().record_shape_created();
        Arc::new(Self {
            id: ShapeId::next(),
            layout,
            parent: None,
            root: None,
            depth: 0,
            data: ShapeData {
                property_map: PropertyMap::new(),
                object_type: key.object_type,
                flags: key.flags,
                internal: key.internal,
                shared_data: key.shared_data.clone(),
                sizes: StorageSizes::default(),
            },
            transition_from_parent: None,
            transitions: TransitionCache::new(),
            valid: Assumption::new("valid shape"),
            leaf: Assumption::new("leaf shape"),
            lineage: Arc::new(Lineage {
                lock: ReentrantMutex::new(()),
                property_assumptions,
            }),
            successor: OnceLock::new(),
            predecessors: Mutex::new(Vec::new()),
            key_array: OnceLock::new(),
            property_array: OnceLock::new(),
        })
    }

    /// Create a child of `parent`. Not cached; see [`Shape::cache_transition`].
    pub(crate) fn new_child(parent: &Arc<Shape>, transition: Transition, data: ShapeData) -> Arc<Self> {
        stats().record_shape_created();
        Arc::new(Self {
            id: ShapeId::next(),
            layout: Arc::clone(&parent.layout),
            parent: Some(Arc::clone(parent)),
            root: Some(Arc::clone(parent.root())),
            depth: parent.depth + 1,
            data,
            transition_from_parent: Some(transition),
            transitions: TransitionCache::new(),
            valid: Assumption::new("valid shape"),
            leaf: Assumption::new("leaf shape"),
            lineage: Arc::clone(&parent.lineage),
            successor: OnceLock::new(),
            predecessors: Mutex::new(Vec::new()),
            key_array: OnceLock::new(),
            property_array: OnceLock::new(),
        })
    }

    // =========================================================================
    // Structure
    // =========================================================================

    #[inline]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    #[inline]
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Root of this shape's lineage.
    #[inline]
    pub fn root<'a>(self: &'a Arc<Self>) -> &'a Arc<Shape> {
        self.root.as_ref().unwrap_or(self)
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of transitions from the root.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The transition that produced this shape from its parent.
    #[inline]
    pub fn transition_from_parent(&self) -> Option<&Transition> {
        self.transition_from_parent.as_ref()
    }

    #[inline]
    pub fn sizes(&self) -> &StorageSizes {
        &self.data.sizes
    }

    #[inline]
    pub fn object_type(&self) -> ObjectType {
        self.data.object_type
    }

    /// The 16 user flag bits.
    #[inline]
    pub fn flags(&self) -> u16 {
        self.data.flags
    }

    #[inline]
    pub fn internal_flags(&self) -> InternalFlags {
        self.data.internal
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.data.internal.contains(InternalFlags::SHARED)
    }

    #[inline]
    pub fn has_property_assumptions(&self) -> bool {
        self.data.internal.contains(InternalFlags::PROPERTY_ASSUMPTIONS)
    }

    #[inline]
    pub fn has_instance_properties(&self) -> bool {
        self.data.internal.contains(InternalFlags::HAS_INSTANCE_PROPERTIES)
    }

    #[inline]
    pub fn shared_data(&self) -> Option<&SharedData> {
        self.data.shared_data.as_ref()
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Number of properties, hidden ones included.
    #[inline]
    pub fn property_count(&self) -> usize {
        self.data.property_map.len()
    }

    #[inline]
    pub fn get_property(&self, key: &PropertyKey) -> Option<&Property> {
        self.data.property_map.get(key)
    }

    #[inline]
    pub fn has_property(&self, key: &PropertyKey) -> bool {
        self.data.property_map.contains_key(key)
    }

    pub fn property_flags_or_default(&self, key: &PropertyKey, default: u32) -> u32 {
        self.get_property(key).map_or(default, Property::flags)
    }

    /// Visible keys in insertion order.
    pub fn key_array(&self) -> Arc<[PropertyKey]> {
        Arc::clone(self.key_array.get_or_init(|| {
            self.data
                .property_map
                .keys()
                .into_iter()
                .filter(|key| !key.is_hidden())
                .collect()
        }))
    }

    /// Visible properties in insertion order.
    pub fn property_array(&self) -> Arc<[Property]> {
        Arc::clone(self.property_array.get_or_init(|| {
            self.data
                .property_map
                .properties()
                .into_iter()
                .filter(|property| !property.is_hidden())
                .collect()
        }))
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Check if the shape has not been obsoleted.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.is_valid()
    }

    /// Check if no transition has been taken from this shape yet.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.leaf.is_valid()
    }

    #[inline]
    pub fn validity_assumption(&self) -> &Assumption {
        &self.valid
    }

    #[inline]
    pub fn leaf_assumption(&self) -> &Assumption {
        &self.leaf
    }

    /// Token that stays valid while no transition in this lineage touches
    /// `key`. Always invalid when property assumptions are disabled.
    pub fn property_assumption(&self, key: &PropertyKey) -> Assumption {
        match &self.lineage.property_assumptions {
            Some(assumptions) => assumptions
                .entry(key.clone())
                .or_insert_with(|| Assumption::new("stable property"))
                .clone(),
            None => Assumption::never_valid(),
        }
    }

    /// Shape this one was replaced by, once obsoleted or resolved.
    #[inline]
    pub fn successor(&self) -> Option<&Arc<Shape>> {
        self.successor.get()
    }

    /// Number of live obsolete shapes that resolved to this one.
    pub fn predecessor_count(&self) -> usize {
        self.predecessors
            .lock()
            .iter()
            .filter(|predecessor| predecessor.strong_count() > 0)
            .count()
    }

    /// Number of live cached transitions.
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Cached result of `transition`, if any.
    pub fn query_transition(&self, transition: &Transition) -> Option<Arc<Shape>> {
        self.transitions.get(transition)
    }

    // =========================================================================
    // Obsolescence
    // =========================================================================

    /// Resolve this shape to a valid one, replaying it onto the lineage that
    /// replaced it if it was obsoleted.
    pub fn ensure_valid(self: &Arc<Self>) -> ObjectModelResult<Arc<Shape>> {
        strategy::ensure_valid(self)
    }

    /// Try to reconcile two related shapes.
    ///
    /// On success the narrower shape is obsoleted and the wider one
    /// returned.
    pub fn try_merge(self: &Arc<Self>, other: &Arc<Shape>) -> Option<Arc<Shape>> {
        strategy::try_merge_shapes(self, other)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Add `property`, which must not exist yet.
    pub fn add_property(self: &Arc<Self>, property: Property) -> ObjectModelResult<Arc<Shape>> {
        if self.has_property(property.key()) {
            return Err(ObjectModelError::illegal_argument(format!(
                "property {} already exists",
                property.key()
            )));
        }
        strategy::add_property(self, property)
    }

    /// Shape that can hold `value` under `key` with `flags`, adding or
    /// generalizing the property as needed.
    pub fn define_property(
        self: &Arc<Self>,
        key: &PropertyKey,
        value: &Value,
        flags: u32,
    ) -> ObjectModelResult<Arc<Shape>> {
        strategy::define_property(self, key, value, flags, strategy::PutFlags::UPDATE_FLAGS)
    }

    /// Shape without `key`; `self` if absent.
    pub fn remove_property(self: &Arc<Self>, key: &PropertyKey) -> ObjectModelResult<Arc<Shape>> {
        match self.get_property(key) {
            Some(property) => strategy::remove_property(self, &property.clone()),
            None => Ok(Arc::clone(self)),
        }
    }

    /// Shape with `old` swapped for `new` in place.
    pub fn replace_property(self: &Arc<Self>, old: &Property, new: Property) -> ObjectModelResult<Arc<Shape>> {
        if old.key() != new.key() {
            return Err(ObjectModelError::illegal_argument("replacement must keep the key"));
        }
        if self.get_property(old.key()) != Some(old) {
            return Err(ObjectModelError::illegal_argument(format!(
                "property {:?} not in shape",
                old
            )));
        }
        strategy::replace_property(self, old, new)
    }

    pub fn set_dynamic_type(self: &Arc<Self>, object_type: ObjectType) -> ObjectModelResult<Arc<Shape>> {
        strategy::set_object_type(self, object_type)
    }

    pub fn set_shape_flags(self: &Arc<Self>, flags: u16) -> ObjectModelResult<Arc<Shape>> {
        strategy::set_object_flags(self, flags)
    }

    /// Shared variant of this shape; `self` if already shared.
    pub fn make_shared(self: &Arc<Self>) -> ObjectModelResult<Arc<Shape>> {
        strategy::make_shared(self)
    }

    // =========================================================================
    // Crate Internals
    // =========================================================================

    #[inline]
    pub(crate) fn data(&self) -> &ShapeData {
        &self.data
    }

    #[inline]
    pub(crate) fn property_map(&self) -> &PropertyMap {
        &self.data.property_map
    }

    #[inline]
    pub(crate) fn transitions(&self) -> &TransitionCache {
        &self.transitions
    }

    /// Lock shared by every shape of this lineage.
    #[inline]
    pub(crate) fn lock_root(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lineage.lock.lock()
    }

    /// Check if both shapes belong to the same lineage.
    #[inline]
    pub(crate) fn same_lineage(&self, other: &Shape) -> bool {
        Arc::ptr_eq(&self.lineage, &other.lineage)
    }

    /// Invalidate the validity token. Returns `false` if already invalid.
    pub(crate) fn invalidate(&self, reason: &str) -> bool {
        self.valid.invalidate(reason)
    }

    /// Record the shape that replaces this one. First writer wins.
    pub(crate) fn set_successor(&self, successor: &Arc<Shape>) -> bool {
        self.successor.set(Arc::clone(successor)).is_ok()
    }

    pub(crate) fn add_predecessor(&self, predecessor: &Arc<Shape>) {
        let mut predecessors = self.predecessors.lock();
        predecessors.retain(|p| p.strong_count() > 0);
        predecessors.push(Arc::downgrade(predecessor));
    }

    pub(crate) fn invalidate_property_assumption(&self, key: &PropertyKey) {
        if let Some(assumptions) = &self.lineage.property_assumptions {
            if let Some(assumption) = assumptions.get(key) {
                assumption.invalidate(&format!("property {} changed", key));
            }
        }
    }

    pub(crate) fn invalidate_all_property_assumptions(&self) {
        if let Some(assumptions) = &self.lineage.property_assumptions {
            for key in self.data.property_map.keys() {
                if let Some(assumption) = assumptions.get(&key) {
                    assumption.invalidate("shape reset");
                }
            }
        }
    }

    /// Cache `child` as the result of `transition` from this shape.
    ///
    /// Returns the cached shape, which is a racing thread's child if one got
    /// there first.
    pub(crate) fn cache_transition(self: &Arc<Self>, transition: Transition, child: Arc<Shape>) -> Arc<Shape> {
        if let Some(key) = transition.property_key() {
            self.invalidate_property_assumption(key);
        }
        let direct = transition.is_direct();
        let cached = self.transitions.put_if_absent(transition, &child);
        if !Arc::ptr_eq(&cached, &child) || !direct {
            return cached;
        }
        self.leaf.invalidate("first transition");
        // An obsolescence sweep may have walked the cache before the insert.
        if !self.is_valid() {
            child.invalidate("born under obsolete parent");
        }
        cached
    }
}

impl Drop for Shape {
    fn drop(&mut self) {
        // Release uniquely owned ancestors iteratively so deep lineages cannot
        // overflow the stack.
        let mut current = self.parent.take();
        while let Some(shape) = current {
            match Arc::try_unwrap(shape) {
                Ok(mut shape) => current = shape.parent.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id.0)
            .field("depth", &self.depth)
            .field("properties", &self.data.property_map)
            .field("type", &self.data.object_type)
            .field("flags", &format_args!("{:#06x}", self.data.flags))
            .field("internal", &self.data.internal)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Location, LocationKind};
    use crate::property::HiddenKey;

    fn fresh_root() -> Arc<Shape> {
        ShapeBuilder::new()
            .object_type(ObjectType::new("test"))
            .build()
            .unwrap()
    }

    fn int_property(key: &str, index: usize) -> Property {
        Property::new(key.into(), Location::new(LocationKind::IntField { index }), 0)
    }

    // -------------------------------------------------------------------------
    // ShapeId Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_shape_ids_are_unique() {
        let root = fresh_root();
        let child = root.add_property(int_property("x", 0)).unwrap();
        assert_ne!(root.id(), child.id());
        assert_ne!(root.id().raw(), child.id().raw());
    }

    // -------------------------------------------------------------------------
    // Structure Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_root_structure() {
        let root = fresh_root();
        assert!(root.is_root());
        assert_eq!(root.depth(), 0);
        assert!(Arc::ptr_eq(root.root(), &root));
        assert!(root.transition_from_parent().is_none());
        assert_eq!(root.property_count(), 0);
        assert!(root.is_valid());
        assert!(!root.has_instance_properties());
    }

    #[test]
    fn test_child_structure() {
        let root = fresh_root();
        let x = root.add_property(int_property("x", 0)).unwrap();
        let xy = x.add_property(int_property("y", 1)).unwrap();

        assert_eq!(xy.depth(), 2);
        assert!(Arc::ptr_eq(xy.parent().unwrap(), &x));
        assert!(Arc::ptr_eq(xy.root(), &root));
        assert!(xy.same_lineage(&root));
        assert!(xy.has_property(&"x".into()));
        assert!(xy.has_instance_properties());
        assert_eq!(xy.sizes().primitive_fields, 2);
        assert!(xy
            .transition_from_parent()
            .unwrap()
            .is_add_of(&"y".into()));
    }

    #[test]
    fn test_add_existing_property_rejected() {
        let root = fresh_root();
        let x = root.add_property(int_property("x", 0)).unwrap();
        assert!(matches!(
            x.add_property(int_property("x", 1)),
            Err(ObjectModelError::IllegalArgument { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Transition Caching Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_same_transition_same_shape() {
        let root = fresh_root();
        let a = root.add_property(int_property("x", 0)).unwrap();
        let b = root.add_property(int_property("x", 0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(root.transition_count(), 1);
    }

    #[test]
    fn test_leaf_token() {
        let root = fresh_root();
        let leaf = root.leaf_assumption().clone();
        assert!(root.is_leaf());
        let child = root.add_property(int_property("x", 0)).unwrap();
        assert!(!leaf.is_valid());
        assert!(child.is_leaf());
    }

    #[test]
    fn test_flags_and_type_transitions() {
        let root = fresh_root();
        let flagged = root.set_shape_flags(0x10).unwrap();
        assert_eq!(flagged.flags(), 0x10);
        assert!(Arc::ptr_eq(&flagged, &root.set_shape_flags(0x10).unwrap()));
        assert!(Arc::ptr_eq(&root, &root.set_shape_flags(root.flags()).unwrap()));

        let object_type = ObjectType::new("Point");
        let typed = flagged.set_dynamic_type(object_type).unwrap();
        assert_eq!(typed.object_type(), object_type);
        assert_eq!(typed.flags(), 0x10);
    }

    #[test]
    fn test_make_shared() {
        let root = fresh_root();
        let shared = root.make_shared().unwrap();
        assert!(shared.is_shared());
        assert!(!root.is_shared());
        assert!(Arc::ptr_eq(&shared, &shared.make_shared().unwrap()));
    }

    // -------------------------------------------------------------------------
    // Snapshot Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_key_array_excludes_hidden() {
        let hidden = HiddenKey::new("secret");
        let root = fresh_root();
        let shape = root
            .add_property(int_property("a", 0))
            .unwrap()
            .add_property(Property::new(
                hidden.clone().into(),
                Location::new(LocationKind::IntField { index: 1 }),
                0,
            ))
            .unwrap()
            .add_property(int_property("b", 2))
            .unwrap();

        let keys: Vec<_> = shape.key_array().iter().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(shape.property_array().len(), 2);
        assert_eq!(shape.property_count(), 3);
        assert!(shape.has_property(&hidden.into()));
        assert!(Arc::ptr_eq(&shape.key_array(), &shape.key_array()));
    }

    #[test]
    fn test_property_flags_or_default() {
        let root = fresh_root();
        let shape = root
            .add_property(int_property("a", 0).copy_with_flags(5))
            .unwrap();
        assert_eq!(shape.property_flags_or_default(&"a".into(), 9), 5);
        assert_eq!(shape.property_flags_or_default(&"b".into(), 9), 9);
    }

    // -------------------------------------------------------------------------
    // Property Assumption Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_property_assumptions_disabled() {
        let root = fresh_root();
        assert!(!root.property_assumption(&"x".into()).is_valid());
    }

    #[test]
    fn test_property_assumption_invalidated_by_add() {
        let root = ShapeBuilder::new()
            .object_type(ObjectType::new("test"))
            .property_assumptions(true)
            .build()
            .unwrap();
        let token = root.property_assumption(&"x".into());
        let other = root.property_assumption(&"y".into());
        assert!(token.is_valid());

        root.add_property(int_property("x", 0)).unwrap();
        assert!(!token.is_valid());
        assert!(other.is_valid());
    }

    // -------------------------------------------------------------------------
    // Drop Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_deep_lineage_drop() {
        let mut shape = fresh_root();
        for i in 0..20_000u32 {
            shape = shape.set_shape_flags((i % 2 + 1) as u16).unwrap();
        }
        assert_eq!(shape.depth(), 20_000);
        drop(shape);
    }
}
