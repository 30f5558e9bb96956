//! Layouts, object types and the global layout registry.
//!
//! A [`Layout`] is the storage class of a family of objects: how many
//! in-object fields they carry and which implicit numeric widenings their
//! locations may use. Every root shape belongs to exactly one layout, and
//! all shapes of a lineage share it.
//!
//! Layouts are registered explicitly by name at startup through
//! [`layout_registry()`]. Variants of a layout with different implicit-cast
//! settings are derived on demand and cached under the same name.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::config::LayoutConfig;
use crate::error::{ObjectModelError, ObjectModelResult};
use crate::shape::{InternalFlags, Shape, SharedData};

/// Name of the layout used when a builder does not pick one.
pub const DEFAULT_LAYOUT: &str = "default";

// =============================================================================
// Object Type
// =============================================================================

/// Language-defined dynamic type tag of a shape.
///
/// Compared by identity; allocate new types through
/// [`LayoutRegistry::allocate_object_type`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectType(u32);

impl ObjectType {
    /// The type of plain objects.
    pub const DEFAULT: Self = Self(0);

    /// Allocate a fresh type in the global registry.
    pub fn new(name: &str) -> Self {
        layout_registry().allocate_object_type(name)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Default for ObjectType {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match layout_registry().object_type_name(*self) {
            Some(name) => write!(f, "ObjectType({}, {})", self.0, name),
            None => write!(f, "ObjectType({})", self.0),
        }
    }
}

// =============================================================================
// Layout
// =============================================================================

/// Key of a cached root shape.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) struct RootKey {
    pub(crate) object_type: ObjectType,
    pub(crate) flags: u16,
    pub(crate) internal: InternalFlags,
    pub(crate) shared_data: Option<SharedData>,
}

/// Storage class of a family of shapes.
pub struct Layout {
    id: u32,
    name: Arc<str>,
    config: LayoutConfig,
    roots: DashMap<RootKey, Arc<Shape>, FxBuildHasher>,
}

impl Layout {
    fn new(id: u32, name: Arc<str>, config: LayoutConfig) -> Self {
        Self {
            id,
            name,
            config,
            roots: DashMap::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    #[inline]
    pub fn allows_int_to_long(&self) -> bool {
        self.config.allow_int_to_long
    }

    #[inline]
    pub fn allows_int_to_double(&self) -> bool {
        self.config.allow_int_to_double
    }

    /// Check if both handles refer to the same layout.
    #[inline]
    pub fn ptr_eq(self: &Arc<Self>, other: &Arc<Layout>) -> bool {
        Arc::ptr_eq(self, other)
    }

    /// Get or create the root shape for `key`.
    pub(crate) fn root_shape(self: &Arc<Self>, key: RootKey) -> Arc<Shape> {
        if let Some(root) = self.roots.get(&key) {
            return Arc::clone(root.value());
        }
        let entry = self
            .roots
            .entry(key.clone())
            .or_insert_with(|| Shape::new_root(Arc::clone(self), &key));
        Arc::clone(entry.value())
    }

    /// Number of cached root shapes.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Layout Registry
// =============================================================================

#[derive(Clone, PartialEq, Eq, Hash)]
struct LayoutKey {
    name: Arc<str>,
    allow_int_to_long: bool,
    allow_int_to_double: bool,
}

/// Process-wide registry of layouts and object types.
pub struct LayoutRegistry {
    /// Registered layouts and their implicit-cast variants.
    layouts: RwLock<FxHashMap<LayoutKey, Arc<Layout>>>,
    /// Base layout per name.
    bases: RwLock<FxHashMap<Arc<str>, Arc<Layout>>>,
    next_layout_id: AtomicU32,
    next_object_type: AtomicU32,
    object_type_names: RwLock<FxHashMap<ObjectType, Arc<str>>>,
}

impl LayoutRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            layouts: RwLock::new(FxHashMap::default()),
            bases: RwLock::new(FxHashMap::default()),
            next_layout_id: AtomicU32::new(0),
            // 0 is ObjectType::DEFAULT
            next_object_type: AtomicU32::new(1),
            object_type_names: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register a layout under `name`.
    ///
    /// Registering the same name again with an equal configuration returns
    /// the existing layout.
    pub fn register(&self, name: &str, config: LayoutConfig) -> ObjectModelResult<Arc<Layout>> {
        config
            .validate()
            .map_err(|e| ObjectModelError::illegal_argument(format!("layout '{}': {}", name, e)))?;

        let mut bases = self.bases.write();
        if let Some(existing) = bases.get(name) {
            if existing.config == config {
                return Ok(Arc::clone(existing));
            }
            return Err(ObjectModelError::illegal_argument(format!(
                "layout '{}' already registered with a different configuration",
                name
            )));
        }

        let name: Arc<str> = Arc::from(name);
        let layout = self.insert(Arc::clone(&name), config);
        bases.insert(name, Arc::clone(&layout));
        log::debug!("registered layout {:?}", layout);
        Ok(layout)
    }

    fn insert(&self, name: Arc<str>, config: LayoutConfig) -> Arc<Layout> {
        let key = LayoutKey {
            name: Arc::clone(&name),
            allow_int_to_long: config.allow_int_to_long,
            allow_int_to_double: config.allow_int_to_double,
        };
        let mut layouts = self.layouts.write();
        let layout = layouts.entry(key).or_insert_with(|| {
            let id = self.next_layout_id.fetch_add(1, Ordering::Relaxed);
            Arc::new(Layout::new(id, name, config))
        });
        Arc::clone(layout)
    }

    /// Look up a registered layout by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<Arc<Layout>> {
        self.bases.read().get(name).cloned()
    }

    /// The default layout, registered on first use.
    pub fn default_layout(&self) -> Arc<Layout> {
        if let Some(layout) = self.get(DEFAULT_LAYOUT) {
            return layout;
        }
        let name: Arc<str> = Arc::from(DEFAULT_LAYOUT);
        let mut bases = self.bases.write();
        let layout = bases
            .entry(Arc::clone(&name))
            .or_insert_with(|| self.insert(name, LayoutConfig::default()));
        Arc::clone(layout)
    }

    /// Variant of `layout` with the given implicit casts enabled in
    /// addition to its own.
    pub fn with_implicit_casts(
        &self,
        layout: &Arc<Layout>,
        allow_int_to_long: bool,
        allow_int_to_double: bool,
    ) -> Arc<Layout> {
        let allow_int_to_long = allow_int_to_long || layout.allows_int_to_long();
        let allow_int_to_double = allow_int_to_double || layout.allows_int_to_double();
        if allow_int_to_long == layout.allows_int_to_long()
            && allow_int_to_double == layout.allows_int_to_double()
        {
            return Arc::clone(layout);
        }
        let key = LayoutKey {
            name: Arc::clone(&layout.name),
            allow_int_to_long,
            allow_int_to_double,
        };
        if let Some(variant) = self.layouts.read().get(&key) {
            return Arc::clone(variant);
        }
        let config = LayoutConfig {
            allow_int_to_long,
            allow_int_to_double,
            ..layout.config.clone()
        };
        self.insert(Arc::clone(&layout.name), config)
    }

    /// Allocate a new object type.
    pub fn allocate_object_type(&self, name: &str) -> ObjectType {
        let object_type = ObjectType(self.next_object_type.fetch_add(1, Ordering::Relaxed));
        self.object_type_names
            .write()
            .insert(object_type, Arc::from(name));
        object_type
    }

    /// Name given to an allocated object type.
    pub fn object_type_name(&self, object_type: ObjectType) -> Option<Arc<str>> {
        if object_type == ObjectType::DEFAULT {
            return Some(Arc::from("Object"));
        }
        self.object_type_names.read().get(&object_type).cloned()
    }

    /// Number of layouts, variants included.
    pub fn len(&self) -> usize {
        self.layouts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Global Registry Access
// =============================================================================

static LAYOUT_REGISTRY: OnceLock<LayoutRegistry> = OnceLock::new();

/// Get the global layout registry.
#[inline]
pub fn layout_registry() -> &'static LayoutRegistry {
    LAYOUT_REGISTRY.get_or_init(LayoutRegistry::new)
}
