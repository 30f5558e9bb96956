//! Construction of initial shapes.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{ObjectModelError, ObjectModelResult};
use crate::layout::{layout_registry, Layout, ObjectType, RootKey};
use crate::location::Location;
use crate::property::{Property, PropertyKey};
use crate::shape::{InternalFlags, Shape, MAX_SHAPE_FLAGS};
use crate::strategy;
use crate::value::Value;

// =============================================================================
// Shared Data
// =============================================================================

/// Opaque language data attached to a root shape, compared by identity.
#[derive(Clone)]
pub struct SharedData(Arc<dyn Any + Send + Sync>);

impl SharedData {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    #[inline]
    pub fn ptr_eq(&self, other: &SharedData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for SharedData {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SharedData {}

impl Hash for SharedData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const () as usize).hash(state);
    }
}

impl fmt::Debug for SharedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedData({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

// =============================================================================
// Shape Builder
// =============================================================================

/// Builder for the initial shape of a family of objects.
///
/// # Example
///
/// ```
/// use prism_object::{ObjectType, ShapeBuilder, Value};
///
/// let shape = ShapeBuilder::new()
///     .object_type(ObjectType::new("Point"))
///     .constant("dimensions", Value::Int(2), 0)
///     .build()
///     .unwrap();
/// assert!(shape.has_property(&"dimensions".into()));
/// ```
#[derive(Default)]
pub struct ShapeBuilder {
    layout: Option<Arc<Layout>>,
    object_type: ObjectType,
    shape_flags: u32,
    shared: bool,
    property_assumptions: bool,
    allow_int_to_long: bool,
    allow_int_to_double: bool,
    shared_data: Option<SharedData>,
    constants: Vec<(PropertyKey, Value, u32)>,
}

impl ShapeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `layout` instead of the default layout.
    pub fn layout(mut self, layout: Arc<Layout>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn object_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = object_type;
        self
    }

    /// Initial shape flags; must fit in 16 bits.
    pub fn shape_flags(mut self, flags: u32) -> Self {
        self.shape_flags = flags;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn property_assumptions(mut self, enabled: bool) -> Self {
        self.property_assumptions = enabled;
        self
    }

    pub fn allow_int_to_long(mut self, allow: bool) -> Self {
        self.allow_int_to_long = allow;
        self
    }

    pub fn allow_int_to_double(mut self, allow: bool) -> Self {
        self.allow_int_to_double = allow;
        self
    }

    pub fn shared_data(mut self, data: SharedData) -> Self {
        self.shared_data = Some(data);
        self
    }

    /// Add a property whose value is stored in the shape.
    pub fn constant(mut self, key: impl Into<PropertyKey>, value: Value, flags: u32) -> Self {
        self.constants.push((key.into(), value, flags));
        self
    }

    /// Build the shape.
    ///
    /// Roots are cached per layout, so building the same configuration twice
    /// yields the same root.
    pub fn build(self) -> ObjectModelResult<Arc<Shape>> {
        if self.shape_flags > MAX_SHAPE_FLAGS {
            return Err(ObjectModelError::illegal_argument(format!(
                "shape flags {:#x} out of range 0..=0xffff",
                self.shape_flags
            )));
        }
        let mut seen = FxHashSet::default();
        for (key, _, _) in &self.constants {
            if !seen.insert(key.clone()) {
                return Err(ObjectModelError::illegal_argument(format!(
                    "duplicate constant property {}",
                    key
                )));
            }
        }

        let registry = layout_registry();
        let layout = self
            .layout
            .unwrap_or_else(|| registry.default_layout());
        let layout =
            registry.with_implicit_casts(&layout, self.allow_int_to_long, self.allow_int_to_double);

        let mut internal = InternalFlags::empty();
        internal.set(InternalFlags::SHARED, self.shared);
        internal.set(InternalFlags::PROPERTY_ASSUMPTIONS, self.property_assumptions);

        let mut shape = layout.root_shape(RootKey {
            object_type: self.object_type,
            flags: self.shape_flags as u16,
            internal,
            shared_data: self.shared_data,
        });
        for (key, value, flags) in self.constants {
            shape = strategy::add_property(&shape, Property::new(key, Location::constant(value), flags))?;
        }
        Ok(shape)
    }
}
