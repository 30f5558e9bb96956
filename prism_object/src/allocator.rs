//! Storage slot allocation.
//!
//! An [`Allocator`] is a cursor over the storage sizes of one shape. Each
//! allocation hands out the next free slot of the right kind and advances the
//! cursor; the resulting sizes become the sizes of the derived shape.
//!
//! Placement order for a new instance location:
//!
//! 1. an in-object field, while the layout has one left;
//! 2. a slot of the matching extension array;
//! 3. for primitives without array support, a reference location.
//!
//! Primitive array slots are word addressed. Longs and doubles start at an
//! even word; a misaligned cursor skips one word. Extension array capacity
//! starts at the layout's initial capacity and doubles when exceeded.

use crate::config::LayoutConfig;
use crate::error::{ObjectModelError, ObjectModelResult};
use crate::location::{
    Location, LocationKind, LocationType, TypeAssumption, DOUBLE_ARRAY_SLOT_SIZE, INT_ARRAY_SLOT_SIZE,
    LONG_ARRAY_SLOT_SIZE,
};
use crate::shape::{Shape, StorageSizes};
use crate::value::{Value, ValueClass};

/// Slot cursor over the storage of one shape.
pub struct Allocator<'a> {
    config: &'a LayoutConfig,
    sizes: StorageSizes,
}

impl<'a> Allocator<'a> {
    /// Start allocating after the slots used by `shape`.
    pub fn new(shape: &'a Shape) -> Self {
        Self {
            config: shape.layout().config(),
            sizes: *shape.sizes(),
        }
    }

    /// Storage sizes including everything allocated so far.
    #[inline]
    pub fn sizes(&self) -> StorageSizes {
        self.sizes
    }

    // =========================================================================
    // Value-Guided Allocation
    // =========================================================================

    /// Allocate the narrowest location that can hold `value`.
    pub fn location_for_value(&mut self, value: &Value) -> ObjectModelResult<Location> {
        match value {
            Value::Int(_) => self.int_location(),
            Value::Long(_) => self.long_location(self.config.allow_int_to_long),
            Value::Double(_) => self.double_location(self.config.allow_int_to_double),
            Value::Boolean(_) => self.boolean_location(),
            _ => self.object_location(TypeAssumption::from_value(value)),
        }
    }

    /// Allocate a location accepting everything `old` accepts plus `value`.
    pub fn upcast_location(&mut self, old: &Location, value: &Value) -> ObjectModelResult<Location> {
        if old.is_value() {
            return self.location_for_value(value);
        }
        let int_slot = matches!(
            old.kind(),
            LocationKind::IntField { .. } | LocationKind::IntArray { .. }
        );
        match value {
            Value::Double(_) if int_slot && self.config.allow_int_to_double => self.double_location(true),
            Value::Long(_) if int_slot && self.config.allow_int_to_long => self.long_location(true),
            _ => {
                let old_class = match old.location_type() {
                    LocationType::Int => ValueClass::Int,
                    LocationType::Long { .. } => ValueClass::Long,
                    LocationType::Double { allow_int: false } => ValueClass::Double,
                    LocationType::Double { allow_int: true } => ValueClass::Number,
                    LocationType::Boolean => ValueClass::Boolean,
                    _ => old.assumed_class(),
                };
                let old_non_null = old.is_primitive();
                let type_assumption = match value.class() {
                    Some(class) => TypeAssumption::new(old_class.common_superclass(class), old_non_null),
                    None => TypeAssumption::new(old_class, false),
                };
                self.object_location(type_assumption)
            }
        }
    }

    /// Allocate a fresh location of the same erased type as `location`.
    ///
    /// Value locations are returned as is. Reference locations keep a copy
    /// of the current type speculation.
    pub fn relocate(&mut self, location: &Location) -> ObjectModelResult<Location> {
        match location.location_type() {
            LocationType::Constant(_) | LocationType::Declared(_) => Ok(location.clone()),
            LocationType::Object => {
                self.object_location(location.type_assumption().unwrap_or_else(TypeAssumption::any))
            }
            LocationType::Int => self.int_location(),
            LocationType::Long { allow_int } => self.long_location(allow_int),
            LocationType::Double { allow_int } => self.double_location(allow_int),
            LocationType::Boolean => self.boolean_location(),
        }
    }

    // =========================================================================
    // Typed Allocation
    // =========================================================================

    /// Allocate a reference location.
    pub fn object_location(&mut self, type_assumption: TypeAssumption) -> ObjectModelResult<Location> {
        let kind = if self.sizes.object_fields < self.config.inline_object_fields {
            LocationKind::ObjectField {
                index: self.sizes.object_fields,
            }
        } else {
            LocationKind::ObjectArray {
                index: self.sizes.object_array_size,
            }
        };
        self.allocate(Location::with_type_assumption(kind, type_assumption))
    }

    pub fn int_location(&mut self) -> ObjectModelResult<Location> {
        if let Some(index) = self.primitive_field() {
            return self.allocate(Location::new(LocationKind::IntField { index }));
        }
        match self.primitive_array_slot(INT_ARRAY_SLOT_SIZE) {
            Some(index) => self.allocate(Location::new(LocationKind::IntArray { index })),
            None => self.object_location(TypeAssumption::new(ValueClass::Int, true)),
        }
    }

    pub fn long_location(&mut self, allow_int: bool) -> ObjectModelResult<Location> {
        if let Some(index) = self.primitive_field() {
            return self.allocate(Location::new(LocationKind::LongField { index, allow_int }));
        }
        match self.primitive_array_slot(LONG_ARRAY_SLOT_SIZE) {
            Some(index) => self.allocate(Location::new(LocationKind::LongArray { index, allow_int })),
            None => self.object_location(TypeAssumption::new(ValueClass::Long, true)),
        }
    }

    pub fn double_location(&mut self, allow_int: bool) -> ObjectModelResult<Location> {
        if let Some(index) = self.primitive_field() {
            return self.allocate(Location::new(LocationKind::DoubleField { index, allow_int }));
        }
        match self.primitive_array_slot(DOUBLE_ARRAY_SLOT_SIZE) {
            Some(index) => self.allocate(Location::new(LocationKind::DoubleArray { index, allow_int })),
            None => {
                let class = if allow_int {
                    ValueClass::Number
                } else {
                    ValueClass::Double
                };
                self.object_location(TypeAssumption::new(class, true))
            }
        }
    }

    /// Booleans only live in in-object primitive fields.
    pub fn boolean_location(&mut self) -> ObjectModelResult<Location> {
        match self.primitive_field() {
            Some(index) => self.allocate(Location::new(LocationKind::BooleanField { index })),
            None => self.object_location(TypeAssumption::new(ValueClass::Boolean, true)),
        }
    }

    fn primitive_field(&self) -> Option<usize> {
        (self.sizes.primitive_fields < self.config.inline_primitive_fields).then_some(self.sizes.primitive_fields)
    }

    fn primitive_array_slot(&self, words: usize) -> Option<usize> {
        if !self.config.primitive_array_locations {
            return None;
        }
        let cursor = self.sizes.primitive_array_size;
        Some(if words > 1 && cursor % 2 != 0 { cursor + 1 } else { cursor })
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    fn allocate(&mut self, location: Location) -> ObjectModelResult<Location> {
        self.add_location(&location)?;
        Ok(location)
    }

    /// Reserve the slots of a location allocated elsewhere.
    pub fn add_location(&mut self, location: &Location) -> ObjectModelResult<()> {
        let sizes = &mut self.sizes;
        match *location.kind() {
            LocationKind::Constant(_) | LocationKind::Declared(_) => return Ok(()),
            LocationKind::ObjectField { index } => {
                sizes.object_fields = sizes.object_fields.max(index + 1);
            }
            LocationKind::IntField { index }
            | LocationKind::LongField { index, .. }
            | LocationKind::DoubleField { index, .. }
            | LocationKind::BooleanField { index } => {
                sizes.primitive_fields = sizes.primitive_fields.max(index + 1);
            }
            LocationKind::ObjectArray { index } => {
                sizes.object_array_size = sizes.object_array_size.max(index + 1);
                sizes.object_array_capacity =
                    grow(sizes.object_array_capacity, sizes.object_array_size, self.config.initial_capacity);
            }
            LocationKind::IntArray { index }
            | LocationKind::LongArray { index, .. }
            | LocationKind::DoubleArray { index, .. } => {
                let end = index + location.primitive_array_words();
                sizes.primitive_array_size = sizes.primitive_array_size.max(end);
                sizes.primitive_array_capacity = grow(
                    sizes.primitive_array_capacity,
                    sizes.primitive_array_size,
                    self.config.initial_capacity,
                );
            }
        }
        if self.sizes.used_slots() > self.config.max_dynamic_fields {
            return Err(ObjectModelError::illegal_argument(format!(
                "too many dynamic fields (limit {})",
                self.config.max_dynamic_fields
            )));
        }
        Ok(())
    }
}

/// Capacity needed to hold `size` slots, starting at `initial` and doubling.
fn grow(capacity: usize, size: usize, initial: usize) -> usize {
    if size <= capacity {
        return capacity;
    }
    let mut capacity = capacity.max(initial).max(1);
    while capacity < size {
        capacity *= 2;
    }
    capacity
}
