//! Storage locations.
//!
//! A [`Location`] says where a property value lives and which values it
//! accepts. Value locations (constant, declared) keep the value in the shape
//! itself; instance locations address an in-object field or a slot of one
//! of the extension arrays.
//!
//! # Kinds
//!
//! | Kind | Storage | Accepts |
//! |------|---------|---------|
//! | `Constant`, `Declared` | the shape | only the equal value |
//! | `ObjectField`, `ObjectArray` | reference slot | anything |
//! | `IntField`, `IntArray` | 64-bit field / 1 word | int |
//! | `LongField`, `LongArray` | 64-bit field / 2 words | long (and int if allowed) |
//! | `DoubleField`, `DoubleArray` | 64-bit field / 2 words | double (and int if allowed) |
//! | `BooleanField` | 64-bit field | boolean |
//!
//! # Speculation
//!
//! Every instance location has a lazily created "assumed final" token that
//! is invalidated by the first non-initializing write. Reference locations
//! additionally speculate on the class of their contents (see
//! [`TypeAssumption`]).
//!
//! The set of values a location accepts never shrinks: generalization always
//! creates a new, wider location.

pub mod type_assumption;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::assumption::Assumption;
use crate::error::{ObjectModelError, ObjectModelResult, UnexpectedResult};
use crate::stats::stats;
use crate::store::FieldStore;
use crate::value::{Value, ValueClass};

pub use type_assumption::TypeAssumption;
use type_assumption::TypeAssumptionCell;

/// Primitive array words taken by an int slot.
pub const INT_ARRAY_SLOT_SIZE: usize = 1;
/// Primitive array words taken by a long slot.
pub const LONG_ARRAY_SLOT_SIZE: usize = 2;
/// Primitive array words taken by a double slot.
pub const DOUBLE_ARRAY_SLOT_SIZE: usize = 2;

// =============================================================================
// Location Kind
// =============================================================================

/// Placement and accepted type of a location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationKind {
    /// Value fixed in the shape for every object.
    Constant(Value),
    /// Placeholder default, replaced by an instance location on first write.
    Declared(Value),
    ObjectField { index: usize },
    ObjectArray { index: usize },
    IntField { index: usize },
    IntArray { index: usize },
    LongField { index: usize, allow_int: bool },
    LongArray { index: usize, allow_int: bool },
    DoubleField { index: usize, allow_int: bool },
    DoubleArray { index: usize, allow_int: bool },
    BooleanField { index: usize },
}

/// Erased type of a location, used to key add-property transitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationType {
    Constant(Value),
    Declared(Value),
    Object,
    Int,
    Long { allow_int: bool },
    Double { allow_int: bool },
    Boolean,
}

// =============================================================================
// Location
// =============================================================================

struct LocationInner {
    kind: LocationKind,
    /// `None` until first requested or first overwritten.
    final_assumption: ArcSwapOption<Assumption>,
    type_assumption: Option<TypeAssumptionCell>,
}

/// Immutable description of where a property value is stored.
///
/// Cloning yields another handle to the same location (and the same
/// speculation state). Equality is structural over the kind.
#[derive(Clone)]
pub struct Location(Arc<LocationInner>);

impl Location {
    /// Create a location of the given kind.
    ///
    /// Reference locations start with the [`TypeAssumption::any`]
    /// speculation.
    pub fn new(kind: LocationKind) -> Self {
        Self::with_type_assumption(kind, TypeAssumption::any())
    }

    /// Create a location; `type_assumption` is used only by reference kinds.
    pub fn with_type_assumption(kind: LocationKind, type_assumption: TypeAssumption) -> Self {
        let type_assumption = match kind {
            LocationKind::ObjectField { .. } | LocationKind::ObjectArray { .. } => {
                Some(TypeAssumptionCell::new(type_assumption))
            }
            _ => None,
        };
        Self(Arc::new(LocationInner {
            kind,
            final_assumption: ArcSwapOption::empty(),
            type_assumption,
        }))
    }

    /// Create a constant location.
    #[inline]
    pub fn constant(value: Value) -> Self {
        Self::new(LocationKind::Constant(value))
    }

    /// Create a declared location.
    #[inline]
    pub fn declared(value: Value) -> Self {
        Self::new(LocationKind::Declared(value))
    }

    #[inline]
    pub fn kind(&self) -> &LocationKind {
        &self.0.kind
    }

    /// Check if both handles refer to the same location object.
    #[inline]
    pub fn ptr_eq(&self, other: &Location) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Constant or declared.
    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self.kind(), LocationKind::Constant(_) | LocationKind::Declared(_))
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind(), LocationKind::Constant(_))
    }

    #[inline]
    pub fn is_declared(&self) -> bool {
        matches!(self.kind(), LocationKind::Declared(_))
    }

    /// Backed by per-object storage.
    #[inline]
    pub fn is_instance(&self) -> bool {
        !self.is_value()
    }

    /// Reference-typed instance location.
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(
            self.kind(),
            LocationKind::ObjectField { .. } | LocationKind::ObjectArray { .. }
        )
    }

    /// Primitive-typed instance location.
    #[inline]
    pub fn is_primitive(&self) -> bool {
        self.is_instance() && !self.is_object()
    }

    /// Stored in an in-object field.
    pub fn is_field(&self) -> bool {
        matches!(
            self.kind(),
            LocationKind::ObjectField { .. }
                | LocationKind::IntField { .. }
                | LocationKind::LongField { .. }
                | LocationKind::DoubleField { .. }
                | LocationKind::BooleanField { .. }
        )
    }

    /// Stored in one of the extension arrays.
    pub fn is_array(&self) -> bool {
        matches!(
            self.kind(),
            LocationKind::ObjectArray { .. }
                | LocationKind::IntArray { .. }
                | LocationKind::LongArray { .. }
                | LocationKind::DoubleArray { .. }
        )
    }

    /// Field or array index, `None` for value locations.
    pub fn index(&self) -> Option<usize> {
        match *self.kind() {
            LocationKind::Constant(_) | LocationKind::Declared(_) => None,
            LocationKind::ObjectField { index }
            | LocationKind::ObjectArray { index }
            | LocationKind::IntField { index }
            | LocationKind::IntArray { index }
            | LocationKind::LongField { index, .. }
            | LocationKind::LongArray { index, .. }
            | LocationKind::DoubleField { index, .. }
            | LocationKind::DoubleArray { index, .. }
            | LocationKind::BooleanField { index } => Some(index),
        }
    }

    /// Number of primitive array words this location occupies.
    pub fn primitive_array_words(&self) -> usize {
        match self.kind() {
            LocationKind::IntArray { .. } => INT_ARRAY_SLOT_SIZE,
            LocationKind::LongArray { .. } => LONG_ARRAY_SLOT_SIZE,
            LocationKind::DoubleArray { .. } => DOUBLE_ARRAY_SLOT_SIZE,
            _ => 0,
        }
    }

    /// Implicit int to long widening is allowed.
    pub fn is_implicit_cast_int_to_long(&self) -> bool {
        matches!(
            self.kind(),
            LocationKind::LongField { allow_int: true, .. }
                | LocationKind::LongArray { allow_int: true, .. }
        )
    }

    /// Implicit int to double widening is allowed.
    pub fn is_implicit_cast_int_to_double(&self) -> bool {
        matches!(
            self.kind(),
            LocationKind::DoubleField { allow_int: true, .. }
                | LocationKind::DoubleArray { allow_int: true, .. }
        )
    }

    /// Erased type used in transition keys.
    pub fn location_type(&self) -> LocationType {
        match self.kind() {
            LocationKind::Constant(v) => LocationType::Constant(v.clone()),
            LocationKind::Declared(v) => LocationType::Declared(v.clone()),
            LocationKind::ObjectField { .. } | LocationKind::ObjectArray { .. } => {
                LocationType::Object
            }
            LocationKind::IntField { .. } | LocationKind::IntArray { .. } => LocationType::Int,
            LocationKind::LongField { allow_int, .. } | LocationKind::LongArray { allow_int, .. } => {
                LocationType::Long {
                    allow_int: *allow_int,
                }
            }
            LocationKind::DoubleField { allow_int, .. }
            | LocationKind::DoubleArray { allow_int, .. } => LocationType::Double {
                allow_int: *allow_int,
            },
            LocationKind::BooleanField { .. } => LocationType::Boolean,
        }
    }

    /// The value of a constant or declared location.
    pub fn constant_value(&self) -> Option<&Value> {
        match self.kind() {
            LocationKind::Constant(v) | LocationKind::Declared(v) => Some(v),
            _ => None,
        }
    }

    // =========================================================================
    // Accepted Values
    // =========================================================================

    /// Check if `value` can be stored without generalizing.
    pub fn can_store(&self, value: &Value) -> bool {
        match self.kind() {
            LocationKind::Constant(v) | LocationKind::Declared(v) => v.same_value(value),
            LocationKind::ObjectField { .. } | LocationKind::ObjectArray { .. } => true,
            LocationKind::IntField { .. } | LocationKind::IntArray { .. } => {
                matches!(value, Value::Int(_))
            }
            LocationKind::LongField { allow_int, .. } | LocationKind::LongArray { allow_int, .. } => {
                matches!(value, Value::Long(_)) || (*allow_int && matches!(value, Value::Int(_)))
            }
            LocationKind::DoubleField { allow_int, .. }
            | LocationKind::DoubleArray { allow_int, .. } => {
                matches!(value, Value::Double(_)) || (*allow_int && matches!(value, Value::Int(_)))
            }
            LocationKind::BooleanField { .. } => matches!(value, Value::Boolean(_)),
        }
    }

    /// Check if every value accepted by `other` is accepted by `self`.
    pub fn is_assignable_from(&self, other: &Location) -> bool {
        match (self.kind(), other.kind()) {
            (LocationKind::Constant(a), LocationKind::Constant(b))
            | (LocationKind::Declared(a), LocationKind::Declared(b)) => a.same_value(b),
            (LocationKind::Constant(_) | LocationKind::Declared(_), _) => false,
            (LocationKind::ObjectField { .. } | LocationKind::ObjectArray { .. }, _) => true,
            (
                LocationKind::IntField { .. } | LocationKind::IntArray { .. },
                LocationKind::IntField { .. } | LocationKind::IntArray { .. },
            ) => true,
            (
                LocationKind::LongField { allow_int, .. } | LocationKind::LongArray { allow_int, .. },
                other_kind,
            ) => match other_kind {
                LocationKind::LongField { .. } | LocationKind::LongArray { .. } => true,
                LocationKind::IntField { .. } | LocationKind::IntArray { .. } => *allow_int,
                _ => false,
            },
            (
                LocationKind::DoubleField { allow_int, .. }
                | LocationKind::DoubleArray { allow_int, .. },
                other_kind,
            ) => match other_kind {
                LocationKind::DoubleField { .. } | LocationKind::DoubleArray { .. } => true,
                LocationKind::IntField { .. } | LocationKind::IntArray { .. } => *allow_int,
                _ => false,
            },
            (LocationKind::BooleanField { .. }, LocationKind::BooleanField { .. }) => true,
            _ => false,
        }
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Read the value.
    pub fn get(&self, store: &impl FieldStore) -> Value {
        match *self.kind() {
            LocationKind::Constant(ref v) | LocationKind::Declared(ref v) => v.clone(),
            LocationKind::ObjectField { index } => store.object_field(index),
            LocationKind::ObjectArray { index } => store.object_array(index),
            LocationKind::IntField { index } => Value::Int(store.primitive_field(index) as i32),
            LocationKind::IntArray { index } => Value::Int(store.int_array(index)),
            LocationKind::LongField { index, .. } => Value::Long(store.primitive_field(index) as i64),
            LocationKind::LongArray { index, .. } => Value::Long(store.long_array(index)),
            LocationKind::DoubleField { index, .. } => {
                Value::Double(f64::from_bits(store.primitive_field(index)))
            }
            LocationKind::DoubleArray { index, .. } => {
                Value::Double(f64::from_bits(store.long_array(index) as u64))
            }
            LocationKind::BooleanField { index } => Value::Boolean(store.primitive_field(index) != 0),
        }
    }

    /// Read the value, relying on the type speculation in compiled code.
    ///
    /// Interpreted readers (`compiled == false`) get the plain value. Compiled
    /// readers of a reference location may treat the result as an instance
    /// of [`assumed_class`](Self::assumed_class).
    pub fn get_assumed(&self, store: &impl FieldStore, compiled: bool) -> Value {
        let value = self.get(store);
        if compiled {
            if let Some(cell) = &self.0.type_assumption {
                let current = cell.get();
                debug_assert!(
                    !current.assumption().is_valid() || current.accepts(&value),
                    "{} violates {}",
                    self,
                    current
                );
            }
        }
        value
    }

    /// Write `value`.
    ///
    /// `init` marks the first write of the property on this object; any other
    /// write proves the location is not final. Fails with
    /// [`ObjectModelError::IncompatibleLocation`] if the value is not
    /// accepted; the high-level put operations generalize instead.
    pub fn set(&self, store: &mut impl FieldStore, value: Value, init: bool) -> ObjectModelResult<()> {
        if !self.can_store(&value) {
            if self.is_value() && init {
                return Err(ObjectModelError::unsupported(format!(
                    "cannot initialize {} with {:?}",
                    self, value
                )));
            }
            return Err(self.incompatible(&value));
        }
        if self.is_value() {
            return Ok(());
        }
        if !init {
            self.maybe_invalidate_final_assumption();
        }
        if let Some(cell) = &self.0.type_assumption {
            cell.generalize_for(&value, self);
        }
        self.write(store, value);
        Ok(())
    }

    /// Store an accepted value without touching speculation state.
    fn write(&self, store: &mut impl FieldStore, value: Value) {
        match (self.kind(), value) {
            (LocationKind::ObjectField { index }, v) => store.set_object_field(*index, v),
            (LocationKind::ObjectArray { index }, v) => store.set_object_array(*index, v),
            (LocationKind::IntField { index }, Value::Int(v)) => {
                store.set_primitive_field(*index, v as u32 as u64)
            }
            (LocationKind::IntArray { index }, Value::Int(v)) => store.set_int_array(*index, v),
            (LocationKind::LongField { index, .. }, Value::Long(v)) => {
                store.set_primitive_field(*index, v as u64)
            }
            (LocationKind::LongField { index, .. }, Value::Int(v)) => {
                store.set_primitive_field(*index, v as i64 as u64)
            }
            (LocationKind::LongArray { index, .. }, Value::Long(v)) => store.set_long_array(*index, v),
            (LocationKind::LongArray { index, .. }, Value::Int(v)) => {
                store.set_long_array(*index, v as i64)
            }
            (LocationKind::DoubleField { index, .. }, Value::Double(v)) => {
                store.set_primitive_field(*index, v.to_bits())
            }
            (LocationKind::DoubleField { index, .. }, Value::Int(v)) => {
                store.set_primitive_field(*index, (v as f64).to_bits())
            }
            (LocationKind::DoubleArray { index, .. }, Value::Double(v)) => {
                store.set_long_array(*index, v.to_bits() as i64)
            }
            (LocationKind::DoubleArray { index, .. }, Value::Int(v)) => {
                store.set_long_array(*index, (v as f64).to_bits() as i64)
            }
            (LocationKind::BooleanField { index }, Value::Boolean(v)) => {
                store.set_primitive_field(*index, v as u64)
            }
            (_, value) => debug_assert!(false, "{} cannot store {:?}", self, value),
        }
    }

    fn incompatible(&self, value: &Value) -> ObjectModelError {
        ObjectModelError::IncompatibleLocation {
            location: self.to_string(),
            value: format!("{:?}", value),
        }
    }

    // =========================================================================
    // Typed Fast Paths
    // =========================================================================

    /// Read an int, or report the value actually stored.
    pub fn get_int(&self, store: &impl FieldStore) -> Result<i32, UnexpectedResult> {
        match *self.kind() {
            LocationKind::IntField { index } => Ok(store.primitive_field(index) as i32),
            LocationKind::IntArray { index } => Ok(store.int_array(index)),
            _ => match self.get(store) {
                Value::Int(v) => Ok(v),
                other => Err(UnexpectedResult(other)),
            },
        }
    }

    /// Read a long, or report the value actually stored.
    pub fn get_long(&self, store: &impl FieldStore) -> Result<i64, UnexpectedResult> {
        match *self.kind() {
            LocationKind::LongField { index, .. } => Ok(store.primitive_field(index) as i64),
            LocationKind::LongArray { index, .. } => Ok(store.long_array(index)),
            _ => match self.get(store) {
                Value::Long(v) => Ok(v),
                other => Err(UnexpectedResult(other)),
            },
        }
    }

    /// Read a double, or report the value actually stored.
    pub fn get_double(&self, store: &impl FieldStore) -> Result<f64, UnexpectedResult> {
        match *self.kind() {
            LocationKind::DoubleField { index, .. } => Ok(f64::from_bits(store.primitive_field(index))),
            LocationKind::DoubleArray { index, .. } => {
                Ok(f64::from_bits(store.long_array(index) as u64))
            }
            _ => match self.get(store) {
                Value::Double(v) => Ok(v),
                other => Err(UnexpectedResult(other)),
            },
        }
    }

    /// Read a boolean, or report the value actually stored.
    pub fn get_boolean(&self, store: &impl FieldStore) -> Result<bool, UnexpectedResult> {
        match *self.kind() {
            LocationKind::BooleanField { index } => Ok(store.primitive_field(index) != 0),
            _ => match self.get(store) {
                Value::Boolean(v) => Ok(v),
                other => Err(UnexpectedResult(other)),
            },
        }
    }

    #[inline]
    pub fn set_int(&self, store: &mut impl FieldStore, value: i32, init: bool) -> ObjectModelResult<()> {
        self.set(store, Value::Int(value), init)
    }

    #[inline]
    pub fn set_long(&self, store: &mut impl FieldStore, value: i64, init: bool) -> ObjectModelResult<()> {
        self.set(store, Value::Long(value), init)
    }

    #[inline]
    pub fn set_double(&self, store: &mut impl FieldStore, value: f64, init: bool) -> ObjectModelResult<()> {
        self.set(store, Value::Double(value), init)
    }

    #[inline]
    pub fn set_boolean(&self, store: &mut impl FieldStore, value: bool, init: bool) -> ObjectModelResult<()> {
        self.set(store, Value::Boolean(value), init)
    }

    // =========================================================================
    // Finality
    // =========================================================================

    /// Check if no overwrite has been observed yet.
    ///
    /// Value locations are always final.
    pub fn is_assumed_final(&self) -> bool {
        if self.is_value() {
            return true;
        }
        match &*self.0.final_assumption.load() {
            None => true,
            Some(assumption) => assumption.is_valid(),
        }
    }

    /// Token that stays valid while the location is assumed final.
    ///
    /// Created on first request.
    pub fn final_assumption(&self) -> Assumption {
        if self.is_value() {
            return Assumption::always_valid();
        }
        loop {
            let current = self.0.final_assumption.load_full();
            if let Some(assumption) = &current {
                return Assumption::clone(assumption);
            }
            let fresh = Arc::new(Assumption::new("final location"));
            let previous = self
                .0
                .final_assumption
                .compare_and_swap(&current, Some(Arc::clone(&fresh)));
            if previous.is_none() {
                return Assumption::clone(&fresh);
            }
        }
    }

    fn maybe_invalidate_final_assumption(&self) {
        loop {
            let current = self.0.final_assumption.load_full();
            if let Some(assumption) = &current {
                if assumption.invalidate(&format!("overwrite of {}", self)) {
                    stats().record_final_invalidation();
                }
                return;
            }
            // Never requested: skip straight to the shared invalid token.
            let previous = self
                .0
                .final_assumption
                .compare_and_swap(&current, Some(Arc::new(Assumption::never_valid())));
            if previous.is_none() {
                stats().record_final_invalidation();
                return;
            }
        }
    }

    // =========================================================================
    // Type Speculation
    // =========================================================================

    /// Current type speculation of a reference location.
    pub fn type_assumption(&self) -> Option<TypeAssumption> {
        self.0.type_assumption.as_ref().map(TypeAssumptionCell::get)
    }

    /// Speculated class of the stored values, `Any` if not speculating.
    pub fn assumed_class(&self) -> ValueClass {
        match self.type_assumption() {
            Some(current) if current.assumption().is_valid() => current.class(),
            _ => ValueClass::Any,
        }
    }

    /// Widen the type speculation to also cover `other`.
    pub fn merge_type_assumption(&self, other: &TypeAssumption) {
        if let Some(cell) = &self.0.type_assumption {
            cell.merge(other, self);
        }
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.kind() == other.kind()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            LocationKind::Constant(v) => write!(f, "={:?}", v),
            LocationKind::Declared(v) => write!(f, "declared={:?}", v),
            LocationKind::ObjectField { index } => write!(f, "object@{}", index),
            LocationKind::ObjectArray { index } => write!(f, "object[{}]", index),
            LocationKind::IntField { index } => write!(f, "int@{}", index),
            LocationKind::IntArray { index } => write!(f, "int[{}]", index),
            LocationKind::LongField { index, allow_int } => {
                write!(f, "long@{}{}", index, if *allow_int { "(int)" } else { "" })
            }
            LocationKind::LongArray { index, allow_int } => {
                write!(f, "long[{}]{}", index, if *allow_int { "(int)" } else { "" })
            }
            LocationKind::DoubleField { index, allow_int } => {
                write!(f, "double@{}{}", index, if *allow_int { "(int)" } else { "" })
            }
            LocationKind::DoubleArray { index, allow_int } => {
                write!(f, "double[{}]{}", index, if *allow_int { "(int)" } else { "" })
            }
            LocationKind::BooleanField { index } => write!(f, "boolean@{}", index),
        }
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)?;
        if self.is_instance() {
            write!(f, "[final={}]", self.is_assumed_final())?;
        }
        if let Some(current) = self.type_assumption() {
            write!(f, "[type={}]", current)?;
        }
        Ok(())
    }
}
