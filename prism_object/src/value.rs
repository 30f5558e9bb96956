//! Values stored in dynamic objects and the class lattice used for
//! reference-type speculation.
//!
//! `Value` distinguishes the primitive kinds the storage layer specializes on
//! (`int`, `long`, `double`, `boolean`) from references (strings, objects and
//! null). Every value has a [`ValueClass`]; reference locations speculate on
//! the most specific class they have seen so far.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::object::DynamicObject;

// =============================================================================
// Value Class
// =============================================================================

/// Runtime class of a value.
///
/// Forms a small single-inheritance lattice:
///
/// ```text
///                 Any
///        +------+--+------+--------+
///     Number  Boolean  String  Object
///   +---+---+
///  Int Long Double
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueClass {
    /// Top of the lattice (any reference, including null).
    Any,
    /// Boxed numbers.
    Number,
    /// Boxed 32-bit integer.
    Int,
    /// Boxed 64-bit integer.
    Long,
    /// Boxed 64-bit float.
    Double,
    /// Boxed boolean.
    Boolean,
    /// Immutable string.
    String,
    /// Dynamic object reference.
    Object,
}

impl ValueClass {
    /// Direct superclass, `None` for [`ValueClass::Any`].
    #[inline]
    pub const fn superclass(self) -> Option<ValueClass> {
        match self {
            ValueClass::Any => None,
            ValueClass::Int | ValueClass::Long | ValueClass::Double => Some(ValueClass::Number),
            ValueClass::Number | ValueClass::Boolean | ValueClass::String | ValueClass::Object => {
                Some(ValueClass::Any)
            }
        }
    }

    /// Check if a value of class `other` is an instance of `self`.
    pub fn is_assignable_from(self, other: ValueClass) -> bool {
        let mut current = Some(other);
        while let Some(class) = current {
            if class == self {
                return true;
            }
            current = class.superclass();
        }
        false
    }

    /// Narrowest class that both `self` and `other` are assignable to.
    pub fn common_superclass(self, other: ValueClass) -> ValueClass {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.is_assignable_from(other) {
                return class;
            }
            current = class.superclass();
        }
        ValueClass::Any
    }

    /// Check if a value is an instance of this class.
    ///
    /// Null is an instance of no class; nullability is tracked separately.
    #[inline]
    pub fn is_instance(self, value: &Value) -> bool {
        value.class().is_some_and(|class| self.is_assignable_from(class))
    }

    /// Class name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            ValueClass::Any => "Any",
            ValueClass::Number => "Number",
            ValueClass::Int => "Int",
            ValueClass::Long => "Long",
            ValueClass::Double => "Double",
            ValueClass::Boolean => "Boolean",
            ValueClass::String => "String",
            ValueClass::Object => "Object",
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A value that can be stored in a dynamic object property.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// The null reference.
    #[default]
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// Immutable string.
    Str(Arc<str>),
    /// Reference to another dynamic object.
    Object(Arc<DynamicObject>),
}

impl Value {
    /// Create a string value.
    #[inline]
    pub fn string(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Runtime class, `None` for null.
    #[inline]
    pub fn class(&self) -> Option<ValueClass> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(ValueClass::Int),
            Value::Long(_) => Some(ValueClass::Long),
            Value::Double(_) => Some(ValueClass::Double),
            Value::Boolean(_) => Some(ValueClass::Boolean),
            Value::Str(_) => Some(ValueClass::String),
            Value::Object(_) => Some(ValueClass::Object),
        }
    }

    /// Check for null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as `i32` if this is an int.
    #[inline]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as `i64` if this is a long.
    #[inline]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as `f64` if this is a double.
    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as `bool` if this is a boolean.
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the object reference if this is an object.
    #[inline]
    pub fn as_object(&self) -> Option<&Arc<DynamicObject>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Identity-or-equality comparison used by value locations.
    ///
    /// Primitives compare by value (doubles by bit pattern, so `NaN` equals
    /// itself), strings by content, objects by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Boolean(v) => v.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Object(obj) => (Arc::as_ptr(obj) as usize).hash(state),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Arc<DynamicObject>> for Value {
    fn from(obj: Arc<DynamicObject>) -> Self {
        Value::Object(obj)
    }
}
