//! Backing storage of dynamic objects.
//!
//! Locations never touch memory directly; they go through the [`FieldStore`]
//! capability, which exposes typed access at an index computed once when the
//! location is created. [`ObjectStorage`] is the concrete store used by
//! [`DynamicObject`](crate::DynamicObject):
//!
//! ```text
//! +-------------------+-----------------------+
//! | object fields     | fixed, per layout     |  Value
//! | primitive fields  | fixed, per layout     |  u64
//! | object array      | grows with the shape  |  Value
//! | primitive array   | grows with the shape  |  u32 words
//! +-------------------+-----------------------+
//! ```
//!
//! The primitive array is word addressed. Ints take one word; longs and
//! doubles take two consecutive words starting at an even index, low word
//! first.

use smallvec::SmallVec;

use crate::value::Value;

/// Typed access to the slots of an object.
///
/// Indices are always in bounds for the shape the location was allocated
/// on; callers guarantee storage and shape are consistent.
pub trait FieldStore {
    /// Read an in-object reference field.
    fn object_field(&self, index: usize) -> Value;
    /// Write an in-object reference field.
    fn set_object_field(&mut self, index: usize, value: Value);

    /// Read the raw bits of an in-object primitive field.
    fn primitive_field(&self, index: usize) -> u64;
    /// Write the raw bits of an in-object primitive field.
    fn set_primitive_field(&mut self, index: usize, bits: u64);

    /// Read a slot of the reference extension array.
    fn object_array(&self, index: usize) -> Value;
    /// Write a slot of the reference extension array.
    fn set_object_array(&mut self, index: usize, value: Value);

    /// Read one word of the primitive extension array.
    fn word(&self, index: usize) -> u32;
    /// Write one word of the primitive extension array.
    fn set_word(&mut self, index: usize, word: u32);

    /// Read an int stored at word `index`.
    #[inline]
    fn int_array(&self, index: usize) -> i32 {
        self.word(index) as i32
    }

    /// Write an int at word `index`.
    #[inline]
    fn set_int_array(&mut self, index: usize, value: i32) {
        self.set_word(index, value as u32);
    }

    /// Read a 64-bit value stored in words `index` and `index + 1`.
    #[inline]
    fn long_array(&self, index: usize) -> i64 {
        debug_assert!(index % 2 == 0, "misaligned long slot {}", index);
        let low = self.word(index) as u64;
        let high = self.word(index + 1) as u64;
        ((high << 32) | low) as i64
    }

    /// Write a 64-bit value into words `index` and `index + 1`.
    #[inline]
    fn set_long_array(&mut self, index: usize, value: i64) {
        debug_assert!(index % 2 == 0, "misaligned long slot {}", index);
        let bits = value as u64;
        self.set_word(index, bits as u32);
        self.set_word(index + 1, (bits >> 32) as u32);
    }
}

// =============================================================================
// Object Storage
// =============================================================================

/// Storage of one dynamic object.
#[derive(Debug, Clone, Default)]
pub struct ObjectStorage {
    object_fields: SmallVec<[Value; 4]>,
    primitive_fields: SmallVec<[u64; 4]>,
    object_array: Vec<Value>,
    primitive_array: Vec<u32>,
}

impl ObjectStorage {
    /// Create storage with the given number of in-object fields and empty
    /// extension arrays.
    pub fn new(object_fields: usize, primitive_fields: usize) -> Self {
        let mut storage = Self::default();
        storage.object_fields.resize(object_fields, Value::Null);
        storage.primitive_fields.resize(primitive_fields, 0);
        storage
    }

    /// Grow or shrink the extension arrays to the given capacities.
    ///
    /// New slots are null / zero.
    pub fn resize(&mut self, object_capacity: usize, primitive_capacity: usize) {
        if self.object_array.len() != object_capacity {
            self.object_array.resize(object_capacity, Value::Null);
        }
        if self.primitive_array.len() != primitive_capacity {
            self.primitive_array.resize(primitive_capacity, 0);
        }
    }

    /// Number of in-object reference fields.
    #[inline]
    pub fn object_field_count(&self) -> usize {
        self.object_fields.len()
    }

    /// Number of in-object primitive fields.
    #[inline]
    pub fn primitive_field_count(&self) -> usize {
        self.primitive_fields.len()
    }

    /// Current length of the reference extension array.
    #[inline]
    pub fn object_array_len(&self) -> usize {
        self.object_array.len()
    }

    /// Current length (in words) of the primitive extension array.
    #[inline]
    pub fn primitive_array_len(&self) -> usize {
        self.primitive_array.len()
    }

    /// Clear every slot and drop both extension arrays.
    pub fn clear(&mut self) {
        self.object_fields.iter_mut().for_each(|v| *v = Value::Null);
        self.primitive_fields.iter_mut().for_each(|v| *v = 0);
        self.object_array = Vec::new();
        self.primitive_array = Vec::new();
    }
}

impl FieldStore for ObjectStorage {
    #[inline]
    fn object_field(&self, index: usize) -> Value {
        self.object_fields[index].clone()
    }

    #[inline]
    fn set_object_field(&mut self, index: usize, value: Value) {
        self.object_fields[index] = value;
    }

    #[inline]
    fn primitive_field(&self, index: usize) -> u64 {
        self.primitive_fields[index]
    }

    #[inline]
    fn set_primitive_field(&mut self, index: usize, bits: u64) {
        self.primitive_fields[index] = bits;
    }

    #[inline]
    fn object_array(&self, index: usize) -> Value {
        self.object_array[index].clone()
    }

    #[inline]
    fn set_object_array(&mut self, index: usize, value: Value) {
        self.object_array[index] = value;
    }

    #[inline]
    fn word(&self, index: usize) -> u32 {
        self.primitive_array[index]
    }

    #[inline]
    fn set_word(&mut self, index: usize, word: u32) {
        self.primitive_array[index] = word;
    }
}
