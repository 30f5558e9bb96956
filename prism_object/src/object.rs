//! Dynamic objects.
//!
//! A [`DynamicObject`] pairs a shape with storage laid out by that shape.
//! The pair is one immutable snapshot published through an atomically
//! swapped pointer, so a reader never sees a shape without its storage and
//! never waits for a writer. Writers apply their change to a private copy
//! of the snapshot and publish it with a compare-and-swap; a writer that
//! loses the race retries against the winner's snapshot.
//!
//! Objects on an obsolete shape migrate lazily on their next access.

use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};

use crate::error::{ObjectModelError, ObjectModelResult, UnexpectedResult};
use crate::layout::ObjectType;
use crate::location::Location;
use crate::property::{Property, PropertyKey};
use crate::shape::{Shape, MAX_SHAPE_FLAGS};
use crate::stats::stats;
use crate::store::ObjectStorage;
use crate::strategy::{self, PutFlags};
use crate::transition::Transition;
use crate::value::Value;

#[derive(Clone)]
struct ObjectState {
    shape: Arc<Shape>,
    storage: ObjectStorage,
}

/// Outcome of a write applied to a private copy of the state.
enum Commit<R> {
    /// Publish the copy.
    Publish(R),
    /// Nothing changed; drop the copy.
    Discard(R),
}

impl<R> Commit<R> {
    #[inline]
    fn when(changed: bool, result: R) -> Self {
        if changed {
            Commit::Publish(result)
        } else {
            Commit::Discard(result)
        }
    }
}

/// An object whose properties are described by a [`Shape`].
pub struct DynamicObject {
    state: ArcSwap<ObjectState>,
}

fn storage_for(shape: &Shape) -> ObjectStorage {
    let config = shape.layout().config();
    let sizes = shape.sizes();
    let mut storage = ObjectStorage::new(config.inline_object_fields, config.inline_primitive_fields);
    storage.resize(sizes.object_array_capacity, sizes.primitive_array_capacity);
    storage
}

fn check_lengths(keys: usize, other: usize, what: &str) -> ObjectModelResult<()> {
    if keys != other {
        return Err(ObjectModelError::illegal_argument(format!(
            "{} keys but {} {}",
            keys, other, what
        )));
    }
    Ok(())
}

// =============================================================================
// Object State
// =============================================================================

impl ObjectState {
    /// Move off an invalid shape. Returns `true` if the shape changed.
    fn update_shape(&mut self) -> ObjectModelResult<bool> {
        if self.shape.is_valid() {
            return Ok(false);
        }
        let target = strategy::ensure_valid(&self.shape)?;
        self.migrate(target)?;
        Ok(true)
    }

    /// Switch to `target`, moving every property value into its new slot.
    fn migrate(&mut self, target: Arc<Shape>) -> ObjectModelResult<()> {
        if Arc::ptr_eq(&self.shape, &target) {
            return Ok(());
        }
        // Appends and metadata changes keep every slot in place.
        let extends = target
            .parent()
            .is_some_and(|parent| Arc::ptr_eq(parent, &self.shape))
            && matches!(
                target.transition_from_parent(),
                Some(
                    Transition::AddProperty { .. }
                        | Transition::ObjectType(_)
                        | Transition::ObjectFlags(_)
                        | Transition::Share
                )
            );
        if extends {
            let sizes = target.sizes();
            self.storage
                .resize(sizes.object_array_capacity, sizes.primitive_array_capacity);
            self.shape = target;
            return Ok(());
        }

        // Read everything before writing anything: slots may move.
        let moved: Vec<(Location, Value)> = target
            .property_map()
            .properties()
            .into_iter()
            .filter(|property| property.location().is_instance())
            .filter_map(|property| {
                let old = self.shape.get_property(property.key())?;
                let value = old.location().get(&self.storage);
                // A value location turning into a slot is written by the put
                // that caused it; its old value need not fit.
                if old.location().is_value() && !property.location().can_store(&value) {
                    return None;
                }
                Some((property.location().clone(), value))
            })
            .collect();
        let mut storage = storage_for(&target);
        for (location, value) in moved {
            location.set(&mut storage, value, true)?;
        }
        log::debug!(
            "object migrated from shape {} to {}",
            self.shape.id().raw(),
            target.id().raw()
        );
        stats().record_migration();
        self.storage = storage;
        self.shape = target;
        Ok(())
    }

    fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.shape
            .get_property(key)
            .map(|property| property.location().get(&self.storage))
    }

    /// Returns `Ok(false)` if the put mode rejected the key.
    fn put(&mut self, key: &PropertyKey, value: Value, flags: u32, put_flags: PutFlags) -> ObjectModelResult<bool> {
        self.update_shape()?;
        let before = self.shape.get_property(key).map(|p| p.location().clone());
        let absent_only = put_flags.intersects(PutFlags::IF_ABSENT | PutFlags::DECLARE);
        if (absent_only && before.is_some()) || (put_flags.contains(PutFlags::IF_PRESENT) && before.is_none()) {
            return Ok(false);
        }

        let target = strategy::define_property(&self.shape, key, &value, flags, put_flags)?;
        self.migrate(target)?;
        let location = self
            .shape
            .get_property(key)
            .map(|p| p.location().clone())
            .ok_or_else(|| ObjectModelError::unsupported(format!("property {} missing after put", key)))?;
        let init = before.map_or(true, |b| !b.ptr_eq(&location));
        location.set(&mut self.storage, value, init)?;
        Ok(true)
    }
}

// =============================================================================
// Construction & Publication
// =============================================================================

impl DynamicObject {
    /// Create an object with storage for `shape`.
    ///
    /// Instance properties already in `shape` start out null / zero.
    pub fn new(shape: &Arc<Shape>) -> ObjectModelResult<Self> {
        let shape = strategy::ensure_valid(shape)?;
        Ok(Self {
            state: ArcSwap::from_pointee(ObjectState {
                storage: storage_for(&shape),
                shape,
            }),
        })
    }

    /// Current state, migrated first if the shape went stale.
    ///
    /// If migration fails the old state is kept; its shape still describes
    /// its storage, so reads stay correct.
    fn read(&self) -> Guard<Arc<ObjectState>> {
        loop {
            let current = self.state.load();
            if current.shape.is_valid() {
                return current;
            }
            let mut next = ObjectState::clone(&current);
            if let Err(error) = next.update_shape() {
                log::debug!("reading through obsolete shape {}: {}", current.shape.id().raw(), error);
                return current;
            }
            // Losing the race is fine: the winner's state is read next round.
            self.state.compare_and_swap(&current, Arc::new(next));
        }
    }

    /// Apply `write` to a copy of the current state and publish the copy.
    ///
    /// `write` runs again against the newer state if another writer
    /// published first. An error leaves the object untouched.
    fn commit<R>(&self, mut write: impl FnMut(&mut ObjectState) -> ObjectModelResult<Commit<R>>) -> ObjectModelResult<R> {
        loop {
            let current = self.state.load_full();
            let mut next = ObjectState::clone(&current);
            match write(&mut next)? {
                Commit::Discard(result) => return Ok(result),
                Commit::Publish(result) => {
                    let previous = self.state.compare_and_swap(&current, Arc::new(next));
                    if Arc::ptr_eq(&previous, &current) {
                        return Ok(result);
                    }
                }
            }
        }
    }

    /// Move to the shape `compute` derives from the current one.
    fn transition(&self, compute: impl Fn(&Arc<Shape>) -> ObjectModelResult<Arc<Shape>>) -> ObjectModelResult<()> {
        self.commit(|state| {
            let migrated = state.update_shape()?;
            let target = compute(&state.shape)?;
            let changed = !Arc::ptr_eq(&target, &state.shape);
            state.migrate(target)?;
            Ok(Commit::when(migrated || changed, ()))
        })
    }

    /// Current shape.
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.read().shape)
    }

    /// Migrate off an obsolete shape now. Returns `true` if the shape changed.
    pub fn update_shape(&self) -> ObjectModelResult<bool> {
        self.commit(|state| {
            let migrated = state.update_shape()?;
            Ok(Commit::when(migrated, migrated))
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.read().get(key)
    }

    pub fn get_or_default(&self, key: &PropertyKey, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    fn get_typed<T>(
        &self,
        key: &PropertyKey,
        absent: impl FnOnce() -> Result<T, UnexpectedResult>,
        read: impl FnOnce(&Location, &ObjectStorage) -> Result<T, UnexpectedResult>,
    ) -> Result<T, UnexpectedResult> {
        let state = self.read();
        match state.shape.get_property(key) {
            Some(property) => read(property.location(), &state.storage),
            None => absent(),
        }
    }

    /// Read an int. Absent keys report [`Value::Null`].
    pub fn get_int(&self, key: &PropertyKey) -> Result<i32, UnexpectedResult> {
        self.get_typed(key, || Err(UnexpectedResult(Value::Null)), |location, storage| location.get_int(storage))
    }

    pub fn get_long(&self, key: &PropertyKey) -> Result<i64, UnexpectedResult> {
        self.get_typed(key, || Err(UnexpectedResult(Value::Null)), |location, storage| location.get_long(storage))
    }

    pub fn get_double(&self, key: &PropertyKey) -> Result<f64, UnexpectedResult> {
        self.get_typed(key, || Err(UnexpectedResult(Value::Null)), |location, storage| location.get_double(storage))
    }

    pub fn get_boolean(&self, key: &PropertyKey) -> Result<bool, UnexpectedResult> {
        self.get_typed(key, || Err(UnexpectedResult(Value::Null)), |location, storage| location.get_boolean(storage))
    }

    /// Read an int, or `default` if `key` is absent. A present value of
    /// another type is reported as [`UnexpectedResult`].
    pub fn get_int_or_default(&self, key: &PropertyKey, default: i32) -> Result<i32, UnexpectedResult> {
        self.get_typed(key, || Ok(default), |location, storage| location.get_int(storage))
    }

    pub fn get_long_or_default(&self, key: &PropertyKey, default: i64) -> Result<i64, UnexpectedResult> {
        self.get_typed(key, || Ok(default), |location, storage| location.get_long(storage))
    }

    pub fn get_double_or_default(&self, key: &PropertyKey, default: f64) -> Result<f64, UnexpectedResult> {
        self.get_typed(key, || Ok(default), |location, storage| location.get_double(storage))
    }

    pub fn get_boolean_or_default(&self, key: &PropertyKey, default: bool) -> Result<bool, UnexpectedResult> {
        self.get_typed(key, || Ok(default), |location, storage| location.get_boolean(storage))
    }

    pub fn contains_key(&self, key: &PropertyKey) -> bool {
        self.read().shape.has_property(key)
    }

    pub fn get_property(&self, key: &PropertyKey) -> Option<Property> {
        self.read().shape.get_property(key).cloned()
    }

    pub fn property_flags_or_default(&self, key: &PropertyKey, default: u32) -> u32 {
        self.read().shape.property_flags_or_default(key, default)
    }

    /// Visible keys in insertion order.
    pub fn key_array(&self) -> Arc<[PropertyKey]> {
        self.read().shape.key_array()
    }

    pub fn property_array(&self) -> Arc<[Property]> {
        self.read().shape.property_array()
    }

    // =========================================================================
    // Puts
    // =========================================================================

    fn put_mode(&self, key: &PropertyKey, value: Value, flags: u32, put_flags: PutFlags) -> ObjectModelResult<bool> {
        self.commit(|state| {
            let migrated = state.update_shape()?;
            let stored = state.put(key, value.clone(), flags, put_flags)?;
            Ok(Commit::when(migrated || stored, stored))
        })
    }

    /// Set `key` to `value`, adding or generalizing the property as needed.
    pub fn put(&self, key: &PropertyKey, value: Value) -> ObjectModelResult<()> {
        self.put_mode(key, value, 0, PutFlags::empty()).map(drop)
    }

    #[inline]
    pub fn put_int(&self, key: &PropertyKey, value: i32) -> ObjectModelResult<()> {
        self.put(key, Value::Int(value))
    }

    #[inline]
    pub fn put_long(&self, key: &PropertyKey, value: i64) -> ObjectModelResult<()> {
        self.put(key, Value::Long(value))
    }

    #[inline]
    pub fn put_double(&self, key: &PropertyKey, value: f64) -> ObjectModelResult<()> {
        self.put(key, Value::Double(value))
    }

    #[inline]
    pub fn put_boolean(&self, key: &PropertyKey, value: bool) -> ObjectModelResult<()> {
        self.put(key, Value::Boolean(value))
    }

    /// Put only if `key` is absent. Returns `true` if the value was stored.
    pub fn put_if_absent(&self, key: &PropertyKey, value: Value) -> ObjectModelResult<bool> {
        self.put_mode(key, value, 0, PutFlags::IF_ABSENT)
    }

    /// Put only if `key` is present. Returns `true` if the value was stored.
    pub fn put_if_present(&self, key: &PropertyKey, value: Value) -> ObjectModelResult<bool> {
        self.put_mode(key, value, 0, PutFlags::IF_PRESENT)
    }

    /// Put and set the property flags, also for an existing property.
    pub fn put_with_flags(&self, key: &PropertyKey, value: Value, flags: u32) -> ObjectModelResult<()> {
        self.put_mode(key, value, flags, PutFlags::UPDATE_FLAGS).map(drop)
    }

    /// [`put_if_absent`](Self::put_if_absent) that also sets the flags.
    pub fn put_if_absent_with_flags(&self, key: &PropertyKey, value: Value, flags: u32) -> ObjectModelResult<bool> {
        self.put_mode(key, value, flags, PutFlags::IF_ABSENT | PutFlags::UPDATE_FLAGS)
    }

    /// [`put_if_present`](Self::put_if_present) that also sets the flags.
    pub fn put_if_present_with_flags(&self, key: &PropertyKey, value: Value, flags: u32) -> ObjectModelResult<bool> {
        self.put_mode(key, value, flags, PutFlags::IF_PRESENT | PutFlags::UPDATE_FLAGS)
    }

    /// Put a value stored in the shape rather than in the object.
    ///
    /// An existing property keeps its location; a value it cannot hold
    /// generalizes it like a plain put.
    pub fn put_constant(&self, key: &PropertyKey, value: Value, flags: u32) -> ObjectModelResult<()> {
        self.put_mode(key, value, flags, PutFlags::CONSTANT | PutFlags::UPDATE_FLAGS)
            .map(drop)
    }

    /// Declare `key` with a default held by the shape until the first real
    /// write. No-op if `key` is present.
    pub fn put_declared(&self, key: &PropertyKey, default: Value, flags: u32) -> ObjectModelResult<bool> {
        self.put_mode(key, default, flags, PutFlags::DECLARE)
    }

    /// Put every pair in order and publish the result once.
    ///
    /// With `flags`, each key also gets its flags as by
    /// [`put_with_flags`](Self::put_with_flags). Either every put lands or,
    /// on error, none does.
    pub fn put_all(&self, keys: &[PropertyKey], values: &[Value], flags: Option<&[u32]>) -> ObjectModelResult<()> {
        check_lengths(keys.len(), values.len(), "values")?;
        if let Some(flags) = flags {
            check_lengths(keys.len(), flags.len(), "flags")?;
        }
        self.commit(|state| {
            let mut changed = false;
            for (i, (key, value)) in keys.iter().zip(values).enumerate() {
                changed |= state.update_shape()?;
                changed |= match flags {
                    Some(flags) => state.put(key, value.clone(), flags[i], PutFlags::UPDATE_FLAGS)?,
                    None => state.put(key, value.clone(), 0, PutFlags::empty())?,
                };
            }
            Ok(Commit::when(changed, ()))
        })
    }

    // =========================================================================
    // Removal & Flags
    // =========================================================================

    /// Remove `key`. Returns `false` if it was absent.
    pub fn remove_key(&self, key: &PropertyKey) -> ObjectModelResult<bool> {
        self.commit(|state| {
            let migrated = state.update_shape()?;
            let Some(property) = state.shape.get_property(key).cloned() else {
                return Ok(Commit::when(migrated, false));
            };

            let survivors = cfg!(debug_assertions).then(|| {
                state
                    .shape
                    .property_map()
                    .properties()
                    .iter()
                    .filter(|p| p.key() != key)
                    .map(|p| (p.key().clone(), p.location().get(&state.storage)))
                    .collect::<Vec<_>>()
            });

            let target = strategy::remove_property(&state.shape, &property)?;
            state.migrate(target)?;

            for (k, before) in survivors.iter().flatten() {
                debug_assert!(
                    state.get(k).is_some_and(|after| after.same_value(before)),
                    "{} changed during removal of {}",
                    k,
                    key
                );
            }
            Ok(Commit::Publish(true))
        })
    }

    /// Change the flags of `key`. Returns `false` if it is absent.
    pub fn set_property_flags(&self, key: &PropertyKey, flags: u32) -> ObjectModelResult<bool> {
        self.commit(|state| {
            let migrated = state.update_shape()?;
            let Some(property) = state.shape.get_property(key).cloned() else {
                return Ok(Commit::when(migrated, false));
            };
            if property.flags() == flags {
                return Ok(Commit::when(migrated, true));
            }
            let target = strategy::replace_property(&state.shape, &property, property.copy_with_flags(flags))?;
            state.migrate(target)?;
            Ok(Commit::Publish(true))
        })
    }

    // =========================================================================
    // Shape-Level Operations
    // =========================================================================

    pub fn dynamic_type(&self) -> ObjectType {
        self.read().shape.object_type()
    }

    pub fn set_dynamic_type(&self, object_type: ObjectType) -> ObjectModelResult<()> {
        self.transition(|shape| strategy::set_object_type(shape, object_type))
    }

    pub fn shape_flags(&self) -> u16 {
        self.read().shape.flags()
    }

    /// Replace the shape flags. Fails for values outside 16 bits.
    pub fn set_shape_flags(&self, flags: u32) -> ObjectModelResult<()> {
        self.update_shape_flags(|_| flags)
    }

    pub fn add_shape_flags(&self, flags: u32) -> ObjectModelResult<()> {
        self.update_shape_flags(|current| current | flags)
    }

    pub fn clear_shape_flags(&self, flags: u32) -> ObjectModelResult<()> {
        self.update_shape_flags(|current| current & !flags)
    }

    fn update_shape_flags(&self, compute: impl Fn(u32) -> u32) -> ObjectModelResult<()> {
        self.transition(|shape| {
            let flags = compute(u32::from(shape.flags()));
            if flags > MAX_SHAPE_FLAGS {
                return Err(ObjectModelError::illegal_argument(format!(
                    "shape flags {:#x} out of range 0..=0xffff",
                    flags
                )));
            }
            strategy::set_object_flags(shape, flags as u16)
        })
    }

    /// Switch to the shared variant of the current shape.
    ///
    /// Shared objects never reuse slots, so concurrent readers holding an
    /// older shape still read the right property.
    pub fn mark_shared(&self) -> ObjectModelResult<()> {
        self.transition(|shape| {
            if shape.is_shared() {
                return Err(ObjectModelError::unsupported("object is already shared"));
            }
            strategy::make_shared(shape)
        })
    }

    pub fn is_shared(&self) -> bool {
        self.read().shape.is_shared()
    }

    /// Drop every property and rebind to `shape`.
    ///
    /// `shape` must belong to the same layout and hold no instance
    /// properties. Returns `false` if the object already has `shape`.
    pub fn reset_shape(&self, shape: &Arc<Shape>) -> ObjectModelResult<bool> {
        if shape.has_instance_properties() {
            return Err(ObjectModelError::unsupported(
                "cannot reset to a shape with instance properties",
            ));
        }
        let shape = strategy::ensure_valid(shape)?;
        self.commit(|state| {
            if Arc::ptr_eq(&state.shape, &shape) {
                return Ok(Commit::Discard(false));
            }
            if !Arc::ptr_eq(shape.layout(), state.shape.layout()) {
                return Err(ObjectModelError::illegal_argument(format!(
                    "layout {} does not match {}",
                    shape.layout().name(),
                    state.shape.layout().name()
                )));
            }
            state.shape.invalidate_all_property_assumptions();
            state.storage = storage_for(&shape);
            state.shape = Arc::clone(&shape);
            Ok(Commit::Publish(true))
        })
    }
}

impl fmt::Debug for DynamicObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load();
        f.debug_struct("DynamicObject")
            .field("shape", &state.shape.id())
            .field("properties", &state.shape.property_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::layout::layout_registry;
    use crate::location::LocationKind;
    use crate::shape::ShapeBuilder;

    fn fresh_object() -> DynamicObject {
        let shape = ShapeBuilder::new()
            .object_type(ObjectType::new("object"))
            .build()
            .unwrap();
        DynamicObject::new(&shape).unwrap()
    }

    fn key(name: &str) -> PropertyKey {
        PropertyKey::name(name)
    }

    // -------------------------------------------------------------------------
    // Put / Get Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_put_get() {
        let object = fresh_object();
        object.put(&key("a"), Value::Int(1)).unwrap();
        object.put(&key("b"), Value::string("two")).unwrap();
        object.put(&key("c"), Value::Double(3.5)).unwrap();

        assert_eq!(object.get(&key("a")), Some(Value::Int(1)));
        assert_eq!(object.get(&key("b")), Some(Value::string("two")));
        assert_eq!(object.get_double(&key("c")), Ok(3.5));
        assert_eq!(object.get(&key("d")), None);
        assert_eq!(object.get_or_default(&key("d"), Value::Int(9)), Value::Int(9));
        assert_eq!(&*object.key_array(), &[key("a"), key("b"), key("c")]);
    }

    #[test]
    fn test_typed_getters() {
        let object = fresh_object();
        object.put(&key("i"), Value::Int(5)).unwrap();
        object.put(&key("l"), Value::Long(1 << 40)).unwrap();
        object.put(&key("z"), Value::Boolean(true)).unwrap();

        assert_eq!(object.get_int(&key("i")), Ok(5));
        assert_eq!(object.get_long(&key("l")), Ok(1 << 40));
        assert_eq!(object.get_boolean(&key("z")), Ok(true));
        assert_eq!(object.get_int(&key("z")), Err(UnexpectedResult(Value::Boolean(true))));
        assert_eq!(object.get_int(&key("missing")), Err(UnexpectedResult(Value::Null)));
    }

    #[test]
    fn test_overwrite_same_type_keeps_shape() {
        let object = fresh_object();
        object.put(&key("a"), Value::Int(1)).unwrap();
        let shape = object.shape();
        object.put(&key("a"), Value::Int(2)).unwrap();
        assert!(Arc::ptr_eq(&shape, &object.shape()));
        assert_eq!(object.get(&key("a")), Some(Value::Int(2)));
    }

    #[test]
    fn test_generalize_then_remove() {
        let object = fresh_object();
        object.put(&key("a"), Value::Int(1)).unwrap();
        object.put(&key("a"), Value::Double(2.5)).unwrap();
        assert_eq!(object.get(&key("a")), Some(Value::Double(2.5)));

        let before = object.shape();
        assert!(object.remove_key(&key("a")).unwrap());
        assert!(!object.contains_key(&key("a")));
        assert!(!Arc::ptr_eq(&before, &object.shape()));
        assert!(!object.remove_key(&key("a")).unwrap());
    }

    #[test]
    fn test_put_modes() {
        let object = fresh_object();
        assert!(!object.put_if_present(&key("a"), Value::Int(1)).unwrap());
        assert!(!object.contains_key(&key("a")));
        assert!(object.put_if_absent(&key("a"), Value::Int(1)).unwrap());
        assert!(!object.put_if_absent(&key("a"), Value::Int(2)).unwrap());
        assert_eq!(object.get(&key("a")), Some(Value::Int(1)));
        assert!(object.put_if_present(&key("a"), Value::Int(3)).unwrap());
        assert_eq!(object.get(&key("a")), Some(Value::Int(3)));
    }

    #[test]
    fn test_put_with_flags() {
        let object = fresh_object();
        object.put(&key("a"), Value::Int(1)).unwrap();
        object.put_with_flags(&key("a"), Value::Int(2), 7).unwrap();
        assert_eq!(object.property_flags_or_default(&key("a"), 0), 7);
        assert_eq!(object.get(&key("a")), Some(Value::Int(2)));

        object.put(&key("a"), Value::Int(3)).unwrap();
        assert_eq!(object.property_flags_or_default(&key("a"), 0), 7);
    }

    #[test]
    fn test_put_constant() {
        let object = fresh_object();
        object.put_constant(&key("k"), Value::string("fixed"), 1).unwrap();
        let property = object.get_property(&key("k")).unwrap();
        assert!(property.is_constant());
        assert_eq!(object.get(&key("k")), Some(Value::string("fixed")));
        assert!(!object.shape().has_instance_properties());

        object.put(&key("k"), Value::Int(4)).unwrap();
        assert!(!object.get_property(&key("k")).unwrap().is_constant());
        assert_eq!(object.get(&key("k")), Some(Value::Int(4)));
    }

    #[test]
    fn test_put_declared() {
        let object = fresh_object();
        assert!(object.put_declared(&key("d"), Value::Int(0), 0).unwrap());
        assert!(object.get_property(&key("d")).unwrap().location().is_declared());
        assert_eq!(object.get(&key("d")), Some(Value::Int(0)));

        object.put(&key("d"), Value::Int(5)).unwrap();
        assert!(object.get_property(&key("d")).unwrap().location().is_instance());
        assert_eq!(object.get(&key("d")), Some(Value::Int(5)));
        assert!(!object.put_declared(&key("d"), Value::Int(0), 0).unwrap());
    }

    #[test]
    fn test_put_all() {
        let object = fresh_object();
        object
            .put_all(&[key("x"), key("y")], &[Value::Int(1), Value::Boolean(false)], None)
            .unwrap();
        assert_eq!(object.get(&key("y")), Some(Value::Boolean(false)));
        assert_eq!(object.property_flags_or_default(&key("x"), 9), 0);

        let mismatch = object.put_all(&[key("x")], &[], None);
        assert!(matches!(mismatch, Err(ObjectModelError::IllegalArgument { .. })));
    }

    #[test]
    fn test_put_all_with_flags() {
        let object = fresh_object();
        object.put(&key("x"), Value::Int(1)).unwrap();
        object
            .put_all(
                &[key("x"), key("y")],
                &[Value::Int(2), Value::string("y")],
                Some(&[4, 5]),
            )
            .unwrap();
        assert_eq!(object.get(&key("x")), Some(Value::Int(2)));
        assert_eq!(object.property_flags_or_default(&key("x"), 0), 4);
        assert_eq!(object.property_flags_or_default(&key("y"), 0), 5);

        let shape = object.shape();
        let mismatch = object.put_all(&[key("z")], &[Value::Int(0)], Some(&[]));
        assert!(matches!(mismatch, Err(ObjectModelError::IllegalArgument { .. })));
        assert!(Arc::ptr_eq(&shape, &object.shape()));
    }

    #[test]
    fn test_put_all_failure_publishes_nothing() {
        let layout = layout_registry()
            .register(
                "object-put-all-limit",
                LayoutConfig {
                    inline_object_fields: 1,
                    inline_primitive_fields: 1,
                    max_dynamic_fields: 2,
                    ..LayoutConfig::default()
                },
            )
            .unwrap();
        let shape = ShapeBuilder::new().layout(layout).build().unwrap();
        let object = DynamicObject::new(&shape).unwrap();
        let keys: Vec<PropertyKey> = (0..8).map(|i| PropertyKey::from(format!("f{}", i))).collect();
        let values = vec![Value::string("v"); keys.len()];

        assert!(object.put_all(&keys, &values, None).is_err());
        assert!(Arc::ptr_eq(&object.shape(), &shape));
        assert!(!object.contains_key(&keys[0]));
    }

    #[test]
    fn test_conditional_puts_with_flags() {
        let object = fresh_object();
        assert!(!object.put_if_present_with_flags(&key("a"), Value::Int(1), 3).unwrap());
        assert!(object.put_if_absent_with_flags(&key("a"), Value::Int(1), 3).unwrap());
        assert_eq!(object.property_flags_or_default(&key("a"), 0), 3);

        assert!(!object.put_if_absent_with_flags(&key("a"), Value::Int(2), 6).unwrap());
        assert_eq!(object.property_flags_or_default(&key("a"), 0), 3);
        assert_eq!(object.get(&key("a")), Some(Value::Int(1)));

        assert!(object.put_if_present_with_flags(&key("a"), Value::Int(2), 6).unwrap());
        assert_eq!(object.property_flags_or_default(&key("a"), 0), 6);
        assert_eq!(object.get(&key("a")), Some(Value::Int(2)));
    }

    #[test]
    fn test_typed_puts_and_defaults() {
        let object = fresh_object();
        object.put_int(&key("i"), 7).unwrap();
        object.put_long(&key("l"), -3).unwrap();
        object.put_double(&key("d"), 0.5).unwrap();
        object.put_boolean(&key("z"), true).unwrap();

        assert_eq!(object.get_int_or_default(&key("i"), 0), Ok(7));
        assert_eq!(object.get_long_or_default(&key("l"), 0), Ok(-3));
        assert_eq!(object.get_double_or_default(&key("d"), 0.0), Ok(0.5));
        assert_eq!(object.get_boolean_or_default(&key("z"), false), Ok(true));

        assert_eq!(object.get_int_or_default(&key("missing"), 11), Ok(11));
        assert_eq!(object.get_boolean_or_default(&key("missing"), true), Ok(true));
        assert_eq!(
            object.get_long_or_default(&key("d"), 0),
            Err(UnexpectedResult(Value::Double(0.5)))
        );
    }

    #[test]
    fn test_set_property_flags() {
        let object = fresh_object();
        assert!(!object.set_property_flags(&key("a"), 1).unwrap());
        object.put(&key("a"), Value::string("v")).unwrap();
        assert!(object.set_property_flags(&key("a"), 3).unwrap());
        assert_eq!(object.property_flags_or_default(&key("a"), 0), 3);
        assert_eq!(object.get(&key("a")), Some(Value::string("v")));
    }

    // -------------------------------------------------------------------------
    // Storage Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_extension_arrays_grow() {
        let layout = layout_registry()
            .register("object-compact", LayoutConfig::compact())
            .unwrap();
        let shape = ShapeBuilder::new().layout(layout).build().unwrap();
        let object = DynamicObject::new(&shape).unwrap();
        for i in 0..20 {
            object.put(&PropertyKey::from(format!("p{}", i)), Value::Long(i)).unwrap();
            object.put(&PropertyKey::from(format!("o{}", i)), Value::string("o")).unwrap();
        }
        for i in 0..20 {
            assert_eq!(object.get(&PropertyKey::from(format!("p{}", i))), Some(Value::Long(i)));
        }
        let property = object.get_property(&key("p3")).unwrap();
        assert!(matches!(property.location().kind(), LocationKind::LongArray { .. }));
    }

    #[test]
    fn test_indirect_remove_compacts_values() {
        let object = fresh_object();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            object.put(&key(name), Value::Int(i as i32)).unwrap();
        }
        object.remove_key(&key("b")).unwrap();
        assert_eq!(object.get(&key("a")), Some(Value::Int(0)));
        assert_eq!(object.get(&key("c")), Some(Value::Int(2)));
        assert_eq!(object.get(&key("d")), Some(Value::Int(3)));
        assert_eq!(object.shape().sizes().primitive_fields, 3);
    }

    // -------------------------------------------------------------------------
    // Shape-Level Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_dynamic_type() {
        let object = fresh_object();
        let point = ObjectType::new("Point");
        object.set_dynamic_type(point).unwrap();
        assert_eq!(object.dynamic_type(), point);
    }

    #[test]
    fn test_shape_flags() {
        let object = fresh_object();
        object.set_shape_flags(0b0101).unwrap();
        object.add_shape_flags(0b0010).unwrap();
        assert_eq!(object.shape_flags(), 0b0111);
        object.clear_shape_flags(0b0001).unwrap();
        assert_eq!(object.shape_flags(), 0b0110);

        let result = object.set_shape_flags(0x1_0000);
        assert!(matches!(result, Err(ObjectModelError::IllegalArgument { .. })));
        assert_eq!(object.shape_flags(), 0b0110);
    }

    #[test]
    fn test_mark_shared() {
        let object = fresh_object();
        object.put(&key("a"), Value::Int(1)).unwrap();
        object.mark_shared().unwrap();
        assert!(object.is_shared());
        assert_eq!(object.get(&key("a")), Some(Value::Int(1)));
        assert!(matches!(
            object.mark_shared(),
            Err(ObjectModelError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_reset_shape() {
        let root = ShapeBuilder::new()
            .object_type(ObjectType::new("object"))
            .build()
            .unwrap();
        let object = DynamicObject::new(&root).unwrap();
        object.put(&key("a"), Value::Int(1)).unwrap();
        let populated = object.shape();

        let other = fresh_object();
        let result = other.reset_shape(&populated);
        assert!(matches!(result, Err(ObjectModelError::UnsupportedOperation { .. })));

        assert!(object.reset_shape(&root).unwrap());
        assert!(!object.contains_key(&key("a")));
        assert!(Arc::ptr_eq(&object.shape(), &root));
    }

    #[test]
    fn test_reset_to_current_shape_is_noop() {
        let shape = ShapeBuilder::new()
            .object_type(ObjectType::new("object"))
            .property_assumptions(true)
            .constant("k", Value::Int(1), 0)
            .build()
            .unwrap();
        let object = DynamicObject::new(&shape).unwrap();
        let stable = shape.property_assumption(&key("k"));
        assert!(stable.is_valid());

        assert!(!object.reset_shape(&shape).unwrap());
        assert!(stable.is_valid());
        assert!(Arc::ptr_eq(&object.shape(), &shape));
    }

    #[test]
    fn test_reset_shape_layout_mismatch() {
        let layout = layout_registry()
            .register("object-reset", LayoutConfig::compact())
            .unwrap();
        let foreign = ShapeBuilder::new().layout(layout).build().unwrap();
        let object = fresh_object();
        assert!(matches!(
            object.reset_shape(&foreign),
            Err(ObjectModelError::IllegalArgument { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Migration Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_stale_object_migrates_on_read() {
        let root = ShapeBuilder::new()
            .object_type(ObjectType::new("object"))
            .build()
            .unwrap();
        let stale = DynamicObject::new(&root).unwrap();
        stale.put(&key("a"), Value::Int(1)).unwrap();
        stale.put(&key("b"), Value::Int(2)).unwrap();
        let old_shape = stale.shape();

        let widened = DynamicObject::new(&root).unwrap();
        widened.put(&key("a"), Value::Int(1)).unwrap();
        widened.put(&key("b"), Value::Int(2)).unwrap();
        widened.put(&key("a"), Value::string("s")).unwrap();
        assert!(!old_shape.is_valid());

        assert_eq!(stale.get(&key("a")), Some(Value::Int(1)));
        assert_eq!(stale.get(&key("b")), Some(Value::Int(2)));
        let new_shape = stale.shape();
        assert!(new_shape.is_valid());
        assert!(Arc::ptr_eq(&new_shape, &widened.shape()));
        assert_eq!(&*new_shape.key_array(), &*old_shape.key_array());
        assert!(!stale.update_shape().unwrap());
    }
}
