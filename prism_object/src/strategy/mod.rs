//! Shape mutations.
//!
//! Every operation follows the same protocol:
//!
//! 1. resolve the starting shape through [`ensure_valid`];
//! 2. look the transition up in the shape's cache, re-validating hits;
//! 3. on a miss, compute the derived shape and cache the edge;
//! 4. return the result resolved through [`ensure_valid`].
//!
//! Widening a property that other shapes were derived from goes through
//! obsolescence rather than a plain replace (see [`obsolescence`]).

mod obsolescence;

use std::sync::Arc;

use bitflags::bitflags;

use crate::allocator::Allocator;
use crate::error::{ObjectModelError, ObjectModelResult};
use crate::layout::ObjectType;
use crate::location::Location;
use crate::property::{Property, PropertyKey};
use crate::shape::{InternalFlags, Shape, ShapeData};
use crate::stats::stats;
use crate::transition::Transition;
use crate::value::Value;

pub(crate) use obsolescence::{ensure_valid, obsolete, try_merge_shapes};

bitflags! {
    /// Modes of a put.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PutFlags: u8 {
        /// Only put if the key is absent.
        const IF_ABSENT = 1 << 0;
        /// Only put if the key is present.
        const IF_PRESENT = 1 << 1;
        /// Replace the property flags of an existing property.
        const UPDATE_FLAGS = 1 << 2;
        /// Store a new property in the shape.
        const CONSTANT = 1 << 3;
        /// Declare a new property with a placeholder default.
        const DECLARE = 1 << 4;
    }
}

/// Owner generalization rounds before falling back to a direct replace.
const MAX_GENERALIZE_ATTEMPTS: usize = 8;

// =============================================================================
// Caching
// =============================================================================

fn lookup(shape: &Shape, transition: &Transition) -> Option<Arc<Shape>> {
    let cached = shape.query_transition(transition);
    stats().record_transition_lookup(cached.is_some());
    cached
}

/// Create the child for a cache miss and cache it.
fn install(shape: &Arc<Shape>, transition: Transition, data: ShapeData) -> Arc<Shape> {
    let child = Shape::new_child(shape, transition.clone(), data);
    shape.cache_transition(transition, child)
}

fn update_instance_flag(data: &mut ShapeData) {
    let has_instance = data
        .property_map
        .properties()
        .iter()
        .any(|property| property.location().is_instance());
    data.internal.set(InternalFlags::HAS_INSTANCE_PROPERTIES, has_instance);
}

// =============================================================================
// Add
// =============================================================================

/// Append `property`.
pub(crate) fn add_property(shape: &Arc<Shape>, property: Property) -> ObjectModelResult<Arc<Shape>> {
    let valid = ensure_valid(shape)?;
    // Slots are only meaningful against the shape they were allocated on.
    let property = if Arc::ptr_eq(&valid, shape) || property.location().is_value() {
        property
    } else {
        let location = Allocator::new(&valid).relocate(property.location())?;
        property.relocate(location)
    };
    let shape = valid;
    if shape.has_property(property.key()) {
        return Err(ObjectModelError::illegal_argument(format!(
            "property {} already exists",
            property.key()
        )));
    }

    let transition = Transition::add(&property);
    if let Some(cached) = lookup(&shape, &transition) {
        return ensure_valid(&cached);
    }

    let mut allocator = Allocator::new(&shape);
    allocator.add_location(property.location())?;
    let mut data = shape.data().clone();
    if property.location().is_instance() {
        data.internal |= InternalFlags::HAS_INSTANCE_PROPERTIES;
    }
    data.property_map = data.property_map.put(property);
    data.sizes = allocator.sizes();
    let child = install(&shape, transition, data);
    ensure_valid(&child)
}

/// Reconcile a freshly added shape with siblings that added the same
/// property at a different generality.
fn merge_with_siblings(parent: &Shape, child: &Arc<Shape>) -> Arc<Shape> {
    let Some(Transition::AddProperty {
        key,
        flags,
        location_type,
    }) = child.transition_from_parent()
    else {
        return Arc::clone(child);
    };
    if child.is_shared() {
        return Arc::clone(child);
    }
    for (transition, sibling) in parent.transitions().entries() {
        if Arc::ptr_eq(&sibling, child) || !sibling.is_valid() {
            continue;
        }
        if let Transition::AddProperty {
            key: k,
            flags: f,
            location_type: t,
        } = &transition
        {
            if k == key && f == flags && t != location_type {
                if let Some(merged) = try_merge_shapes(child, &sibling) {
                    return merged;
                }
            }
        }
    }
    Arc::clone(child)
}

// =============================================================================
// Define
// =============================================================================

/// Shape able to hold `value` under `key`.
///
/// Adds the property if absent. An existing property keeps its location if
/// it accepts `value` and is generalized otherwise; its flags change only
/// with [`PutFlags::UPDATE_FLAGS`].
pub(crate) fn define_property(
    shape: &Arc<Shape>,
    key: &PropertyKey,
    value: &Value,
    flags: u32,
    put_flags: PutFlags,
) -> ObjectModelResult<Arc<Shape>> {
    let shape = ensure_valid(shape)?;
    let Some(existing) = shape.get_property(key).cloned() else {
        let location = if put_flags.contains(PutFlags::CONSTANT) {
            Location::constant(value.clone())
        } else if put_flags.contains(PutFlags::DECLARE) {
            Location::declared(value.clone())
        } else {
            Allocator::new(&shape).location_for_value(value)?
        };
        let added = add_property(&shape, Property::new(key.clone(), location, flags))?;
        return match added.parent() {
            Some(parent) if Arc::ptr_eq(parent, &shape) => ensure_valid(&merge_with_siblings(&shape, &added)),
            _ => Ok(added),
        };
    };

    let flags = if put_flags.contains(PutFlags::UPDATE_FLAGS) {
        flags
    } else {
        existing.flags()
    };
    if existing.location().can_store(value) {
        return update_flags(&shape, &existing, flags);
    }
    generalize_property(&shape, &existing, value, flags)
}

fn update_flags(shape: &Arc<Shape>, property: &Property, flags: u32) -> ObjectModelResult<Arc<Shape>> {
    if property.flags() == flags {
        Ok(Arc::clone(shape))
    } else {
        replace_property(shape, property, property.copy_with_flags(flags))
    }
}

// =============================================================================
// Generalize
// =============================================================================

/// First shape of the lineage that has `key`.
fn owner_shape(shape: &Arc<Shape>, key: &PropertyKey) -> Arc<Shape> {
    let mut owner = Arc::clone(shape);
    loop {
        let parent = match owner.parent() {
            Some(parent) if parent.has_property(key) => Arc::clone(parent),
            _ => return owner,
        };
        owner = parent;
    }
}

/// Widen `existing` so it can hold `value`.
fn generalize_property(
    shape: &Arc<Shape>,
    existing: &Property,
    value: &Value,
    flags: u32,
) -> ObjectModelResult<Arc<Shape>> {
    if existing.location().is_value() || shape.is_shared() {
        return direct_generalize(shape, existing, value, flags);
    }

    let key = existing.key();
    let mut current = Arc::clone(shape);
    for _ in 0..MAX_GENERALIZE_ATTEMPTS {
        let Some(property) = current.get_property(key).cloned() else {
            return Err(ObjectModelError::unsupported(format!(
                "property {} vanished during generalization",
                key
            )));
        };
        if property.location().can_store(value) {
            return update_flags(&current, &property, flags);
        }
        if property.location().is_value() || current.is_shared() {
            return direct_generalize(&current, &property, value, flags);
        }

        let owner = owner_shape(&current, key);
        let owned = owner.transition_from_parent().is_some_and(|t| t.is_add_of(key));
        let owner_property = owner
            .get_property(key)
            .filter(|p| owned && p.location().ptr_eq(property.location()))
            .cloned();
        let (Some(owner_property), Some(base)) = (owner_property, owner.parent().cloned()) else {
            return direct_generalize(&current, &property, value, flags);
        };

        let location = Allocator::new(&base).upcast_location(property.location(), value)?;
        log::debug!(
            "generalizing {} from {} to {} (shape {})",
            key,
            property.location(),
            location,
            owner.id().raw()
        );
        let sibling = add_property(&base, owner_property.relocate(location))?;
        obsolete(&owner, &sibling);
        current = ensure_valid(&current)?;
    }

    let property = current
        .get_property(key)
        .cloned()
        .ok_or_else(|| ObjectModelError::unsupported(format!("property {} vanished", key)))?;
    if property.location().can_store(value) {
        return update_flags(&current, &property, flags);
    }
    direct_generalize(&current, &property, value, flags)
}

/// Replace `property` by one with a freshly allocated, wider location.
fn direct_generalize(
    shape: &Arc<Shape>,
    property: &Property,
    value: &Value,
    flags: u32,
) -> ObjectModelResult<Arc<Shape>> {
    let location = Allocator::new(shape).upcast_location(property.location(), value)?;
    log::debug!(
        "replacing {} location {} with {}",
        property.key(),
        property.location(),
        location
    );
    replace_property(shape, property, Property::new(property.key().clone(), location, flags))
}

// =============================================================================
// Replace
// =============================================================================

/// Swap `old` for `new` in place.
pub(crate) fn replace_property(shape: &Arc<Shape>, old: &Property, new: Property) -> ObjectModelResult<Arc<Shape>> {
    let shape = ensure_valid(shape)?;
    let Some(old) = shape.get_property(old.key()).cloned() else {
        return Err(ObjectModelError::illegal_argument(format!(
            "property {} not in shape",
            old.key()
        )));
    };
    if old == new {
        return Ok(shape);
    }

    let transition = Transition::ReplaceProperty {
        before: old.clone(),
        after: new.clone(),
    };
    if let Some(cached) = lookup(&shape, &transition) {
        return ensure_valid(&cached);
    }

    let mut allocator = Allocator::new(&shape);
    allocator.add_location(new.location())?;
    let mut data = shape.data().clone();
    data.property_map = data.property_map.replace(&old, new);
    data.sizes = allocator.sizes();
    update_instance_flag(&mut data);
    let child = install(&shape, transition, data);
    ensure_valid(&child)
}

// =============================================================================
// Remove
// =============================================================================

/// Drop `property`, compacting storage where the lineage allows it.
pub(crate) fn remove_property(shape: &Arc<Shape>, property: &Property) -> ObjectModelResult<Arc<Shape>> {
    let shape = ensure_valid(shape)?;
    let Some(property) = shape.get_property(property.key()).cloned() else {
        return Ok(shape);
    };

    if !shape.is_shared() {
        let transition = Transition::RemoveProperty {
            property: property.clone(),
            direct: false,
        };
        if let Some(cached) = lookup(&shape, &transition) {
            return ensure_valid(&cached);
        }
        if let Some(rebuilt) = indirect_remove(&shape, &property)? {
            let cached = shape.cache_transition(transition, rebuilt);
            return ensure_valid(&cached);
        }
    }
    direct_remove(&shape, &property)
}

/// Rewind to the shape before `property` was added and replay everything
/// after it. `None` if the lineage cannot be replayed.
fn indirect_remove(shape: &Arc<Shape>, property: &Property) -> ObjectModelResult<Option<Arc<Shape>>> {
    let key = property.key();
    let owner = owner_shape(shape, key);
    if !owner.transition_from_parent().is_some_and(|t| t.is_add_of(key)) {
        return Ok(None);
    }
    let Some(base) = owner.parent().cloned() else {
        return Ok(None);
    };

    let mut replay = Vec::new();
    let mut current = Arc::clone(shape);
    while !Arc::ptr_eq(&current, &owner) {
        match current.transition_from_parent() {
            Some(Transition::ReplaceProperty { before, .. }) if before.key() == key => {}
            Some(
                Transition::AddProperty { .. }
                | Transition::ReplaceProperty { .. }
                | Transition::ObjectType(_)
                | Transition::ObjectFlags(_),
            ) => replay.push(Arc::clone(&current)),
            _ => return Ok(None),
        }
        let Some(parent) = current.parent().cloned() else {
            return Ok(None);
        };
        current = parent;
    }

    let mut rebuilt = base;
    for from in replay.iter().rev() {
        rebuilt = apply_transition(&rebuilt, from)?;
    }
    debug_assert!(!rebuilt.has_property(key));
    Ok(Some(rebuilt))
}

/// Drop `property` from the map, leaving its slot unused.
fn direct_remove(shape: &Arc<Shape>, property: &Property) -> ObjectModelResult<Arc<Shape>> {
    let transition = Transition::RemoveProperty {
        property: property.clone(),
        direct: true,
    };
    if let Some(cached) = lookup(shape, &transition) {
        return ensure_valid(&cached);
    }
    let mut data = shape.data().clone();
    data.property_map = data.property_map.remove(property.key());
    update_instance_flag(&mut data);
    let child = install(shape, transition, data);
    ensure_valid(&child)
}

// =============================================================================
// Type, Flags, Share
// =============================================================================

pub(crate) fn set_object_type(shape: &Arc<Shape>, object_type: ObjectType) -> ObjectModelResult<Arc<Shape>> {
    let shape = ensure_valid(shape)?;
    if shape.object_type() == object_type {
        return Ok(shape);
    }
    let transition = Transition::ObjectType(object_type);
    if let Some(cached) = lookup(&shape, &transition) {
        return ensure_valid(&cached);
    }
    let mut data = shape.data().clone();
    data.object_type = object_type;
    let child = install(&shape, transition, data);
    ensure_valid(&child)
}

pub(crate) fn set_object_flags(shape: &Arc<Shape>, flags: u16) -> ObjectModelResult<Arc<Shape>> {
    let shape = ensure_valid(shape)?;
    if shape.flags() == flags {
        return Ok(shape);
    }
    let transition = Transition::ObjectFlags(flags);
    if let Some(cached) = lookup(&shape, &transition) {
        return ensure_valid(&cached);
    }
    let mut data = shape.data().clone();
    data.flags = flags;
    let child = install(&shape, transition, data);
    ensure_valid(&child)
}

pub(crate) fn make_shared(shape: &Arc<Shape>) -> ObjectModelResult<Arc<Shape>> {
    let shape = ensure_valid(shape)?;
    if shape.is_shared() {
        return Ok(shape);
    }
    let transition = Transition::Share;
    if let Some(cached) = lookup(&shape, &transition) {
        return ensure_valid(&cached);
    }
    let mut data = shape.data().clone();
    data.internal |= InternalFlags::SHARED;
    let child = install(&shape, transition, data);
    ensure_valid(&child)
}

// =============================================================================
// Replay
// =============================================================================

/// Apply the transition that produced `from` to `base`.
///
/// Locations are reallocated against `base`, so the result may place
/// properties in different slots than `from` does.
pub(crate) fn apply_transition(base: &Arc<Shape>, from: &Shape) -> ObjectModelResult<Arc<Shape>> {
    let Some(transition) = from.transition_from_parent() else {
        return Ok(Arc::clone(base));
    };
    match transition {
        Transition::AddProperty { key, .. } => {
            let Some(property) = from.get_property(key) else {
                return Err(ObjectModelError::unsupported(format!(
                    "replayed shape lacks added property {}",
                    key
                )));
            };
            if base.has_property(key) {
                return Ok(Arc::clone(base));
            }
            let location = Allocator::new(base).relocate(property.location())?;
            add_property(base, property.relocate(location))
        }
        Transition::RemoveProperty { property, .. } => match base.get_property(property.key()) {
            Some(current) => {
                let current = current.clone();
                direct_remove(base, &current)
            }
            None => Ok(Arc::clone(base)),
        },
        Transition::ReplaceProperty { before, after } => {
            let Some(current) = base.get_property(after.key()).cloned() else {
                return Ok(Arc::clone(base));
            };
            let replacement = if before.location().ptr_eq(after.location())
                || current.location().is_assignable_from(after.location())
            {
                current.copy_with_flags(after.flags())
            } else {
                let location = Allocator::new(base).relocate(after.location())?;
                after.relocate(location)
            };
            replace_property(base, &current, replacement)
        }
        Transition::ObjectType(object_type) => set_object_type(base, *object_type),
        Transition::ObjectFlags(flags) => set_object_flags(base, *flags),
        Transition::Share => make_shared(base),
    }
}
