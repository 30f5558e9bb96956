//! Obsolescence, resolution and merging of shapes.
//!
//! A shape is obsoleted when a wider sibling replaces it. The obsolete shape
//! and its whole subtree are invalidated; the shape itself records the
//! replacement as its successor. Resolving an invalid shape walks up to the
//! nearest valid ancestor or successor and replays the transitions in
//! between.
//!
//! All of this runs under the lineage lock. Locks are taken object first,
//! lineage second.

use std::cell::Cell;
use std::sync::Arc;

use crate::error::{ObjectModelError, ObjectModelResult};
use crate::shape::Shape;
use crate::stats::stats;
use crate::transition::Transition;

use super::apply_transition;

/// Hard cap on nested resolutions on one thread.
const MAX_RESHAPE_NESTING: usize = 64;

thread_local! {
    static RESHAPE_NESTING: Cell<usize> = const { Cell::new(0) };
}

struct NestingGuard;

impl NestingGuard {
    fn enter(limit: usize) -> ObjectModelResult<Self> {
        RESHAPE_NESTING.with(|nesting| {
            let depth = nesting.get() + 1;
            if depth > limit.min(MAX_RESHAPE_NESTING) {
                return Err(ObjectModelError::ReshapeDepthExceeded { depth });
            }
            nesting.set(depth);
            Ok(NestingGuard)
        })
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        RESHAPE_NESTING.with(|nesting| nesting.set(nesting.get().saturating_sub(1)));
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// The valid shape equivalent to `shape`.
///
/// Valid shapes are returned as is.
pub(crate) fn ensure_valid(shape: &Arc<Shape>) -> ObjectModelResult<Arc<Shape>> {
    if shape.is_valid() {
        return Ok(Arc::clone(shape));
    }

    let max_depth = shape.layout().config().max_reshape_depth;
    let _nesting = NestingGuard::enter(max_depth)?;
    let _lineage = shape.lock_root();

    let mut budget = max_depth;
    let mut current = Arc::clone(shape);
    while !current.is_valid() {
        current = resolve(&current, &mut budget)?;
    }
    Ok(current)
}

fn resolve(shape: &Arc<Shape>, budget: &mut usize) -> ObjectModelResult<Arc<Shape>> {
    let mut pending = Vec::new();
    let mut node = Arc::clone(shape);
    let base = loop {
        if node.is_valid() {
            break node;
        }
        if let Some(successor) = node.successor() {
            if *budget == 0 {
                return Err(ObjectModelError::ReshapeDepthExceeded {
                    depth: node.layout().config().max_reshape_depth,
                });
            }
            *budget -= 1;
            node = Arc::clone(successor);
            continue;
        }
        let Some(parent) = node.parent().cloned() else {
            return Err(ObjectModelError::unsupported(format!(
                "obsolete root shape {} has no successor",
                node.id().raw()
            )));
        };
        pending.push(node);
        node = parent;
    };

    let mut resolved = base;
    for from in pending.iter().rev() {
        resolved = apply_transition(&resolved, from)?;
        if from.set_successor(&resolved) {
            resolved.add_predecessor(from);
            stats().record_resolved();
        }
    }
    Ok(resolved)
}

// =============================================================================
// Obsolescence
// =============================================================================

/// Replace `old` by `successor`, invalidating `old` and everything derived
/// from it. Returns `false` if `old` was already obsolete.
pub(crate) fn obsolete(old: &Arc<Shape>, successor: &Arc<Shape>) -> bool {
    let _lineage = old.lock_root();
    let newly = old.invalidate("shape obsoleted");
    let published = old.set_successor(successor);
    if published {
        successor.add_predecessor(old);
    }
    if !newly && !published {
        return false;
    }

    for property in old.property_map().properties() {
        if successor.get_property(property.key()) != Some(&property) {
            old.invalidate_property_assumption(property.key());
        }
    }
    stats().record_obsoleted();
    log::debug!(
        "shape {} obsoleted by {}",
        old.id().raw(),
        successor.id().raw()
    );
    invalidate_descendants(old);
    true
}

fn invalidate_descendants(shape: &Arc<Shape>) {
    let mut stack = vec![Arc::clone(shape)];
    while let Some(current) = stack.pop() {
        for (transition, child) in current.transitions().entries() {
            let derived = child
                .parent()
                .is_some_and(|parent| Arc::ptr_eq(parent, &current));
            if transition.is_direct() && derived && child.invalidate("ancestor obsoleted") {
                stack.push(child);
            }
        }
    }
}

// =============================================================================
// Merging
// =============================================================================

/// Merge two shapes that differ only in the generality of a few property
/// locations. Returns the surviving, wider shape.
pub(crate) fn try_merge_shapes(a: &Arc<Shape>, b: &Arc<Shape>) -> Option<Arc<Shape>> {
    if Arc::ptr_eq(a, b) {
        return Some(Arc::clone(a));
    }
    let config = a.layout().config();
    if !a.is_valid()
        || !b.is_valid()
        || !a.same_lineage(b)
        || !Arc::ptr_eq(a.layout(), b.layout())
        || a.is_shared()
        || b.is_shared()
        || a.shared_data() != b.shared_data()
        || a.depth() != b.depth()
        || a.property_count() != b.property_count()
        || a.depth() > config.max_merge_depth
    {
        return None;
    }

    let _lineage = a.lock_root();
    if !a.is_valid() || !b.is_valid() {
        return None;
    }

    let mut pairs = Vec::new();
    let (mut x, mut y) = (Arc::clone(a), Arc::clone(b));
    while !Arc::ptr_eq(&x, &y) {
        let (Some(px), Some(py)) = (x.parent().cloned(), y.parent().cloned()) else {
            return None;
        };
        pairs.push((x, y));
        x = px;
        y = py;
    }

    // `Some(true)` when `a` is the narrow side.
    let mut a_narrow = None;
    let mut diffs = 0;
    for (x, y) in &pairs {
        let (tx, ty) = (x.transition_from_parent()?, y.transition_from_parent()?);
        if tx == ty {
            continue;
        }
        let (
            Transition::AddProperty {
                key: kx, flags: fx, ..
            },
            Transition::AddProperty {
                key: ky, flags: fy, ..
            },
        ) = (tx, ty)
        else {
            return None;
        };
        if kx != ky || fx != fy {
            return None;
        }
        let (lx, ly) = (x.get_property(kx)?.location(), y.get_property(ky)?.location());
        let direction = match (ly.is_assignable_from(lx), lx.is_assignable_from(ly)) {
            (true, false) => true,
            (false, true) => false,
            _ => return None,
        };
        if a_narrow.is_some_and(|d| d != direction) {
            return None;
        }
        a_narrow = Some(direction);
        diffs += 1;
        if diffs > config.max_merge_diff {
            return None;
        }
    }
    let a_narrow = a_narrow?;

    for (x, y) in &pairs {
        let (narrow, wide) = if a_narrow { (x, y) } else { (y, x) };
        obsolete(narrow, wide);
    }

    let (narrow, wide) = if a_narrow { (a, b) } else { (b, a) };
    for property in narrow.property_map().properties() {
        let Some(assumption) = property.location().type_assumption() else {
            continue;
        };
        if let Some(target) = wide.get_property(property.key()) {
            target.location().merge_type_assumption(&assumption);
        }
    }
    stats().record_merge();
    log::debug!(
        "merged shape {} into {} ({} differing properties)",
        narrow.id().raw(),
        wide.id().raw(),
        diffs
    );
    Some(Arc::clone(wide))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::layout::{layout_registry, ObjectType};
    use crate::location::{Location, LocationKind};
    use crate::property::Property;
    use crate::shape::ShapeBuilder;

    fn fresh_root() -> Arc<Shape> {
        ShapeBuilder::new()
            .object_type(ObjectType::new("obsolescence"))
            .build()
            .unwrap()
    }

    fn int_property(key: &str, index: usize) -> Property {
        Property::new(key.into(), Location::new(LocationKind::IntField { index }), 0)
    }

    fn object_property(key: &str, index: usize) -> Property {
        Property::new(key.into(), Location::new(LocationKind::ObjectField { index }), 0)
    }

    // -------------------------------------------------------------------------
    // Obsolescence Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_obsolete_invalidates_subtree() {
        let root = fresh_root();
        let narrow = root.add_property(int_property("a", 0)).unwrap();
        let child = narrow.add_property(int_property("b", 1)).unwrap();
        let grandchild = child.add_property(int_property("c", 2)).unwrap();
        let wide = root.add_property(object_property("a", 0)).unwrap();

        assert!(obsolete(&narrow, &wide));
        assert!(!narrow.is_valid());
        assert!(!child.is_valid());
        assert!(!grandchild.is_valid());
        assert!(root.is_valid());
        assert!(wide.is_valid());
        assert!(Arc::ptr_eq(narrow.successor().unwrap(), &wide));
        assert_eq!(wide.predecessor_count(), 1);

        assert!(!obsolete(&narrow, &wide));
    }

    #[test]
    fn test_ensure_valid_replays_descendants() {
        let root = fresh_root();
        let narrow = root.add_property(int_property("a", 0)).unwrap();
        let child = narrow.add_property(int_property("b", 1)).unwrap();
        let wide = root.add_property(object_property("a", 0)).unwrap();
        obsolete(&narrow, &wide);

        let resolved = ensure_valid(&child).unwrap();
        assert!(resolved.is_valid());
        assert!(Arc::ptr_eq(resolved.parent().unwrap(), &wide));
        assert!(resolved.has_property(&"b".into()));
        assert!(Arc::ptr_eq(child.successor().unwrap(), &resolved));
        assert!(Arc::ptr_eq(&ensure_valid(&child).unwrap(), &resolved));
    }

    #[test]
    fn test_successor_chain_budget() {
        let config = LayoutConfig {
            max_reshape_depth: 1,
            ..LayoutConfig::default()
        };
        let layout = layout_registry().register("obsolescence-budget", config).unwrap();
        let root = ShapeBuilder::new().layout(layout).build().unwrap();
        let first = root.add_property(int_property("a", 0)).unwrap();
        let second = root
            .add_property(Property::new(
                "a".into(),
                Location::new(LocationKind::DoubleField { index: 0, allow_int: false }),
                0,
            ))
            .unwrap();
        let third = root.add_property(object_property("a", 0)).unwrap();
        obsolete(&first, &second);
        obsolete(&second, &third);

        assert!(matches!(
            ensure_valid(&first),
            Err(ObjectModelError::ReshapeDepthExceeded { .. })
        ));
        assert!(Arc::ptr_eq(&ensure_valid(&second).unwrap(), &third));
    }

    #[test]
    fn test_obsolete_root_without_successor() {
        let root = fresh_root();
        root.invalidate("test");
        assert!(matches!(
            ensure_valid(&root),
            Err(ObjectModelError::UnsupportedOperation { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Merge Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_merge_picks_wider_side() {
        let root = fresh_root();
        let narrow = root.add_property(int_property("x", 0)).unwrap();
        let wide = root.add_property(object_property("x", 0)).unwrap();

        let merged = try_merge_shapes(&narrow, &wide).unwrap();
        assert!(Arc::ptr_eq(&merged, &wide));
        assert!(!narrow.is_valid());
        assert!(Arc::ptr_eq(&ensure_valid(&narrow).unwrap(), &wide));
    }

    #[test]
    fn test_merge_is_symmetric() {
        let root = fresh_root();
        let narrow = root.add_property(int_property("x", 0)).unwrap();
        let wide = root.add_property(object_property("x", 0)).unwrap();
        assert!(Arc::ptr_eq(&try_merge_shapes(&wide, &narrow).unwrap(), &wide));
    }

    #[test]
    fn test_merge_rejects_different_keys() {
        let root = fresh_root();
        let a = root.add_property(int_property("x", 0)).unwrap();
        let b = root.add_property(object_property("y", 0)).unwrap();
        assert!(try_merge_shapes(&a, &b).is_none());
        assert!(a.is_valid() && b.is_valid());
    }

    #[test]
    fn test_merge_rejects_conflicting_directions() {
        let root = fresh_root();
        let a = root.add_property(int_property("x", 0)).unwrap();
        let a = a.add_property(object_property("y", 0)).unwrap();
        let b = root.add_property(object_property("x", 0)).unwrap();
        let b = b.add_property(int_property("y", 0)).unwrap();
        assert!(try_merge_shapes(&a, &b).is_none());
    }

    #[test]
    fn test_merge_rejects_shared() {
        let root = ShapeBuilder::new()
            .object_type(ObjectType::new("obsolescence"))
            .shared(true)
            .build()
            .unwrap();
        let a = root.add_property(int_property("x", 0)).unwrap();
        let b = root.add_property(object_property("x", 0)).unwrap();
        assert!(try_merge_shapes(&a, &b).is_none());
    }

    #[test]
    fn test_merge_identical() {
        let root = fresh_root();
        let a = root.add_property(int_property("x", 0)).unwrap();
        assert!(Arc::ptr_eq(&try_merge_shapes(&a, &a).unwrap(), &a));
    }
}
