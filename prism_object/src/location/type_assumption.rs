//! Reference type speculation.
//!
//! Reference locations accept any value, but speculate on the most specific
//! class (and nullability) they have seen so compiled readers can skip type
//! checks. The speculation is a [`TypeAssumption`]: an immutable
//! `(token, class, non_null)` triple. A location holds its current triple in
//! a [`TypeAssumptionCell`] and replaces it with a wider one whenever a
//! value outside the speculation is stored.
//!
//! Widening always invalidates the old token *before* the new triple is
//! installed, so no reader can observe a valid token paired with a class
//! that no longer holds.

use std::fmt;
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;

use crate::assumption::Assumption;
use crate::stats::stats;
use crate::value::{Value, ValueClass};

// =============================================================================
// Type Assumption
// =============================================================================

/// Speculated class and nullability of a reference location.
#[derive(Clone)]
pub struct TypeAssumption {
    assumption: Assumption,
    class: ValueClass,
    non_null: bool,
}

static ANY: LazyLock<TypeAssumption> = LazyLock::new(|| TypeAssumption {
    assumption: Assumption::always_valid(),
    class: ValueClass::Any,
    non_null: false,
});

impl TypeAssumption {
    /// The shared "any value, nullable" speculation. Never invalidated.
    #[inline]
    pub fn any() -> Self {
        ANY.clone()
    }

    /// Create a speculation on `class`.
    ///
    /// Returns the [`any`](Self::any) sentinel for a nullable `Any`.
    pub fn new(class: ValueClass, non_null: bool) -> Self {
        if class == ValueClass::Any && !non_null {
            return Self::any();
        }
        Self {
            assumption: Assumption::new("typed object location"),
            class,
            non_null,
        }
    }

    /// Speculate on exactly the class of `value`.
    pub fn from_value(value: &Value) -> Self {
        match value.class() {
            Some(class) => Self::new(class, true),
            None => Self::new(ValueClass::Any, false),
        }
    }

    /// Check if this is the shared sentinel.
    #[inline]
    pub fn is_any(&self) -> bool {
        self.assumption.is_always_valid() && self.class == ValueClass::Any && !self.non_null
    }

    /// The invalidation token.
    #[inline]
    pub fn assumption(&self) -> &Assumption {
        &self.assumption
    }

    /// Speculated class, regardless of validity.
    #[inline]
    pub fn class(&self) -> ValueClass {
        self.class
    }

    /// Speculated non-nullability, regardless of validity.
    #[inline]
    pub fn is_non_null(&self) -> bool {
        self.non_null
    }

    /// Check if the speculation is valid and covers `value`.
    pub fn accepts(&self, value: &Value) -> bool {
        if self.is_any() {
            return true;
        }
        if !self.assumption.is_valid() {
            return false;
        }
        match value.class() {
            None => !self.non_null,
            Some(class) => self.class.is_assignable_from(class),
        }
    }

    /// Compute the widened `(class, non_null)` needed to also accept
    /// `value`, or `None` if already wide enough.
    fn widened_for_value(&self, value: &Value) -> Option<(ValueClass, bool)> {
        let mut class = self.class;
        let mut non_null = self.non_null;
        let mut changed = false;
        match value.class() {
            None => {
                if non_null {
                    non_null = false;
                    changed = true;
                }
            }
            Some(value_class) => {
                if !class.is_assignable_from(value_class) {
                    class = class.common_superclass(value_class);
                    changed = true;
                }
            }
        }
        changed.then_some((class, non_null))
    }

    /// Compute the widened `(class, non_null)` covering `other` as well, or
    /// `None` if already wide enough.
    fn widened_for(&self, other: &TypeAssumption) -> Option<(ValueClass, bool)> {
        let mut class = self.class;
        let mut non_null = self.non_null;
        let mut changed = false;
        if non_null && !other.non_null {
            non_null = false;
            changed = true;
        }
        if !class.is_assignable_from(other.class) {
            class = class.common_superclass(other.class);
            changed = true;
        }
        changed.then_some((class, non_null))
    }
}

impl fmt::Display for TypeAssumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class == ValueClass::Any && !self.non_null {
            write!(f, "ANY")?;
        } else {
            if self.non_null {
                write!(f, "!")?;
            }
            write!(f, "{}", self.class.name())?;
        }
        if !self.assumption.is_valid() {
            write!(f, "(invalid)")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TypeAssumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeAssumption({})", self)
    }
}

// =============================================================================
// Type Assumption Cell
// =============================================================================

/// Mutable slot holding the current [`TypeAssumption`] of a location.
///
/// Reads load the current triple without locking. Updates are a
/// compare-and-swap retry loop: snapshot, compute, then install only if the
/// slot still holds the snapshot.
pub(crate) struct TypeAssumptionCell {
    current: ArcSwap<TypeAssumption>,
}

impl TypeAssumptionCell {
    pub(crate) fn new(initial: TypeAssumption) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    #[inline]
    pub(crate) fn get(&self) -> TypeAssumption {
        TypeAssumption::clone(&self.current.load())
    }

    fn compare_and_set(&self, expected: &Arc<TypeAssumption>, next: TypeAssumption) -> bool {
        let previous = self.current.compare_and_swap(expected, Arc::new(next));
        Arc::ptr_eq(&previous, expected)
    }

    /// Widen the speculation so it covers `value`.
    pub(crate) fn generalize_for(&self, value: &Value, location: &dyn fmt::Display) {
        loop {
            let current = self.current.load_full();
            if current.accepts(value) {
                return;
            }
            let (class, non_null) = match current.widened_for_value(value) {
                Some(widened) => {
                    Self::invalidate(&current, widened, location);
                    widened
                }
                // Still wide enough, but the token was invalidated through a
                // copy shared with another location.
                None if current.assumption.is_valid() => return,
                None => (current.class, current.non_null),
            };
            if self.compare_and_set(&current, TypeAssumption::new(class, non_null)) {
                return;
            }
        }
    }

    /// Widen the speculation so it covers `other` as well.
    pub(crate) fn merge(&self, other: &TypeAssumption, location: &dyn fmt::Display) {
        loop {
            let current = self.current.load_full();
            let (class, non_null) = match current.widened_for(other) {
                Some(widened) => {
                    Self::invalidate(&current, widened, location);
                    widened
                }
                None if current.assumption.is_valid() => return,
                None => (current.class, current.non_null),
            };
            if self.compare_and_set(&current, TypeAssumption::new(class, non_null)) {
                return;
            }
        }
    }

    fn invalidate(current: &TypeAssumption, widened: (ValueClass, bool), location: &dyn fmt::Display) {
        if current.assumption.is_valid() {
            stats().record_type_generalization();
            let next = TypeAssumption {
                assumption: Assumption::always_valid(),
                class: widened.0,
                non_null: widened.1,
            };
            current.assumption.invalidate(&format!(
                "generalizing object type {} => {} {}",
                current, next, location
            ));
        }
    }
}

impl fmt::Debug for TypeAssumptionCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.get(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Loc;

    impl fmt::Display for Loc {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "object@0")
        }
    }

    // -------------------------------------------------------------------------
    // TypeAssumption Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_any_sentinel() {
        let any = TypeAssumption::new(ValueClass::Any, false);
        assert!(any.is_any());
        assert!(any.accepts(&Value::Null));
        assert!(any.accepts(&Value::Int(1)));
        assert_eq!(any.to_string(), "ANY");
    }

    #[test]
    fn test_from_value() {
        let assumption = TypeAssumption::from_value(&Value::Int(3));
        assert_eq!(assumption.class(), ValueClass::Int);
        assert!(assumption.is_non_null());
        assert!(assumption.accepts(&Value::Int(4)));
        assert!(!assumption.accepts(&Value::Null));
        assert!(!assumption.accepts(&Value::Double(1.0)));
        assert_eq!(assumption.to_string(), "!Int");
    }

    #[test]
    fn test_invalid_assumption_accepts_nothing() {
        let assumption = TypeAssumption::new(ValueClass::String, false);
        assumption.assumption().invalidate("test");
        assert!(!assumption.accepts(&Value::string("a")));
    }

    // -------------------------------------------------------------------------
    // TypeAssumptionCell Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_generalize_to_common_superclass() {
        let cell = TypeAssumptionCell::new(TypeAssumption::from_value(&Value::Int(1)));
        let before = cell.get();

        cell.generalize_for(&Value::Double(2.0), &Loc);

        let after = cell.get();
        assert!(!before.assumption().is_valid());
        assert!(after.assumption().is_valid());
        assert_eq!(after.class(), ValueClass::Number);
        assert!(after.is_non_null());
    }

    #[test]
    fn test_generalize_null_drops_non_null() {
        let cell = TypeAssumptionCell::new(TypeAssumption::from_value(&Value::string("x")));
        cell.generalize_for(&Value::Null, &Loc);
        let after = cell.get();
        assert_eq!(after.class(), ValueClass::String);
        assert!(!after.is_non_null());
    }

    #[test]
    fn test_generalize_to_any_uses_sentinel() {
        let cell = TypeAssumptionCell::new(TypeAssumption::new(ValueClass::String, false));
        cell.generalize_for(&Value::Int(1), &Loc);
        assert!(cell.get().is_any());
    }

    #[test]
    fn test_accepted_value_keeps_token() {
        let cell = TypeAssumptionCell::new(TypeAssumption::from_value(&Value::Int(1)));
        let before = cell.get();
        cell.generalize_for(&Value::Int(9), &Loc);
        assert!(before.assumption().ptr_eq(cell.get().assumption()));
        assert!(before.assumption().is_valid());
    }

    #[test]
    fn test_renew_after_shared_invalidation() {
        let shared = TypeAssumption::from_value(&Value::Int(1));
        let cell = TypeAssumptionCell::new(shared.clone());
        shared.assumption().invalidate("moved");

        cell.generalize_for(&Value::Int(2), &Loc);

        let renewed = cell.get();
        assert!(renewed.assumption().is_valid());
        assert_eq!(renewed.class(), ValueClass::Int);
        assert!(!renewed.assumption().ptr_eq(shared.assumption()));
    }

    #[test]
    fn test_merge() {
        let cell = TypeAssumptionCell::new(TypeAssumption::from_value(&Value::Long(1)));
        cell.merge(&TypeAssumption::new(ValueClass::Int, false), &Loc);
        let merged = cell.get();
        assert_eq!(merged.class(), ValueClass::Number);
        assert!(!merged.is_non_null());
    }

    #[test]
    fn test_concurrent_generalization_converges() {
        let cell = std::sync::Arc::new(TypeAssumptionCell::new(TypeAssumption::from_value(
            &Value::Int(0),
        )));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cell = cell.clone();
                std::thread::spawn(move || {
                    let value = if i % 2 == 0 {
                        Value::Double(i as f64)
                    } else {
                        Value::string("s")
                    };
                    cell.generalize_for(&value, &Loc);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let last = cell.get();
        assert!(last.accepts(&Value::Double(1.0)));
        assert!(last.accepts(&Value::string("t")));
        assert!(last.accepts(&Value::Int(1)));
    }
}
