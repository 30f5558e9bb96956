//! Invalidatable assumptions.
//!
//! An [`Assumption`] is the single speculation primitive of the object model.
//! Shape validity, shape leaf-ness, per-key property stability, location
//! finality and reference type speculation are all expressed as assumptions.
//!
//! Compiled code that relies on an assumption checks (or registers on) it and
//! is deoptimized by the host compiler once it is invalidated. This crate
//! only needs the flag semantics:
//!
//! - valid on creation (except [`Assumption::never_valid`])
//! - invalidation is monotonic and permanent
//! - invalidation is visible to every thread without locking

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use crate::stats::stats;

struct AssumptionInner {
    name: &'static str,
    valid: AtomicBool,
}

/// A shared, thread-safe, monotonically invalidatable boolean.
///
/// Cloning an `Assumption` yields another handle to the same token.
#[derive(Clone)]
pub struct Assumption(Arc<AssumptionInner>);

static ALWAYS_VALID: LazyLock<Assumption> = LazyLock::new(|| Assumption::new("always valid"));
static NEVER_VALID: LazyLock<Assumption> = LazyLock::new(|| {
    let assumption = Assumption::new("never valid");
    assumption.0.valid.store(false, Ordering::SeqCst);
    assumption
});

impl Assumption {
    /// Create a new valid assumption.
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self(Arc::new(AssumptionInner {
            name,
            valid: AtomicBool::new(true),
        }))
    }

    /// The shared assumption that is never invalidated.
    #[inline]
    pub fn always_valid() -> Self {
        ALWAYS_VALID.clone()
    }

    /// The shared assumption that is already invalid.
    #[inline]
    pub fn never_valid() -> Self {
        NEVER_VALID.clone()
    }

    /// Check if the assumption still holds.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0.valid.load(Ordering::SeqCst)
    }

    /// Invalidate the assumption.
    ///
    /// Returns `true` if this call performed the invalidation. Invalidating
    /// the shared always-valid sentinel is a no-op.
    pub fn invalidate(&self, reason: &str) -> bool {
        if self.is_always_valid() {
            return false;
        }
        let invalidated = self.0.valid.swap(false, Ordering::SeqCst);
        if invalidated {
            stats().record_assumption_invalidation();
            log::trace!("invalidated assumption '{}': {}", self.0.name, reason);
        }
        invalidated
    }

    /// Name given at creation.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Check if both handles refer to the same token.
    #[inline]
    pub fn ptr_eq(&self, other: &Assumption) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Check if this is the always-valid sentinel.
    #[inline]
    pub fn is_always_valid(&self) -> bool {
        Arc::ptr_eq(&self.0, &ALWAYS_VALID.0)
    }
}

impl fmt::Debug for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assumption")
            .field("name", &self.0.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_assumption_is_valid() {
        let assumption = Assumption::new("test");
        assert!(assumption.is_valid());
        assert_eq!(assumption.name(), "test");
    }

    #[test]
    fn test_invalidation_is_permanent() {
        let assumption = Assumption::new("test");
        assert!(assumption.invalidate("first"));
        assert!(!assumption.is_valid());
        assert!(!assumption.invalidate("second"));
        assert!(!assumption.is_valid());
    }

    #[test]
    fn test_clones_share_state() {
        let a = Assumption::new("shared");
        let b = a.clone();
        a.invalidate("test");
        assert!(!b.is_valid());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_sentinels() {
        assert!(Assumption::always_valid().is_valid());
        assert!(!Assumption::always_valid().invalidate("ignored"));
        assert!(Assumption::always_valid().is_valid());
        assert!(!Assumption::never_valid().is_valid());
    }

    #[test]
    fn test_invalidation_visible_across_threads() {
        let assumption = Assumption::new("threads");
        let remote = assumption.clone();
        std::thread::spawn(move || {
            remote.invalidate("from thread");
        })
        .join()
        .unwrap();
        assert!(!assumption.is_valid());
    }
}
