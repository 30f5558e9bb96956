//! Object model statistics.
//!
//! Tracks shape-graph growth, transition cache effectiveness, and the cold
//! paths (obsolescence, merging, reshape) for monitoring and tuning. Counters
//! are process-wide and updated with relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about shape and object activity.
#[derive(Debug)]
pub struct ObjectModelStats {
    // =========================================================================
    // Shape Graph
    // =========================================================================
    /// Shapes created (roots included).
    pub shapes_created: AtomicU64,
    /// Transition cache lookups that found a successor.
    pub transition_hits: AtomicU64,
    /// Transition cache lookups that had to compute a successor.
    pub transition_misses: AtomicU64,

    // =========================================================================
    // Obsolescence
    // =========================================================================
    /// Shapes marked obsolete.
    pub shapes_obsoleted: AtomicU64,
    /// Successful shape merges.
    pub shapes_merged: AtomicU64,
    /// Obsolete shapes resolved to a valid successor.
    pub shapes_resolved: AtomicU64,
    /// Objects migrated off an obsolete shape.
    pub objects_migrated: AtomicU64,

    // =========================================================================
    // Speculation
    // =========================================================================
    /// Assumptions invalidated (all kinds).
    pub assumptions_invalidated: AtomicU64,
    /// Reference type assumptions generalized.
    pub type_generalizations: AtomicU64,
    /// Location finality assumptions invalidated.
    pub final_invalidations: AtomicU64,
}

static STATS: ObjectModelStats = ObjectModelStats::new();

/// Get the process-wide statistics.
#[inline]
pub fn stats() -> &'static ObjectModelStats {
    &STATS
}

impl ObjectModelStats {
    /// Create new empty statistics.
    pub const fn new() -> Self {
        Self {
            shapes_created: AtomicU64::new(0),
            transition_hits: AtomicU64::new(0),
            transition_misses: AtomicU64::new(0),
            shapes_obsoleted: AtomicU64::new(0),
            shapes_merged: AtomicU64::new(0),
            shapes_resolved: AtomicU64::new(0),
            objects_migrated: AtomicU64::new(0),
            assumptions_invalidated: AtomicU64::new(0),
            type_generalizations: AtomicU64::new(0),
            final_invalidations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_shape_created(&self) {
        self.shapes_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_transition_lookup(&self, hit: bool) {
        if hit {
            self.transition_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transition_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_obsoleted(&self) {
        self.shapes_obsoleted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_merge(&self) {
        self.shapes_merged.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_resolved(&self) {
        self.shapes_resolved.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_migration(&self) {
        self.objects_migrated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_assumption_invalidation(&self) {
        self.assumptions_invalidated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_type_generalization(&self) {
        self.type_generalizations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_final_invalidation(&self) {
        self.final_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Transition cache hit ratio in `[0, 1]`.
    pub fn transition_hit_ratio(&self) -> f64 {
        let hits = self.transition_hits.load(Ordering::Relaxed) as f64;
        let misses = self.transition_misses.load(Ordering::Relaxed) as f64;
        if hits + misses > 0.0 {
            hits / (hits + misses)
        } else {
            0.0
        }
    }

    /// Take a plain copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            shapes_created: self.shapes_created.load(Ordering::Relaxed),
            transition_hits: self.transition_hits.load(Ordering::Relaxed),
            transition_misses: self.transition_misses.load(Ordering::Relaxed),
            shapes_obsoleted: self.shapes_obsoleted.load(Ordering::Relaxed),
            shapes_merged: self.shapes_merged.load(Ordering::Relaxed),
            shapes_resolved: self.shapes_resolved.load(Ordering::Relaxed),
            objects_migrated: self.objects_migrated.load(Ordering::Relaxed),
            assumptions_invalidated: self.assumptions_invalidated.load(Ordering::Relaxed),
            type_generalizations: self.type_generalizations.load(Ordering::Relaxed),
            final_invalidations: self.final_invalidations.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        self.shapes_created.store(0, Ordering::Relaxed);
        self.transition_hits.store(0, Ordering::Relaxed);
        self.transition_misses.store(0, Ordering::Relaxed);
        self.shapes_obsoleted.store(0, Ordering::Relaxed);
        self.shapes_merged.store(0, Ordering::Relaxed);
        self.shapes_resolved.store(0, Ordering::Relaxed);
        self.objects_migrated.store(0, Ordering::Relaxed);
        self.assumptions_invalidated.store(0, Ordering::Relaxed);
        self.type_generalizations.store(0, Ordering::Relaxed);
        self.final_invalidations.store(0, Ordering::Relaxed);
    }

    /// Print a summary of object model statistics.
    pub fn print_summary(&self) {
        let s = self.snapshot();
        eprintln!("=== Object Model Statistics ===");
        eprintln!("Shapes: {} created", s.shapes_created);
        eprintln!(
            "Transitions: {} hits, {} misses ({:.1}% hit ratio)",
            s.transition_hits,
            s.transition_misses,
            self.transition_hit_ratio() * 100.0
        );
        eprintln!(
            "Obsolescence: {} obsoleted, {} merged, {} resolved, {} objects migrated",
            s.shapes_obsoleted, s.shapes_merged, s.shapes_resolved, s.objects_migrated
        );
        eprintln!(
            "Speculation: {} invalidations ({} type, {} final)",
            s.assumptions_invalidated, s.type_generalizations, s.final_invalidations
        );
    }
}

impl Default for ObjectModelStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`ObjectModelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub shapes_created: u64,
    pub transition_hits: u64,
    pub transition_misses: u64,
    pub shapes_obsoleted: u64,
    pub shapes_merged: u64,
    pub shapes_resolved: u64,
    pub objects_migrated: u64,
    pub assumptions_invalidated: u64,
    pub type_generalizations: u64,
    pub final_invalidations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recording() {
        let stats = ObjectModelStats::new();
        stats.record_shape_created();
        stats.record_transition_lookup(true);
        stats.record_transition_lookup(true);
        stats.record_transition_lookup(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.shapes_created, 1);
        assert_eq!(snapshot.transition_hits, 2);
        assert_eq!(snapshot.transition_misses, 1);
        assert!((stats.transition_hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_reset() {
        let stats = ObjectModelStats::new();
        stats.record_obsoleted();
        stats.record_merge();
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
        stats.print_summary();
    }

    #[test]
    fn test_empty_hit_ratio() {
        assert_eq!(ObjectModelStats::new().transition_hit_ratio(), 0.0);
    }
}
