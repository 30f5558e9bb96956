//! Shape-based dynamic object storage for Prism.
//!
//! This crate provides:
//! - Immutable, shared shapes describing object layouts, linked by cached
//!   transitions
//! - Typed storage locations with implicit widening and type speculation
//! - Per-construction slot allocation over in-object fields and extension
//!   arrays
//! - Obsolescence and merging of shapes that differ only in generality
//! - Lazy reshape of objects whose shape went stale
//! - `DynamicObject`, the container these operate on
//!
//! Speculation is expressed through [`Assumption`] tokens: compiled code may
//! rely on a token while it is valid, and every change that would break the
//! speculation invalidates it first.

pub mod allocator;
pub mod assumption;
pub mod config;
pub mod error;
pub mod layout;
pub mod location;
pub mod object;
pub mod property;
pub mod property_map;
pub mod shape;
pub mod stats;
pub mod store;
pub mod strategy;
pub mod transition;
pub mod value;

// Re-export commonly used items
pub use assumption::Assumption;
pub use config::{ConfigError, LayoutConfig, MAX_DYNAMIC_FIELDS};
pub use error::{ObjectModelError, ObjectModelResult, UnexpectedResult};
pub use layout::{layout_registry, Layout, LayoutRegistry, ObjectType};
pub use location::{Location, LocationKind, LocationType, TypeAssumption};
pub use object::DynamicObject;
pub use property::{HiddenKey, Property, PropertyKey};
pub use shape::{Shape, ShapeBuilder, ShapeId, SharedData, StorageSizes, MAX_SHAPE_FLAGS};
pub use stats::{stats, ObjectModelStats, StatsSnapshot};
pub use store::{FieldStore, ObjectStorage};
pub use strategy::PutFlags;
pub use transition::Transition;
pub use value::{Value, ValueClass};
