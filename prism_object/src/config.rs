//! Layout configuration parameters.
//!
//! A [`LayoutConfig`] fixes, for one layout, how much in-object storage a
//! shape lineage may use, which implicit numeric widenings its locations
//! permit, and the bounds of the obsolescence machinery. Every root shape
//! created for a layout inherits these settings for its whole lineage.

/// Fixed maximum number of storage slots one layout may allocate.
pub const MAX_DYNAMIC_FIELDS: usize = 1000;

/// Configuration for a layout.
///
/// # Example
///
/// ```ignore
/// use prism_object::LayoutConfig;
///
/// // JavaScript-like numbers: ints widen into doubles in place.
/// let config = LayoutConfig {
///     allow_int_to_double: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutConfig {
    // =========================================================================
    // Storage
    // =========================================================================
    /// Number of in-object reference fields.
    ///
    /// Default: 4
    pub inline_object_fields: usize,

    /// Number of in-object 64-bit primitive fields.
    ///
    /// Default: 4
    pub inline_primitive_fields: usize,

    /// Whether primitives may be stored unboxed in the primitive extension
    /// array once the in-object fields are exhausted. When disabled, such
    /// values fall back to reference locations.
    ///
    /// Default: true
    pub primitive_array_locations: bool,

    /// Initial capacity of a non-empty extension array.
    ///
    /// Default: 4
    pub initial_capacity: usize,

    /// Maximum slots (fields plus array slots) per layout.
    ///
    /// Default: [`MAX_DYNAMIC_FIELDS`]
    pub max_dynamic_fields: usize,

    // =========================================================================
    // Implicit Casts
    // =========================================================================
    /// Allow an int location to widen in place into a long location.
    ///
    /// Default: false
    pub allow_int_to_long: bool,

    /// Allow an int location to widen in place into a double location.
    ///
    /// Default: false
    pub allow_int_to_double: bool,

    // =========================================================================
    // Obsolescence
    // =========================================================================
    /// Maximum shape depth considered for merging.
    ///
    /// Default: 32
    pub max_merge_depth: usize,

    /// Maximum number of differing levels two shapes may have and still
    /// be merged.
    ///
    /// Default: 2
    pub max_merge_diff: usize,

    /// Maximum nesting and successor-chain length when resolving an obsolete
    /// shape before giving up with a non-recoverable error.
    ///
    /// Default: 1024
    pub max_reshape_depth: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            // Storage
            inline_object_fields: 4,
            inline_primitive_fields: 4,
            primitive_array_locations: true,
            initial_capacity: 4,
            max_dynamic_fields: MAX_DYNAMIC_FIELDS,

            // Implicit casts
            allow_int_to_long: false,
            allow_int_to_double: false,

            // Obsolescence
            max_merge_depth: 32,
            max_merge_diff: 2,
            max_reshape_depth: 1024,
        }
    }
}

impl LayoutConfig {
    /// Layout without in-object fields: everything goes to the extension
    /// arrays.
    pub fn compact() -> Self {
        Self {
            inline_object_fields: 0,
            inline_primitive_fields: 0,
            ..Default::default()
        }
    }

    /// Layout where ints widen in place into longs and doubles.
    pub fn implicit_casts() -> Self {
        Self {
            allow_int_to_long: true,
            allow_int_to_double: true,
            ..Default::default()
        }
    }

    /// Layout storing every value boxed in reference locations.
    pub fn boxed() -> Self {
        Self {
            inline_primitive_fields: 0,
            primitive_array_locations: false,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inline_object_fields + self.inline_primitive_fields > self.max_dynamic_fields {
            return Err(ConfigError::TooManyInlineFields);
        }
        if self.max_dynamic_fields > MAX_DYNAMIC_FIELDS {
            return Err(ConfigError::TooManyDynamicFields);
        }
        if self.initial_capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.max_reshape_depth == 0 {
            return Err(ConfigError::InvalidReshapeDepth);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// In-object fields exceed the dynamic field limit.
    TooManyInlineFields,
    /// Dynamic field limit exceeds the fixed maximum.
    TooManyDynamicFields,
    /// Initial capacity must be at least 1.
    InvalidCapacity,
    /// Reshape depth must be at least 1.
    InvalidReshapeDepth,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::TooManyInlineFields => {
                write!(f, "in-object fields exceed the dynamic field limit")
            }
            ConfigError::TooManyDynamicFields => {
                write!(f, "dynamic field limit must not exceed {}", MAX_DYNAMIC_FIELDS)
            }
            ConfigError::InvalidCapacity => write!(f, "initial capacity must be at least 1"),
            ConfigError::InvalidReshapeDepth => write!(f, "reshape depth must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}
