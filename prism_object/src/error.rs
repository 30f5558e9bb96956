//! Error types for the object model.
//!
//! Two kinds of failure exist:
//!
//! - [`ObjectModelError`]: real errors surfaced to callers (programmer errors,
//!   incompatible low-level stores, and the non-recoverable reshape overflow).
//! - [`UnexpectedResult`]: a cheap control-flow signal returned by the typed
//!   fast paths (`get_int`, `get_double`, ...) when the stored value is not of
//!   the requested kind. Callers fall back to the generic path with the value
//!   it carries.

use crate::value::Value;

// =============================================================================
// Object Model Errors
// =============================================================================

/// Errors raised by shape transitions and object operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectModelError {
    /// A value was stored through a low-level path into a location that
    /// cannot hold it. High-level puts generalize instead of failing.
    IncompatibleLocation { location: String, value: String },

    /// The operation is not supported in the object's current state.
    UnsupportedOperation { message: String },

    /// An argument is out of range or otherwise invalid.
    IllegalArgument { message: String },

    /// Resolving an obsolete shape nested or chained too deeply.
    ///
    /// Non-recoverable: the object is left on its previous shape and the
    /// caller must not retry the access.
    ReshapeDepthExceeded { depth: usize },
}

impl ObjectModelError {
    /// Create an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Create an illegal-argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Check if this error must never be retried.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReshapeDepthExceeded { .. })
    }
}

impl std::fmt::Display for ObjectModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompatibleLocation { location, value } => {
                write!(f, "incompatible location: {} cannot store {}", location, value)
            }
            Self::UnsupportedOperation { message } => {
                write!(f, "unsupported operation: {}", message)
            }
            Self::IllegalArgument { message } => write!(f, "illegal argument: {}", message),
            Self::ReshapeDepthExceeded { depth } => {
                write!(f, "shape resolution exceeded maximum depth ({})", depth)
            }
        }
    }
}

impl std::error::Error for ObjectModelError {}

/// Result type for object model operations.
pub type ObjectModelResult<T> = Result<T, ObjectModelError>;

// =============================================================================
// Unexpected Result
// =============================================================================

/// The value read by a typed fast path did not have the expected kind.
///
/// Carries the value actually read so the caller can continue on the generic
/// path without a second read.
#[derive(Debug, Clone, PartialEq)]
pub struct UnexpectedResult(pub Value);

impl UnexpectedResult {
    /// Take the value that was actually read.
    #[inline]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl std::fmt::Display for UnexpectedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unexpected result: {:?}", self.0)
    }
}

impl std::error::Error for UnexpectedResult {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ObjectModelError::illegal_argument("flags out of range");
        assert_eq!(err.to_string(), "illegal argument: flags out of range");

        let err = ObjectModelError::unsupported("already shared");
        assert_eq!(err.to_string(), "unsupported operation: already shared");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ObjectModelError::ReshapeDepthExceeded { depth: 10 }.is_fatal());
        assert!(!ObjectModelError::illegal_argument("x").is_fatal());
    }

    #[test]
    fn test_unexpected_result_carries_value() {
        let unexpected = UnexpectedResult(Value::Double(1.5));
        assert_eq!(unexpected.into_value(), Value::Double(1.5));
    }
}
