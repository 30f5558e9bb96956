//! Property keys and properties.
//!
//! A [`Property`] is one row of a shape's property table: a key, the
//! [`Location`] holding its value, and 32 bits of language-defined flags.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::location::Location;

// =============================================================================
// Property Key
// =============================================================================

/// Internal key that is never visible to key enumeration.
///
/// Compared by identity: two hidden keys created with the same name are
/// different keys.
#[derive(Clone)]
pub struct HiddenKey {
    id: u32,
    name: Arc<str>,
}

static NEXT_HIDDEN_KEY: AtomicU32 = AtomicU32::new(0);

impl HiddenKey {
    /// Create a fresh hidden key.
    pub fn new(name: &str) -> Self {
        Self {
            id: NEXT_HIDDEN_KEY.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for HiddenKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HiddenKey {}

impl Hash for HiddenKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for HiddenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}#{}>", self.name, self.id)
    }
}

/// Key of a property.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Ordinary named property, compared by content.
    Name(Arc<str>),
    /// Internal property, compared by identity.
    Hidden(HiddenKey),
}

impl PropertyKey {
    /// Create a named key.
    #[inline]
    pub fn name(name: &str) -> Self {
        PropertyKey::Name(Arc::from(name))
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        matches!(self, PropertyKey::Hidden(_))
    }

    /// The key's name (hidden keys included).
    pub fn as_str(&self) -> &str {
        match self {
            PropertyKey::Name(name) => name,
            PropertyKey::Hidden(key) => key.name(),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::name(name)
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(Arc::from(name))
    }
}

impl From<HiddenKey> for PropertyKey {
    fn from(key: HiddenKey) -> Self {
        PropertyKey::Hidden(key)
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => write!(f, "{:?}", name),
            PropertyKey::Hidden(key) => write!(f, "{:?}", key),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Property
// =============================================================================

/// Immutable `(key, location, flags)` triple.
///
/// Equality is structural. Two properties with the same key and flags but
/// different locations describe the same logical property at different
/// generality.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Property {
    key: PropertyKey,
    location: Location,
    flags: u32,
}

impl Property {
    #[inline]
    pub fn new(key: PropertyKey, location: Location, flags: u32) -> Self {
        Self {
            key,
            location,
            flags,
        }
    }

    #[inline]
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    #[inline]
    pub fn location(&self) -> &Location {
        &self.location
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.key.is_hidden()
    }

    /// Stored in the shape rather than per object.
    #[inline]
    pub fn is_constant(&self) -> bool {
        self.location.is_value()
    }

    /// Same key and flags, any location.
    #[inline]
    pub fn is_same(&self, other: &Property) -> bool {
        self.key == other.key && self.flags == other.flags
    }

    /// Copy with a different location.
    #[inline]
    pub fn relocate(&self, location: Location) -> Self {
        Self::new(self.key.clone(), location, self.flags)
    }

    /// Copy with different flags.
    #[inline]
    pub fn copy_with_flags(&self, flags: u32) -> Self {
        Self::new(self.key.clone(), self.location.clone(), flags)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{:?}", self.key, self.location)?;
        if self.flags != 0 {
            write!(f, "%{}", self.flags)?;
        }
        Ok(())
    }
}
