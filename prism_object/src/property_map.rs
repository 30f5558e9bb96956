//! Persistent ordered property map.
//!
//! Shapes share their property tables structurally: a map is a cons list of
//! properties from the most recently added back to the first, so appending
//! (the overwhelmingly common case) is O(1) and shares the whole tail with
//! the parent shape. Replacing or removing a buried entry rebuilds only the
//! suffix after it.
//!
//! Lookups in small maps walk the list; larger maps build a hash index on
//! first lookup.

use std::fmt;
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::property::{Property, PropertyKey};

/// Maps at or below this size are searched linearly.
const LINEAR_LOOKUP_LIMIT: usize = 8;

struct Node {
    property: Property,
    prev: Option<Arc<Node>>,
}

/// Ordered, persistent `PropertyKey -> Property` map.
pub struct PropertyMap {
    head: Option<Arc<Node>>,
    len: usize,
    index: OnceLock<FxHashMap<PropertyKey, Property>>,
}

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            head: None,
            len: 0,
            index: OnceLock::new(),
        }
    }

    fn from_head(head: Option<Arc<Node>>, len: usize) -> Self {
        Self {
            head,
            len,
            index: OnceLock::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look up a property.
    pub fn get(&self, key: &PropertyKey) -> Option<&Property> {
        if self.len <= LINEAR_LOOKUP_LIMIT {
            return self.nodes().map(|node| &node.property).find(|p| p.key() == key);
        }
        self.index
            .get_or_init(|| {
                self.nodes()
                    .map(|node| (node.property.key().clone(), node.property.clone()))
                    .collect()
            })
            .get(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &PropertyKey) -> bool {
        self.get(key).is_some()
    }

    /// Most recently added property.
    #[inline]
    pub fn last(&self) -> Option<&Property> {
        self.head.as_ref().map(|node| &node.property)
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> Vec<Property> {
        let mut properties: Vec<Property> = self.nodes().map(|n| n.property.clone()).collect();
        properties.reverse();
        properties
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<PropertyKey> {
        let mut keys: Vec<PropertyKey> = self.nodes().map(|n| n.property.key().clone()).collect();
        keys.reverse();
        keys
    }

    /// Walk from the most recent property backwards.
    fn nodes(&self) -> impl Iterator<Item = &Node> {
        let mut current = self.head.as_deref();
        std::iter::from_fn(move || {
            let node = current?;
            current = node.prev.as_deref();
            Some(node)
        })
    }

    /// Copy with `property` added, or replacing the entry with the same key
    /// at its original position.
    pub fn put(&self, property: Property) -> PropertyMap {
        if self.contains_key(property.key()) {
            let key = property.key().clone();
            self.rebuild(&key, Some(property))
        } else {
            let node = Node {
                property,
                prev: self.head.clone(),
            };
            Self::from_head(Some(Arc::new(node)), self.len + 1)
        }
    }

    /// Copy without `key`. Returns an equal copy if absent.
    pub fn remove(&self, key: &PropertyKey) -> PropertyMap {
        if self.contains_key(key) {
            self.rebuild(key, None)
        } else {
            Self::from_head(self.head.clone(), self.len)
        }
    }

    /// Copy with `old` replaced by `new` in place.
    pub fn replace(&self, old: &Property, new: Property) -> PropertyMap {
        debug_assert_eq!(old.key(), new.key());
        self.rebuild(old.key(), Some(new))
    }

    /// Rebuild the suffix after `key`, substituting or dropping its entry.
    fn rebuild(&self, key: &PropertyKey, replacement: Option<Property>) -> PropertyMap {
        let mut suffix = Vec::new();
        let mut current = self.head.clone();
        while let Some(node) = current {
            if node.property.key() == key {
                let mut head = node.prev.clone();
                let mut len = self.len - 1;
                if let Some(property) = replacement {
                    head = Some(Arc::new(Node { property, prev: head }));
                    len += 1;
                }
                for property in suffix.into_iter().rev() {
                    head = Some(Arc::new(Node { property, prev: head }));
                }
                return Self::from_head(head, len);
            }
            suffix.push(node.property.clone());
            current = node.prev.clone();
        }
        Self::from_head(self.head.clone(), self.len)
    }
}

impl Default for PropertyMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PropertyMap {
    fn clone(&self) -> Self {
        Self::from_head(self.head.clone(), self.len)
    }
}

impl Drop for PropertyMap {
    fn drop(&mut self) {
        // Unlink uniquely owned nodes iteratively so long chains cannot
        // overflow the stack.
        let mut current = self.head.take();
        while let Some(node) = current {
            match Arc::try_unwrap(node) {
                Ok(mut node) => current = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for PropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.properties()).finish()
    }
}
