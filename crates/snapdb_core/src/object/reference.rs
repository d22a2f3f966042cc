//! Object references and cache keys.

use crate::error::{CoreError, CoreResult};
use crate::registry::{LinkInfo, TypeInfo};
use std::fmt;
use std::sync::Arc;

/// Canonical byte identity of an object or link set.
///
/// Four big-endian tag bytes (`type_tag << 16 | link_tag`) followed by the
/// UTF-8 key. Plain objects use link tag 0, so every object of a type
/// shares the same 4-byte prefix.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Builds the key for a type tag, link tag and object key.
    #[must_use]
    pub fn new(type_tag: u16, link_tag: u16, key: &str) -> Self {
        let mut bytes = Vec::with_capacity(4 + key.len());
        bytes.extend_from_slice(&Self::prefix(type_tag, link_tag));
        bytes.extend_from_slice(key.as_bytes());
        Self(bytes)
    }

    /// Returns the 4-byte prefix shared by every key with these tags.
    #[must_use]
    pub fn prefix(type_tag: u16, link_tag: u16) -> [u8; 4] {
        ((u32::from(type_tag) << 16) | u32::from(link_tag)).to_be_bytes()
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

/// Names one object, or one named link set of one object.
#[derive(Clone)]
pub struct ObjectRef {
    type_info: Arc<TypeInfo>,
    key: String,
    link: Option<LinkInfo>,
    cache_key: CacheKey,
}

impl ObjectRef {
    /// References a plain object.
    pub fn object(type_info: Arc<TypeInfo>, key: impl Into<String>) -> Self {
        let key = key.into();
        let cache_key = CacheKey::new(type_info.tag(), 0, &key);
        Self {
            type_info,
            key,
            link: None,
            cache_key,
        }
    }

    /// References the link set `link_name` of an object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownLink`] if the type does not declare the link.
    pub fn link(
        type_info: Arc<TypeInfo>,
        link_name: &str,
        key: impl Into<String>,
    ) -> CoreResult<Self> {
        let link = type_info
            .link(link_name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_link(type_info.name(), link_name))?;
        let key = key.into();
        let cache_key = CacheKey::new(type_info.tag(), link.tag, &key);
        Ok(Self {
            type_info,
            key,
            link: Some(link),
            cache_key,
        })
    }

    /// Returns the link reference with the same type and link but another key.
    ///
    /// Index entries for a link set are keyed by the target's link
    /// reference built this way.
    #[must_use]
    pub fn sibling(&self, key: &str) -> Self {
        let link_tag = self.link.as_ref().map_or(0, |l| l.tag);
        Self {
            type_info: Arc::clone(&self.type_info),
            key: key.to_string(),
            link: self.link.clone(),
            cache_key: CacheKey::new(self.type_info.tag(), link_tag, key),
        }
    }

    /// Returns the referenced type.
    #[must_use]
    pub fn type_info(&self) -> &Arc<TypeInfo> {
        &self.type_info
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.type_info.name()
    }

    /// Returns the object key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the link name for link references.
    #[must_use]
    pub fn link_name(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.name.as_str())
    }

    /// Returns true if this references a link set.
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.link.is_some()
    }

    /// Returns the cache key.
    #[must_use]
    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.cache_key == other.cache_key
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.link_name() {
            Some(link) => write!(f, "{}[{}].{}", self.type_name(), self.key, link),
            None => write!(f, "{}[{}]", self.type_name(), self.key),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TypeDef, TypeRegistry};
    use snapdb_codec::StringCodec;
    use snapdb_storage::MemStore;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        let store = MemStore::new();
        registry
            .register(
                TypeDef::new("person").link("friends", "person"),
                Arc::new(StringCodec),
                &store,
            )
            .unwrap();
        registry
            .register(TypeDef::new("place"), Arc::new(StringCodec), &store)
            .unwrap();
        registry
    }

    #[test]
    fn cache_key_layout() {
        let key = CacheKey::new(0x0102, 0x0304, "ab");
        assert_eq!(key.as_bytes(), &[1, 2, 3, 4, b'a', b'b']);
        assert_eq!(key.to_string(), "010203046162");
    }

    #[test]
    fn equal_tuples_give_equal_keys() {
        let registry = registry();
        let person = registry.get("person").unwrap();
        let a = ObjectRef::object(Arc::clone(&person), "x");
        let b = ObjectRef::object(Arc::clone(&person), "x");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a, b);
    }

    #[test]
    fn objects_links_and_types_never_collide() {
        let registry = registry();
        let person = registry.get("person").unwrap();
        let place = registry.get("place").unwrap();

        let object = ObjectRef::object(Arc::clone(&person), "x");
        let link = ObjectRef::link(Arc::clone(&person), "friends", "x").unwrap();
        let other = ObjectRef::object(place, "x");

        assert_ne!(object.cache_key(), link.cache_key());
        assert_ne!(object.cache_key(), other.cache_key());
        assert!(link.is_link());
        assert_eq!(link.link_name(), Some("friends"));
        assert_eq!(
            &object.cache_key().as_bytes()[..4],
            &CacheKey::prefix(person.tag(), 0)
        );
    }

    #[test]
    fn unknown_link_is_error() {
        let registry = registry();
        let person = registry.get("person").unwrap();
        assert!(matches!(
            ObjectRef::link(person, "enemies", "x"),
            Err(CoreError::UnknownLink { .. })
        ));
    }

    #[test]
    fn sibling_keeps_link() {
        let registry = registry();
        let person = registry.get("person").unwrap();
        let link = ObjectRef::link(Arc::clone(&person), "friends", "x").unwrap();
        let target = link.sibling("y");
        assert_eq!(
            target.cache_key(),
            ObjectRef::link(person, "friends", "y").unwrap().cache_key()
        );
        assert_eq!(format!("{target}"), "person[y].friends");
    }
}
