//! Type registration.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use snapdb_codec::ObjectCodec;
use snapdb_storage::{Store, TypeDescriptor};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Definition of an object type, handed to [`crate::Database::register_type`].
///
/// ```rust
/// use snapdb_core::TypeDef;
///
/// let def = TypeDef::new("person").version(2).link("friends", "person");
/// assert_eq!(def.name(), "person");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    name: String,
    version: u16,
    links: BTreeMap<String, String>,
}

impl TypeDef {
    /// Starts a definition at schema version 1 with no links.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            links: BTreeMap::new(),
        }
    }

    /// Sets the schema version.
    #[must_use]
    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Declares a named link pointing at objects of `target` type.
    ///
    /// The target type is informational and need not be registered.
    #[must_use]
    pub fn link(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.links.insert(name.into(), target.into());
        self
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A declared link of a registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Link name.
    pub name: String,
    /// Name of the type the link points at.
    pub target: String,
    /// Storage tag of the link.
    pub tag: u16,
}

/// A registered type. Immutable once registered.
pub struct TypeInfo {
    name: String,
    version: u16,
    tag: u16,
    codec: Arc<dyn ObjectCodec>,
    links: BTreeMap<String, LinkInfo>,
}

impl TypeInfo {
    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the schema version.
    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Returns the storage tag.
    #[must_use]
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Returns the codec.
    #[must_use]
    pub fn codec(&self) -> &dyn ObjectCodec {
        self.codec.as_ref()
    }

    /// Looks up a declared link.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<&LinkInfo> {
        self.links.get(name)
    }

    /// Iterates declared links in name order.
    pub fn links(&self) -> impl Iterator<Item = &LinkInfo> {
        self.links.values()
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tag", &self.tag)
            .field("codec", &self.codec)
            .field("links", &self.links)
            .finish()
    }
}

/// Every type registered with a database.
#[derive(Debug, Default)]
pub(crate) struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<TypeInfo>>>,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a type, allocating its tags through the store.
    pub(crate) fn register(
        &self,
        def: TypeDef,
        codec: Arc<dyn ObjectCodec>,
        store: &dyn Store,
    ) -> CoreResult<Arc<TypeInfo>> {
        let mut types = self.types.write();
        if types.contains_key(&def.name) {
            return Err(CoreError::duplicate_type(def.name));
        }

        let descriptor = TypeDescriptor {
            name: def.name.clone(),
            version: def.version,
            links: def.links.keys().cloned().collect(),
        };
        let tags = store.register_type(&descriptor)?;

        let mut links = BTreeMap::new();
        for (name, target) in def.links {
            let tag = tags.link_tags.get(&name).copied().ok_or_else(|| {
                CoreError::invalid_operation(format!("store assigned no tag to link {name}"))
            })?;
            links.insert(name.clone(), LinkInfo { name, target, tag });
        }

        let info = Arc::new(TypeInfo {
            name: def.name.clone(),
            version: def.version,
            tag: tags.type_tag,
            codec,
            links,
        });
        tracing::debug!(
            type_name = %info.name,
            version = info.version,
            tag = info.tag,
            links = info.links.len(),
            "registered type"
        );
        types.insert(def.name, Arc::clone(&info));
        Ok(info)
    }

    /// Looks up a registered type.
    pub(crate) fn get(&self, name: &str) -> CoreResult<Arc<TypeInfo>> {
        self.types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_type(name))
    }

    /// Returns the registered type names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }
}
