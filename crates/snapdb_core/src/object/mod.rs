//! Objects, link sets and their cached version chains.

mod links;
mod reference;
mod version;

pub use links::LinkSet;
pub use reference::{CacheKey, ObjectRef};
pub use version::ObjectVersion;

pub(crate) use version::ObjectHandle;
