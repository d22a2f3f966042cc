//! Link sets with delta tracking.

/// The relationship keys of one named link on one object.
///
/// `original` is what was loaded from storage; `added` and `removed` are
/// the changes made by the current transaction. All three are sorted,
/// which keeps membership checks logarithmic. The delta is what drives
/// index maintenance at commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    original: Vec<String>,
    added: Vec<String>,
    removed: Vec<String>,
}

fn contains(keys: &[String], key: &str) -> bool {
    keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
}

fn insert(keys: &mut Vec<String>, key: &str) {
    if let Err(i) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
        keys.insert(i, key.to_string());
    }
}

fn remove(keys: &mut Vec<String>, key: &str) {
    if let Ok(i) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
        keys.remove(i);
    }
}

fn normalized(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys.dedup();
    keys
}

impl LinkSet {
    /// Creates an empty link set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a link set whose stored content is `keys`.
    #[must_use]
    pub fn from_original(keys: Vec<String>) -> Self {
        Self {
            original: normalized(keys),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Adds a key.
    pub fn add(&mut self, key: &str) {
        remove(&mut self.removed, key);
        if !contains(&self.original, key) {
            insert(&mut self.added, key);
        }
    }

    /// Removes a key; does nothing if the key is not present.
    pub fn remove(&mut self, key: &str) {
        if !contains(&self.original, key) && !contains(&self.added, key) {
            return;
        }
        remove(&mut self.added, key);
        insert(&mut self.removed, key);
    }

    /// Replaces the whole content.
    ///
    /// Stored keys missing from `keys` are marked removed and new keys
    /// added; keys present both before and after appear in neither list.
    pub fn set(&mut self, keys: Vec<String>) {
        let keys = normalized(keys);
        self.removed = self
            .original
            .iter()
            .filter(|k| !contains(&keys, k))
            .cloned()
            .collect();
        self.added = keys
            .into_iter()
            .filter(|k| !contains(&self.original, k))
            .collect();
    }

    /// Returns true if the key is linked.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        if contains(&self.removed, key) {
            return false;
        }
        contains(&self.added, key) || contains(&self.original, key)
    }

    /// Returns the linked keys, sorted.
    #[must_use]
    pub fn effective_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .original
            .iter()
            .filter(|k| !contains(&self.removed, k))
            .cloned()
            .collect();
        keys.extend(self.added.iter().cloned());
        normalized(keys)
    }

    /// Returns the stored keys.
    #[must_use]
    pub fn original(&self) -> &[String] {
        &self.original
    }

    /// Returns the keys added since load.
    #[must_use]
    pub fn added(&self) -> &[String] {
        &self.added
    }

    /// Returns the keys removed since load.
    #[must_use]
    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    /// Returns true if nothing is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effective_keys().is_empty()
    }
}
