//! Range-scan results.

use std::collections::VecDeque;

/// Keys produced by a range scan.
///
/// Scans are materialized when the result set is created, so a result set
/// holds no lock on the store. It can be drained either through the
/// cursor-style [`ResultSet::valid`] / [`Iterator::next`] pair or as an
/// iterator.
///
/// ```rust
/// use snapdb_storage::ResultSet;
///
/// let mut rs = ResultSet::new(vec!["a".into(), "b".into()]);
/// while rs.valid() {
///     let _key = rs.next();
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    keys: VecDeque<String>,
    closed: bool,
}

impl ResultSet {
    /// Creates a result set over the given keys.
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: keys.into(),
            closed: false,
        }
    }

    /// Creates an exhausted result set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: VecDeque::new(),
            closed: true,
        }
    }

    /// Returns true while there are keys left to read.
    #[must_use]
    pub fn valid(&self) -> bool {
        !self.closed && !self.keys.is_empty()
    }

    /// Returns the number of keys left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        if self.closed {
            0
        } else {
            self.keys.len()
        }
    }

    /// Stops the scan, dropping any unread keys.
    pub fn close(&mut self) {
        self.keys.clear();
        self.closed = true;
    }

    /// Drains every remaining key.
    #[must_use]
    pub fn all(mut self) -> Vec<String> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        std::mem::take(&mut self.keys).into()
    }
}

impl Iterator for ResultSet {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        let key = self.keys.pop_front();
        if self.keys.is_empty() {
            self.closed = true;
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_drains_in_order() {
        let mut rs = ResultSet::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut seen = Vec::new();
        while rs.valid() {
            seen.push(rs.next().unwrap());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(!rs.valid());
        assert_eq!(rs.next(), None);
    }

    #[test]
    fn close_drops_remaining() {
        let mut rs = ResultSet::new(vec!["a".into(), "b".into()]);
        assert_eq!(rs.remaining(), 2);
        rs.close();
        assert!(!rs.valid());
        assert_eq!(rs.remaining(), 0);
        assert!(rs.all().is_empty());
    }

    #[test]
    fn empty_is_invalid() {
        let rs = ResultSet::empty();
        assert!(!rs.valid());
        assert_eq!(ResultSet::new(Vec::new()).count(), 0);
    }
}
