//! Prefix queries over the environment's identifier set
//!
//! The scanner recognizes multi-character identifiers (`kg`, `mol`,
//! `\mu g`) by growing a candidate lexeme one character at a time, asking at
//! each step whether the running prefix can still reach a known identifier.
//! That is the reverse of a tokenizer's longest-prefix lookup, so instead of
//! length-bucketed hash maps this uses one sorted slice: the candidate is a
//! viable prefix iff the first member `>=` it starts with it, and an exact
//! membership test is a plain binary search.
//!
//! # Example
//! ```
//! use latex_math_parser::prefix_set::PrefixSet;
//!
//! let set = PrefixSet::from_iter(["kg", "km", "mol"]);
//! assert!(set.has_prefix("k"));
//! assert!(set.contains("kg"));
//! assert!(!set.has_prefix("kx"));
//! ```

/// A set of identifiers supporting prefix viability and membership queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixSet {
    members: Box<[Box<str>]>,
}

impl PrefixSet {
    /// True when `query` is a prefix of at least one member
    ///
    /// The empty string is a prefix of any member, so this returns whether
    /// the set is non-empty for `""`.
    pub fn has_prefix(&self, query: &str) -> bool {
        let at = self.members.partition_point(|m| m.as_ref() < query);
        self.members
            .get(at)
            .map(|m| m.starts_with(query))
            .unwrap_or(false)
    }

    /// Exact membership
    pub fn contains(&self, query: &str) -> bool {
        self.members
            .binary_search_by(|m| m.as_ref().cmp(query))
            .is_ok()
    }

    /// Number of identifiers
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when no identifiers are present
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterate members in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.as_ref())
    }
}

impl<S: Into<Box<str>>> FromIterator<S> for PrefixSet {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = S>,
    {
        let mut members: Vec<Box<str>> = iter.into_iter().map(|s| s.into()).collect();
        members.sort_unstable();
        members.dedup();
        PrefixSet {
            members: members.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PrefixSet;

    #[test]
    fn prefix_queries() {
        let set = PrefixSet::from_iter(["kg", "km", "mol", "\\mu g"]);
        assert!(set.has_prefix("k"));
        assert!(set.has_prefix("kg"));
        assert!(set.has_prefix("mo"));
        assert!(set.has_prefix("\\mu "));
        assert!(!set.has_prefix("x"));
        assert!(!set.has_prefix("kgm"));
    }

    #[test]
    fn membership() {
        let set = PrefixSet::from_iter(["kg", "km"]);
        assert!(set.contains("kg"));
        assert!(!set.contains("k"));
        assert!(!set.contains("kgs"));
    }

    #[test]
    fn empty_set() {
        let set = PrefixSet::from_iter(Vec::<&str>::new());
        assert!(!set.has_prefix(""));
        assert!(!set.contains(""));
        assert!(set.is_empty());
    }

    #[test]
    fn empty_query_on_nonempty_set() {
        let set = PrefixSet::from_iter(["a"]);
        assert!(set.has_prefix(""));
    }

    #[test]
    fn duplicates_collapse() {
        let set = PrefixSet::from_iter(["m", "m", "mol"]);
        assert_eq!(set.len(), 2);
    }
}
