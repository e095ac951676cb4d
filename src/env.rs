//! Parse-time environments
//!
//! An [`Environment`] maps identifiers to symbol descriptors. The scanner
//! reads its key set to drive greedy multi-character identifier matching,
//! and the parser switches into chemistry mode when the environment carries
//! periodic-table elements. Environments are immutable while a parse is
//! running; [`crate::Model`] stacks them.

use crate::prefix_set::PrefixSet;
use fnv::FnvHashMap;

/// What kind of thing an environment identifier names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// A measurement unit (`kg`, `mol`, `\mu g`)
    Unit,
    /// A periodic-table element symbol; presence enables chemistry mode
    Element,
    /// A named constant
    Constant,
    /// An ordinary declared variable
    Variable,
}

/// Descriptor attached to an environment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// The identifier's kind
    pub kind: SymbolKind,
}

impl Symbol {
    /// Shorthand constructor
    pub fn new(kind: SymbolKind) -> Self {
        Symbol { kind }
    }
}

/// An identifier → descriptor map with prefix queries
#[derive(Debug, Clone, Default)]
pub struct Environment {
    symbols: FnvHashMap<Box<str>, Symbol>,
    prefixes: PrefixSet,
    chemistry: bool,
}

impl Environment {
    /// The empty environment
    pub fn new() -> Self {
        Environment::default()
    }

    /// Look up an identifier
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// True when `name` is declared
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// True when `run` could still grow into a declared identifier
    pub fn has_prefix(&self, run: &str) -> bool {
        self.prefixes.has_prefix(run)
    }

    /// Chemistry mode: the environment declares at least one element
    pub fn is_chemistry(&self) -> bool {
        self.chemistry
    }

    /// Number of declared identifiers
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when nothing is declared
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl<S: Into<Box<str>>> FromIterator<(S, Symbol)> for Environment {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (S, Symbol)>,
    {
        let symbols: FnvHashMap<Box<str>, Symbol> =
            iter.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let prefixes = symbols.keys().map(|k| k.clone()).collect();
        let chemistry = symbols.values().any(|s| s.kind == SymbolKind::Element);
        Environment {
            symbols,
            prefixes,
            chemistry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Environment, Symbol, SymbolKind};

    #[test]
    fn prefix_and_lookup() {
        let env: Environment = [
            ("kg", Symbol::new(SymbolKind::Unit)),
            ("km", Symbol::new(SymbolKind::Unit)),
        ]
        .into_iter()
        .collect();
        assert!(env.has_prefix("k"));
        assert!(env.contains("kg"));
        assert!(!env.contains("k"));
        assert!(!env.is_chemistry());
    }

    #[test]
    fn chemistry_detection() {
        let env: Environment = [
            ("H", Symbol::new(SymbolKind::Element)),
            ("O", Symbol::new(SymbolKind::Element)),
        ]
        .into_iter()
        .collect();
        assert!(env.is_chemistry());
    }
}
