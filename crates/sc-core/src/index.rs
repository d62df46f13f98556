//! Stable symbol indexing for users, items, and tags.

use std::collections::{BTreeSet, HashMap};

/// Assigns each distinct symbol a stable integer in `0..len`.
///
/// Positions follow sorted symbol order, so the assignment depends only on
/// the set of symbols, not on the order the caller discovered them in. The
/// same index instance must serve both training and query for a given run;
/// the engine builds one per symbol space and freezes it inside the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolIndex {
    by_symbol: HashMap<String, usize>,
    by_position: Vec<String>,
}

impl SymbolIndex {
    /// Build from a deduplicated, sorted set of symbols.
    pub fn from_set(symbols: BTreeSet<String>) -> Self {
        let by_position: Vec<String> = symbols.into_iter().collect();
        let by_symbol = by_position
            .iter()
            .enumerate()
            .map(|(position, symbol)| (symbol.clone(), position))
            .collect();
        Self {
            by_symbol,
            by_position,
        }
    }

    /// Position of a symbol, or `None` if it was never indexed.
    pub fn position(&self, symbol: &str) -> Option<usize> {
        self.by_symbol.get(symbol).copied()
    }

    /// Symbol at a position.
    pub fn symbol(&self, position: usize) -> Option<&str> {
        self.by_position.get(position).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.by_symbol.contains_key(symbol)
    }

    /// All symbols in position order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.by_position.iter().map(String::as_str)
    }
}
