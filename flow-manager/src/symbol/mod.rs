//! Symbol universe.
//!
//! The active set of symbols being polled and streamed. Thread-safe;
//! seeded from configuration at startup.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::debug;

/// Symbol universe manager.
pub struct SymbolUniverse {
    symbols: RwLock<BTreeSet<String>>,
}

impl SymbolUniverse {
    /// Create an empty universe.
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(BTreeSet::new()),
        }
    }

    /// Create a universe seeded from configuration.
    pub fn with_symbols(symbols: impl IntoIterator<Item = String>) -> Self {
        let universe = Self::new();
        universe.add_many(symbols);
        universe
    }

    /// Add a symbol; returns true if it was new.
    pub fn add(&self, symbol: &str) -> bool {
        let added = self.symbols.write().insert(symbol.to_uppercase());
        if added {
            debug!(symbol = %symbol.to_uppercase(), "added symbol to universe");
        }
        added
    }

    /// Add multiple symbols; returns how many were new.
    pub fn add_many(&self, symbols: impl IntoIterator<Item = String>) -> usize {
        let mut universe = self.symbols.write();
        let mut count = 0;
        for symbol in symbols {
            if universe.insert(symbol.to_uppercase()) {
                count += 1;
            }
        }
        count
    }

    /// Remove a symbol; returns true if it was present.
    pub fn remove(&self, symbol: &str) -> bool {
        self.symbols.write().remove(&symbol.to_uppercase())
    }

    /// Check membership.
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.read().contains(&symbol.to_uppercase())
    }

    /// All symbols, sorted.
    pub fn all(&self) -> Vec<String> {
        self.symbols.read().iter().cloned().collect()
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.read().is_empty()
    }
}

impl Default for SymbolUniverse {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_uppercase() {
        let universe = SymbolUniverse::new();
        assert!(universe.add("spy"));
        assert!(!universe.add("SPY"));
        assert!(universe.contains("sPy"));
        assert_eq!(universe.all(), vec!["SPY".to_string()]);
    }

    #[test]
    fn seeded_universe() {
        let universe = SymbolUniverse::with_symbols(vec![
            "SPY".to_string(),
            "qqq".to_string(),
            "SPY".to_string(),
        ]);
        assert_eq!(universe.len(), 2);
    }
}
