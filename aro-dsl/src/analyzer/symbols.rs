//! Symbol tables and data-flow summaries

use crate::parser::ast::FeatureSet;
use aro_core::SourceSpan;
use std::collections::{HashMap, HashSet};

/// Who can see a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolVisibility {
    /// Local to its feature set.
    Internal,
    /// Exported through the global published-symbol map.
    Published,
    /// Provided from outside the feature set (runtime or require).
    External,
}

/// Where a symbol came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSource {
    /// Defined by a statement's result binding.
    Statement,
    /// A loop item or require alias.
    Alias,
    /// Runtime-provided.
    External,
}

/// One named binding known to the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub visibility: SymbolVisibility,
    pub source: SymbolSource,
    pub span: SourceSpan,
    /// Whether the defining statement's verb was a rebinder.
    pub rebinder_origin: bool,
}

/// Per-feature-set symbol table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol) {
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }
}

/// Inputs, outputs, and side effects of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFlowInfo {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub side_effects: Vec<String>,
}

/// A feature set together with its analysis results.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedFeatureSet {
    pub feature_set: FeatureSet,
    pub symbols: SymbolTable,
    /// One entry per top-level statement, in source order.
    pub data_flow: Vec<DataFlowInfo>,
    /// Published symbols this feature set reads from other feature sets.
    pub external_dependencies: HashSet<String>,
    /// Symbols this feature set publishes.
    pub published: HashSet<String>,
}

/// An entry in the global published-symbol map.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedSymbol {
    /// The statement output that produces the value.
    pub value_source: String,
    pub feature_set: String,
    pub business_activity: String,
}

/// The fully analyzed program handed to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedProgram {
    pub feature_sets: Vec<AnalyzedFeatureSet>,
    /// name → (value-source, owning feature set, business activity)
    pub published: HashMap<String, PublishedSymbol>,
}

impl AnalyzedProgram {
    /// Find a feature set by name.
    pub fn feature_set(&self, name: &str) -> Option<&AnalyzedFeatureSet> {
        self.feature_sets
            .iter()
            .find(|fs| fs.feature_set.name == name)
    }

    /// Look up a published symbol, gated by business activity.
    ///
    /// A lookup from a different (non-empty) activity returns `None`.
    pub fn published_for(
        &self,
        name: &str,
        business_activity: &str,
    ) -> Option<&PublishedSymbol> {
        let symbol = self.published.get(name)?;
        if !symbol.business_activity.is_empty()
            && !business_activity.is_empty()
            && symbol.business_activity != business_activity
        {
            return None;
        }
        Some(symbol)
    }
}
