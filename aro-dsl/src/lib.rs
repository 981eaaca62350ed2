//! ARO DSL - Language Front End
//!
//! Lexer, parser, semantic analyzer, and pretty-printer for the ARO
//! language.
//!
//! Architecture:
//! ```text
//! ARO Source (.aro file)
//!     ↓
//! Lexer (tokenize)
//!     ↓
//! Parser (build AST)
//!     ↓
//! Semantic Analyzer (symbols, data flow, event graph)
//!     ↓
//! AnalyzedProgram (consumed by aro-runtime)
//! ```

pub mod activity;
pub mod analyzer;
pub mod lexer;
pub mod parser;
pub mod pretty_printer;

pub use activity::{classify_activity, ActivityKind, FileEvent, SocketEvent};
pub use analyzer::{
    analyze, AnalyzedFeatureSet, AnalyzedProgram, DataFlowInfo, PublishedSymbol, Symbol,
    SymbolSource, SymbolTable, SymbolVisibility,
};
pub use lexer::{Article, Lexer, Preposition, Token, TokenKind};
pub use parser::ast;
pub use parser::Parser;

use aro_core::Diagnostics;

/// The result of running the full compile pipeline.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub program: AnalyzedProgram,
    pub diagnostics: Diagnostics,
}

impl CompileResult {
    /// Compilation succeeds only with zero errors; warnings are fine.
    pub fn is_success(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

/// Lex, parse, and analyze a source text.
pub fn compile(source: &str) -> CompileResult {
    let (program, mut diagnostics) = Parser::parse_source(source);
    let (analyzed, analysis_diagnostics) = analyze(&program);
    diagnostics.extend(analysis_diagnostics);
    CompileResult {
        program: analyzed,
        diagnostics,
    }
}
