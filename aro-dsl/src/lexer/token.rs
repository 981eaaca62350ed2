//! Lexer token types

use aro_core::SourceSpan;
use serde::{Deserialize, Serialize};

// ============================================================================
// WORD CLASSES
// ============================================================================

/// The three articles. First-class tokens because the statement grammar
/// allows them before every noun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Article {
    A,
    An,
    The,
}

impl Article {
    pub fn from_lexeme(lexeme: &str) -> Option<Article> {
        match lexeme.to_lowercase().as_str() {
            "a" => Some(Article::A),
            "an" => Some(Article::An),
            "the" => Some(Article::The),
            _ => None,
        }
    }

    pub fn lexeme(&self) -> &'static str {
        match self {
            Article::A => "a",
            Article::An => "an",
            Article::The => "the",
        }
    }
}

/// The closed preposition set. Each carries source-attribution semantics
/// used by the actions downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preposition {
    From,
    For,
    Against,
    To,
    Into,
    Via,
    With,
    On,
    At,
    By,
}

impl Preposition {
    pub fn from_lexeme(lexeme: &str) -> Option<Preposition> {
        match lexeme.to_lowercase().as_str() {
            "from" => Some(Preposition::From),
            "for" => Some(Preposition::For),
            "against" => Some(Preposition::Against),
            "to" => Some(Preposition::To),
            "into" => Some(Preposition::Into),
            "via" => Some(Preposition::Via),
            "with" => Some(Preposition::With),
            "on" => Some(Preposition::On),
            "at" => Some(Preposition::At),
            "by" => Some(Preposition::By),
            _ => None,
        }
    }

    pub fn lexeme(&self) -> &'static str {
        match self {
            Preposition::From => "from",
            Preposition::For => "for",
            Preposition::Against => "against",
            Preposition::To => "to",
            Preposition::Into => "into",
            Preposition::Via => "via",
            Preposition::With => "with",
            Preposition::On => "on",
            Preposition::At => "at",
            Preposition::By => "by",
        }
    }
}

// ============================================================================
// TOKEN KINDS
// ============================================================================

/// Token kinds for the ARO language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Delimiters
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Lt,
    Gt,
    Colon,
    Semicolon,
    Comma,
    Dot,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    Ne,
    Le,
    Ge,
    Concat,
    Arrow,
    Bang,
    Pipe,

    // Keywords
    Where,
    When,
    Match,
    Otherwise,
    Each,
    In,
    Publish,
    Require,
    Import,
    As,
    Count,
    Sum,
    Average,
    Min,
    Max,
    Exists,
    Is,
    Contains,
    Matches,
    And,
    Or,
    Not,
    True,
    False,
    Null,

    // Word classes
    Article(Article),
    Preposition(Preposition),

    // Literals
    Identifier(String),
    Integer(i64),
    Float(f64),
    /// A literal run of string text; a string with no interpolation is a
    /// single segment.
    StringSegment(String),
    /// `${` inside a string.
    InterpolationStart,
    /// The matching `}`.
    InterpolationEnd,
    Regex {
        pattern: String,
        flags: String,
    },

    // Special
    Eof,
    Error(String),
}

impl TokenKind {
    /// Classify an identifier lexeme. Keywords win over articles, articles
    /// over prepositions, with a generic identifier as the fallback.
    /// Lookup is case-insensitive.
    pub fn classify_word(lexeme: &str) -> TokenKind {
        match lexeme.to_lowercase().as_str() {
            "where" => TokenKind::Where,
            "when" => TokenKind::When,
            "match" => TokenKind::Match,
            "otherwise" => TokenKind::Otherwise,
            "each" => TokenKind::Each,
            "in" => TokenKind::In,
            "publish" => TokenKind::Publish,
            "require" => TokenKind::Require,
            "import" => TokenKind::Import,
            "as" => TokenKind::As,
            "count" => TokenKind::Count,
            "sum" => TokenKind::Sum,
            "average" => TokenKind::Average,
            "min" => TokenKind::Min,
            "max" => TokenKind::Max,
            "exists" => TokenKind::Exists,
            "is" => TokenKind::Is,
            "contains" => TokenKind::Contains,
            "matches" => TokenKind::Matches,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => {
                if let Some(article) = Article::from_lexeme(lexeme) {
                    TokenKind::Article(article)
                } else if let Some(preposition) = Preposition::from_lexeme(lexeme) {
                    TokenKind::Preposition(preposition)
                } else {
                    TokenKind::Identifier(lexeme.to_string())
                }
            }
        }
    }
}

/// A token: kind, raw lexeme, and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

impl Token {
    pub fn eof(span: SourceSpan) -> Self {
        Self {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            span,
        }
    }
}
