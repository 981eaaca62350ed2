//! Abstract Syntax Tree types
//!
//! Nodes are immutable once built and every node carries a source span.
//! Passes traverse the tree through [`walk_statements`] and
//! [`Expression::walk`] rather than a virtual visitor.

use crate::lexer::Preposition;
use aro_core::{SourceSpan, StateGuardSet, TypedValue};
use serde::{Deserialize, Serialize};
use once_cell::sync::Lazy;
use std::collections::HashMap;

// ============================================================================
// PROGRAM STRUCTURE
// ============================================================================

/// The root node: ordered imports and feature sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub imports: Vec<Import>,
    pub feature_sets: Vec<FeatureSet>,
}

/// `import <name> from "module" [as <alias>].`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub name: String,
    pub module: String,
    pub alias: Option<String>,
    pub span: SourceSpan,
}

/// A named unit of business logic tagged with a business activity.
///
/// Handler-style feature sets carry the state guards declared in the
/// header (`OrderPlaced Handler<status:paid>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub name: String,
    pub business_activity: String,
    pub guards: StateGuardSet,
    /// Raw text of the `<…>` header suffix, kept for transition specs
    /// (`draft_to_paid`) that are not field:value guards.
    pub guard_spec: Option<String>,
    pub statements: Vec<Statement>,
    pub span: SourceSpan,
}

// ============================================================================
// STATEMENTS
// ============================================================================

/// The five statement kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Aro(AroStatement),
    Publish(PublishStatement),
    Require(RequireStatement),
    Match(MatchStatement),
    ForEach(ForEachLoop),
}

impl Statement {
    pub fn span(&self) -> SourceSpan {
        match self {
            Statement::Aro(s) => s.span,
            Statement::Publish(s) => s.span,
            Statement::Require(s) => s.span,
            Statement::Match(s) => s.span,
            Statement::ForEach(s) => s.span,
        }
    }
}

/// `<Verb> the <result> preposition the <object> [clauses].`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AroStatement {
    pub verb: String,
    pub result: QualifiedNoun,
    pub object: ObjectClause,
    pub value: ValueSource,
    pub query: QueryModifiers,
    pub range: RangeModifiers,
    /// `when <expr>` — the statement only runs when this is truthy.
    pub guard: Option<Expression>,
    pub span: SourceSpan,
}

/// The object side of a statement: preposition plus noun.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectClause {
    pub preposition: Preposition,
    pub noun: QualifiedNoun,
}

/// Identifier (hyphenated allowed) with an optional type annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedNoun {
    pub name: String,
    pub type_annotation: Option<String>,
    pub span: SourceSpan,
}

impl QualifiedNoun {
    pub fn new(name: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            name: name.into(),
            type_annotation: None,
            span,
        }
    }

    /// Computed specifiers: the name split on `.`, or the whole name
    /// verbatim when it has no path structure.
    pub fn specifiers(&self) -> Vec<String> {
        if self.name.contains('.') {
            self.name.split('.').map(|s| s.to_string()).collect()
        } else {
            vec![self.name.clone()]
        }
    }

    /// The base identifier (first path segment).
    pub fn base(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// Where a statement's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueSource {
    None,
    Literal(TypedValue),
    /// An expression in object position (`Compute t from a * b`).
    Expression(Expression),
    /// An expression in result position (`Log "${...}" to the console`).
    SinkExpression(Expression),
}

/// Aggregation over a retrieved collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

/// `where <expr>`, aggregation, and `by <field>` grouping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryModifiers {
    pub where_clause: Option<Expression>,
    pub aggregation: Option<Aggregation>,
    pub group_by: Option<String>,
}

impl QueryModifiers {
    pub fn is_empty(&self) -> bool {
        self.where_clause.is_none() && self.aggregation.is_none() && self.group_by.is_none()
    }
}

/// Trailing `to` / `with` clauses following a complete object clause.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeModifiers {
    pub to: Option<Expression>,
    pub with: Option<Expression>,
}

impl RangeModifiers {
    pub fn is_empty(&self) -> bool {
        self.to.is_none() && self.with.is_none()
    }
}

/// `publish the <name>.`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishStatement {
    pub name: String,
    pub span: SourceSpan,
}

/// `require the <name> [from <source>].`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequireStatement {
    pub name: String,
    pub source: Option<String>,
    pub span: SourceSpan,
}

/// `match the <subject> { when <expr> { … } otherwise { … } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStatement {
    pub subject: Expression,
    pub arms: Vec<MatchArm>,
    pub otherwise: Option<Vec<Statement>>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Expression,
    pub statements: Vec<Statement>,
    pub span: SourceSpan,
}

/// `for each <item> in the <list> { … }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachLoop {
    pub item: String,
    pub list: Expression,
    pub statements: Vec<Statement>,
    pub span: SourceSpan,
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Contains,
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterpolatedPart {
    Text(String),
    Expression(Expression),
}

/// The expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(TypedValue, SourceSpan),
    Variable {
        name: String,
        span: SourceSpan,
    },
    Array {
        items: Vec<Expression>,
        span: SourceSpan,
    },
    MapLiteral {
        entries: Vec<(String, Expression)>,
        span: SourceSpan,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        span: SourceSpan,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        span: SourceSpan,
    },
    Member {
        object: Box<Expression>,
        member: String,
        span: SourceSpan,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
        span: SourceSpan,
    },
    Grouped {
        inner: Box<Expression>,
        span: SourceSpan,
    },
    /// `<x> exists`
    Exists {
        name: String,
        span: SourceSpan,
    },
    /// `<x> is string`
    TypeCheck {
        subject: Box<Expression>,
        expected: String,
        span: SourceSpan,
    },
    Interpolated {
        parts: Vec<InterpolatedPart>,
        span: SourceSpan,
    },
}

impl Expression {
    pub fn span(&self) -> SourceSpan {
        match self {
            Expression::Literal(_, span) => *span,
            Expression::Variable { span, .. }
            | Expression::Array { span, .. }
            | Expression::MapLiteral { span, .. }
            | Expression::Binary { span, .. }
            | Expression::Unary { span, .. }
            | Expression::Member { span, .. }
            | Expression::Index { span, .. }
            | Expression::Grouped { span, .. }
            | Expression::Exists { span, .. }
            | Expression::TypeCheck { span, .. }
            | Expression::Interpolated { span, .. } => *span,
        }
    }

    /// Depth-first traversal calling `visit` on every node.
    pub fn walk(&self, visit: &mut impl FnMut(&Expression)) {
        visit(self);
        match self {
            Expression::Array { items, .. } => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expression::MapLiteral { entries, .. } => {
                for (_, value) in entries {
                    value.walk(visit);
                }
            }
            Expression::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expression::Unary { operand, .. } => operand.walk(visit),
            Expression::Member { object, .. } => object.walk(visit),
            Expression::Index { object, index, .. } => {
                object.walk(visit);
                index.walk(visit);
            }
            Expression::Grouped { inner, .. } => inner.walk(visit),
            Expression::TypeCheck { subject, .. } => subject.walk(visit),
            Expression::Interpolated { parts, .. } => {
                for part in parts {
                    if let InterpolatedPart::Expression(expr) = part {
                        expr.walk(visit);
                    }
                }
            }
            Expression::Literal(_, _)
            | Expression::Variable { .. }
            | Expression::Exists { .. } => {}
        }
    }

    /// The names of all variables this expression reads.
    pub fn referenced_variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.walk(&mut |expr| match expr {
            Expression::Variable { name, .. } | Expression::Exists { name, .. } => {
                names.push(name.clone());
            }
            _ => {}
        });
        names
    }
}

/// Depth-first traversal over statements, recursing into match arms and
/// loop bodies.
pub fn walk_statements(statements: &[Statement], visit: &mut impl FnMut(&Statement)) {
    for statement in statements {
        visit(statement);
        match statement {
            Statement::Match(m) => {
                for arm in &m.arms {
                    walk_statements(&arm.statements, visit);
                }
                if let Some(otherwise) = &m.otherwise {
                    walk_statements(otherwise, visit);
                }
            }
            Statement::ForEach(f) => walk_statements(&f.statements, visit),
            _ => {}
        }
    }
}

// ============================================================================
// ACTION ROLES
// ============================================================================

/// The semantic role of an action, derived from its verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionRole {
    /// external → internal
    Request,
    /// internal → internal
    Own,
    /// internal → external
    Response,
    /// internal → persistent/published
    Export,
}

static VERB_ROLES: Lazy<HashMap<&'static str, ActionRole>> = Lazy::new(|| {
    let mut roles = HashMap::new();
    for verb in ["extract", "parse", "retrieve", "read", "request", "fetch"] {
        roles.insert(verb, ActionRole::Request);
    }
    for verb in [
        "compute", "calculate", "derive", "transform", "map", "filter", "reduce", "validate",
        "create", "format", "accept", "set", "modify", "change",
    ] {
        roles.insert(verb, ActionRole::Own);
    }
    for verb in ["return", "throw", "log"] {
        roles.insert(verb, ActionRole::Response);
    }
    for verb in ["store", "update", "delete", "emit", "send", "publish"] {
        roles.insert(verb, ActionRole::Export);
    }
    roles
});

/// Verbs that may re-bind an existing name.
pub const REBINDING_VERBS: [&str; 5] = ["accept", "update", "modify", "change", "set"];

impl ActionRole {
    /// Look up the role for a verb (case-insensitive). Unknown verbs
    /// default to `Own`; dispatch rejects them later.
    pub fn of_verb(verb: &str) -> ActionRole {
        VERB_ROLES
            .get(verb.to_lowercase().as_str())
            .copied()
            .unwrap_or(ActionRole::Own)
    }
}

/// Whether the verb belongs to the rebinding set.
pub fn is_rebinding_verb(verb: &str) -> bool {
    let verb = verb.to_lowercase();
    REBINDING_VERBS.contains(&verb.as_str())
}
