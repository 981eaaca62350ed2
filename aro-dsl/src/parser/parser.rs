//! Parser implementation
//!
//! Recursive descent for program / feature-set / statement structure and
//! Pratt precedence-climbing for expressions. Parse errors are reported
//! into the shared diagnostics collector and recovery continues at the
//! next feature set or statement boundary.

use super::ast::*;
use crate::lexer::{Lexer, Preposition, Token, TokenKind};
use aro_core::{Diagnostics, SourceSpan, StateGuardSet, TypedValue};
use serde_json::json;
use thiserror::Error;

/// Expression precedence levels, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None = 0,
    Or = 1,
    And = 2,
    Equality = 3,
    Comparison = 4,
    Term = 5,
    Factor = 6,
}

#[derive(Debug, Error)]
#[error("{message} at {span}")]
struct ParseError {
    message: String,
    span: SourceSpan,
}

type ParseResult<T> = Result<T, ParseError>;

/// Parser for the ARO language.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Diagnostics,
}

impl Parser {
    /// Parse a full source text into a program plus diagnostics.
    pub fn parse_source(source: &str) -> (Program, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let raw = Lexer::new(source).tokenize();

        // Lexer errors are diagnostics too; drop them from the stream so
        // parsing can continue past them.
        let tokens: Vec<Token> = raw
            .into_iter()
            .filter(|t| {
                if let TokenKind::Error(message) = &t.kind {
                    diagnostics.error(message.clone(), t.span);
                    false
                } else {
                    true
                }
            })
            .collect();

        let mut parser = Parser {
            tokens,
            pos: 0,
            diagnostics,
        };
        let program = parser.parse_program();
        (program, parser.diagnostics)
    }

    fn parse_program(&mut self) -> Program {
        let mut imports = Vec::new();
        let mut feature_sets = Vec::new();

        while !self.check(&TokenKind::Eof) {
            match &self.current().kind {
                TokenKind::Import => match self.parse_import() {
                    Ok(import) => imports.push(import),
                    Err(err) => {
                        self.report(err);
                        self.recover_to_feature_set();
                    }
                },
                TokenKind::LParen => match self.parse_feature_set() {
                    Ok(fs) => feature_sets.push(fs),
                    Err(err) => {
                        self.report(err);
                        self.recover_to_feature_set();
                    }
                },
                _ => {
                    let err = self.error("Expected import or feature set");
                    self.report(err);
                    self.advance();
                    self.recover_to_feature_set();
                }
            }
        }

        Program {
            imports,
            feature_sets,
        }
    }

    /// `import <name> from "module".`
    fn parse_import(&mut self) -> ParseResult<Import> {
        let start = self.current().span;
        self.expect(TokenKind::Import)?;
        self.skip_article();
        let name = if self.check(&TokenKind::Lt) {
            self.parse_angle_noun()?.name
        } else {
            self.compound_identifier()?
        };
        self.expect_preposition(Preposition::From)?;
        let module = self.expect_string()?;
        let mut alias = None;
        if self.check(&TokenKind::As) {
            self.advance();
            alias = Some(if self.check(&TokenKind::Lt) {
                self.parse_angle_noun()?.name
            } else {
                self.compound_identifier()?
            });
        }
        self.expect(TokenKind::Dot)?;
        Ok(Import {
            name,
            module,
            alias,
            span: start.merge(&self.previous_span()),
        })
    }

    /// `( name : business-activity [<guards>] ) { statements }`
    fn parse_feature_set(&mut self) -> ParseResult<FeatureSet> {
        let start = self.current().span;
        self.expect(TokenKind::LParen)?;

        let name = self.identifier_sequence(&[TokenKind::Colon])?;
        self.expect(TokenKind::Colon)?;
        let business_activity =
            self.identifier_sequence(&[TokenKind::RParen, TokenKind::Lt])?;

        let mut guard_spec = None;
        if self.check(&TokenKind::Lt) {
            self.advance();
            guard_spec = Some(self.raw_until(&TokenKind::Gt)?);
            self.expect(TokenKind::Gt)?;
        }
        self.expect(TokenKind::RParen)?;

        let guards = guard_spec
            .as_deref()
            .map(StateGuardSet::parse)
            .unwrap_or_default();

        self.expect(TokenKind::LBrace)?;
        let statements = self.parse_statement_block();
        self.expect(TokenKind::RBrace)?;

        Ok(FeatureSet {
            name,
            business_activity,
            guards,
            guard_spec,
            statements,
            span: start.merge(&self.previous_span()),
        })
    }

    /// Parse statements until `}`, recovering inside the block.
    fn parse_statement_block(&mut self) -> Vec<Statement> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(err) => {
                    self.report(err);
                    self.recover_statement();
                }
            }
        }
        statements
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match &self.current().kind {
            TokenKind::Publish => self.parse_publish().map(Statement::Publish),
            TokenKind::Require => self.parse_require().map(Statement::Require),
            TokenKind::Match => self.parse_match().map(Statement::Match),
            TokenKind::Preposition(Preposition::For)
                if self.peek_kind(1) == Some(&TokenKind::Each) =>
            {
                self.parse_for_each().map(Statement::ForEach)
            }
            TokenKind::Lt => self.parse_aro_statement().map(Statement::Aro),
            _ => Err(self.error("Expected statement")),
        }
    }

    /// `<Verb> [article] <result> preposition [article] <object> [clauses].`
    fn parse_aro_statement(&mut self) -> ParseResult<AroStatement> {
        let start = self.current().span;

        self.expect(TokenKind::Lt)?;
        let verb = self.compound_identifier()?;
        self.expect(TokenKind::Gt)?;

        self.skip_article();

        let mut value = ValueSource::None;
        let result = if self.starts_literal() {
            // Literal in result position: `<Log> "changed" to the <console>.`
            let expr = self.parse_expression(Precedence::None)?;
            match literal_of(&expr) {
                Some(literal) => {
                    value = ValueSource::Literal(literal);
                    QualifiedNoun::new("_literal_", expr.span())
                }
                None => {
                    let span = expr.span();
                    value = ValueSource::SinkExpression(expr);
                    QualifiedNoun::new("_expression_", span)
                }
            }
        } else {
            self.parse_angle_noun()?
        };

        let preposition = self.expect_any_preposition()?;
        self.skip_article();

        let object = if self.starts_literal() {
            let expr = self.parse_expression(Precedence::None)?;
            let span = expr.span();
            match literal_of(&expr) {
                Some(literal) => {
                    value = ValueSource::Literal(literal);
                    ObjectClause {
                        preposition,
                        noun: QualifiedNoun::new("_literal_", span),
                    }
                }
                None => {
                    value = ValueSource::Expression(expr);
                    ObjectClause {
                        preposition,
                        noun: QualifiedNoun::new("_expression_", span),
                    }
                }
            }
        } else {
            let expr = self.parse_expression(Precedence::None)?;
            match variable_of(&expr) {
                // A lone angle-wrapped name is a plain object noun.
                Some(noun) => ObjectClause {
                    preposition,
                    noun,
                },
                None => {
                    let span = expr.span();
                    value = ValueSource::Expression(expr);
                    ObjectClause {
                        preposition,
                        noun: QualifiedNoun::new("_expression_", span),
                    }
                }
            }
        };

        let mut query = QueryModifiers::default();
        let mut range = RangeModifiers::default();
        let mut guard = None;

        loop {
            match &self.current().kind {
                TokenKind::Where => {
                    self.advance();
                    query.where_clause = Some(self.parse_expression(Precedence::None)?);
                }
                TokenKind::When => {
                    self.advance();
                    guard = Some(self.parse_expression(Precedence::None)?);
                }
                TokenKind::Count
                | TokenKind::Sum
                | TokenKind::Average
                | TokenKind::Min
                | TokenKind::Max => {
                    query.aggregation = Some(self.parse_aggregation()?);
                    if self.check(&TokenKind::Preposition(Preposition::By)) {
                        self.advance();
                        self.skip_article();
                        query.group_by = Some(self.compound_identifier()?);
                    }
                }
                TokenKind::Preposition(Preposition::To) => {
                    self.advance();
                    self.skip_article();
                    range.to = Some(self.parse_expression(Precedence::None)?);
                }
                TokenKind::Preposition(Preposition::With) => {
                    self.advance();
                    self.skip_article();
                    range.with = Some(self.parse_expression(Precedence::None)?);
                }
                _ => break,
            }
        }

        self.expect(TokenKind::Dot)?;

        Ok(AroStatement {
            verb,
            result,
            object,
            value,
            query,
            range,
            guard,
            span: start.merge(&self.previous_span()),
        })
    }

    fn parse_aggregation(&mut self) -> ParseResult<Aggregation> {
        let aggregation = match &self.current().kind {
            TokenKind::Count => Aggregation::Count,
            TokenKind::Sum => Aggregation::Sum,
            TokenKind::Average => Aggregation::Average,
            TokenKind::Min => Aggregation::Min,
            TokenKind::Max => Aggregation::Max,
            _ => return Err(self.error("Expected aggregation")),
        };
        self.advance();
        Ok(aggregation)
    }

    /// `publish the <name>.`
    fn parse_publish(&mut self) -> ParseResult<PublishStatement> {
        let start = self.current().span;
        self.expect(TokenKind::Publish)?;
        self.skip_article();
        let noun = self.parse_angle_noun()?;
        self.expect(TokenKind::Dot)?;
        Ok(PublishStatement {
            name: noun.name,
            span: start.merge(&self.previous_span()),
        })
    }

    /// `require the <name> [from the <source>].`
    fn parse_require(&mut self) -> ParseResult<RequireStatement> {
        let start = self.current().span;
        self.expect(TokenKind::Require)?;
        self.skip_article();
        let noun = self.parse_angle_noun()?;
        let mut source = None;
        if self.check(&TokenKind::Preposition(Preposition::From)) {
            self.advance();
            self.skip_article();
            let from = self.parse_angle_noun()?;
            source = Some(from.name);
        }
        self.expect(TokenKind::Dot)?;
        Ok(RequireStatement {
            name: noun.name,
            source,
            span: start.merge(&self.previous_span()),
        })
    }

    /// `match the <subject> { when <expr> { … } otherwise { … } }`
    fn parse_match(&mut self) -> ParseResult<MatchStatement> {
        let start = self.current().span;
        self.expect(TokenKind::Match)?;
        self.skip_article();
        let subject = self.parse_expression(Precedence::None)?;
        self.expect(TokenKind::LBrace)?;

        let mut arms = Vec::new();
        let mut otherwise = None;
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::Eof) {
            match &self.current().kind {
                TokenKind::When => {
                    let arm_start = self.current().span;
                    self.advance();
                    let pattern = self.parse_expression(Precedence::None)?;
                    self.expect(TokenKind::LBrace)?;
                    let statements = self.parse_statement_block();
                    self.expect(TokenKind::RBrace)?;
                    arms.push(MatchArm {
                        pattern,
                        statements,
                        span: arm_start.merge(&self.previous_span()),
                    });
                }
                TokenKind::Otherwise => {
                    self.advance();
                    self.expect(TokenKind::LBrace)?;
                    let statements = self.parse_statement_block();
                    self.expect(TokenKind::RBrace)?;
                    otherwise = Some(statements);
                }
                _ => return Err(self.error("Expected 'when' arm or 'otherwise'")),
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(MatchStatement {
            subject,
            arms,
            otherwise,
            span: start.merge(&self.previous_span()),
        })
    }

    /// `for each <item> in the <list> { … }`
    fn parse_for_each(&mut self) -> ParseResult<ForEachLoop> {
        let start = self.current().span;
        self.expect(TokenKind::Preposition(Preposition::For))?;
        self.expect(TokenKind::Each)?;
        let item = if self.check(&TokenKind::Lt) {
            self.parse_angle_noun()?.name
        } else {
            self.compound_identifier()?
        };
        self.expect(TokenKind::In)?;
        self.skip_article();
        let list = self.parse_expression(Precedence::None)?;
        self.expect(TokenKind::LBrace)?;
        let statements = self.parse_statement_block();
        self.expect(TokenKind::RBrace)?;
        Ok(ForEachLoop {
            item,
            list,
            statements,
            span: start.merge(&self.previous_span()),
        })
    }

    // ========================================================================
    // EXPRESSIONS (Pratt precedence climbing)
    // ========================================================================

    fn parse_expression(&mut self, min: Precedence) -> ParseResult<Expression> {
        let mut left = self.parse_unary()?;

        loop {
            // Postfix keywords sit at comparison level.
            if self.check(&TokenKind::Exists) && min < Precedence::Comparison {
                let span = left.span().merge(&self.current().span);
                self.advance();
                left = match &left {
                    Expression::Variable { name, .. } => Expression::Exists {
                        name: name.clone(),
                        span,
                    },
                    _ => return Err(self.error("'exists' applies to a variable reference")),
                };
                continue;
            }
            if self.check(&TokenKind::Is) && min < Precedence::Comparison {
                self.advance();
                self.skip_article();
                let expected = self.type_name()?;
                let span = left.span().merge(&self.previous_span());
                left = Expression::TypeCheck {
                    subject: Box::new(left),
                    expected,
                    span,
                };
                continue;
            }

            let Some((op, precedence)) = self.peek_binary_op() else {
                break;
            };
            if precedence <= min {
                break;
            }
            self.advance();
            let right = self.parse_expression(precedence)?;
            let span = left.span().merge(&right.span());
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, Precedence)> {
        let op = match &self.current().kind {
            TokenKind::Or => (BinaryOp::Or, Precedence::Or),
            TokenKind::And => (BinaryOp::And, Precedence::And),
            TokenKind::EqEq => (BinaryOp::Eq, Precedence::Equality),
            TokenKind::Ne => (BinaryOp::Ne, Precedence::Equality),
            TokenKind::Lt => {
                // `<` opens an angle-wrapped reference when an identifier
                // or literal follows; only a comparison otherwise.
                if self.angle_ref_ahead() {
                    return None;
                }
                (BinaryOp::Lt, Precedence::Comparison)
            }
            TokenKind::Gt => (BinaryOp::Gt, Precedence::Comparison),
            TokenKind::Le => (BinaryOp::Le, Precedence::Comparison),
            TokenKind::Ge => (BinaryOp::Ge, Precedence::Comparison),
            TokenKind::Contains => (BinaryOp::Contains, Precedence::Comparison),
            TokenKind::Matches => (BinaryOp::Matches, Precedence::Comparison),
            TokenKind::Plus => (BinaryOp::Add, Precedence::Term),
            TokenKind::Minus => (BinaryOp::Subtract, Precedence::Term),
            TokenKind::Concat => (BinaryOp::Concat, Precedence::Term),
            TokenKind::Star => (BinaryOp::Multiply, Precedence::Factor),
            TokenKind::Slash => (BinaryOp::Divide, Precedence::Factor),
            TokenKind::Percent => (BinaryOp::Modulo, Precedence::Factor),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        match &self.current().kind {
            TokenKind::Bang | TokenKind::Not => {
                let start = self.current().span;
                self.advance();
                let operand = self.parse_unary()?;
                let span = start.merge(&operand.span());
                Ok(Expression::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    span,
                })
            }
            TokenKind::Minus => {
                let start = self.current().span;
                self.advance();
                let operand = self.parse_unary()?;
                let span = start.merge(&operand.span());
                Ok(Expression::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                    span,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_primary()?;

        loop {
            match &self.current().kind {
                // `.` is member access only when an identifier follows;
                // otherwise it terminates the statement.
                TokenKind::Dot => {
                    if !matches!(self.peek_kind(1), Some(TokenKind::Identifier(_))) {
                        break;
                    }
                    self.advance();
                    let member = self.compound_identifier()?;
                    let span = expr.span().merge(&self.previous_span());
                    expr = Expression::Member {
                        object: Box::new(expr),
                        member,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression(Precedence::None)?;
                    self.expect(TokenKind::RBracket)?;
                    let span = expr.span().merge(&self.previous_span());
                    expr = Expression::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let span = self.current().span;
        match self.current().kind.clone() {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expression::Literal(TypedValue::integer(n), span))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expression::Literal(TypedValue::float(n), span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Literal(TypedValue::boolean(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Literal(TypedValue::boolean(false), span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::Literal(
                    TypedValue::infer(serde_json::Value::Null),
                    span,
                ))
            }
            TokenKind::Regex { pattern, flags } => {
                self.advance();
                Ok(Expression::Literal(
                    TypedValue::schema("Regex", json!({ "pattern": pattern, "flags": flags })),
                    span,
                ))
            }
            TokenKind::StringSegment(_) => self.parse_string_expression(),
            TokenKind::Lt => {
                // Angle-wrapped literal: `<3>` in `from <3> + <4>`.
                if matches!(
                    self.peek_kind(1),
                    Some(TokenKind::Integer(_))
                        | Some(TokenKind::Float(_))
                        | Some(TokenKind::StringSegment(_))
                ) && self.peek_kind(2) == Some(&TokenKind::Gt)
                {
                    self.advance();
                    let inner = self.parse_primary()?;
                    self.expect(TokenKind::Gt)?;
                    return Ok(inner);
                }
                let noun = self.parse_angle_noun()?;
                Ok(Expression::Variable {
                    name: noun.name,
                    span: noun.span,
                })
            }
            TokenKind::Identifier(_) => {
                let name = self.compound_identifier()?;
                Ok(Expression::Variable {
                    name,
                    span: span.merge(&self.previous_span()),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expression(Precedence::None)?);
                    if !self.check(&TokenKind::RBracket) {
                        self.expect(TokenKind::Comma)?;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expression::Array {
                    items,
                    span: span.merge(&self.previous_span()),
                })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let key = self.map_key()?;
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expression(Precedence::None)?;
                    entries.push((key, value));
                    if !self.check(&TokenKind::RBrace) {
                        self.expect(TokenKind::Comma)?;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Expression::MapLiteral {
                    entries,
                    span: span.merge(&self.previous_span()),
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression(Precedence::None)?;
                self.expect(TokenKind::RParen)?;
                Ok(Expression::Grouped {
                    inner: Box::new(inner),
                    span: span.merge(&self.previous_span()),
                })
            }
            _ => {
                // Keyword lexemes (`count`, `sum`, …) double as variable
                // names in expression position.
                if is_word_lexeme(&self.current().lexeme) {
                    let name = self.compound_identifier()?;
                    return Ok(Expression::Variable {
                        name,
                        span: span.merge(&self.previous_span()),
                    });
                }
                Err(self.error("Expected expression"))
            }
        }
    }

    /// One or more string segments with interleaved interpolations.
    fn parse_string_expression(&mut self) -> ParseResult<Expression> {
        let start = self.current().span;
        let mut parts = Vec::new();

        loop {
            match self.current().kind.clone() {
                TokenKind::StringSegment(text) => {
                    self.advance();
                    // Empty boundary segments around interpolations carry
                    // no content.
                    if !text.is_empty() || parts.is_empty() {
                        parts.push(InterpolatedPart::Text(text));
                    }
                    // Adjacent separate string literals do not merge.
                    if !self.check(&TokenKind::InterpolationStart) {
                        break;
                    }
                }
                TokenKind::InterpolationStart => {
                    self.advance();
                    let expr = self.parse_expression(Precedence::None)?;
                    self.expect(TokenKind::InterpolationEnd)?;
                    parts.push(InterpolatedPart::Expression(expr));
                }
                _ => break,
            }
        }

        let span = start.merge(&self.previous_span());
        let has_expression = parts
            .iter()
            .any(|p| matches!(p, InterpolatedPart::Expression(_)));

        if !has_expression {
            // Zero embedded expressions: plain string literal.
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    InterpolatedPart::Text(t) => t,
                    InterpolatedPart::Expression(_) => unreachable!(),
                })
                .collect();
            Ok(Expression::Literal(TypedValue::string(text), span))
        } else {
            Ok(Expression::Interpolated { parts, span })
        }
    }

    // ========================================================================
    // TOKEN HELPERS
    // ========================================================================

    /// `<name[-name…][.path…][: Type]>`
    fn parse_angle_noun(&mut self) -> ParseResult<QualifiedNoun> {
        let start = self.current().span;
        self.expect(TokenKind::Lt)?;

        let mut name = self.compound_identifier()?;
        loop {
            if self.check(&TokenKind::Dot)
                && matches!(self.peek_kind(1), Some(TokenKind::Identifier(_)))
            {
                self.advance();
                name.push('.');
                name.push_str(&self.compound_identifier()?);
            } else if self.word_ahead(0) {
                // Multi-word references name feature sets: `<Issue Token>`.
                name.push(' ');
                name.push_str(&self.compound_identifier()?);
            } else {
                break;
            }
        }

        let mut type_annotation = None;
        if self.check(&TokenKind::Colon) {
            self.advance();
            type_annotation = Some(self.compound_identifier()?);
        }

        self.expect(TokenKind::Gt)?;
        Ok(QualifiedNoun {
            name,
            type_annotation,
            span: start.merge(&self.previous_span()),
        })
    }

    /// Identifiers joined by `-` into one compound name.
    fn compound_identifier(&mut self) -> ParseResult<String> {
        let mut name = self.word()?;
        while self.check(&TokenKind::Minus) {
            // A trailing `-` not followed by a word is not ours.
            if !self.word_ahead(1) {
                break;
            }
            self.advance();
            name.push('-');
            name.push_str(&self.word()?);
        }
        Ok(name)
    }

    /// Space-joined identifier sequence used by feature-set headers.
    /// Tolerates keyword lexemes (`error`, `match`, articles) as names.
    fn identifier_sequence(&mut self, stops: &[TokenKind]) -> ParseResult<String> {
        let mut parts: Vec<String> = Vec::new();
        loop {
            if stops.iter().any(|s| self.check(s)) || self.check(&TokenKind::Eof) {
                break;
            }
            if self.check(&TokenKind::Minus) && self.word_ahead(1) {
                self.advance();
                let word = self.word()?;
                match parts.last_mut() {
                    Some(last) => {
                        last.push('-');
                        last.push_str(&word);
                    }
                    None => parts.push(word),
                }
                continue;
            }
            if !self.word_ahead(0) {
                return Err(self.error("Expected identifier"));
            }
            parts.push(self.word()?);
        }
        if parts.is_empty() {
            return Err(self.error("Expected identifier"));
        }
        Ok(parts.join(" "))
    }

    /// Accept an identifier, or any word-shaped token (keyword, article,
    /// preposition) by its written lexeme.
    fn word(&mut self) -> ParseResult<String> {
        let token = self.current().clone();
        let lexeme = match &token.kind {
            TokenKind::Identifier(name) => name.clone(),
            _ if is_word_lexeme(&token.lexeme) => token.lexeme.clone(),
            _ => return Err(self.error("Expected identifier")),
        };
        self.advance();
        Ok(lexeme)
    }

    fn word_ahead(&self, n: usize) -> bool {
        match self.peek_token(n) {
            Some(token) => {
                matches!(token.kind, TokenKind::Identifier(_)) || is_word_lexeme(&token.lexeme)
            }
            None => false,
        }
    }

    /// Type name for `is` checks: identifier or quoted string.
    fn type_name(&mut self) -> ParseResult<String> {
        match self.current().kind.clone() {
            TokenKind::StringSegment(s) => {
                self.advance();
                Ok(s)
            }
            _ => self.compound_identifier(),
        }
    }

    fn map_key(&mut self) -> ParseResult<String> {
        match self.current().kind.clone() {
            TokenKind::StringSegment(s) => {
                self.advance();
                Ok(s)
            }
            _ => self.compound_identifier(),
        }
    }

    /// Whether the current token begins a literal value.
    fn starts_literal(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Integer(_)
                | TokenKind::Float(_)
                | TokenKind::StringSegment(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Regex { .. }
        )
    }

    /// Whether `<` at the current position opens an angle-wrapped
    /// reference rather than a less-than comparison.
    ///
    /// An identifier inside the angles marks a reference when the token
    /// after it continues reference syntax (`>`, `-`, `.`, `:`); a
    /// literal inside marks one only when immediately closed.
    fn angle_ref_ahead(&self) -> bool {
        match self.peek_kind(1) {
            Some(TokenKind::Identifier(_)) => matches!(
                self.peek_kind(2),
                Some(TokenKind::Gt)
                    | Some(TokenKind::Minus)
                    | Some(TokenKind::Dot)
                    | Some(TokenKind::Colon)
            ),
            Some(TokenKind::Integer(_))
            | Some(TokenKind::Float(_))
            | Some(TokenKind::StringSegment(_)) => self.peek_kind(2) == Some(&TokenKind::Gt),
            _ => false,
        }
    }

    /// Reconstruct the raw lexeme text up to (not including) `stop`.
    fn raw_until(&mut self, stop: &TokenKind) -> ParseResult<String> {
        let mut out = String::new();
        while !self.check(stop) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("Unterminated guard specification"));
            }
            out.push_str(&self.current().lexeme);
            self.advance();
        }
        Ok(out)
    }

    fn skip_article(&mut self) {
        if matches!(self.current().kind, TokenKind::Article(_)) {
            self.advance();
        }
    }

    fn expect_any_preposition(&mut self) -> ParseResult<Preposition> {
        match self.current().kind {
            TokenKind::Preposition(p) => {
                self.advance();
                Ok(p)
            }
            _ => Err(self.error("Expected preposition")),
        }
    }

    fn expect_preposition(&mut self, expected: Preposition) -> ParseResult<()> {
        match self.current().kind {
            TokenKind::Preposition(p) if p == expected => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(format!("Expected '{}'", expected.lexeme()))),
        }
    }

    fn expect_string(&mut self) -> ParseResult<String> {
        match self.current().kind.clone() {
            TokenKind::StringSegment(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("Expected string literal")),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<()> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected {:?}", kind)))
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
            && match (kind, &self.current().kind) {
                (TokenKind::Preposition(a), TokenKind::Preposition(b)) => a == b,
                (TokenKind::Article(a), TokenKind::Article(b)) => a == b,
                _ => true,
            }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_token(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn peek_kind(&self, n: usize) -> Option<&TokenKind> {
        self.peek_token(n).map(|t| &t.kind)
    }

    fn previous_span(&self) -> SourceSpan {
        if self.pos == 0 {
            return self.current().span;
        }
        self.tokens[self.pos - 1].span
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            span: self.current().span,
        }
    }

    fn report(&mut self, err: ParseError) {
        self.diagnostics.error(err.message, err.span);
    }

    /// Statement-level recovery: skip forward until just past a `.`, or
    /// stop at `}` or at a fresh `<`.
    fn recover_statement(&mut self) {
        self.advance();
        while !self.check(&TokenKind::Eof) {
            match &self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    return;
                }
                TokenKind::RBrace | TokenKind::Lt => return,
                _ => self.advance(),
            }
        }
    }

    /// Feature-set-level recovery: skip to the next `(`.
    fn recover_to_feature_set(&mut self) {
        while !self.check(&TokenKind::Eof) && !self.check(&TokenKind::LParen) {
            self.advance();
        }
    }
}

/// Word-shaped lexeme: a keyword/article/preposition usable as a name.
fn is_word_lexeme(lexeme: &str) -> bool {
    let mut chars = lexeme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// If the expression is a bare literal, extract its value.
fn literal_of(expr: &Expression) -> Option<TypedValue> {
    match expr {
        Expression::Literal(value, _) => Some(value.clone()),
        Expression::Array { .. } | Expression::MapLiteral { .. } => {
            const_value(expr).map(TypedValue::infer)
        }
        _ => None,
    }
}

/// Fold an expression of pure literals into a JSON value.
fn const_value(expr: &Expression) -> Option<serde_json::Value> {
    match expr {
        Expression::Literal(value, _) => Some(value.value.clone()),
        Expression::Array { items, .. } => {
            let folded: Option<Vec<_>> = items.iter().map(const_value).collect();
            folded.map(serde_json::Value::Array)
        }
        Expression::MapLiteral { entries, .. } => {
            let mut map = serde_json::Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), const_value(value)?);
            }
            Some(serde_json::Value::Object(map))
        }
        _ => None,
    }
}

/// If the expression is a lone variable reference, convert to a noun.
fn variable_of(expr: &Expression) -> Option<QualifiedNoun> {
    match expr {
        Expression::Variable { name, span } => Some(QualifiedNoun::new(name.clone(), *span)),
        Expression::Member { .. } => {
            // A dotted path like `<user>.address` keeps path structure.
            let mut segments = Vec::new();
            let mut current = expr;
            loop {
                match current {
                    Expression::Member { object, member, .. } => {
                        segments.push(member.clone());
                        current = object;
                    }
                    Expression::Variable { name, .. } => {
                        segments.push(name.clone());
                        segments.reverse();
                        return Some(QualifiedNoun::new(segments.join("."), expr.span()));
                    }
                    _ => return None,
                }
            }
        }
        _ => None,
    }
}
