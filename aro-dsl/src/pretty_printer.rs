//! Token-stream pretty-printer
//!
//! Renders a token stream back to source text such that re-lexing the
//! output yields the same token kinds. Used by the round-trip tests.

use crate::lexer::{Token, TokenKind};

/// Render tokens to canonical source text.
pub fn pretty_print(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut index = 0;
    // Tracks whether we are inside a string literal (between segments).
    let mut in_string = false;

    while index < tokens.len() {
        let token = &tokens[index];
        match &token.kind {
            TokenKind::Eof => break,
            TokenKind::StringSegment(text) => {
                if !in_string {
                    push_spaced(&mut out, "\"");
                    in_string = true;
                }
                out.push_str(&escape_segment(text));
                // A segment not followed by an interpolation closes the
                // string.
                if !matches!(
                    tokens.get(index + 1).map(|t| &t.kind),
                    Some(TokenKind::InterpolationStart)
                ) {
                    out.push('"');
                    in_string = false;
                }
            }
            TokenKind::InterpolationStart => {
                out.push_str("${");
            }
            TokenKind::InterpolationEnd => {
                out.push('}');
                // The enclosing string continues; if no segment follows,
                // close it.
                if !matches!(
                    tokens.get(index + 1).map(|t| &t.kind),
                    Some(TokenKind::StringSegment(_))
                ) {
                    out.push('"');
                    in_string = false;
                }
            }
            other => {
                push_spaced(&mut out, &render(other, &token.lexeme));
            }
        }
        index += 1;
    }

    out
}

fn push_spaced(out: &mut String, text: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push(' ');
    }
    out.push_str(text);
}

fn render(kind: &TokenKind, lexeme: &str) -> String {
    match kind {
        TokenKind::LBrace => "{".to_string(),
        TokenKind::RBrace => "}".to_string(),
        TokenKind::LParen => "(".to_string(),
        TokenKind::RParen => ")".to_string(),
        TokenKind::LBracket => "[".to_string(),
        TokenKind::RBracket => "]".to_string(),
        TokenKind::Lt => "<".to_string(),
        TokenKind::Gt => ">".to_string(),
        TokenKind::Colon => ":".to_string(),
        TokenKind::Semicolon => ";".to_string(),
        TokenKind::Comma => ",".to_string(),
        TokenKind::Dot => ".".to_string(),
        TokenKind::Plus => "+".to_string(),
        TokenKind::Minus => "-".to_string(),
        TokenKind::Star => "*".to_string(),
        TokenKind::Slash => "/".to_string(),
        TokenKind::Percent => "%".to_string(),
        TokenKind::Assign => "=".to_string(),
        TokenKind::EqEq => "==".to_string(),
        TokenKind::Ne => "!=".to_string(),
        TokenKind::Le => "<=".to_string(),
        TokenKind::Ge => ">=".to_string(),
        TokenKind::Concat => "++".to_string(),
        TokenKind::Arrow => "->".to_string(),
        TokenKind::Bang => "!".to_string(),
        TokenKind::Pipe => "|".to_string(),
        TokenKind::Where => "where".to_string(),
        TokenKind::When => "when".to_string(),
        TokenKind::Match => "match".to_string(),
        TokenKind::Otherwise => "otherwise".to_string(),
        TokenKind::Each => "each".to_string(),
        TokenKind::In => "in".to_string(),
        TokenKind::Publish => "publish".to_string(),
        TokenKind::Require => "require".to_string(),
        TokenKind::Import => "import".to_string(),
        TokenKind::As => "as".to_string(),
        TokenKind::Count => "count".to_string(),
        TokenKind::Sum => "sum".to_string(),
        TokenKind::Average => "average".to_string(),
        TokenKind::Min => "min".to_string(),
        TokenKind::Max => "max".to_string(),
        TokenKind::Exists => "exists".to_string(),
        TokenKind::Is => "is".to_string(),
        TokenKind::Contains => "contains".to_string(),
        TokenKind::Matches => "matches".to_string(),
        TokenKind::And => "and".to_string(),
        TokenKind::Or => "or".to_string(),
        TokenKind::Not => "not".to_string(),
        TokenKind::True => "true".to_string(),
        TokenKind::False => "false".to_string(),
        TokenKind::Null => "null".to_string(),
        TokenKind::Article(article) => article.lexeme().to_string(),
        TokenKind::Preposition(preposition) => preposition.lexeme().to_string(),
        TokenKind::Identifier(name) => name.clone(),
        TokenKind::Integer(n) => n.to_string(),
        // `{:?}` keeps the decimal point so re-lexing stays a float.
        TokenKind::Float(n) => format!("{:?}", n),
        TokenKind::Regex { pattern, flags } => format!("/{}/{}", pattern, flags),
        TokenKind::Error(_) => lexeme.to_string(),
        TokenKind::StringSegment(_)
        | TokenKind::InterpolationStart
        | TokenKind::InterpolationEnd
        | TokenKind::Eof => String::new(),
    }
}

/// Escape a string segment for re-lexing.
fn escape_segment(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn kinds_of(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn round_trip(source: &str) {
        let tokens = Lexer::new(source).tokenize();
        let printed = pretty_print(&tokens);
        let reparsed = kinds_of(&printed);
        let original: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(original, reparsed, "printed form: {}", printed);
    }

    #[test]
    fn statements_round_trip() {
        round_trip("(Sum: Math) { <Compute> the <sum> from <3> + <4>. <Return> an <OK> with <sum>. }");
    }

    #[test]
    fn strings_round_trip() {
        round_trip(r#"<Log> "with \"quotes\" and \n" to the <console>."#);
    }

    #[test]
    fn interpolation_round_trips() {
        round_trip(r#"<Log> "total: ${count + 1}" to the <console>."#);
    }

    #[test]
    fn floats_stay_floats() {
        round_trip("<Set> the <rate> to 1000.0.");
    }

    #[test]
    fn escaped_dollar_does_not_reinterpolate() {
        let tokens = Lexer::new(r#""a\${b""#).tokenize();
        let printed = pretty_print(&tokens);
        assert_eq!(kinds_of(&printed).len(), 2); // segment + eof
    }
}
