//! Lexer implementation

use super::token::*;
use aro_core::SourceSpan;

/// Lexer for the ARO language.
///
/// Single-lookahead scanner producing a finite token sequence ending in
/// `Eof`. Recoverable problems become `Error` tokens and scanning
/// continues.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    /// Byte offset added to every span (used for interpolated sub-lexing).
    origin: usize,
    /// Kind of the previous meaningful token, for regex/division
    /// disambiguation.
    prev_kind: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self::with_origin(source, 0, 1, 1)
    }

    fn with_origin(source: &'a str, origin: usize, line: usize, column: usize) -> Self {
        Self {
            source,
            pos: 0,
            line,
            column,
            origin,
            prev_kind: None,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            let start = self.mark();
            let Some(c) = self.peek_char() else {
                tokens.push(Token::eof(self.span_from(start)));
                break;
            };

            match c {
                '"' => self.scan_string(&mut tokens),
                '/' => {
                    if self.regex_allowed() {
                        if let Some(token) = self.try_scan_regex(start) {
                            self.push(&mut tokens, token);
                            continue;
                        }
                    }
                    self.advance();
                    self.emit(&mut tokens, TokenKind::Slash, start);
                }
                c if c.is_ascii_digit() => {
                    let kind = self.scan_number();
                    self.emit(&mut tokens, kind, start);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let kind = self.scan_word();
                    self.emit(&mut tokens, kind, start);
                }
                _ => {
                    let kind = self.scan_symbol();
                    self.emit(&mut tokens, kind, start);
                }
            }
        }

        tokens
    }

    /// Scan a delimiter or operator starting at the current char.
    fn scan_symbol(&mut self) -> TokenKind {
        let c = self.advance().unwrap_or('\0');
        match c {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '%' => TokenKind::Percent,
            '*' => TokenKind::Star,
            '|' => TokenKind::Pipe,

            '+' => {
                if self.peek_char() == Some('+') {
                    self.advance();
                    TokenKind::Concat
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.peek_char() == Some('>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '=' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            other => TokenKind::Error(format!("Unexpected character: {}", other)),
        }
    }

    /// Scan an identifier, keyword, article, or preposition.
    fn scan_word(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::classify_word(&self.source[start..self.pos])
    }

    /// Scan an integer or float with optional exponent.
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        let mut is_float = false;

        while self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.advance();
        }

        // Only consume '.' when a digit follows; a bare '.' after a number
        // is the statement terminator.
        if self.peek_char() == Some('.')
            && self
                .peek_at(1)
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            is_float = true;
            self.advance();
            while self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.advance();
            }
        }

        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                lookahead = 2;
            }
            if self
                .peek_at(lookahead)
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
            {
                is_float = true;
                self.advance();
                if matches!(self.peek_char(), Some('+') | Some('-')) {
                    self.advance();
                }
                while self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    self.advance();
                }
            }
        }

        let text = &self.source[start..self.pos];
        if is_float {
            match text.parse::<f64>() {
                Ok(n) => TokenKind::Float(n),
                Err(_) => TokenKind::Error(format!("Invalid number: {}", text)),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Integer(n),
                Err(_) => TokenKind::Error(format!("Invalid number: {}", text)),
            }
        }
    }

    /// Scan a string literal, emitting segment and interpolation tokens.
    ///
    /// `${` opens an embedded expression; the inner source between `${`
    /// and the matching `}` is lexed recursively and spliced between
    /// `InterpolationStart`/`InterpolationEnd`.
    fn scan_string(&mut self, tokens: &mut Vec<Token>) {
        let open = self.mark();
        self.advance(); // opening quote

        let mut segment = String::new();
        let mut segment_start = self.mark();

        loop {
            match self.peek_char() {
                None => {
                    self.emit(tokens, TokenKind::Error("Unterminated string".to_string()), open);
                    return;
                }
                Some('"') => {
                    self.advance();
                    self.emit_segment(tokens, segment, segment_start, open);
                    return;
                }
                Some('\\') => {
                    let escape_start = self.mark();
                    self.advance();
                    match self.scan_escape() {
                        Ok(c) => segment.push(c),
                        Err(message) => {
                            self.emit(tokens, TokenKind::Error(message), escape_start);
                        }
                    }
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.emit_segment(tokens, std::mem::take(&mut segment), segment_start, open);
                    let interp_start = self.mark();
                    self.advance(); // $
                    self.advance(); // {
                    self.emit(tokens, TokenKind::InterpolationStart, interp_start);

                    let inner_mark = self.mark();
                    match self.consume_interpolation_body() {
                        Some(inner_end) => {
                            let inner = &self.source[inner_mark.pos..inner_end];
                            let mut sub = Lexer::with_origin(
                                inner,
                                self.origin + inner_mark.pos,
                                inner_mark.line,
                                inner_mark.column,
                            );
                            for token in sub.tokenize() {
                                if token.kind == TokenKind::Eof {
                                    break;
                                }
                                tokens.push(token);
                            }
                            let close = self.mark();
                            self.advance(); // }
                            self.emit(tokens, TokenKind::InterpolationEnd, close);
                        }
                        None => {
                            self.emit(
                                tokens,
                                TokenKind::Error("Unterminated interpolation".to_string()),
                                interp_start,
                            );
                            return;
                        }
                    }
                    segment_start = self.mark();
                }
                Some(c) => {
                    self.advance();
                    segment.push(c);
                }
            }
        }
    }

    /// Advance to the `}` matching the already-consumed `${`, tracking
    /// nested brace depth. Returns the byte offset of the closing brace,
    /// leaving it unconsumed.
    fn consume_interpolation_body(&mut self) -> Option<usize> {
        let mut depth = 0usize;
        loop {
            match self.peek_char() {
                None | Some('\n') => return None,
                Some('{') => {
                    depth += 1;
                    self.advance();
                }
                Some('}') => {
                    if depth == 0 {
                        return Some(self.pos);
                    }
                    depth -= 1;
                    self.advance();
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    /// Scan one escape sequence; the backslash is already consumed.
    fn scan_escape(&mut self) -> Result<char, String> {
        match self.peek_char() {
            Some('n') => {
                self.advance();
                Ok('\n')
            }
            Some('t') => {
                self.advance();
                Ok('\t')
            }
            Some('r') => {
                self.advance();
                Ok('\r')
            }
            Some('\\') => {
                self.advance();
                Ok('\\')
            }
            Some('"') => {
                self.advance();
                Ok('"')
            }
            Some('$') => {
                self.advance();
                Ok('$')
            }
            Some('0') => {
                self.advance();
                Ok('\0')
            }
            Some('u') => {
                self.advance();
                if self.peek_char() != Some('{') {
                    return Err("Invalid unicode escape: expected {".to_string());
                }
                self.advance();
                let start = self.pos;
                while self
                    .peek_char()
                    .map(|c| c.is_ascii_hexdigit())
                    .unwrap_or(false)
                {
                    self.advance();
                }
                let hex = &self.source[start..self.pos];
                if self.peek_char() != Some('}') {
                    return Err("Invalid unicode escape: expected }".to_string());
                }
                self.advance();
                u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("Invalid unicode escape: \\u{{{}}}", hex))
            }
            Some(c) => {
                self.advance();
                Err(format!("Invalid escape: \\{}", c))
            }
            None => Err("Unterminated string".to_string()),
        }
    }

    /// Whether a `/` at the current position may begin a regex literal.
    fn regex_allowed(&self) -> bool {
        !matches!(
            self.prev_kind,
            Some(TokenKind::Identifier(_))
                | Some(TokenKind::Integer(_))
                | Some(TokenKind::Float(_))
                | Some(TokenKind::StringSegment(_))
                | Some(TokenKind::RParen)
                | Some(TokenKind::RBracket)
                | Some(TokenKind::Gt)
                | Some(TokenKind::Dot)
        )
    }

    /// Attempt to scan a regex literal. Returns `None` (with the scanner
    /// rewound) when the slash turns out to be division.
    fn try_scan_regex(&mut self, start: Mark) -> Option<Token> {
        let saved = self.mark();
        self.advance(); // opening slash

        // A slash followed by whitespace is always division.
        match self.peek_char() {
            None | Some(' ') | Some('\t') | Some('\n') | Some('\r') => {
                self.restore(saved);
                return None;
            }
            _ => {}
        }

        let pattern_start = self.pos;
        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    // No closing slash on this line: rewind, it's division.
                    self.restore(saved);
                    return None;
                }
                Some('\\') => {
                    self.advance();
                    self.advance();
                }
                Some('/') => break,
                Some(_) => {
                    self.advance();
                }
            }
        }

        let pattern = self.source[pattern_start..self.pos].to_string();
        self.advance(); // closing slash

        let flags_start = self.pos;
        while self
            .peek_char()
            .map(|c| c.is_ascii_lowercase())
            .unwrap_or(false)
        {
            self.advance();
        }
        let flags = self.source[flags_start..self.pos].to_string();

        Some(Token {
            kind: TokenKind::Regex { pattern, flags },
            lexeme: self.source[start.pos..self.pos].to_string(),
            span: self.span_from(start),
        })
    }

    /// Skip whitespace, `// …` line comments, and `(* … *)` block comments.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('(') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek_char() {
                            None => break,
                            Some('*') if self.peek_at(1) == Some(')') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            _ => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // position helpers
    // ------------------------------------------------------------------

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn restore(&mut self, mark: Mark) {
        self.pos = mark.pos;
        self.line = mark.line;
        self.column = mark.column;
    }

    fn span_from(&self, start: Mark) -> SourceSpan {
        SourceSpan::new(
            self.origin + start.pos,
            self.origin + self.pos,
            start.line,
            start.column,
        )
    }

    fn emit(&mut self, tokens: &mut Vec<Token>, kind: TokenKind, start: Mark) {
        let token = Token {
            lexeme: self.source[start.pos..self.pos].to_string(),
            span: self.span_from(start),
            kind,
        };
        self.push(tokens, token);
    }

    fn push(&mut self, tokens: &mut Vec<Token>, token: Token) {
        self.prev_kind = Some(token.kind.clone());
        tokens.push(token);
    }

    /// Emit a string segment; the closing-quote case emits even when the
    /// segment is empty so interpolation boundaries stay well-formed.
    fn emit_segment(
        &mut self,
        tokens: &mut Vec<Token>,
        segment: String,
        start: Mark,
        _open: Mark,
    ) {
        self.emit(tokens, TokenKind::StringSegment(segment), start);
    }
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    pos: usize,
    line: usize,
    column: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn classifies_articles_and_prepositions() {
        let tokens = kinds("the order from a repository");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Article(Article::The),
                TokenKind::Identifier("order".to_string()),
                TokenKind::Preposition(Preposition::From),
                TokenKind::Article(Article::A),
                TokenKind::Identifier("repository".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keyword_lookup_is_case_insensitive() {
        assert_eq!(kinds("WHERE")[0], TokenKind::Where);
        assert_eq!(kinds("The")[0], TokenKind::Article(Article::The));
        assert_eq!(kinds("FROM")[0], TokenKind::Preposition(Preposition::From));
    }

    #[test]
    fn scans_multi_char_operators() {
        let tokens = kinds("== != <= >= ++ ->");
        assert_eq!(
            tokens,
            vec![
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Concat,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_with_exponent_are_floats() {
        assert_eq!(kinds("42")[0], TokenKind::Integer(42));
        assert_eq!(kinds("3.5")[0], TokenKind::Float(3.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
        assert_eq!(kinds("2.5e-1")[0], TokenKind::Float(0.25));
    }

    #[test]
    fn trailing_dot_is_statement_terminator() {
        let tokens = kinds("42.");
        assert_eq!(tokens, vec![TokenKind::Integer(42), TokenKind::Dot, TokenKind::Eof]);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = kinds("a (* block\ncomment *) b // line\nc");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Article(Article::A),
                TokenKind::Identifier("b".to_string()),
                TokenKind::Identifier("c".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn plain_string_is_single_segment() {
        let tokens = kinds(r#""hello world""#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::StringSegment("hello world".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn interpolation_produces_boundary_tokens() {
        let tokens = kinds(r#""total: ${count + 1}!""#);
        assert_eq!(
            tokens,
            vec![
                TokenKind::StringSegment("total: ".to_string()),
                TokenKind::InterpolationStart,
                TokenKind::Identifier("count".to_string()),
                TokenKind::Plus,
                TokenKind::Integer(1),
                TokenKind::InterpolationEnd,
                TokenKind::StringSegment("!".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_tracks_nested_braces() {
        let tokens = kinds(r#""${ {"k": 1} }""#);
        assert!(tokens.contains(&TokenKind::InterpolationStart));
        assert!(tokens.contains(&TokenKind::InterpolationEnd));
        assert!(tokens.contains(&TokenKind::RBrace));
    }

    #[test]
    fn unterminated_string_is_error_token() {
        let tokens = kinds("\"oops");
        assert!(matches!(tokens[0], TokenKind::Error(_)));
    }

    #[test]
    fn invalid_escape_reports_but_continues() {
        let tokens = kinds(r#""a\qb""#);
        assert!(tokens.iter().any(|k| matches!(k, TokenKind::Error(_))));
        assert!(tokens
            .iter()
            .any(|k| matches!(k, TokenKind::StringSegment(s) if s == "ab")));
    }

    #[test]
    fn unicode_escape_decodes() {
        let tokens = kinds(r#""\u{48}i""#);
        assert_eq!(tokens[0], TokenKind::StringSegment("Hi".to_string()));
    }

    #[test]
    fn regex_at_expression_position() {
        let tokens = kinds("/ab+c/i");
        assert_eq!(
            tokens[0],
            TokenKind::Regex {
                pattern: "ab+c".to_string(),
                flags: "i".to_string()
            }
        );
    }

    #[test]
    fn slash_after_identifier_is_division() {
        let tokens = kinds("total / count");
        assert_eq!(tokens[1], TokenKind::Slash);
    }

    #[test]
    fn slash_with_no_closing_delimiter_is_division() {
        let tokens = kinds("x = a /b");
        // `a` precedes, so this is division context regardless.
        assert!(tokens.contains(&TokenKind::Slash));
        let tokens = kinds("= /b\n");
        // Regex position, but no closing slash before the newline.
        assert!(tokens.contains(&TokenKind::Slash));
    }

    #[test]
    fn slash_followed_by_whitespace_is_division() {
        let tokens = kinds("= / b/");
        assert_eq!(tokens[1], TokenKind::Slash);
    }
}
