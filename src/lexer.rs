use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Fn,
    Use,
    As,
    Del,
    If,
    Else,
    When,
    Loop,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    True,
    False,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Keyword(Keyword),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Arrow,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pipe,
    DoubleAmpersand,
    DoublePipe,
    Bang,
    BangEqual,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current: 0,
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let (idx, ch) = self.chars.next()?;
        self.current = idx + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
        Some((idx, ch))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        while let Some(ch) = self.peek() {
            match ch {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' => self.skip_line(),
                '/' if self.peek_second() == Some('/') => self.skip_line(),
                '/' if self.peek_second() == Some('*') => self.skip_block_comment()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), Diagnostic> {
        let start = self.current;
        let line = self.line;
        self.bump();
        self.bump();
        let mut depth = 1;
        while let Some((_, ch)) = self.bump() {
            match ch {
                '/' if self.match_next('*') => depth += 1,
                '*' if self.match_next('/') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated block comment")
                .with_span(SourceSpan::new(start, self.current, line)),
        )
    }

    fn token(&self, kind: TokenKind, start: usize, line: usize) -> Token {
        Token {
            kind,
            lexeme: self.source[start..self.current].to_string(),
            span: SourceSpan::new(start, self.current, line),
        }
    }

    fn identifier_or_keyword(&mut self, start: usize, line: usize) -> Token {
        while matches!(self.peek(), Some(ch) if ch.is_alphanumeric() || ch == '_') {
            self.bump();
        }
        let kind = keyword_for(&self.source[start..self.current]).unwrap_or(TokenKind::Identifier);
        self.token(kind, start, line)
    }

    fn number_literal(&mut self, start: usize, line: usize) -> Token {
        let mut seen_dot = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !seen_dot && matches!(self.peek_second(), Some('0'..='9')) => {
                    seen_dot = true;
                    self.bump();
                }
                'e' | 'E' => {
                    self.bump();
                    if matches!(self.peek(), Some('+' | '-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        self.token(TokenKind::Number, start, line)
    }

    fn string_literal(&mut self, start: usize, line: usize) -> Result<Token, Diagnostic> {
        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '"' => {
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: value,
                        span: SourceSpan::new(start, self.current, line),
                    });
                }
                '\\' => match self.bump() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, other)) => value.push(other),
                    None => break,
                },
                _ => value.push(ch),
            }
        }
        Err(
            Diagnostic::new(DiagnosticKind::Lexer, "unterminated string literal")
                .with_span(SourceSpan::new(start, self.current, line)),
        )
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let line = self.line;
            let Some((start, ch)) = self.bump() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    span: SourceSpan::new(self.current, self.current, line),
                });
                break;
            };

            let kind = match ch {
                c if c.is_alphabetic() || c == '_' => {
                    tokens.push(self.identifier_or_keyword(start, line));
                    continue;
                }
                '0'..='9' => {
                    tokens.push(self.number_literal(start, line));
                    continue;
                }
                '"' => {
                    tokens.push(self.string_literal(start, line)?);
                    continue;
                }
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                ';' => TokenKind::Semicolon,
                ':' => TokenKind::Colon,
                '+' => TokenKind::Plus,
                '-' if self.match_next('>') => TokenKind::Arrow,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '=' if self.match_next('=') => TokenKind::EqualEqual,
                '=' => TokenKind::Assign,
                '!' if self.match_next('=') => TokenKind::BangEqual,
                '!' => TokenKind::Bang,
                '&' if self.match_next('&') => TokenKind::DoubleAmpersand,
                '|' if self.match_next('|') => TokenKind::DoublePipe,
                '|' => TokenKind::Pipe,
                '<' if self.match_next('=') => TokenKind::LessEqual,
                '<' => TokenKind::Less,
                '>' if self.match_next('=') => TokenKind::GreaterEqual,
                '>' => TokenKind::Greater,
                other => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::Lexer,
                        format!("unexpected character `{other}`"),
                    )
                    .with_span(SourceSpan::new(start, self.current, line)));
                }
            };
            tokens.push(self.token(kind, start, line));
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "var" => Kw::Var,
        "fn" => Kw::Fn,
        "use" => Kw::Use,
        "as" => Kw::As,
        "del" => Kw::Del,
        "if" => Kw::If,
        "else" => Kw::Else,
        "when" => Kw::When,
        "loop" => Kw::Loop,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "return" => Kw::Return,
        "true" => Kw::True,
        "false" => Kw::False,
        "none" => Kw::None,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn tracks_line_of_each_token() {
        let tokens = Lexer::new("a = 1\n\n// note\nb").tokenize().expect("tokenize");
        let lines: Vec<_> = tokens.iter().map(|t| t.span.line).collect();
        assert_eq!(lines, vec![1, 1, 1, 4, 4]);
    }

    #[test]
    fn number_followed_by_field_access_is_not_a_float() {
        assert_eq!(
            kinds("1.5 x.y"),
            vec![
                TokenKind::Number,
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn rejects_unknown_characters_with_location() {
        let err = Lexer::new("a = 1\nb = $").tokenize().expect_err("must fail");
        assert_eq!(err.kind, DiagnosticKind::Lexer);
        assert_eq!(err.span.map(|s| s.line), Some(2));
    }

    #[test]
    fn block_comments_advance_lines() {
        let tokens = Lexer::new("/* one\n two */ x").tokenize().expect("tokenize");
        assert_eq!(tokens[0].span.line, 2);
    }
}
