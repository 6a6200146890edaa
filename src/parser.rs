use std::rc::Rc;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Module, Param, Pattern, Stmt, StmtKind, UnaryOp, WhenArm},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

/// Parses a fragment into a [`Module`].
pub fn parse_fragment(source: &str) -> Result<Module, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_module()
}

const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, Diagnostic>) -> Result<T, Diagnostic> {
        if self.depth >= MAX_NESTING {
            return Err(error_at(self.peek(), "expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_module(&mut self) -> Result<Module, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        let trailing_semicolon = self.current > 0 && self.previous().kind == TokenKind::Semicolon;
        Ok(Module {
            items,
            trailing_semicolon,
        })
    }

    fn parse_block_items(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        self.consume(TokenKind::RBrace, "expected `}` to close block")?;
        Ok(items)
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let items = self.parse_block_items()?;
        Ok((items, lbrace.span.to(self.previous().span)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, Diagnostic> {
        let stmt = match self.peek().kind {
            TokenKind::Keyword(Keyword::Var) => self.parse_var()?,
            TokenKind::Keyword(Keyword::Fn) => self.parse_function()?,
            TokenKind::Keyword(Keyword::Use) => self.parse_use()?,
            TokenKind::Keyword(Keyword::Del) => self.parse_del()?,
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::While) => self.parse_while()?,
            TokenKind::Keyword(Keyword::Loop) => self.parse_loop()?,
            TokenKind::Keyword(Keyword::For) => self.parse_for()?,
            TokenKind::Keyword(Keyword::When) => self.parse_when()?,
            TokenKind::Keyword(Keyword::Return) => self.parse_return()?,
            TokenKind::Keyword(Keyword::Break) => {
                let token = self.advance();
                Stmt {
                    kind: StmtKind::Break,
                    span: token.span,
                }
            }
            TokenKind::Keyword(Keyword::Continue) => {
                let token = self.advance();
                Stmt {
                    kind: StmtKind::Continue,
                    span: token.span,
                }
            }
            TokenKind::LBrace => {
                let (items, span) = self.parse_block()?;
                Stmt {
                    kind: StmtKind::Block(items),
                    span,
                }
            }
            _ => {
                let expr = self.parse_expression()?;
                Stmt {
                    span: expr.span,
                    kind: StmtKind::Expr(expr),
                }
            }
        };
        self.consume_optional_semicolon();
        Ok(stmt)
    }

    fn parse_var(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let name = self.consume_identifier("expected variable name")?;
        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let end = initializer.as_ref().map(|e| e.span).unwrap_or(name.span);
        Ok(Stmt {
            span: keyword.span.to(end),
            kind: StmtKind::Var {
                name: name.lexeme,
                initializer,
            },
        })
    }

    fn parse_params(&mut self, close: TokenKind) -> Result<Vec<Param>, Diagnostic> {
        let mut params = Vec::new();
        if !self.check(close) {
            loop {
                let param = self.consume_identifier("expected parameter name")?;
                params.push(Param {
                    name: param.lexeme,
                    span: param.span,
                });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(close, "expected end of parameter list")?;
        Ok(params)
    }

    fn parse_function(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let name = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let params = self.parse_params(TokenKind::RParen)?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: keyword.span.to(span),
            kind: StmtKind::Function {
                name: name.lexeme,
                params,
                body: body.into(),
            },
        })
    }

    fn parse_use(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let first = self.consume_identifier("expected module path after `use`")?;
        let mut end = first.span;
        let mut path = vec![first.lexeme];
        while self.matches(TokenKind::Dot) {
            let segment = self.consume_identifier("expected path segment after `.`")?;
            end = segment.span;
            path.push(segment.lexeme);
        }
        let alias = if self.matches_keyword(Keyword::As) {
            let alias = self.consume_identifier("expected alias after `as`")?;
            end = alias.span;
            Some(alias.lexeme)
        } else {
            None
        };
        Ok(Stmt {
            span: keyword.span.to(end),
            kind: StmtKind::Use { path, alias },
        })
    }

    fn parse_del(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let mut names = Vec::new();
        let mut end = keyword.span;
        loop {
            let name = self.consume_identifier("expected name after `del`")?;
            end = name.span;
            names.push(name.lexeme);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(Stmt {
            span: keyword.span.to(end),
            kind: StmtKind::Del(names),
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let condition = self.parse_expression()?;
        let (then_branch, mut end) = self.parse_block()?;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let nested = self.nested(Self::parse_if)?;
                end = nested.span;
                Some(vec![nested])
            } else {
                let (branch, span) = self.parse_block()?;
                end = span;
                Some(branch)
            }
        } else {
            None
        };
        Ok(Stmt {
            span: keyword.span.to(end),
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: keyword.span.to(span),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: keyword.span.to(span),
            kind: StmtKind::Loop { body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let binding = self.consume_identifier("expected loop binding")?;
        self.consume(TokenKind::Keyword(Keyword::In), "expected `in` after loop binding")?;
        let iterable = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: keyword.span.to(span),
            kind: StmtKind::For {
                binding: binding.lexeme,
                iterable,
                body,
            },
        })
    }

    fn parse_when(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let subject = self.parse_expression()?;
        self.consume(TokenKind::LBrace, "expected `{` after when subject")?;
        let mut arms = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let pattern = if self.matches_keyword(Keyword::Else) {
                Pattern::Wildcard
            } else {
                self.parse_pattern()?
            };
            self.consume(TokenKind::Arrow, "expected `->` in when arm")?;
            let (body, span) = self.parse_block()?;
            arms.push(WhenArm {
                pattern,
                body,
                span,
            });
            self.matches(TokenKind::Comma);
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after when arms")?;
        Ok(Stmt {
            span: keyword.span.to(rbrace.span),
            kind: StmtKind::When { subject, arms },
        })
    }

    fn parse_pattern(&mut self) -> Result<Pattern, Diagnostic> {
        let token = self.advance();
        match token.kind {
            TokenKind::Identifier if token.lexeme == "_" => Ok(Pattern::Wildcard),
            TokenKind::Identifier => Ok(Pattern::Identifier(token.lexeme)),
            TokenKind::LParen => {
                let mut elements = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        elements.push(self.parse_pattern()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RParen, "expected `)` to close tuple pattern")?;
                Ok(Pattern::Tuple(elements))
            }
            TokenKind::Minus if self.check(TokenKind::Number) => {
                let number = self.advance();
                match number_literal(&number)? {
                    Literal::Int(n) => Ok(Pattern::Literal(Literal::Int(-n))),
                    Literal::Float(n) => Ok(Pattern::Literal(Literal::Float(-n))),
                    other => Ok(Pattern::Literal(other)),
                }
            }
            TokenKind::Keyword(Keyword::True) => Ok(Pattern::Literal(Literal::Bool(true))),
            TokenKind::Keyword(Keyword::False) => Ok(Pattern::Literal(Literal::Bool(false))),
            TokenKind::Keyword(Keyword::None) => Ok(Pattern::Literal(Literal::None)),
            TokenKind::Number => Ok(Pattern::Literal(number_literal(&token)?)),
            TokenKind::String => Ok(Pattern::Literal(Literal::String(token.lexeme))),
            _ => Err(error_at(&token, "unexpected token in pattern")),
        }
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let keyword = self.advance();
        let value = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RBrace)
            || self.check(TokenKind::Eof)
            || self.peek().span.line != keyword.span.line
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let end = value.as_ref().map(|e| e.span).unwrap_or(keyword.span);
        Ok(Stmt {
            span: keyword.span.to(end),
            kind: StmtKind::Return(value),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_or()?;
        if self.check(TokenKind::Assign) {
            let equals = self.advance();
            let value = self.parse_expression()?;
            return match expr.kind {
                ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => Ok(Expr {
                    span: expr.span.to(value.span),
                    kind: ExprKind::Assign {
                        target: Box::new(expr),
                        value: Box::new(value),
                    },
                }),
                _ => Err(error_at(&equals, "invalid assignment target")),
            };
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_level(&[(TokenKind::DoublePipe, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_level(&[(TokenKind::DoubleAmpersand, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_level(
            &[
                (TokenKind::EqualEqual, BinaryOp::Equal),
                (TokenKind::BangEqual, BinaryOp::NotEqual),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_level(
            &[
                (TokenKind::LessEqual, BinaryOp::LessEqual),
                (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
                (TokenKind::Less, BinaryOp::Less),
                (TokenKind::Greater, BinaryOp::Greater),
            ],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_level(
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn binary_level(
        &mut self,
        operators: &[(TokenKind, BinaryOp)],
        operand: fn(&mut Self) -> Result<Expr, Diagnostic>,
    ) -> Result<Expr, Diagnostic> {
        let mut expr = operand(self)?;
        'outer: loop {
            for &(kind, op) in operators {
                if self.matches(kind) {
                    let right = operand(self)?;
                    expr = Expr {
                        span: expr.span.to(right.span),
                        kind: ExprKind::Binary {
                            op,
                            left: Box::new(expr),
                            right: Box::new(right),
                        },
                    };
                    continue 'outer;
                }
            }
            return Ok(expr);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        self.nested(Self::parse_prefixed)
    }

    fn parse_prefixed(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.parse_call();
        };
        let operator = self.previous().span;
        let operand = self.parse_unary()?;
        Ok(Expr {
            span: operator.to(operand.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(operand),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let args = self.parse_arguments(TokenKind::RParen)?;
                expr = Expr {
                    span: expr.span.to(self.previous().span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: expr.span.to(bracket.span),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let field = self.consume_identifier("expected field after `.`")?;
                expr = Expr {
                    span: expr.span.to(field.span),
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        field: field.lexeme,
                    },
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_arguments(&mut self, close: TokenKind) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        while !self.check(close) {
            args.push(self.parse_expression()?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume(close, "expected closing delimiter")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.advance();
        let span = token.span;
        let literal = move |literal: Literal| -> Result<Expr, Diagnostic> {
            Ok(Expr {
                span,
                kind: ExprKind::Literal(literal),
            })
        };
        match token.kind {
            TokenKind::Keyword(Keyword::True) => literal(Literal::Bool(true)),
            TokenKind::Keyword(Keyword::False) => literal(Literal::Bool(false)),
            TokenKind::Keyword(Keyword::None) => literal(Literal::None),
            TokenKind::Number => literal(number_literal(&token)?),
            TokenKind::String => literal(Literal::String(token.lexeme.clone())),
            TokenKind::Identifier => Ok(Expr {
                span: token.span,
                kind: ExprKind::Variable(token.lexeme.clone()),
            }),
            TokenKind::LParen => {
                if self.matches(TokenKind::RParen) {
                    return Ok(Expr {
                        span: token.span.to(self.previous().span),
                        kind: ExprKind::TupleLiteral(Vec::new()),
                    });
                }
                let first = self.parse_expression()?;
                if self.matches(TokenKind::Comma) {
                    let mut elements = vec![first];
                    elements.extend(self.parse_arguments(TokenKind::RParen)?);
                    Ok(Expr {
                        span: token.span.to(self.previous().span),
                        kind: ExprKind::TupleLiteral(elements),
                    })
                } else {
                    let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                    Ok(Expr {
                        span: token.span.to(rparen.span),
                        kind: ExprKind::Group(Box::new(first)),
                    })
                }
            }
            TokenKind::LBracket => {
                let elements = self.parse_arguments(TokenKind::RBracket)?;
                Ok(Expr {
                    span: token.span.to(self.previous().span),
                    kind: ExprKind::ArrayLiteral(elements),
                })
            }
            TokenKind::LBrace => self.parse_map(token),
            TokenKind::Pipe => self.parse_lambda(token, false),
            TokenKind::DoublePipe => self.parse_lambda(token, true),
            TokenKind::Eof => Err(error_at(&token, "unexpected end of input")),
            _ => Err(error_at(&token, "unexpected token in expression")),
        }
    }

    fn parse_map(&mut self, lbrace: Token) -> Result<Expr, Diagnostic> {
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let key = self.parse_expression()?;
            self.consume(TokenKind::Colon, "expected `:` in map literal")?;
            let value = self.parse_expression()?;
            entries.push((key, value));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after map literal")?;
        Ok(Expr {
            span: lbrace.span.to(rbrace.span),
            kind: ExprKind::MapLiteral(entries),
        })
    }

    fn parse_lambda(&mut self, open: Token, empty: bool) -> Result<Expr, Diagnostic> {
        let params = if empty {
            Vec::new()
        } else {
            self.parse_params(TokenKind::Pipe)?
        };
        let body: Vec<Stmt> = if self.check(TokenKind::LBrace) {
            self.parse_block()?.0
        } else {
            let expr = self.parse_expression()?;
            vec![Stmt {
                span: expr.span,
                kind: StmtKind::Expr(expr),
            }]
        };
        Ok(Expr {
            span: open.span.to(self.previous().span),
            kind: ExprKind::Lambda {
                params,
                body: Rc::from(body),
            },
        })
    }

    fn consume_optional_semicolon(&mut self) {
        while self.matches(TokenKind::Semicolon) {}
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(error_at(self.peek(), message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with `Eof`.
        let last = self.tokens.len() - 1;
        &self.tokens[self.current.min(last)]
    }
}

fn number_literal(token: &Token) -> Result<Literal, Diagnostic> {
    let digits = token.lexeme.replace('_', "");
    let literal = if digits.contains(['.', 'e', 'E']) {
        digits.parse().map(Literal::Float).ok()
    } else {
        digits.parse().map(Literal::Int).ok()
    };
    literal.ok_or_else(|| error_at(token, "invalid number literal"))
}

fn error_at(token: &Token, message: &str) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::Parser, message).with_span(token.span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_trailing_semicolon() {
        assert!(parse_fragment("a = 1; b = 2;").expect("parse").trailing_semicolon);
        assert!(!parse_fragment("a = 1; b = 2").expect("parse").trailing_semicolon);
        assert!(!parse_fragment("").expect("parse").trailing_semicolon);
    }

    #[test]
    fn statements_keep_their_starting_line() {
        let module = parse_fragment("a = 1\n\nfor i in xs {\n  i\n}\ni").expect("parse");
        let lines: Vec<_> = module.items.iter().map(|s| s.span.line).collect();
        assert_eq!(lines, vec![1, 3, 6]);
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let err = parse_fragment("1 + 2 = 3").expect_err("must fail");
        assert_eq!(err.kind, DiagnosticKind::Parser);
        assert_eq!(err.message, "invalid assignment target");
    }

    #[test]
    fn eof_errors_carry_the_last_line() {
        let err = parse_fragment("a = 1\nb = (").expect_err("must fail");
        assert_eq!(err.span.map(|s| s.line), Some(2));
    }

    #[test]
    fn parses_use_with_alias_and_del_lists() {
        let module = parse_fragment("use std.math as m\ndel a, b").expect("parse");
        match &module.items[0].kind {
            StmtKind::Use { path, alias } => {
                assert_eq!(path, &vec!["std".to_string(), "math".to_string()]);
                assert_eq!(alias.as_deref(), Some("m"));
            }
            other => panic!("expected use, found {other:?}"),
        }
        match &module.items[1].kind {
            StmtKind::Del(names) => assert_eq!(names.len(), 2),
            other => panic!("expected del, found {other:?}"),
        }
    }

    #[test]
    fn rejects_runaway_nesting() {
        let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let err = parse_fragment(&source).expect_err("must fail");
        assert_eq!(err.kind, DiagnosticKind::Parser);
        assert_eq!(err.message, "expression nested too deeply");

        let err = parse_fragment(&format!("{}1", "-".repeat(1000))).expect_err("must fail");
        assert_eq!(err.message, "expression nested too deeply");

        let err = parse_fragment(&format!("{}{}", "{".repeat(1000), "}".repeat(1000)))
            .expect_err("must fail");
        assert_eq!(err.message, "expression nested too deeply");
    }

    #[test]
    fn accepts_moderate_nesting() {
        let source = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse_fragment(&source).expect("parse").items.len(), 1);
    }
}
