use std::{collections::HashSet, rc::Rc};

use crate::{
    ast::{Expr, ExprKind, Module, Param, Stmt, StmtKind},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
};

#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub name: Rc<str>,
    pub module: Module,
}

/// Rejects loop control outside a loop, `return` outside a function and
/// duplicate parameter names.
pub fn compile(module: Module, unit_name: &str) -> Result<CompiledUnit, Diagnostic> {
    let mut checker = Checker::default();
    checker.statements(&module.items)?;
    Ok(CompiledUnit {
        name: Rc::from(unit_name),
        module,
    })
}

#[derive(Default, Clone, Copy)]
struct Checker {
    in_loop: bool,
    in_function: bool,
}

impl Checker {
    fn statements(&mut self, stmts: &[Stmt]) -> Result<(), Diagnostic> {
        stmts.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn in_loop_body(&self, body: &[Stmt]) -> Result<(), Diagnostic> {
        let mut nested = Checker {
            in_loop: true,
            ..*self
        };
        nested.statements(body)
    }

    fn function(&self, params: &[Param], body: &[Stmt]) -> Result<(), Diagnostic> {
        let mut seen = HashSet::new();
        for param in params {
            if !seen.insert(param.name.as_str()) {
                return Err(error(
                    format!("duplicate parameter `{}`", param.name),
                    param.span,
                ));
            }
        }
        let mut nested = Checker {
            in_loop: false,
            in_function: true,
        };
        nested.statements(body)
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        match &stmt.kind {
            StmtKind::Var { initializer, .. } => {
                if let Some(expr) = initializer {
                    self.expr(expr)?;
                }
                Ok(())
            }
            StmtKind::Function { params, body, .. } => self.function(params, body),
            StmtKind::Use { .. } | StmtKind::Del(_) => Ok(()),
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Block(items) => self.statements(items),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition)?;
                self.statements(then_branch)?;
                if let Some(branch) = else_branch {
                    self.statements(branch)?;
                }
                Ok(())
            }
            StmtKind::While { condition, body } => {
                self.expr(condition)?;
                self.in_loop_body(body)
            }
            StmtKind::Loop { body } => self.in_loop_body(body),
            StmtKind::For { iterable, body, .. } => {
                self.expr(iterable)?;
                self.in_loop_body(body)
            }
            StmtKind::When { subject, arms } => {
                self.expr(subject)?;
                arms.iter().try_for_each(|arm| self.statements(&arm.body))
            }
            StmtKind::Return(value) => {
                if !self.in_function {
                    return Err(error("`return` outside function", stmt.span));
                }
                match value {
                    Some(expr) => self.expr(expr),
                    None => Ok(()),
                }
            }
            StmtKind::Break if !self.in_loop => Err(error("`break` outside loop", stmt.span)),
            StmtKind::Continue if !self.in_loop => {
                Err(error("`continue` outside loop", stmt.span))
            }
            StmtKind::Break | StmtKind::Continue => Ok(()),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Variable(_) => Ok(()),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)
            }
            ExprKind::Unary { expr, .. } | ExprKind::Group(expr) => self.expr(expr),
            ExprKind::Assign { target, value } => {
                self.expr(target)?;
                self.expr(value)
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee)?;
                args.iter().try_for_each(|arg| self.expr(arg))
            }
            ExprKind::ArrayLiteral(items) | ExprKind::TupleLiteral(items) => {
                items.iter().try_for_each(|item| self.expr(item))
            }
            ExprKind::MapLiteral(entries) => entries.iter().try_for_each(|(key, value)| {
                self.expr(key)?;
                self.expr(value)
            }),
            ExprKind::Index { target, index } => {
                self.expr(target)?;
                self.expr(index)
            }
            ExprKind::Field { target, .. } => self.expr(target),
            ExprKind::Lambda { params, body } => self.function(params, body),
        }
    }
}

fn error(message: impl Into<String>, span: SourceSpan) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::Compile, message).with_span(span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_fragment;

    fn check(source: &str) -> Result<CompiledUnit, Diagnostic> {
        compile(parse_fragment(source).expect("parse"), "neval-test")
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = check("x = 1\nbreak").expect_err("must fail");
        assert_eq!(err.kind, DiagnosticKind::Compile);
        assert_eq!(err.span.map(|s| s.line), Some(2));
    }

    #[test]
    fn loop_flag_does_not_leak_into_functions() {
        assert!(check("while true { fn f() { break } }").is_err());
        assert!(check("while true { if true { break } }").is_ok());
    }

    #[test]
    fn rejects_return_at_top_level_and_duplicate_params() {
        assert!(check("return 1").is_err());
        assert!(check("fn f(a, a) { a }").is_err());
        assert!(check("fn f(a) { return a }").is_ok());
    }
}
