use ulid::Ulid;

use crate::ast::{Expr, ExprKind, Module, Stmt, StmtKind};

/// Hidden binding that receives the value of a fragment's final expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSlot {
    name: String,
}

impl CaptureSlot {
    /// Generates a fresh slot; names never repeat within or across calls.
    pub fn new() -> Self {
        let id = Ulid::new().to_string().to_lowercase();
        Self {
            name: format!("__return_{id}__"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for CaptureSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrites a trailing bare expression into an assignment to `slot`.
///
/// Only the last top-level statement is considered. Assignments,
/// declarations, control flow, blocks and a trailing `;` leave the module
/// untouched. The assignment reuses the statement's span. Returns whether
/// the module was rewritten.
pub fn capture_last_expression(module: &mut Module, slot: &CaptureSlot) -> bool {
    if module.trailing_semicolon {
        return false;
    }
    let Some(last) = module.items.last_mut() else {
        return false;
    };
    let StmtKind::Expr(expr) = &last.kind else {
        return false;
    };
    if expr.is_assignment() {
        return false;
    }

    let span = last.span;
    let value = expr.clone();
    *last = Stmt {
        kind: StmtKind::Expr(Expr {
            kind: ExprKind::Assign {
                target: Box::new(Expr {
                    kind: ExprKind::Variable(slot.name().to_string()),
                    span,
                }),
                value: Box::new(value),
            },
            span,
        }),
        span,
    };
    true
}
