use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Param, Pattern, Stmt, StmtKind, UnaryOp},
    compile::CompiledUnit,
    diagnostics::{Diagnostic, NevalError, Result, SourceSpan, TraceFrame},
    environment::{Environment, EnvironmentRef},
    scope::Bindings,
    stdlib::BUILTINS_KEY,
    value::{UserFunction, Value, ValueKind},
};

const MAX_CALL_DEPTH: usize = 64;

struct Frame {
    unit: Rc<str>,
    function: Option<String>,
    line: usize,
    locals: Option<EnvironmentRef>,
}

/// Tree-walking executor; fragment-level names live in `globals`.
pub struct Interpreter<'g> {
    globals: &'g mut dyn Bindings,
    frames: Vec<Frame>,
}

enum FlowControl {
    Next,
    NextValue(Value),
    Return(Value),
    Break,
    Continue,
}

impl<'g> Interpreter<'g> {
    pub fn new(globals: &'g mut dyn Bindings) -> Self {
        Self {
            globals,
            frames: Vec::new(),
        }
    }

    pub fn execute(&mut self, unit: &CompiledUnit) -> Result<()> {
        trace!(unit = %unit.name, statements = unit.module.items.len(), "executing unit");
        self.frames.push(Frame {
            unit: Rc::clone(&unit.name),
            function: None,
            line: 1,
            locals: None,
        });
        let result = self.execute_block(&unit.module.items);
        match result {
            Ok(_) => {
                self.frames.pop();
                Ok(())
            }
            Err(err) => Err(self.leave_frame(err)),
        }
    }

    fn leave_frame(&mut self, err: NevalError) -> NevalError {
        let Some(frame) = self.frames.pop() else {
            return err;
        };
        err.map_diagnostic(|diag| {
            let line = match diag.span {
                Some(span) if diag.trace.is_empty() => span.line,
                _ => frame.line,
            };
            diag.with_frame(TraceFrame {
                unit: frame.unit.to_string(),
                line,
                function: frame.function,
            })
        })
    }

    fn set_line(&mut self, line: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    fn locals(&self) -> Option<EnvironmentRef> {
        self.frames.last().and_then(|frame| frame.locals.clone())
    }

    fn current_unit(&self) -> Rc<str> {
        self.frames
            .last()
            .map(|frame| Rc::clone(&frame.unit))
            .unwrap_or_else(|| Rc::from(""))
    }

    fn lookup(&self, name: &str, span: SourceSpan) -> Result<Value> {
        if let Some(locals) = self.frames.last().and_then(|frame| frame.locals.as_ref()) {
            if let Some(value) = Environment::lookup(locals, name) {
                return Ok(value);
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtins) = self.globals.get(BUILTINS_KEY) {
            if let ValueKind::Module(module) = builtins.kind() {
                if let Some(value) = module.exports.get(name) {
                    return Ok(value.clone());
                }
            }
        }
        Err(NevalError::from(Diagnostic::undefined(name).with_span(span)))
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.locals() {
            Some(locals) => {
                if !Environment::assign(&locals, name, value.clone()) {
                    locals.borrow_mut().define(name, value);
                }
            }
            None => self.globals.insert(name.to_string(), value),
        }
    }

    fn unbind(&mut self, name: &str, span: SourceSpan) -> Result<()> {
        let removed = match self.locals() {
            Some(locals) => Environment::remove(&locals, name),
            None => self.globals.remove(name).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(NevalError::from(Diagnostic::undefined(name).with_span(span)))
        }
    }

    fn define_function(&self, name: Option<&str>, params: &[Param], body: &Rc<[Stmt]>) -> Value {
        Value::new(ValueKind::Function(UserFunction {
            name: name.map(str::to_string),
            params: params.iter().map(|p| p.name.clone()).collect(),
            body: Rc::clone(body),
            closure: self.locals(),
            unit: self.current_unit(),
        }))
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<FlowControl> {
        let mut last = FlowControl::Next;
        for stmt in statements {
            match self.execute_statement(stmt)? {
                flow @ (FlowControl::Next | FlowControl::NextValue(_)) => last = flow,
                other => return Ok(other),
            }
        }
        Ok(last)
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        self.set_line(stmt.span.line);
        match &stmt.kind {
            StmtKind::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::unit(),
                };
                self.bind(name, value);
                Ok(FlowControl::Next)
            }
            StmtKind::Function { name, params, body } => {
                let function = self.define_function(Some(name.as_str()), params, body);
                self.bind(name, function);
                Ok(FlowControl::Next)
            }
            StmtKind::Use { path, alias } => {
                let value = self.resolve_path(path, stmt.span)?;
                let name = alias
                    .as_deref()
                    .or_else(|| path.last().map(String::as_str))
                    .unwrap_or_default()
                    .to_string();
                self.bind(&name, value);
                Ok(FlowControl::Next)
            }
            StmtKind::Del(names) => {
                for name in names {
                    self.unbind(name, stmt.span)?;
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Expr(expr) => Ok(FlowControl::NextValue(self.evaluate(expr)?)),
            StmtKind::Block(statements) => self.execute_block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute_block(branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Loop { body } => {
                loop {
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let iterable_value = self.evaluate(iterable)?;
                for item in self.iterate(&iterable_value, iterable.span)? {
                    self.bind(binding, item);
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::When { subject, arms } => {
                let value = self.evaluate(subject)?;
                for arm in arms {
                    let mut bindings = Vec::new();
                    if self.match_pattern(&arm.pattern, &value, &mut bindings) {
                        for (name, bound) in bindings {
                            self.bind(&name, bound);
                        }
                        return self.execute_block(&arm.body);
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::unit(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
        }
    }

    fn resolve_path(&self, path: &[String], span: SourceSpan) -> Result<Value> {
        let Some((first, rest)) = path.split_first() else {
            return Err(NevalError::from(
                Diagnostic::runtime("empty module path").with_span(span),
            ));
        };
        let mut value = self.lookup(first, span)?;
        for segment in rest {
            value = self.field(&value, segment, span)?;
        }
        Ok(value)
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(literal_value(literal)),
            ExprKind::Variable(name) => self.lookup(name, expr.span),
            ExprKind::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let truthy = self.evaluate(left)?.is_truthy() && self.evaluate(right)?.is_truthy();
                Ok(Value::bool(truthy))
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let truthy = self.evaluate(left)?.is_truthy() || self.evaluate(right)?.is_truthy();
                Ok(Value::bool(truthy))
            }
            ExprKind::Binary { op, left, right } => {
                let left_value = self.evaluate(left)?;
                let right_value = self.evaluate(right)?;
                binary(*op, &left_value, &right_value, expr.span)
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = self.evaluate(operand)?;
                unary(*op, &value, expr.span)
            }
            ExprKind::Assign { target, value } => {
                let value = self.evaluate(value)?;
                self.assign(target, value.clone())?;
                Ok(value)
            }
            ExprKind::Call { callee, args } => {
                let callee_value = self.evaluate(callee)?;
                let mut arguments = Vec::with_capacity(args.len());
                for arg in args {
                    arguments.push(self.evaluate(arg)?);
                }
                self.set_line(expr.span.line);
                self.call(&callee_value, arguments, expr.span)
            }
            ExprKind::ArrayLiteral(elements) => Ok(Value::array(self.evaluate_all(elements)?)),
            ExprKind::TupleLiteral(elements) => Ok(Value::tuple(self.evaluate_all(elements)?)),
            ExprKind::MapLiteral(entries) => {
                let mut map = IndexMap::new();
                for (key_expr, value_expr) in entries {
                    let key = map_key(&self.evaluate(key_expr)?, key_expr.span)?;
                    let value = self.evaluate(value_expr)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::Index { target, index } => {
                let target_value = self.evaluate(target)?;
                let index_value = self.evaluate(index)?;
                index_get(&target_value, &index_value, expr.span)
            }
            ExprKind::Field { target, field } => {
                let target_value = self.evaluate(target)?;
                self.field(&target_value, field, expr.span)
            }
            ExprKind::Lambda { params, body } => Ok(self.define_function(None, params, body)),
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.evaluate(expr)).collect()
    }

    // Containers are rebuilt on the way back to the root variable.
    fn assign(&mut self, target: &Expr, value: Value) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                self.bind(name, value);
                Ok(())
            }
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let container = self.evaluate(owner)?;
                let index_value = self.evaluate(index)?;
                let updated = index_set(&container, &index_value, value, target.span)?;
                self.assign(owner, updated)
            }
            ExprKind::Field {
                target: owner,
                field,
            } => {
                let container = self.evaluate(owner)?;
                let Some(map) = container.as_map() else {
                    return Err(NevalError::from(
                        Diagnostic::runtime(format!(
                            "field assignment expects Map, found {}",
                            container.type_name()
                        ))
                        .with_span(target.span),
                    ));
                };
                let mut updated = map.clone();
                updated.insert(field.clone(), value);
                self.assign(owner, Value::map(updated))
            }
            _ => Err(NevalError::from(
                Diagnostic::runtime("invalid assignment target").with_span(target.span),
            )),
        }
    }

    fn call(&mut self, callee: &Value, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        match callee.kind() {
            ValueKind::NativeFunction(fun) => fun.call(&args).map_err(|err| err.or_span(span)),
            ValueKind::Function(fun) => self.call_function(fun, args, span),
            _ => Err(NevalError::from(
                Diagnostic::runtime(format!("{} is not callable", callee.type_name())).with_span(span),
            )),
        }
    }

    fn call_function(&mut self, fun: &UserFunction, args: Vec<Value>, span: SourceSpan) -> Result<Value> {
        if args.len() != fun.params.len() {
            return Err(NevalError::from(
                Diagnostic::runtime(format!(
                    "function `{}` expected {} arguments but received {}",
                    fun.display_name(),
                    fun.params.len(),
                    args.len()
                ))
                .with_span(span),
            ));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(NevalError::from(
                Diagnostic::runtime("maximum call depth exceeded").with_span(span),
            ));
        }

        let locals = Environment::with_parent(fun.closure.clone());
        for (name, value) in fun.params.iter().zip(args) {
            locals.borrow_mut().define(name.as_str(), value);
        }
        self.frames.push(Frame {
            unit: Rc::clone(&fun.unit),
            function: Some(fun.display_name().to_string()),
            line: fun.body.first().map_or(span.line, |stmt| stmt.span.line),
            locals: Some(locals),
        });

        let mut result = Value::unit();
        for stmt in fun.body.iter() {
            match self.execute_statement(stmt) {
                Ok(FlowControl::Return(value)) => {
                    result = value;
                    break;
                }
                Ok(FlowControl::NextValue(value)) => result = value,
                Ok(_) => result = Value::unit(),
                Err(err) => return Err(self.leave_frame(err)),
            }
        }
        self.frames.pop();
        Ok(result)
    }

    fn field(&self, target: &Value, field: &str, span: SourceSpan) -> Result<Value> {
        let found = match target.kind() {
            ValueKind::Map(map) => map.get(field),
            ValueKind::Module(module) => module.exports.get(field),
            _ => {
                return Err(NevalError::from(
                    Diagnostic::runtime(format!(
                        "field access expects Map or Module, found {}",
                        target.type_name()
                    ))
                    .with_span(span),
                ))
            }
        };
        found.cloned().ok_or_else(|| {
            NevalError::from(Diagnostic::runtime(format!("missing field `{field}`")).with_span(span))
        })
    }

    fn iterate(&self, value: &Value, span: SourceSpan) -> Result<Vec<Value>> {
        match value.kind() {
            ValueKind::Array(values) | ValueKind::Tuple(values) => Ok(values.clone()),
            ValueKind::String(text) => Ok(text.chars().map(|c| Value::string(c.to_string())).collect()),
            ValueKind::Map(map) => Ok(map
                .iter()
                .map(|(key, value)| Value::tuple(vec![Value::string(key.as_str()), value.clone()]))
                .collect()),
            _ => Err(NevalError::from(
                Diagnostic::runtime(format!("{} is not iterable", value.type_name())).with_span(span),
            )),
        }
    }

    fn match_pattern(&self, pattern: &Pattern, value: &Value, bindings: &mut Vec<(String, Value)>) -> bool {
        match pattern {
            Pattern::Wildcard => true,
            Pattern::Literal(literal) => literal_value(literal).same(value),
            Pattern::Identifier(name) => {
                bindings.push((name.clone(), value.clone()));
                true
            }
            Pattern::Tuple(patterns) => match value.as_array() {
                Some(elements) if elements.len() == patterns.len() => patterns
                    .iter()
                    .zip(elements)
                    .all(|(pattern, element)| self.match_pattern(pattern, element, bindings)),
                _ => false,
            },
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(n) => Value::float(*n),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s.as_str()),
        Literal::None => Value::unit(),
    }
}

fn runtime_error(message: impl Into<String>, span: SourceSpan) -> NevalError {
    NevalError::from(Diagnostic::runtime(message).with_span(span))
}

fn map_key(key: &Value, span: SourceSpan) -> Result<String> {
    match key.kind() {
        ValueKind::String(s) => Ok(s.clone()),
        ValueKind::Int(n) => Ok(n.to_string()),
        _ => Err(runtime_error(
            format!("map keys must be String or Int, found {}", key.type_name()),
            span,
        )),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    use BinaryOp::*;
    match op {
        Equal => Ok(Value::bool(left.same(right))),
        NotEqual => Ok(Value::bool(!left.same(right))),
        Less | LessEqual | Greater | GreaterEqual => compare(op, left, right, span),
        Add => match (left.kind(), right.kind()) {
            (ValueKind::String(a), ValueKind::String(b)) => Ok(Value::string(format!("{a}{b}"))),
            (ValueKind::Array(a), ValueKind::Array(b)) => {
                Ok(Value::array(a.iter().chain(b).cloned().collect()))
            }
            _ => arithmetic(op, left, right, span),
        },
        Sub | Mul | Div | Mod => arithmetic(op, left, right, span),
        And | Or => Ok(Value::bool(match op {
            And => left.is_truthy() && right.is_truthy(),
            _ => left.is_truthy() || right.is_truthy(),
        })),
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> NevalError {
    runtime_error(
        format!(
            "unsupported operand types for {}: {} and {}",
            symbol(op),
            left.type_name(),
            right.type_name()
        ),
        span,
    )
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    if let (ValueKind::Int(a), ValueKind::Int(b)) = (left.kind(), right.kind()) {
        let (a, b) = (*a, *b);
        if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
            return Err(runtime_error("division by zero", span));
        }
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Mod => a.checked_rem(b),
            BinaryOp::Div => match (a.checked_div(b), a.checked_rem(b)) {
                (Some(quotient), Some(0)) => Some(quotient),
                (Some(_), Some(_)) => return Ok(Value::float(a as f64 / b as f64)),
                _ => None,
            },
            _ => return Err(unsupported(op, left, right, span)),
        };
        return result
            .map(Value::int)
            .ok_or_else(|| runtime_error("integer overflow", span));
    }

    let (Some(a), Some(b)) = (number(left), number(right)) else {
        return Err(unsupported(op, left, right, span));
    };
    if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
        return Err(runtime_error("division by zero", span));
    }
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => return Err(unsupported(op, left, right, span)),
    };
    Ok(Value::float(result))
}

fn number(value: &Value) -> Option<f64> {
    match value.kind() {
        ValueKind::Int(n) => Some(*n as f64),
        ValueKind::Float(n) => Some(*n),
        _ => None,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Result<Value> {
    let ordering = match (left.kind(), right.kind()) {
        (ValueKind::String(a), ValueKind::String(b)) => Some(a.cmp(b)),
        (ValueKind::Int(a), ValueKind::Int(b)) => Some(a.cmp(b)),
        _ => match (number(left), number(right)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(unsupported(op, left, right, span)),
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Value::bool(false));
    };
    Ok(Value::bool(match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::LessEqual => ordering.is_le(),
        BinaryOp::Greater => ordering.is_gt(),
        _ => ordering.is_ge(),
    }))
}

fn unary(op: UnaryOp, value: &Value, span: SourceSpan) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
        UnaryOp::Negate => match value.kind() {
            ValueKind::Int(n) => n
                .checked_neg()
                .map(Value::int)
                .ok_or_else(|| runtime_error("integer overflow", span)),
            ValueKind::Float(n) => Ok(Value::float(-n)),
            _ => Err(runtime_error(
                format!("unary `-` expects a number, found {}", value.type_name()),
                span,
            )),
        },
    }
}

fn position(index: &Value, len: usize, span: SourceSpan) -> Result<usize> {
    let Some(raw) = index.as_int() else {
        return Err(runtime_error(
            format!("index must be Int, found {}", index.type_name()),
            span,
        ));
    };
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(runtime_error(format!("index {raw} out of bounds"), span));
    }
    Ok(resolved as usize)
}

fn index_get(target: &Value, index: &Value, span: SourceSpan) -> Result<Value> {
    match target.kind() {
        ValueKind::Array(values) | ValueKind::Tuple(values) => {
            Ok(values[position(index, values.len(), span)?].clone())
        }
        ValueKind::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let at = position(index, chars.len(), span)?;
            Ok(Value::string(chars[at].to_string()))
        }
        ValueKind::Map(map) => {
            let key = map_key(index, span)?;
            map.get(&key)
                .cloned()
                .ok_or_else(|| runtime_error(format!("missing key `{key}`"), span))
        }
        _ => Err(runtime_error(
            format!("{} is not indexable", target.type_name()),
            span,
        )),
    }
}

fn index_set(target: &Value, index: &Value, value: Value, span: SourceSpan) -> Result<Value> {
    match target.kind() {
        ValueKind::Array(values) => {
            let at = position(index, values.len(), span)?;
            let mut updated = values.clone();
            updated[at] = value;
            Ok(Value::array(updated))
        }
        ValueKind::Map(map) => {
            let mut updated = map.clone();
            updated.insert(map_key(index, span)?, value);
            Ok(Value::map(updated))
        }
        _ => Err(runtime_error(
            format!("index assignment expects Array or Map, found {}", target.type_name()),
            span,
        )),
    }
}
