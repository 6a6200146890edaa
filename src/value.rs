use std::{fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::Stmt,
    diagnostics::{Diagnostic, NevalError, SourceSpan},
    environment::EnvironmentRef,
};

/// A runtime value. Cloning is cheap; the payload is shared.
#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn unit() -> Self {
        Self::new(ValueKind::Unit)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(values))
    }

    pub fn tuple(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Tuple(values))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Map(entries))
    }

    pub fn module(name: Vec<String>, exports: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Module(ModuleValue { name, exports }))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn is_unit(&self) -> bool {
        matches!(&*self.0, ValueKind::Unit)
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::Unit => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Float(f) => *f != 0.0,
            ValueKind::String(s) => !s.is_empty(),
            ValueKind::Array(values) | ValueKind::Tuple(values) => !values.is_empty(),
            ValueKind::Map(map) => !map.is_empty(),
            ValueKind::Module(module) => !module.exports.is_empty(),
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Unit => "Unit",
            ValueKind::Bool(_) => "Bool",
            ValueKind::Int(_) => "Int",
            ValueKind::Float(_) => "Float",
            ValueKind::String(_) => "String",
            ValueKind::Array(_) => "Array",
            ValueKind::Tuple(_) => "Tuple",
            ValueKind::Map(_) => "Map",
            ValueKind::Module(_) => "Module",
            ValueKind::Function(_) | ValueKind::NativeFunction(_) => "Function",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Float(n) => Some(*n),
            ValueKind::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &*self.0 {
            ValueKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match &*self.0 {
            ValueKind::Array(values) | ValueKind::Tuple(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match &*self.0 {
            ValueKind::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn expect_bool(&self, span: SourceSpan) -> Result<bool, NevalError> {
        self.as_bool().ok_or_else(|| {
            NevalError::from(
                Diagnostic::runtime(format!("expected Bool, found {}", self.type_name()))
                    .with_span(span),
            )
        })
    }

    /// Identity or structural equality.
    ///
    /// Functions only compare equal to themselves.
    pub fn same(&self, other: &Value) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (ValueKind::Unit, ValueKind::Unit) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Float(a), ValueKind::Float(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Float(b)) | (ValueKind::Float(b), ValueKind::Int(a)) => {
                (*a as f64) == *b
            }
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Array(a), ValueKind::Array(b)) | (ValueKind::Tuple(a), ValueKind::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|other| value.same(other)))
            }
            (ValueKind::Module(a), ValueKind::Module(b)) => {
                a.name == b.name
                    && a.exports.len() == b.exports.len()
                    && a.exports
                        .iter()
                        .all(|(key, value)| b.exports.get(key).is_some_and(|other| value.same(other)))
            }
            (ValueKind::NativeFunction(a), ValueKind::NativeFunction(b)) => {
                a.name == b.name && a.callback as usize == b.callback as usize
            }
            _ => false,
        }
    }

    /// Like [`Value::same`], but numbers must also agree on their variant,
    /// so `1` and `1.0` differ.
    pub fn identical(&self, other: &Value) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (ValueKind::Int(_), ValueKind::Float(_)) | (ValueKind::Float(_), ValueKind::Int(_)) => false,
            (ValueKind::Array(a), ValueKind::Array(b)) | (ValueKind::Tuple(a), ValueKind::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.identical(y))
            }
            (ValueKind::Map(a), ValueKind::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|other| value.identical(other)))
            }
            (ValueKind::Module(a), ValueKind::Module(b)) => {
                a.name == b.name
                    && a.exports.len() == b.exports.len()
                    && a.exports
                        .iter()
                        .all(|(key, value)| b.exports.get(key).is_some_and(|other| value.identical(other)))
            }
            _ => self.same(other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::array(values)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Unit => write!(f, "Unit"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n:?}"),
            ValueKind::String(s) => write!(f, "{s:?}"),
            ValueKind::Array(values) => f.debug_list().entries(values.iter()).finish(),
            ValueKind::Tuple(values) => {
                let mut tuple = f.debug_tuple("");
                for value in values {
                    tuple.field(value);
                }
                tuple.finish()
            }
            ValueKind::Map(map) => f.debug_map().entries(map.iter()).finish(),
            ValueKind::Module(module) => f
                .debug_struct("Module")
                .field("name", &module.name.join("."))
                .field("exports", &module.exports.keys().collect::<Vec<_>>())
                .finish(),
            ValueKind::Function(fun) => write!(f, "<fn {}>", fun.display_name()),
            ValueKind::NativeFunction(fun) => write!(f, "<native fn {}>", fun.name),
        }
    }
}

fn write_sequence(f: &mut fmt::Formatter<'_>, open: &str, values: &[Value], close: &str) -> fmt::Result {
    write!(f, "{open}")?;
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{value}")?;
    }
    write!(f, "{close}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Unit => write!(f, "none"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n}"),
            ValueKind::String(s) => write!(f, "{s}"),
            ValueKind::Array(values) => write_sequence(f, "[", values, "]"),
            ValueKind::Tuple(values) => write_sequence(f, "(", values, ")"),
            ValueKind::Map(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            ValueKind::Module(module) => write!(f, "<module {}>", module.name.join(".")),
            ValueKind::Function(fun) => write!(f, "<fn {}>", fun.display_name()),
            ValueKind::NativeFunction(fun) => write!(f, "<native fn {}>", fun.name),
        }
    }
}

#[derive(Clone)]
pub enum ValueKind {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Map(IndexMap<String, Value>),
    Module(ModuleValue),
    Function(UserFunction),
    NativeFunction(NativeFunction),
}

#[derive(Clone)]
pub struct ModuleValue {
    pub name: Vec<String>,
    pub exports: IndexMap<String, Value>,
}

#[derive(Clone)]
pub struct UserFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<[Stmt]>,
    pub closure: Option<EnvironmentRef>,
    pub unit: Rc<str>,
}

impl UserFunction {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<lambda>")
    }
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    /// `usize::MAX` accepts any number of arguments.
    pub arity: usize,
    pub callback: fn(&[Value]) -> Result<Value, NevalError>,
}

impl NativeFunction {
    pub fn call(&self, args: &[Value]) -> Result<Value, NevalError> {
        if self.arity != usize::MAX && args.len() != self.arity {
            return Err(NevalError::from(Diagnostic::runtime(format!(
                "function `{}` expected {} arguments but received {}",
                self.name,
                self.arity,
                args.len()
            ))));
        }
        (self.callback)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_compares_structure() {
        let a = Value::array(vec![Value::int(1), Value::string("x")]);
        let b = Value::array(vec![Value::int(1), Value::string("x")]);
        assert!(a.same(&b));
        assert!(!a.same(&Value::array(vec![Value::int(1)])));
        assert!(Value::int(2).same(&Value::float(2.0)));
    }

    #[test]
    fn identical_keeps_numeric_variants_apart() {
        assert!(!Value::int(2).identical(&Value::float(2.0)));
        let ints = Value::map(IndexMap::from([("k".to_string(), Value::array(vec![Value::int(1)]))]));
        let floats = Value::map(IndexMap::from([("k".to_string(), Value::array(vec![Value::float(1.0)]))]));
        assert!(ints.same(&floats));
        assert!(!ints.identical(&floats));
        assert!(ints.identical(&ints.clone()));
    }

    #[test]
    fn unit_displays_as_none() {
        assert_eq!(Value::unit().to_string(), "none");
        assert_eq!(
            Value::tuple(vec![Value::int(1), Value::bool(true)]).to_string(),
            "(1, true)"
        );
    }
}
