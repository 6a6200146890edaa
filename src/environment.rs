use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::value::Value;

pub type EnvironmentRef = Rc<RefCell<Environment>>;

#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: Option<EnvironmentRef>) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            parent,
            bindings: IndexMap::new(),
        }))
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn assign(env: &EnvironmentRef, name: &str, value: Value) -> bool {
        if let Some(slot) = env.borrow_mut().bindings.get_mut(name) {
            *slot = value;
            return true;
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(parent) => Environment::assign(&parent, name, value),
            None => false,
        }
    }

    pub fn lookup(env: &EnvironmentRef, name: &str) -> Option<Value> {
        if let Some(value) = env.borrow().bindings.get(name) {
            return Some(value.clone());
        }
        let parent = env.borrow().parent.clone();
        parent.and_then(|parent| Environment::lookup(&parent, name))
    }

    pub fn remove(env: &EnvironmentRef, name: &str) -> bool {
        if env.borrow_mut().bindings.shift_remove(name).is_some() {
            return true;
        }
        let parent = env.borrow().parent.clone();
        match parent {
            Some(parent) => Environment::remove(&parent, name),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_walks_the_parent_chain() {
        let outer = Environment::new();
        outer.borrow_mut().define("x", Value::int(1));
        let inner = Environment::with_parent(Some(outer.clone()));
        assert!(Environment::assign(&inner, "x", Value::int(2)));
        assert!(!Environment::assign(&inner, "y", Value::int(3)));
        assert_eq!(Environment::lookup(&outer, "x").and_then(|v| v.as_int()), Some(2));
    }
}
