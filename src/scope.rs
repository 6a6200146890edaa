use std::{
    collections::{BTreeMap, HashMap},
    hash::BuildHasher,
};

use indexmap::{IndexMap, IndexSet};

use crate::{diagnostics::Diagnostic, value::Value};

/// A string-keyed mapping the evaluator can read from and write back to.
///
/// Implemented for the common map types and for [`Namespace`], so callers
/// can hand over whatever they already keep their variables in.
pub trait Bindings {
    fn get(&self, key: &str) -> Option<&Value>;
    fn insert(&mut self, key: String, value: Value);
    fn remove(&mut self, key: &str) -> Option<Value>;
    /// Keys in iteration order.
    fn keys(&self) -> Vec<String>;

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl Bindings for IndexMap<String, Value> {
    fn get(&self, key: &str) -> Option<&Value> {
        IndexMap::get(self, key)
    }

    fn insert(&mut self, key: String, value: Value) {
        IndexMap::insert(self, key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.shift_remove(key)
    }

    fn keys(&self) -> Vec<String> {
        IndexMap::keys(self).cloned().collect()
    }
}

impl<S: BuildHasher> Bindings for HashMap<String, Value, S> {
    fn get(&self, key: &str) -> Option<&Value> {
        HashMap::get(self, key)
    }

    fn insert(&mut self, key: String, value: Value) {
        HashMap::insert(self, key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        HashMap::remove(self, key)
    }

    fn keys(&self) -> Vec<String> {
        HashMap::keys(self).cloned().collect()
    }
}

impl Bindings for BTreeMap<String, Value> {
    fn get(&self, key: &str) -> Option<&Value> {
        BTreeMap::get(self, key)
    }

    fn insert(&mut self, key: String, value: Value) {
        BTreeMap::insert(self, key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        BTreeMap::remove(self, key)
    }

    fn keys(&self) -> Vec<String> {
        BTreeMap::keys(self).cloned().collect()
    }
}

/// An attribute bag, for callers that keep state on an object rather than
/// in a map.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    attributes: IndexMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Bindings for Namespace {
    fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    fn insert(&mut self, key: String, value: Value) {
        self.attributes.insert(key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.shift_remove(key)
    }

    fn keys(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }
}

/// Copies any [`Bindings`] into an owned map, preserving key order.
pub fn snapshot(bindings: &dyn Bindings) -> IndexMap<String, Value> {
    bindings
        .keys()
        .into_iter()
        .filter_map(|key| {
            let value = bindings.get(&key)?.clone();
            Some((key, value))
        })
        .collect()
}

/// Mutable and read-only bindings presented as one scope.
///
/// Writes always land in the mutable tier, which shadows the read-only
/// tier for the rest of the call. Deleting a key hides it from both tiers
/// until it is written again. The caller's mappings are never touched;
/// [`LayeredScope::diff`] reports what to write back.
pub struct LayeredScope<'r> {
    working: IndexMap<String, Value>,
    initial: IndexMap<String, Value>,
    readonly: Option<&'r dyn Bindings>,
    hidden: IndexSet<String>,
}

impl<'r> LayeredScope<'r> {
    pub fn new(mutable: &dyn Bindings, readonly: Option<&'r dyn Bindings>) -> Self {
        let initial = snapshot(mutable);
        Self {
            working: initial.clone(),
            initial,
            readonly,
            hidden: IndexSet::new(),
        }
    }

    /// The key is served by the mutable tier.
    pub fn is_mutable(&self, key: &str) -> bool {
        self.working.contains_key(key)
    }

    fn readonly_value(&self, key: &str) -> Option<&Value> {
        if self.hidden.contains(key) {
            return None;
        }
        self.readonly.and_then(|readonly| readonly.get(key))
    }

    /// Removes `key` from whichever tier serves it.
    pub fn delete(&mut self, key: &str) -> Result<Value, Diagnostic> {
        let removed = match self.working.shift_remove(key) {
            Some(value) => Some(value),
            None => self.readonly_value(key).cloned(),
        };
        match removed {
            Some(value) => {
                if self.readonly.is_some_and(|readonly| readonly.contains_key(key)) {
                    self.hidden.insert(key.to_string());
                }
                Ok(value)
            }
            None => Err(Diagnostic::undefined(key)),
        }
    }

    /// Drops an entry the evaluator put there itself, without treating it
    /// as a deletion by the fragment.
    pub fn remove_injected(&mut self, key: &str) -> Option<Value> {
        self.working.shift_remove(key)
    }

    /// Changes to the mutable tier since the scope was built.
    pub fn diff(&self) -> ScopeDiff {
        let changed = self
            .working
            .iter()
            .filter(|(key, value)| {
                self.initial
                    .get(key.as_str())
                    .map_or(true, |before| !before.identical(value))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let removed = self
            .initial
            .keys()
            .filter(|key| !self.working.contains_key(key.as_str()))
            .cloned()
            .collect();
        ScopeDiff { changed, removed }
    }
}

impl Bindings for LayeredScope<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.working.get(key).or_else(|| self.readonly_value(key))
    }

    fn insert(&mut self, key: String, value: Value) {
        self.hidden.shift_remove(&key);
        self.working.insert(key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.delete(key).ok()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: IndexSet<String> = self.working.keys().cloned().collect();
        if let Some(readonly) = self.readonly {
            keys.extend(
                readonly
                    .keys()
                    .into_iter()
                    .filter(|key| !self.hidden.contains(key)),
            );
        }
        keys.into_iter().collect()
    }
}

/// Mutations of the mutable tier, ready to be written back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeDiff {
    pub changed: Vec<(String, Value)>,
    pub removed: Vec<String>,
}

impl ScopeDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn apply(&self, target: &mut dyn Bindings) {
        for key in &self.removed {
            target.remove(key);
        }
        for (key, value) in &self.changed {
            target.insert(key.clone(), value.clone());
        }
    }
}
