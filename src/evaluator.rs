use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    annotate::annotate,
    capture::{capture_last_expression, CaptureSlot},
    compile::compile,
    diagnostics::{Diagnostic, NevalError, Result},
    registry::SourceRegistry,
    runtime::Interpreter,
    scope::{Bindings, LayeredScope},
    stdlib::{builtins, BUILTINS_KEY},
    unit::{Fragment, SourceUnit},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Keep the fragment text in the source registry after a failed
    /// evaluation, so the error can be rendered with source later.
    pub persistent_diagnostics: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            persistent_diagnostics: true,
        }
    }
}

/// Evaluates fragments against caller-owned scopes.
#[derive(Debug, Clone)]
pub struct Evaluator {
    options: EvalOptions,
    registry: Arc<SourceRegistry>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// An evaluator backed by the process-wide registry.
    pub fn new() -> Self {
        Self {
            options: EvalOptions::default(),
            registry: SourceRegistry::global(),
        }
    }

    pub fn with_options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_registry(mut self, registry: Arc<SourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> EvalOptions {
        self.options
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Evaluates `fragment` and returns the value of its final expression.
    ///
    /// `scope` is updated in place with every binding the fragment added,
    /// changed or deleted, even when execution fails part way. `readonly`
    /// is visible to the fragment but never written. Parse and compile
    /// errors are returned before either scope is looked at.
    pub fn evaluate(
        &self,
        fragment: impl Into<Fragment>,
        scope: Option<&mut dyn Bindings>,
        readonly: Option<&dyn Bindings>,
    ) -> Result<Option<Value>> {
        let unit = SourceUnit::new(fragment);
        debug!(unit = unit.name(), "evaluating fragment");

        let mut module = unit.parse().map_err(|diag| self.fail(diag, &unit))?;
        let slot = CaptureSlot::new();
        let captured = capture_last_expression(&mut module, &slot);
        debug!(unit = unit.name(), captured, "parsed fragment");

        let compiled = compile(module, unit.name()).map_err(|diag| self.fail(diag, &unit))?;

        let mut empty: IndexMap<String, Value> = IndexMap::new();
        let caller: &mut dyn Bindings = match scope {
            Some(scope) => scope,
            None => &mut empty,
        };
        let mut layered = LayeredScope::new(&*caller, readonly);
        let inject_builtins = !layered.contains_key(BUILTINS_KEY);
        if inject_builtins {
            layered.insert(BUILTINS_KEY.to_string(), builtins());
        }

        let outcome = Interpreter::new(&mut layered).execute(&compiled);
        debug!(unit = unit.name(), failed = outcome.is_err(), "executed fragment");

        let value = if captured {
            layered.remove_injected(slot.name())
        } else {
            None
        };
        if inject_builtins {
            layered.remove_injected(BUILTINS_KEY);
        }
        let diff = layered.diff();
        debug!(
            unit = unit.name(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "writing back scope"
        );
        diff.apply(caller);
        if !self.options.persistent_diagnostics {
            self.registry.release(unit.name());
        }

        match outcome {
            Ok(()) => Ok(value.filter(|value| !value.is_unit())),
            Err(err) => Err(err.map_diagnostic(|diag| self.annotate(diag, &unit))),
        }
    }

    fn fail(&self, diag: Diagnostic, unit: &SourceUnit) -> NevalError {
        NevalError::from(self.annotate(diag, unit))
    }

    fn annotate(&self, diag: Diagnostic, unit: &SourceUnit) -> Diagnostic {
        let diag = annotate(diag, unit);
        if self.options.persistent_diagnostics {
            if let Some(text) = unit.text() {
                self.registry.register(unit.name(), text);
                let pruned = self.registry.prune();
                debug!(unit = unit.name(), pruned, "registered failing fragment");
            }
        }
        diag
    }
}

/// Evaluates `fragment` with default options and the process-wide registry.
///
/// ```
/// use indexmap::IndexMap;
/// use neval::{evaluate, Value};
///
/// let mut scope: IndexMap<String, Value> = IndexMap::new();
/// let value = evaluate("a = 20\na + 1", Some(&mut scope), None).unwrap();
/// assert_eq!(value.and_then(|v| v.as_int()), Some(21));
/// assert_eq!(scope["a"], Value::int(20));
/// ```
pub fn evaluate(
    fragment: impl Into<Fragment>,
    scope: Option<&mut dyn Bindings>,
    readonly: Option<&dyn Bindings>,
) -> Result<Option<Value>> {
    Evaluator::new().evaluate(fragment, scope, readonly)
}
