//! Evaluate script fragments against caller-owned scopes.
//!
//! A fragment is parsed, its trailing expression is rewritten to land in a
//! hidden capture slot, and the result runs against a [`LayeredScope`] that
//! merges a mutable and a read-only scope. Afterwards the mutable scope is
//! updated in place and the captured value is returned. Failures come back
//! as [`Diagnostic`]s carrying the failing line of the fragment and a
//! numbered source listing.

pub mod annotate;
pub mod ast;
pub mod capture;
pub mod compile;
pub mod diagnostics;
pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod repl;
pub mod runtime;
pub mod scope;
pub mod stdlib;
pub mod unit;
pub mod value;

pub use capture::CaptureSlot;
pub use diagnostics::{Diagnostic, DiagnosticKind, NevalError, Result, SourceSpan, TraceFrame};
pub use evaluator::{evaluate, EvalOptions, Evaluator};
pub use registry::{RegistryConfig, SourceRegistry};
pub use repl::Repl;
pub use scope::{Bindings, LayeredScope, Namespace, ScopeDiff};
pub use unit::{Fragment, SourceUnit};
pub use value::{Value, ValueKind};
