use indexmap::IndexMap;
use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    diagnostics::{NevalError, Result},
    evaluator::Evaluator,
    scope::Bindings,
    value::Value,
};

/// Line-by-line session over one caller-owned scope.
///
/// Every line is a separate evaluation; bindings persist because the
/// scope is written back after each one.
pub struct Repl {
    evaluator: Evaluator,
    scope: IndexMap<String, Value>,
    readonly: IndexMap<String, Value>,
}

impl Repl {
    pub fn new(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            scope: IndexMap::new(),
            readonly: IndexMap::new(),
        }
    }

    pub fn with_readonly(mut self, readonly: IndexMap<String, Value>) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn scope(&self) -> &IndexMap<String, Value> {
        &self.scope
    }

    /// Handles one line of input. Returns `false` once the session should end.
    pub fn handle_line(&mut self, line: &str) -> bool {
        let trimmed = line.trim();
        match trimmed {
            "" => {}
            ":quit" | ":exit" => return false,
            ":vars" => {
                for (name, value) in &self.scope {
                    println!("{name} = {value:?}");
                }
            }
            _ => {
                if let Some(name) = trimmed.strip_prefix(":source") {
                    self.print_source(name.trim());
                } else {
                    self.eval(trimmed);
                }
            }
        }
        true
    }

    fn print_source(&self, name: &str) {
        match self.evaluator.registry().resolve(name) {
            Some(text) => println!("{text}"),
            None => eprintln!("no source registered as `{name}`"),
        }
    }

    fn eval(&mut self, source: &str) {
        let readonly: &dyn Bindings = &self.readonly;
        match self.evaluator.evaluate(source, Some(&mut self.scope), Some(readonly)) {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => {}
            Err(err) => eprintln!("{err}"),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        loop {
            match editor.readline(">> ") {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        editor.add_history_entry(line.as_str()).ok();
                    }
                    if !self.handle_line(&line) {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }
}

fn readline_error(err: ReadlineError) -> NevalError {
    NevalError::from(std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use std::sync::Arc;

    #[test]
    fn bindings_survive_between_lines() {
        let evaluator = Evaluator::new().with_registry(Arc::new(SourceRegistry::default()));
        let mut repl = Repl::new(evaluator);
        assert!(repl.handle_line("x = 2"));
        assert!(repl.handle_line("x = x * 21"));
        assert_eq!(repl.scope()["x"].as_int(), Some(42));
        assert!(!repl.handle_line(":quit"));
    }
}
