use std::{fs, path::PathBuf, process::ExitCode, sync::Once};

use clap::{Parser, Subcommand};
use indexmap::IndexMap;

use neval::{
    registry::DEFAULT_CAPACITY, Bindings, EvalOptions, Evaluator, NevalError, RegistryConfig, Repl,
    SourceRegistry, Value,
};

static TRACING_INIT: Once = Once::new();

#[derive(Parser)]
#[command(author, version, about = "Evaluate script fragments with line-accurate diagnostics")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Do not keep failing fragments in the source registry
    #[arg(long, global = true)]
    no_persistent_diagnostics: bool,

    /// Also write registered fragments to this directory
    #[arg(long, global = true, value_name = "DIR")]
    spill_dir: Option<PathBuf>,

    /// Most fragments the source registry retains
    #[arg(long, global = true, default_value_t = DEFAULT_CAPACITY)]
    registry_capacity: usize,

    /// Read-only binding, evaluated from a fragment (repeatable)
    #[arg(long = "define", global = true, value_name = "NAME=FRAGMENT")]
    defines: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file as one fragment
    Run { script: PathBuf },
    /// Evaluate a fragment and print its value
    Eval { source: String },
    /// Start an interactive session
    Repl,
    /// Print the source registered under a unit name
    Source { name: String },
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

fn run(args: Args) -> Result<(), NevalError> {
    let registry = SourceRegistry::global();
    registry.configure(RegistryConfig {
        capacity: args.registry_capacity,
        spill_dir: args.spill_dir.clone(),
    });
    let evaluator = Evaluator::new().with_options(EvalOptions {
        persistent_diagnostics: !args.no_persistent_diagnostics,
    });
    let readonly = definitions(&evaluator, &args.defines)?;

    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => {
            let source = fs::read_to_string(&script)?;
            let mut scope: IndexMap<String, Value> = IndexMap::new();
            evaluator.evaluate(source, Some(&mut scope), Some(&readonly as &dyn Bindings))?;
            Ok(())
        }
        Command::Eval { source } => {
            let value = evaluator.evaluate(source, None, Some(&readonly as &dyn Bindings))?;
            if let Some(value) = value {
                println!("{value}");
            }
            Ok(())
        }
        Command::Repl => Repl::new(evaluator).with_readonly(readonly).run(),
        Command::Source { name } => match registry.resolve(&name) {
            Some(text) => {
                print!("{text}");
                Ok(())
            }
            None => Err(NevalError::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no source registered as `{name}`"),
            ))),
        },
    }
}

/// Builds the read-only scope from `NAME=FRAGMENT` definitions.
fn definitions(evaluator: &Evaluator, defines: &[String]) -> Result<IndexMap<String, Value>, NevalError> {
    let mut readonly = IndexMap::new();
    for define in defines {
        let Some((name, fragment)) = define.split_once('=') else {
            return Err(NevalError::from(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("`--define {define}` is not of the form NAME=FRAGMENT"),
            )));
        };
        let value = evaluator.evaluate(fragment, None, None)?.unwrap_or_else(Value::unit);
        readonly.insert(name.trim().to_string(), value);
    }
    Ok(readonly)
}
