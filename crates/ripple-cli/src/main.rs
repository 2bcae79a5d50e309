use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ripple::arena::SlotId;
use ripple::expression::parse;
use ripple::graph::Graph;
use ripple::record::RecordScope;
use ripple::value::Value;

#[derive(Parser)]
#[command(name = "ripple")]
#[command(about = "Evaluate reactive expressions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an expression against a scope and print its value
    Eval {
        /// The expression, e.g. `$a + $b`
        code: String,
        /// Scope fields as a JSON object
        #[arg(long, default_value = "{}")]
        scope: String,
        /// Field updates applied one by one, printing the value after each
        #[arg(long = "set", value_name = "KEY=VALUE")]
        sets: Vec<String>,
    },
    /// Check if an expression parses
    Check {
        /// The expression
        code: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { code, scope, sets } => eval(&code, &scope, &sets),
        Commands::Check { code } => {
            match parse(&code) {
                Ok(expr) => println!("ok: {expr:?}"),
                Err(error) => {
                    eprint!("{error}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}

fn eval(code: &str, scope: &str, sets: &[String]) -> anyhow::Result<()> {
    let expr = match parse(code) {
        Ok(expr) => expr,
        Err(error) => bail!("parse failed\n{error}"),
    };
    let json: serde_json::Value = serde_json::from_str(scope).context("--scope is not valid JSON")?;
    let Value::Record(record) = Value::from_json(&json) else {
        bail!("--scope must be a JSON object");
    };

    let mut graph = Graph::new();
    let scope = RecordScope::new(&mut graph, record);
    let root = scope.compile(&mut graph, &expr)?;
    let version = scope.commit(&mut graph);
    graph.recohere(root, version);
    print_value(&graph, root);

    for set in sets {
        let (key, value) = parse_set(set)?;
        log::debug!("set {key} = {value}");
        if value.is_absent() {
            scope.remove(&mut graph, key);
        } else {
            scope.set(&mut graph, key, value);
        }
        let version = scope.commit(&mut graph);
        graph.recohere(root, version);
        print_value(&graph, root);
    }
    Ok(())
}

/// `key=json`, falling back to plain text when the value is not JSON.
/// An empty value removes the field.
fn parse_set(set: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, raw)) = set.split_once('=') else {
        bail!("expected KEY=VALUE, got `{set}`");
    };
    let value = if raw.is_empty() {
        Value::Absent
    } else {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(json) => Value::from_json(&json),
            Err(_) => Value::text(raw),
        }
    };
    Ok((key.trim().to_owned(), value))
}

fn print_value(graph: &Graph, root: SlotId) {
    let value = graph.value(root).cloned().unwrap_or_default();
    println!("{}", value.to_json());
}
