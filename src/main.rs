use clap::Parser;
use docsql::{Compiler, CompilerConfig, InMemoryRegistry, Params};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docsql")]
#[command(about = "Compile SQL into document-store commands", long_about = None)]
struct Args {
    /// Config file with table mappings (defaults to $DOCSQL_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Value for the next `?` marker, as JSON (repeatable)
    #[arg(short = 'a', long = "arg")]
    args: Vec<String>,

    /// Named parameter as NAME=JSON (repeatable)
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,

    /// SQL statement
    sql: String,
}

/// Parses a JSON argument, falling back to a plain string.
fn json_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_params(args: &Args) -> anyhow::Result<Params> {
    let mut params = Params::new();
    for raw in &args.args {
        params = params.push(json_arg(raw));
    }
    for raw in &args.params {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--param expects NAME=JSON, got {}", raw))?;
        params = params.bind(name.trim_start_matches(':'), json_arg(value));
    }
    Ok(params)
}

fn load_config(args: &Args) -> anyhow::Result<CompilerConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os("DOCSQL_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => Ok(CompilerConfig::load(&path)?),
        None => Ok(CompilerConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docsql=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args)?;
    let registry = InMemoryRegistry::from_config(&config);
    tracing::info!("Loaded {} table mapping(s)", registry.len());

    let params = build_params(&args)?;
    let compiler = Compiler::new(registry, config);

    match compiler.compile(&args.sql, &params) {
        Ok(command) => {
            let output = if args.pretty {
                serde_json::to_string_pretty(&command)?
            } else {
                serde_json::to_string(&command)?
            };
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            tracing::error!("{}: {}", e.kind(), e);
            eprintln!("{}: {}", e.kind(), e);
            std::process::exit(1);
        }
    }
}
