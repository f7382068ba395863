//! cite-gateway binary - serves citation requests over stdin/stdout

use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarto_cite_gateway::engine::process::ProcessEngineFactory;
use quarto_cite_gateway::{GatewayConfig, JsonLibrary, Session, bridge};

#[derive(Parser, Debug)]
#[command(name = "cite-gateway")]
#[command(about = "Serve citation formatting requests from a reference library")]
struct Args {
    /// Library directory (items.json, styles/, locales/)
    #[arg(short, long)]
    library: PathBuf,

    /// Gateway config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Citation engine program; started once per instantiated style
    #[arg(short, long)]
    engine: PathBuf,

    /// Arguments passed to the engine program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    engine_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    // stdout carries responses, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_cite_gateway=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    let library = JsonLibrary::open(&args.library)
        .with_context(|| format!("Failed to open library {}", args.library.display()))?;
    let factory = ProcessEngineFactory::new(&args.engine, args.engine_args.clone());

    info!(
        library = %args.library.display(),
        engine = %args.engine.display(),
        "Starting citation gateway"
    );

    let mut session = Session::new(library, factory, config);
    let stdin = io::stdin();
    let handled = bridge::serve(&mut session, stdin.lock(), BufWriter::new(io::stdout()))?;

    info!(handled, "Citation gateway finished");
    Ok(())
}
