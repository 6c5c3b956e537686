use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use warden::cli::{run, Cli};

fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout is reserved for decision JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .init();

    let cli = Cli::parse();
    let code = run(cli)?;
    std::process::exit(code);
}
