//! CLI entry point for ifcgen.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

/// ifcgen — generate ABI marshalling stubs from versioned C headers.
#[derive(Parser, Debug)]
#[command(name = "ifcgen", version, about)]
struct Cli {
    /// Path to the ifcgen.toml configuration file.
    #[arg(default_value = "ifcgen.toml")]
    config: PathBuf,

    /// Re-root the target files named in the config (overrides config).
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ifcgen=info")),
        )
        .init();

    let cli = Cli::parse();
    let report = ifcgen::run(&cli.config, cli.out_dir.as_deref())?;
    if report.placeholders > 0 {
        eprintln!(
            "{} signature(s) need hand-written marshalling, see NEED_HAND_EDIT markers",
            report.placeholders
        );
    }
    Ok(())
}
