//! vpuc CLI - compile network descriptions into accelerator blobs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vpuc_cli::build_config;
use vpuc_cli::inspect::describe_blob;
use vpuc_compiler::Blob;

#[derive(Parser)]
#[command(name = "vpuc")]
#[command(about = "Network compiler for the vpuc accelerator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON network description into a blob
    Compile {
        /// Path to the network description
        #[arg(value_name = "NETWORK")]
        network: PathBuf,

        /// Output blob path (defaults to NETWORK with a .blob extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Compilation option (format: KEY=VALUE, can be repeated)
        #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Keep every layer in software
        #[arg(long)]
        no_hw: bool,
    },
    /// Print the header and stage table of a compiled blob
    Inspect {
        /// Path to the blob file
        #[arg(value_name = "BLOB")]
        blob: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            network,
            output,
            options,
            no_hw,
        } => {
            cmd_compile(network, output, &options, no_hw)?;
        }
        Commands::Inspect { blob } => {
            cmd_inspect(blob)?;
        }
    }

    Ok(())
}

fn cmd_compile(
    network_path: PathBuf,
    output_path: Option<PathBuf>,
    options: &[String],
    no_hw: bool,
) -> Result<()> {
    let config = build_config(options, no_hw)?;
    tracing::debug!(?config, "compilation options");
    let network = vpuc_network::load_network(&network_path)
        .with_context(|| format!("Failed to load network from {}", network_path.display()))?;

    let blob = vpuc_compiler::compile(&network, &config)
        .with_context(|| format!("Failed to compile network '{}'", network.name))?;

    let output_path = output_path.unwrap_or_else(|| network_path.with_extension("blob"));
    std::fs::write(&output_path, blob.as_bytes())
        .with_context(|| format!("Failed to write blob to {}", output_path.display()))?;
    eprintln!(
        "Wrote {} stages ({} bytes) to {}",
        blob.stage_count(),
        blob.len(),
        output_path.display()
    );
    Ok(())
}

fn cmd_inspect(blob_path: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&blob_path)
        .with_context(|| format!("Failed to read {}", blob_path.display()))?;
    let blob = Blob::from_bytes(bytes)
        .with_context(|| format!("{} is not a valid blob", blob_path.display()))?;
    print!("{}", describe_blob(&blob)?);
    Ok(())
}
