//! Offline compatibility check
//!
//! Compiles two schema trees and checks that every message of the old tree
//! is still compatible in the new one. No registry database is involved.
//!
//! Usage:
//!   proto-compat --old ./schemas-main --new ./schemas-branch

use std::path::{Path, PathBuf};

use clap::Parser;
use proto_registry::discover;
use proto_registry::{check_message_set, ProtoCompiler, SchemaMessage};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proto-compat")]
#[command(about = "Check two protobuf schema trees for backward compatibility")]
struct Cli {
    /// Root of the previous schema tree
    #[arg(long)]
    old: PathBuf,

    /// Root of the candidate schema tree
    #[arg(long)]
    new: PathBuf,

    /// Schema file extension
    #[arg(long, default_value = "proto")]
    extension: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn messages(root: &Path, extension: &str) -> anyhow::Result<Vec<SchemaMessage>> {
    let compiled = discover::compile_tree(&ProtoCompiler::new(), root, extension)?;
    Ok(compiled.into_iter().flat_map(|file| file.messages).collect())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let previous = messages(&cli.old, &cli.extension)?;
    let latest = messages(&cli.new, &cli.extension)?;

    println!(
        "Comparing {} messages in {} against {} in {}",
        previous.len(),
        cli.old.display(),
        latest.len(),
        cli.new.display()
    );

    check_message_set(&previous, &latest)?;
    println!("No breaking changes");
    Ok(())
}
