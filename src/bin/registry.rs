//! Schema Registry CLI
//!
//! Commands for publishing and inspecting a local registry database.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use proto_registry::discover;
use proto_registry::{
    PageRequest, ProtoCompiler, RegistryConfig, SchemaRegistry, Store,
    ValidatePackageVersionRequest,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proto-registry")]
#[command(about = "Versioned protobuf schema registry with compatibility checks")]
struct Cli {
    /// Configuration file layered over the default locations
    #[arg(short, long)]
    config: Option<String>,

    /// Database file (overrides configuration)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the registry database
    Init {
        /// Also write the effective configuration to this file
        #[arg(long)]
        write_config: Option<PathBuf>,
    },

    /// Publish every package found under a directory
    Upload {
        /// Root of the schema tree
        path: PathBuf,
    },

    /// Check a schema tree against the registry without publishing
    Validate {
        /// Root of the schema tree
        path: PathBuf,
    },

    /// Write the files of a package version to a directory
    Download {
        package: String,
        version: i64,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// List packages, or messages with --messages
    List {
        /// Substring filter on names
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long)]
        messages: bool,
    },

    /// Show the files of a package version
    Show {
        package: String,
        version: i64,
    },

    /// List the versions of a package, or of one of its messages
    Versions {
        package: String,
        /// Message name within the package
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Delete a package version
    DeleteVersion {
        package: String,
        version: i64,
    },

    /// Compare two versions of a package
    Diff {
        package: String,
        /// Old version
        old: i64,
        /// New version
        new: i64,
    },

    /// Verify checksums of a package version
    Verify {
        package: String,
        version: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match RegistryConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    if let Err(e) = run(cli, config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn open_registry(cli_database: Option<PathBuf>, config: &RegistryConfig) -> anyhow::Result<SchemaRegistry> {
    let mut database = config.database.clone();
    if cli_database.is_some() {
        database.path = cli_database;
    }
    let store = Store::from_config(&database)
        .with_context(|| format!("opening registry at {}", database.resolved_path().display()))?;
    Ok(SchemaRegistry::open(store))
}

fn run(cli: Cli, config: RegistryConfig) -> anyhow::Result<()> {
    let registry = open_registry(cli.database, &config)?;
    let extension = config.discovery.extension.as_str();

    match cli.command {
        Commands::Init { write_config } => {
            println!("Registry initialized at {}", registry.store().path().display());
            if let Some(path) = write_config {
                let path = path.to_string_lossy();
                config.save(&path)?;
                println!("Configuration written to {}", path);
            }
        }

        Commands::Upload { path } => {
            let request = discover::load_request(&ProtoCompiler::new(), &path, extension)?;
            let response = registry.publish(&request)?;
            for (package, version) in request.packages.iter().zip(&response.package_versions) {
                println!(
                    "Published {} version {} ({} files)",
                    package.package_name,
                    version.version,
                    package.files.len()
                );
            }
        }

        Commands::Validate { path } => {
            let request = discover::load_request(&ProtoCompiler::new(), &path, extension)?;
            let response = registry.validate(&ValidatePackageVersionRequest::from(request));
            if !response.is_valid {
                bail!("schemas are not compatible: {}", response.error);
            }
            println!("Schemas are compatible with the registry");
        }

        Commands::Download {
            package,
            version,
            output,
        } => {
            let response = registry.get_package_version(&package, version)?;
            for file in &response.files {
                let target = output_path(&output, &file.file_name)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, &file.proto_contents)
                    .with_context(|| format!("writing {}", target.display()))?;
                println!("  {}", target.display());
            }
            println!(
                "Downloaded {} version {} ({} files)",
                package,
                version,
                response.files.len()
            );
        }

        Commands::List {
            search,
            limit,
            offset,
            messages,
        } => {
            let mut page = PageRequest::new(limit, offset);
            page.search = search;

            if messages {
                let result = registry.list_messages(&page)?;
                for summary in &result.items {
                    println!("  {}.{}", summary.package_name, summary.message.name);
                }
                println!("{} of {} messages", result.items.len(), result.total);
            } else {
                let result = registry.list_packages(&page)?;
                for summary in &result.items {
                    println!(
                        "  {} ({} messages, updated {})",
                        summary.package.name,
                        summary.message_count,
                        summary.package.updated_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("{} of {} packages", result.items.len(), result.total);
            }
        }

        Commands::Show { package, version } => {
            let response = registry.get_package_version(&package, version)?;
            println!("{} version {} (id {})", package, version, response.package_version.id);
            for file in &response.files {
                println!("  {}  {}", &file.checksum[..file.checksum.len().min(12)], file.file_name);
            }
        }

        Commands::Versions { package, message } => match message {
            Some(message) => {
                for version in registry.list_message_versions(&package, &message)? {
                    println!(
                        "  {} {} (package version id {})",
                        version.version,
                        version.created_at.format("%Y-%m-%d %H:%M"),
                        version.package_version_id
                    );
                }
            }
            None => {
                let latest = registry.find_package(&package)?.latest_version_id;
                for version in registry.list_package_versions(&package)? {
                    let marker = if Some(version.id) == latest { " (latest)" } else { "" };
                    println!(
                        "  {} {}{}",
                        version.version,
                        version.created_at.format("%Y-%m-%d %H:%M"),
                        marker
                    );
                }
            }
        },

        Commands::DeleteVersion { package, version } => {
            registry.delete_package_version_by_number(&package, version)?;
            println!("Deleted {} version {}", package, version);
        }

        Commands::Diff { package, old, new } => {
            for diff in registry.diff_package_versions(&package, old, new)? {
                println!(
                    "{:?} {} (+{} -{})",
                    diff.status, diff.file_name, diff.insertions, diff.deletions
                );
                if !diff.patch.is_empty() {
                    println!("{}", diff.patch);
                }
            }
        }

        Commands::Verify { package, version } => {
            let mismatches = registry.verify_package_version(&package, version)?;
            if !mismatches.is_empty() {
                for mismatch in &mismatches {
                    println!(
                        "  {}: expected {}, found {}",
                        mismatch.file_name, mismatch.expected, mismatch.actual
                    );
                }
                bail!("{} files failed verification", mismatches.len());
            }
            println!("All files of {} version {} verified", package, version);
        }
    }

    Ok(())
}

/// Stored file names are relative paths; refuse anything that escapes `root`
fn output_path(root: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    let relative = Path::new(file_name);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("refusing to write file outside output directory: {}", file_name);
    }
    Ok(root.join(relative))
}
