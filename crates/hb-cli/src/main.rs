//! Heritage Bundler CLI
//!
//! Development harness: load a settings file, run one scan, then print the
//! bundle tree or write the flat record list.

mod logging;

use clap::{Parser, Subcommand};
use hb_core::{
    write_csv, write_json, FileRole, RecordTree, ScanConfiguration, ScanOutcome, ScanSettings,
    Scanner,
};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(name = "hb-cli")]
#[command(about = "Heritage data bundle scanner", long_about = None)]
#[command(version)]
struct Cli {
    /// Log per-bundle decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory and print the bundle tree
    Scan {
        /// Input root to scan
        #[arg(short, long)]
        root: PathBuf,

        /// Settings file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory archives are written to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full outcome as JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// Show the validation report of one bundle
    Report {
        /// Input root to scan
        #[arg(short, long)]
        root: PathBuf,

        /// Settings file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory archives are written to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bundle key
        #[arg(short, long)]
        bundle: String,
    },

    /// Scan a directory and write the flat record rows
    Records {
        /// Input root to scan
        #[arg(short, long)]
        root: PathBuf,

        /// Settings file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory archives are written to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (csv or json)
        #[arg(long, default_value = "csv")]
        format: String,

        /// Output file path
        #[arg(long)]
        out: PathBuf,
    },

    /// Write a settings file with every option at its default
    InitConfig {
        /// Output path for the settings file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> hb_core::Result<()> {
    match command {
        Commands::Scan {
            root,
            config,
            output,
            json,
        } => cmd_scan(&root, config.as_deref(), output, json),
        Commands::Report {
            root,
            config,
            output,
            bundle,
        } => cmd_report(&root, config.as_deref(), output, &bundle),
        Commands::Records {
            root,
            config,
            output,
            format,
            out,
        } => cmd_records(&root, config.as_deref(), output, &format, &out),
        Commands::InitConfig { output } => cmd_init_config(&output),
    }
}

fn load_settings(path: Option<&Path>) -> hb_core::Result<ScanSettings> {
    match path {
        Some(path) => {
            debug!("Loading settings from {}", path.display());
            ScanSettings::load(path)
        }
        None => Ok(ScanSettings::default()),
    }
}

fn run_scan(
    root: &Path,
    config: Option<&Path>,
    output: Option<PathBuf>,
) -> hb_core::Result<ScanOutcome> {
    let settings = load_settings(config)?;
    let config = ScanConfiguration::from_settings(&settings)?;
    let mut scanner = Scanner::new(config);
    if let Some(output) = output {
        scanner = scanner.with_output_root(output);
    }
    scanner.scan(root)
}

fn cmd_scan(
    root: &Path,
    config: Option<&Path>,
    output: Option<PathBuf>,
    json: bool,
) -> hb_core::Result<()> {
    let outcome = run_scan(root, config, output)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    print_tree(&outcome.tree);
    println!();
    println!(
        "{} bundle(s), {} file(s), {} excluded, scanned at {}",
        outcome.tree.len(),
        outcome.tree.files.len(),
        outcome.excluded.len(),
        outcome.scanned_at.to_rfc3339()
    );
    if outcome.partial {
        println!("Scan was cancelled; the tree is incomplete");
    }
    for error in &outcome.scan_errors {
        println!("  skipped {}: {}", error.path.display(), error.message);
    }

    Ok(())
}

fn print_tree(tree: &RecordTree) {
    for (id, bundle) in tree.bundles.iter().enumerate() {
        println!("{} [{}]", bundle.key, bundle.status);
        for file in tree.bundle_files(id) {
            let marker = match file.role {
                FileRole::Source => "*",
                FileRole::PrimaryDependency => "+",
                FileRole::SecondaryDependency => "-",
                FileRole::ArchivedFile => "@",
            };
            print!("  {} {} ({})", marker, file.relative_path.display(), file.role);
            if !file.status.is_valid() {
                print!(" [{}]", file.status);
            }
            if let Some(archive) = &file.archive {
                print!(" in {}", archive.display());
            }
            println!();
        }
    }
}

fn cmd_report(
    root: &Path,
    config: Option<&Path>,
    output: Option<PathBuf>,
    key: &str,
) -> hb_core::Result<()> {
    let outcome = run_scan(root, config, output)?;

    let Some(report) = outcome
        .tree
        .find_bundle(key)
        .and_then(|id| outcome.tree.report(id))
    else {
        return Err(hb_core::Error::Config(format!("no bundle named '{}'", key)));
    };

    println!("Status: {}", report.status());
    for missing in &report.missing {
        println!(
            "  missing {} '{}' referenced by {}",
            missing.role,
            missing.name,
            missing.referenced_by.display()
        );
    }
    for conflict in &report.conflicts {
        println!("  conflict: {}", conflict.explanation);
        for candidate in &conflict.candidates {
            println!("    {}", candidate.display());
        }
    }
    for error in &report.errors {
        println!("  {:?} {}: {}", error.kind, error.path.display(), error.message);
    }
    for (key, value) in &report.details {
        println!("  {} = {}", key, value);
    }

    Ok(())
}

fn cmd_records(
    root: &Path,
    config: Option<&Path>,
    output: Option<PathBuf>,
    format: &str,
    out: &Path,
) -> hb_core::Result<()> {
    let outcome = run_scan(root, config, output)?;
    let rows = outcome.records();

    match format.to_lowercase().as_str() {
        "csv" => write_csv(&rows, out)?,
        "json" => write_json(&rows, out)?,
        _ => {
            return Err(hb_core::Error::Config(format!(
                "unknown format '{}', supported formats: csv, json",
                format
            )))
        }
    }

    println!("Wrote {} record(s) to {}", rows.len(), out.display());
    Ok(())
}

fn cmd_init_config(output: &Path) -> hb_core::Result<()> {
    ScanSettings::default().save(output)?;
    println!("Created settings file: {}", output.display());
    Ok(())
}
