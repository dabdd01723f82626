use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pagezip::{pack_with_progress, PackConfig};

/// Snapshot live SQLite databases into a single Zip archive.
///
/// All databases are captured inside one shared read transaction, so the
/// archive reflects a mutually consistent point in time even while other
/// processes keep writing.
#[derive(Parser)]
#[command(name = "pagezip", version)]
struct Args {
    /// Path of the Zip archive to create
    archive: PathBuf,

    /// Databases to snapshot, as relative paths
    #[arg(required = true)]
    databases: Vec<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Usage problems exit 1 like every other failure; --help and
    // --version keep their conventional exit status.
    let args = Args::try_parse().unwrap_or_else(|e| {
        if e.use_stderr() {
            let _ = e.print();
            process::exit(1);
        }
        e.exit()
    });
    let config = PackConfig::default();
    let result = pack_with_progress(&args.archive, &args.databases, &config, |report| {
        eprintln!(
            "{:.6}  {}",
            report.archived_size as f64 / report.uncompressed_size as f64,
            report.path.display()
        );
    });
    match result {
        Ok(summary) => {
            eprintln!("========");
            eprintln!(
                "{:.6}  (total)",
                summary.archive_size as f64 / summary.uncompressed_size as f64
            );
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
