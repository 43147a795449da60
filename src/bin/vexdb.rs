//! Command-line front end for `vexdb`.
//!
//! Named `clap` subcommands over the same two operations:
//!
//! ```text
//! vexdb load <db_dir> <input.osm.pbf>
//! vexdb extract <db_dir> <min_lon,min_lat,max_lon,max_lat> <output>
//! ```
//!
//! Argument parsing, progress logging, and process-level file locking are
//! the CLI's job, not the core library's; the core surfaces typed errors and
//! this binary's only job is to report them and choose an exit code.

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use vexdb::coord::BoundingBox;
use vexdb::extract::{format_for_path, Extractor, OutputFormat};
use vexdb::load::Loader;

const WRITINGPROGRAM: &str = concat!("vexdb/", env!("CARGO_PKG_VERSION"));

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a `*.osm.pbf` file into a database directory.
    Load {
        /// Database directory to create or append to.
        db_dir: PathBuf,
        /// The `*.osm.pbf` file to ingest.
        input: PathBuf,
    },
    /// Extract a bounding box from a database back out to PBF or vex.
    Extract {
        /// Database directory to read from.
        db_dir: PathBuf,
        /// `min_lon,min_lat,max_lon,max_lat`.
        bbox: String,
        /// Output path: '-' for stdout, a `.vex` extension selects the
        /// custom binary format, anything else selects PBF.
        output: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Load { db_dir, input } => run_load(db_dir, input),
        Command::Extract { db_dir, bbox, output } => run_extract(db_dir, bbox, output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("vexdb: error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run_load(db_dir: &Path, input: &Path) -> Result<(), String> {
    tracing::info!(db = %db_dir.display(), input = %input.display(), "starting load");
    let loader = Loader::new(db_dir).map_err(|e| e.to_string())?;
    let stats = loader.load(input).map_err(|e| e.to_string())?;
    tracing::info!(
        ways_stored = stats.ways_stored,
        ways_rejected = stats.ways_rejected,
        nodes_stored = stats.nodes_stored,
        relations_stored = stats.relations_stored,
        "load finished"
    );
    Ok(())
}

fn run_extract(db_dir: &Path, bbox_spec: &str, output: &str) -> Result<(), String> {
    let bbox = BoundingBox::parse(bbox_spec).map_err(|e| e.to_string())?;
    tracing::info!(db = %db_dir.display(), bbox = %bbox_spec, output, "starting extract");

    let mut extractor = Extractor::open(db_dir).map_err(|e| e.to_string())?;

    let stats = match output {
        "-" => {
            let stdout = io::stdout();
            let mut sink = io::BufWriter::new(stdout.lock());
            let stats = extractor
                .extract_pbf(&bbox, &mut sink, WRITINGPROGRAM)
                .map_err(|e| e.to_string())?;
            sink.flush().map_err(|e| e.to_string())?;
            stats
        }
        path => {
            let file = std::fs::File::create(PathBuf::from(path)).map_err(|e| e.to_string())?;
            let mut sink = io::BufWriter::new(file);
            let stats = match format_for_path(path) {
                OutputFormat::Pbf => extractor
                    .extract_pbf(&bbox, &mut sink, WRITINGPROGRAM)
                    .map_err(|e| e.to_string())?,
                OutputFormat::Vex => extractor
                    .extract_vex(&bbox, &mut sink)
                    .map_err(|e| e.to_string())?,
            };
            sink.flush().map_err(|e| e.to_string())?;
            stats
        }
    };

    tracing::info!(
        ways = stats.ways,
        nodes = stats.nodes,
        relations = stats.relations,
        "extract finished"
    );
    Ok(())
}
