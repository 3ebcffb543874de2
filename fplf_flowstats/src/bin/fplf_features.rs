//! Offline feature extraction: packet snapshot files in, one feature
//! CSV out.

use clap::Parser;
use fplf_flowstats::{extract_features, write_feature_csv};
use std::path::PathBuf;
use tracing::{error, info};

const EXIT_CONFIG: i32 = 1;
const EXIT_IO: i32 = 2;

#[derive(Parser)]
#[command(version, about = "Extract per-flow features from packet snapshots", long_about = None)]
struct Cli {
    /// Packet snapshot files (captured_packets_*.json), in any order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output feature CSV.
    #[arg(short, long)]
    output: PathBuf,

    /// Log at debug level.
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).compact().init();

    for input in &cli.inputs {
        if !input.exists() {
            error!("Input file does not exist: {}", input.display());
            std::process::exit(EXIT_CONFIG);
        }
    }

    let rows = match extract_features(&cli.inputs) {
        Ok(rows) => rows,
        Err(e) => {
            error!("Feature extraction failed: {e}");
            std::process::exit(EXIT_IO);
        }
    };
    if let Err(e) = write_feature_csv(&rows, &cli.output) {
        error!("Unable to write {}: {e}", cli.output.display());
        std::process::exit(EXIT_IO);
    }
    info!("Wrote {} flows to {}", rows.len(), cli.output.display());
}
