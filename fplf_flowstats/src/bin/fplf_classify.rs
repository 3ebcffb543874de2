//! Offline classification: a feature CSV and a model directory in,
//! the host-to-host classification table out.

use clap::Parser;
use fplf_config::HostMap;
use fplf_flowstats::features::read_feature_csv;
use fplf_flowstats::{classify_and_export, Classifier};
use std::path::PathBuf;
use tracing::{error, info};

const EXIT_CONFIG: i32 = 1;
const EXIT_IO: i32 = 2;

#[derive(Parser)]
#[command(version, about = "Classify flows and export the host-to-host table", long_about = None)]
struct Cli {
    /// Model artifact directory.
    model_dir: PathBuf,

    /// Feature CSV produced by fplf_features.
    features: PathBuf,

    /// Output classification CSV (atomically replaced).
    output: PathBuf,

    /// Host map file used to join flows to host ids.
    #[arg(long, default_value = "host_map.txt")]
    host_map: PathBuf,

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

    let classifier = match Classifier::load(&cli.model_dir) {
        Ok(classifier) => classifier,
        Err(e) => {
            error!("Unable to load model from {}: {e}", cli.model_dir.display());
            std::process::exit(EXIT_CONFIG);
        }
    };

    // The host map is optional here: without it the join falls back
    // to the 10.0.0.N -> hN convention.
    let hosts = match HostMap::load(&cli.host_map) {
        Ok(hosts) => hosts,
        Err(_) => {
            info!(
                "Host map {} not readable; relying on addressing convention",
                cli.host_map.display()
            );
            HostMap::default()
        }
    };

    let rows = match read_feature_csv(&cli.features) {
        Ok(rows) => rows,
        Err(e) => {
            error!("Unable to read features from {}: {e}", cli.features.display());
            std::process::exit(EXIT_IO);
        }
    };

    match classify_and_export(&classifier, &rows, &hosts, &cli.output) {
        Ok(written) => {
            info!("Exported {written} rows to {}", cli.output.display());
        }
        Err(e) => {
            error!("Export failed: {e}");
            std::process::exit(EXIT_IO);
        }
    }
}
