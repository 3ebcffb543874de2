use arc_swap::ArcSwap;
use clap::Parser;
use dashmap::DashMap;
use fplf_config::{Config, HostMap};
use fplfd::capture::{run_flusher, CaptureBuffer};
use fplfd::compute::spawn_compute_worker;
use fplfd::installer::SessionRegistry;
use fplfd::reload::{load_or_empty, run_reloader};
use fplfd::session::run_session;
use fplfd::stats::run_stats_poller;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Exit code for configuration problems.
const EXIT_CONFIG: i32 = 1;
/// Exit code for IO problems (bind failure, unreadable inputs).
const EXIT_IO: i32 = 2;
/// Exit code when terminated by a signal.
const EXIT_SIGNALLED: i32 = 130;

/// Depth of the compute worker's event queue.
const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Parser)]
#[command(version, about = "FPLF SDN controller", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    config: PathBuf,

    /// Log at debug level.
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("FPLF controller starting");

    let config = match Config::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Unable to load configuration: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    // The host map must be seeded before any traffic arrives.
    let hosts = match HostMap::load(&config.host_map_path) {
        Ok(hosts) => hosts,
        Err(e) => {
            error!("Unable to load host map: {e}");
            std::process::exit(EXIT_IO);
        }
    };
    if hosts.is_empty() {
        warn!("Host map is empty; all traffic will be flooded");
    } else {
        info!("Seeded {} host entries from {}", hosts.len(), config.host_map_path.display());
    }

    let classification = Arc::new(ArcSwap::new(Arc::new(load_or_empty(
        &config.classification_path,
    ))));

    let registry: SessionRegistry = Arc::new(DashMap::new());
    let capture = Arc::new(CaptureBuffer::new(config.capture.ring_capacity));
    let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);

    if let Err(e) = spawn_compute_worker(
        config.clone(),
        hosts,
        classification.clone(),
        registry.clone(),
        capture.clone(),
        event_rx,
    ) {
        error!("Unable to start the compute worker: {e}");
        std::process::exit(EXIT_IO);
    }

    tokio::spawn(run_stats_poller(
        registry.clone(),
        config.sampling.interval_secs,
    ));
    tokio::spawn(run_flusher(
        capture.clone(),
        config.capture_directory.clone(),
        config.capture.clone(),
    ));
    tokio::spawn(run_reloader(
        classification.clone(),
        config.classification_path.clone(),
        config.flows.reload_period_secs,
    ));

    // Flush whatever the capture ring holds before dying on a signal.
    let signal_capture = capture.clone();
    let signal_dir = config.capture_directory.clone();
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            error!("Unable to install signal handlers: {e}");
            std::process::exit(EXIT_IO);
        }
    };
    std::thread::spawn(move || {
        for sig in signals.forever() {
            warn!("Terminating on signal {sig}");
            if let Err(e) = signal_capture.flush_to(&signal_dir) {
                warn!("Final capture flush failed: {e}");
            }
            std::process::exit(EXIT_SIGNALLED);
        }
    });

    let listener = match TcpListener::bind(&config.listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to bind {}: {e}", config.listen_address);
            std::process::exit(EXIT_IO);
        }
    };
    info!("Listening for switches on {}", config.listen_address);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("Switch connection from {peer}");
                let _ = socket.set_nodelay(true);
                tokio::spawn(run_session(socket, registry.clone(), event_tx.clone()));
            }
            Err(e) => {
                warn!("Accept failed: {e}");
            }
        }
    }
}
