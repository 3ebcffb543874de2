//! Top-level configuration file for the FPLF controller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration, loaded from a TOML file passed on the
/// command line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Address the OpenFlow listener binds to.
    pub listen_address: String,

    /// Path to the pre-seeded host map file.
    pub host_map_path: PathBuf,

    /// Path to the classification table produced by the offline
    /// pipeline. Re-read periodically; may not exist yet at startup.
    pub classification_path: PathBuf,

    /// Directory that receives packet snapshot files.
    pub capture_directory: PathBuf,

    /// Port statistics sampling.
    pub sampling: SamplingConfig,

    /// Capture ring and snapshot rotation.
    pub capture: CaptureConfig,

    /// Flow installation timeouts and budgets.
    pub flows: FlowConfig,

    /// Static topology, used when link discovery is disabled.
    pub topology: Option<StaticTopology>,
}

/// Port statistics sampling and link weighting knobs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    /// Seconds between port-stats polls.
    pub interval_secs: u64,

    /// Nominal link capacity assumed when a link has no override.
    pub default_capacity_mbps: u32,

    /// Utilisation at or above which a link counts as congested.
    pub congestion_threshold: f64,
}

/// Capture buffer sizing and snapshot rotation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    /// Capture ring capacity; a full ring triggers a flush.
    pub ring_capacity: usize,

    /// Seconds between time-triggered flushes.
    pub flush_period_secs: u64,

    /// Snapshot files beyond this count are removed, oldest first.
    pub max_snapshot_files: usize,

    /// Snapshot files older than this many seconds are removed.
    pub max_snapshot_age_secs: u64,
}

/// Flow installation behaviour.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlowConfig {
    /// Idle timeout applied to installed flows.
    pub idle_timeout_secs: u16,

    /// Hard timeout applied to installed flows.
    pub hard_timeout_secs: u16,

    /// Overall budget for one route-and-install operation, in
    /// milliseconds.
    pub install_budget_ms: u64,

    /// Seconds between classification table reloads.
    pub reload_period_secs: u64,

    /// Install 5-tuple matches instead of L2 pairs when the packet
    /// carries enough headers.
    #[serde(default)]
    pub fine_grained_matches: bool,
}

/// Static topology description. Each entry is one undirected
/// inter-switch link with its endpoint ports.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StaticTopology {
    pub links: Vec<StaticLink>,
}

/// One undirected link between two switch ports.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StaticLink {
    pub a_dpid: u64,
    pub a_port: u32,
    pub b_dpid: u64,
    pub b_port: u32,

    /// Capacity override for this link; the sampling default applies
    /// when absent.
    pub capacity_mbps: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:6653".to_string(),
            host_map_path: PathBuf::from("host_map.txt"),
            classification_path: PathBuf::from("data/processed/host_to_host_flows.csv"),
            capture_directory: PathBuf::from("data/raw"),
            sampling: SamplingConfig::default(),
            capture: CaptureConfig::default(),
            flows: FlowConfig::default(),
            topology: None,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            default_capacity_mbps: 100,
            congestion_threshold: 0.9,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 10_000,
            flush_period_secs: 30,
            max_snapshot_files: 100,
            max_snapshot_age_secs: 24 * 60 * 60,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            hard_timeout_secs: 300,
            install_budget_ms: 250,
            reload_period_secs: 10,
            fine_grained_matches: false,
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::CannotRead(path.to_path_buf()))?;
        Self::load_from_string(&raw)
    }

    /// Loads a config from a string. Also the test entry point.
    pub fn load_from_string(raw: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(raw).map_err(|e| ConfigError::CannotParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Test if a configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.default_capacity_mbps == 0 {
            return Err(ConfigError::Invalid(
                "default_capacity_mbps must be greater than zero".to_string(),
            ));
        }
        if let Some(topology) = &self.topology {
            for link in &topology.links {
                if link.capacity_mbps == Some(0) {
                    return Err(ConfigError::Invalid(format!(
                        "link {}:{} <-> {}:{} has zero capacity",
                        link.a_dpid, link.a_port, link.b_dpid, link.b_port
                    )));
                }
                if link.a_dpid == link.b_dpid {
                    return Err(ConfigError::Invalid(format!(
                        "link endpoints must be on distinct switches (dpid {})",
                        link.a_dpid
                    )));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.sampling.congestion_threshold) {
            return Err(ConfigError::Invalid(
                "congestion_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.sampling.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.capture.ring_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ring_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Unable to read configuration file: {0}")]
    CannotRead(PathBuf),
    #[error("Unable to parse TOML: {0}")]
    CannotParse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
