//! Configuration handling for the FPLF controller: the top-level TOML
//! configuration file, the pre-seeded host map, and the classification
//! table produced by the offline pipeline.

mod classification;
mod host_map;
mod top_config;

pub use classification::{
    ClassificationError, ClassificationRecord, ClassificationTable, TrafficClass,
};
pub use host_map::{conventional_host_id, HostEntry, HostMap, HostMapError};
pub use top_config::{CaptureConfig, Config, ConfigError, StaticLink, StaticTopology};
