//! The classification table: the (src_host, dst_host) -> traffic class
//! mapping produced by the offline pipeline and consumed by the router.

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// The closed set of traffic classes. Priorities are fixed per class;
/// higher means more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficClass {
    #[serde(rename = "VIDEO")]
    Video,
    #[serde(rename = "SSH")]
    Ssh,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "FTP")]
    Ftp,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl TrafficClass {
    /// Routing priority: VIDEO=4, SSH=3, HTTP=2, FTP=1, UNKNOWN=0.
    pub fn priority(&self) -> u8 {
        match self {
            TrafficClass::Video => 4,
            TrafficClass::Ssh => 3,
            TrafficClass::Http => 2,
            TrafficClass::Ftp => 1,
            TrafficClass::Unknown => 0,
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrafficClass::Video => "VIDEO",
            TrafficClass::Ssh => "SSH",
            TrafficClass::Http => "HTTP",
            TrafficClass::Ftp => "FTP",
            TrafficClass::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl FromStr for TrafficClass {
    type Err = ClassificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIDEO" => Ok(TrafficClass::Video),
            "SSH" => Ok(TrafficClass::Ssh),
            "HTTP" => Ok(TrafficClass::Http),
            "FTP" => Ok(TrafficClass::Ftp),
            "UNKNOWN" => Ok(TrafficClass::Unknown),
            other => Err(ClassificationError::UnknownClass(other.to_string())),
        }
    }
}

/// One classification entry as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationRecord {
    pub class: TrafficClass,
    pub confidence: f64,
}

/// The subset of the classification CSV the controller reads. The file
/// carries more columns for downstream tooling; they are ignored here.
#[derive(Debug, Deserialize)]
struct ClassificationRow {
    src_host: String,
    dst_host: String,
    traffic_type: String,
    confidence: f64,
}

/// Immutable (src_host, dst_host) -> class table. The reload task
/// builds a fresh table and swaps it in whole, so readers never see a
/// partial load.
#[derive(Debug, Default)]
pub struct ClassificationTable {
    records: HashMap<(String, String), ClassificationRecord>,
}

impl ClassificationTable {
    /// Loads a classification CSV. Both directions of a conversation
    /// are stored; the reverse record is synthesised when the file
    /// only carries one direction.
    pub fn load(path: &Path) -> Result<Self, ClassificationError> {
        let reader = ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|_| ClassificationError::OpenFail(path.to_path_buf()))?;
        let mut reader = reader;

        let mut records = HashMap::new();
        for row in reader.deserialize::<ClassificationRow>() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping malformed classification row: {e}");
                    continue;
                }
            };
            let class: TrafficClass = match row.traffic_type.parse() {
                Ok(class) => class,
                Err(_) => {
                    warn!("Skipping classification row with unknown class '{}'", row.traffic_type);
                    continue;
                }
            };
            let record = ClassificationRecord { class, confidence: row.confidence.clamp(0.0, 1.0) };
            records.insert((row.src_host.clone(), row.dst_host.clone()), record);
            records
                .entry((row.dst_host, row.src_host))
                .or_insert(record);
        }

        Ok(Self { records })
    }

    /// The record for a host pair, or UNKNOWN when the pair has never
    /// been classified.
    pub fn lookup(&self, src_host: &str, dst_host: &str) -> ClassificationRecord {
        self.records
            .get(&(src_host.to_string(), dst_host.to_string()))
            .copied()
            .unwrap_or(ClassificationRecord {
                class: TrafficClass::Unknown,
                confidence: 0.0,
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Unable to open classification table: {0}")]
    OpenFail(PathBuf),
    #[error("Unknown traffic class: {0}")]
    UnknownClass(String),
}
