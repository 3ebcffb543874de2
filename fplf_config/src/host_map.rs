//! The pre-seeded host map. End hosts in the emulation environment may
//! have pre-populated ARP caches and never emit discovery traffic, so
//! the learning table must be seeded from file before any traffic
//! arrives.

use fplf_utils::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// One entry in the host map: where a host's MAC is attached, plus an
/// optional symbolic id and the IP learned from observed traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub mac: MacAddr,
    pub dpid: u64,
    pub port: u32,
    pub host_id: Option<String>,
    pub ip: Option<Ipv4Addr>,
}

/// MAC-keyed host location table with a secondary IP index for reverse
/// lookup. `locate` is O(1).
#[derive(Debug, Default, Clone)]
pub struct HostMap {
    by_mac: HashMap<MacAddr, HostEntry>,
    by_ip: HashMap<Ipv4Addr, MacAddr>,
}

impl HostMap {
    /// Loads a host map file. Each line maps a MAC to `(dpid, port)`,
    /// optionally with a symbolic host id:
    ///
    /// ```text
    /// # mac dpid port [host_id]
    /// 00:00:00:00:00:01 1 1 h1
    /// ```
    ///
    /// Unknown or malformed lines are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, HostMapError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| HostMapError::CannotRead(path.to_path_buf()))?;
        Ok(Self::parse(&raw))
    }

    /// Parses host map text. Never fails: bad lines are skipped so a
    /// single typo does not take the controller down.
    pub fn parse(raw: &str) -> Self {
        let mut map = Self::default();
        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                warn!("Host map line {}: expected 'mac dpid port [host_id]', skipping", line_no + 1);
                continue;
            }
            let mac: MacAddr = match fields[0].parse() {
                Ok(mac) => mac,
                Err(e) => {
                    warn!("Host map line {}: {e}, skipping", line_no + 1);
                    continue;
                }
            };
            let dpid: u64 = match fields[1].parse() {
                Ok(dpid) => dpid,
                Err(_) => {
                    warn!("Host map line {}: bad dpid '{}', skipping", line_no + 1, fields[1]);
                    continue;
                }
            };
            let port: u32 = match fields[2].parse() {
                Ok(port) => port,
                Err(_) => {
                    warn!("Host map line {}: bad port '{}', skipping", line_no + 1, fields[2]);
                    continue;
                }
            };
            let host_id = fields.get(3).map(|s| s.to_string());
            map.insert(HostEntry { mac, dpid, port, host_id, ip: None });
        }
        map
    }

    pub fn insert(&mut self, entry: HostEntry) {
        if let Some(ip) = entry.ip {
            self.by_ip.insert(ip, entry.mac);
        }
        self.by_mac.insert(entry.mac, entry);
    }

    /// Locate a host by MAC.
    pub fn locate(&self, mac: MacAddr) -> Option<&HostEntry> {
        self.by_mac.get(&mac)
    }

    /// Reverse lookup via the IP index.
    pub fn locate_by_ip(&self, ip: Ipv4Addr) -> Option<&HostEntry> {
        self.by_ip.get(&ip).and_then(|mac| self.by_mac.get(mac))
    }

    /// Record an IP observed in traffic sourced from a seeded MAC.
    pub fn observe_ip(&mut self, mac: MacAddr, ip: Ipv4Addr) {
        if let Some(entry) = self.by_mac.get_mut(&mac) {
            if entry.ip != Some(ip) {
                entry.ip = Some(ip);
                self.by_ip.insert(ip, mac);
            }
        }
    }

    /// The symbolic id of the host owning `ip`, if any. Falls back to
    /// the emulation convention 10.0.0.N -> hN when the entry carries
    /// no explicit id.
    pub fn host_id_for_ip(&self, ip: Ipv4Addr) -> Option<String> {
        if let Some(entry) = self.locate_by_ip(ip) {
            if let Some(id) = &entry.host_id {
                return Some(id.clone());
            }
        }
        conventional_host_id(ip)
    }

    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.by_mac.values()
    }
}

/// The emulation addressing convention: 10.0.0.N is host hN.
pub fn conventional_host_id(ip: Ipv4Addr) -> Option<String> {
    let octets = ip.octets();
    if octets[0] == 10 && octets[1] == 0 && octets[2] == 0 {
        Some(format!("h{}", octets[3]))
    } else {
        None
    }
}

#[derive(Error, Debug)]
pub enum HostMapError {
    #[error("Unable to read host map file: {0}")]
    CannotRead(PathBuf),
}
