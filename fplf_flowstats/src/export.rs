//! Export of the host-to-host classification table. Flows are joined
//! to symbolic host ids through the host map, classified, and written
//! with a synthesised reverse row per conversation. The output file
//! is replaced atomically (write-then-rename) so the controller never
//! observes a half-written table.

use crate::features::FeatureRow;
use crate::model::Classifier;
use fplf_config::HostMap;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// One row of the classification CSV. The controller reads only
/// (src_host, dst_host, traffic_type, confidence); the remaining
/// columns are preserved for downstream tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationRow {
    pub flow_id: u64,
    pub src_host: String,
    pub dst_host: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,
    pub traffic_type: String,
    pub confidence: f64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub flow_duration: f64,
    pub packets_per_second: f64,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Classifier failure: {0}")]
    Classifier(#[from] crate::model::ClassifierError),
    #[error("Unable to write classification table: {0}")]
    Write(PathBuf),
}

/// Classify every flow row and export the table. Flows whose
/// endpoints cannot be joined to host ids are dropped.
pub fn classify_and_export(
    classifier: &Classifier,
    rows: &[FeatureRow],
    hosts: &HostMap,
    output: &Path,
) -> Result<usize, ExportError> {
    let mut out_rows: Vec<ClassificationRow> = Vec::with_capacity(rows.len() * 2);
    let mut dropped = 0usize;
    let mut flow_id = 0u64;

    for row in rows {
        let (Some(src_host), Some(dst_host)) = (host_id(hosts, &row.src_ip), host_id(hosts, &row.dst_ip))
        else {
            dropped += 1;
            continue;
        };

        let prediction = classifier.classify(row)?;
        let traffic_type = prediction.class.to_string();

        flow_id += 1;
        out_rows.push(ClassificationRow {
            flow_id,
            src_host: src_host.clone(),
            dst_host: dst_host.clone(),
            src_ip: row.src_ip.clone(),
            dst_ip: row.dst_ip.clone(),
            src_port: row.src_port,
            dst_port: row.dst_port,
            protocol: row.protocol.clone(),
            traffic_type: traffic_type.clone(),
            confidence: prediction.confidence,
            total_packets: row.total_packets,
            total_bytes: row.total_bytes,
            flow_duration: row.flow_duration,
            packets_per_second: row.packets_per_second,
        });

        // The reverse direction of the conversation, synthesised so
        // the controller sees both.
        flow_id += 1;
        out_rows.push(ClassificationRow {
            flow_id,
            src_host: dst_host,
            dst_host: src_host,
            src_ip: row.dst_ip.clone(),
            dst_ip: row.src_ip.clone(),
            src_port: row.dst_port,
            dst_port: row.src_port,
            protocol: row.protocol.clone(),
            traffic_type,
            confidence: prediction.confidence,
            total_packets: row.total_packets,
            total_bytes: row.total_bytes,
            flow_duration: row.flow_duration,
            packets_per_second: row.packets_per_second,
        });
    }

    if dropped > 0 {
        warn!("Dropped {dropped} flows with no host-mapped endpoints");
    }

    write_atomically(&out_rows, output)?;
    info!("Exported {} classification rows to {}", out_rows.len(), output.display());
    Ok(out_rows.len())
}

fn host_id(hosts: &HostMap, ip: &str) -> Option<String> {
    let parsed: Ipv4Addr = ip.parse().ok()?;
    hosts.host_id_for_ip(parsed)
}

fn write_atomically(rows: &[ClassificationRow], output: &Path) -> Result<(), ExportError> {
    let tmp = output.with_extension("csv.tmp");
    {
        let mut writer = csv::WriterBuilder::new()
            .from_path(&tmp)
            .map_err(|_| ExportError::Write(tmp.clone()))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|_| ExportError::Write(tmp.clone()))?;
        }
        writer.flush().map_err(|_| ExportError::Write(tmp.clone()))?;
    }
    std::fs::rename(&tmp, output).map_err(|_| ExportError::Write(output.to_path_buf()))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::test_support::write_test_model;
    use fplf_config::{ClassificationTable, TrafficClass};

    fn feature_row(
        src_ip: &str,
        src_port: u16,
        dst_ip: &str,
        dst_port: u16,
        pps: f64,
        mean_size: f64,
    ) -> FeatureRow {
        FeatureRow {
            src_ip: src_ip.to_string(),
            dst_ip: dst_ip.to_string(),
            src_port,
            dst_port,
            protocol: "TCP".to_string(),
            total_packets: 100,
            forward_packets: 50,
            backward_packets: 50,
            total_bytes: 100_000,
            forward_bytes: 50_000,
            backward_bytes: 50_000,
            flow_duration: 10.0,
            packets_per_second: pps,
            bytes_per_second: 10_000.0,
            min_packet_size: 60.0,
            max_packet_size: 1400.0,
            mean_packet_size: mean_size,
            std_packet_size: 100.0,
            mean_forward_packet_size: 900.0,
            mean_backward_packet_size: 100.0,
            mean_inter_arrival_time: 0.1,
            std_inter_arrival_time: 0.02,
            min_inter_arrival_time: 0.01,
            max_inter_arrival_time: 0.5,
            forward_iat_mean: 0.1,
            forward_iat_std: 0.02,
            backward_iat_mean: 0.1,
            backward_iat_std: 0.02,
            syn_count: 2,
            ack_count: 98,
            fin_count: 2,
            rst_count: 0,
            psh_count: 40,
            mean_tcp_window: 8192.0,
            mean_ttl: 64.0,
            mean_tos: 0.0,
        }
    }

    fn hosts() -> HostMap {
        HostMap::parse(
            "00:00:00:00:00:01 1 1 h1\n\
             00:00:00:00:00:03 3 1 h3\n",
        )
    }

    #[test]
    fn export_emits_forward_and_reverse_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_test_model(dir.path());
        let classifier = Classifier::load(dir.path()).unwrap();
        let output = dir.path().join("host_to_host_flows.csv");

        let rows = vec![feature_row("10.0.0.1", 40_000, "10.0.0.3", 40_001, 50.0, 0.0)];
        let written = classify_and_export(&classifier, &rows, &hosts(), &output).unwrap();
        assert_eq!(written, 2);

        let table = ClassificationTable::load(&output).unwrap();
        assert_eq!(table.lookup("h1", "h3").class, TrafficClass::Video);
        assert_eq!(table.lookup("h3", "h1").class, TrafficClass::Video);
    }

    #[test]
    fn port_override_wins_in_the_exported_table() {
        // The model would call this HTTP; dst port 22 must export as
        // SSH with confidence 1.0.
        let dir = tempfile::tempdir().unwrap();
        write_test_model(dir.path());
        let classifier = Classifier::load(dir.path()).unwrap();
        let output = dir.path().join("host_to_host_flows.csv");

        let rows = vec![feature_row("10.0.0.1", 40_000, "10.0.0.3", 22, 0.0, 50.0)];
        classify_and_export(&classifier, &rows, &hosts(), &output).unwrap();

        let table = ClassificationTable::load(&output).unwrap();
        let record = table.lookup("h1", "h3");
        assert_eq!(record.class, TrafficClass::Ssh);
        assert_eq!(record.confidence, 1.0);
    }

    #[test]
    fn unmapped_endpoints_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_test_model(dir.path());
        let classifier = Classifier::load(dir.path()).unwrap();
        let output = dir.path().join("host_to_host_flows.csv");

        let rows = vec![
            feature_row("192.168.1.1", 40_000, "10.0.0.3", 80, 1.0, 100.0),
            feature_row("10.0.0.1", 40_000, "10.0.0.3", 80, 1.0, 100.0),
        ];
        let written = classify_and_export(&classifier, &rows, &hosts(), &output).unwrap();
        // Only the mapped conversation survives, in both directions.
        assert_eq!(written, 2);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_test_model(dir.path());
        let classifier = Classifier::load(dir.path()).unwrap();
        let output = dir.path().join("host_to_host_flows.csv");

        let rows = vec![feature_row("10.0.0.1", 40_000, "10.0.0.3", 80, 1.0, 100.0)];
        classify_and_export(&classifier, &rows, &hosts(), &output).unwrap();
        assert!(output.exists());
        assert!(!output.with_extension("csv.tmp").exists());
    }

    #[test]
    fn conventional_host_ids_apply_without_explicit_entries() {
        // 10.0.0.N addresses resolve to hN even when the host map
        // has no symbolic id for them.
        let dir = tempfile::tempdir().unwrap();
        write_test_model(dir.path());
        let classifier = Classifier::load(dir.path()).unwrap();
        let output = dir.path().join("host_to_host_flows.csv");

        let rows = vec![feature_row("10.0.0.7", 40_000, "10.0.0.8", 80, 1.0, 100.0)];
        let written =
            classify_and_export(&classifier, &rows, &HostMap::default(), &output).unwrap();
        assert_eq!(written, 2);
        let table = ClassificationTable::load(&output).unwrap();
        assert_eq!(table.lookup("h7", "h8").class, TrafficClass::Http);
    }
}
