//! The compute worker: a single named thread that owns the topology
//! graph, the host map, the installer state and the current
//! classification snapshot. Every graph mutation and every path
//! computation runs here, serialised, so the router always sees a
//! consistent snapshot without fine-grained locking.

use crate::capture::CaptureBuffer;
use crate::events::ComputeEvent;
use crate::installer::{FlowInstaller, InstallReport, PathHop, SessionRegistry, TriggerPacket};
use arc_swap::ArcSwap;
use fplf_config::{Config, HostMap, TrafficClass};
use fplf_proto::packet::{ParsedPacket, ETHERTYPE_ARP};
use fplf_proto::{
    Action, CapturedPacket, FlowMatch, FlowMod, OfMessage, PacketIn, PacketOut, PortDesc,
    PortStats, OFPP_CONTROLLER, OFPP_FLOOD, OFP_NO_BUFFER,
};
use fplf_topology::{port_utilisation, route, PortSampler, RouteError, TopologyGraph};
use fplf_utils::unix_time::unix_now_f64;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Priority of the ARP punt-and-flood rule, above every path rule.
const ARP_RULE_PRIORITY: u16 = 100;

/// Ports at or above this value are reserved (controller, flood,
/// local...) and never carry link samples.
const OFPP_MAX: u32 = 0xffff_ff00;

pub struct ComputeWorker {
    config: Arc<Config>,
    graph: TopologyGraph,
    sampler: PortSampler,
    hosts: HostMap,
    classification: Arc<ArcSwap<fplf_config::ClassificationTable>>,
    registry: SessionRegistry,
    capture: Arc<CaptureBuffer>,
    installer: FlowInstaller,
    switch_ports: HashMap<u64, Vec<u32>>,
}

/// Start the compute worker on its own named thread.
pub fn spawn_compute_worker(
    config: Arc<Config>,
    hosts: HostMap,
    classification: Arc<ArcSwap<fplf_config::ClassificationTable>>,
    registry: SessionRegistry,
    capture: Arc<CaptureBuffer>,
    events: crossbeam_channel::Receiver<ComputeEvent>,
) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("FPLF Compute".to_string())
        .spawn(move || {
            let mut worker = ComputeWorker::new(config, hosts, classification, registry, capture);
            worker.run(events);
        })?;
    Ok(())
}

impl ComputeWorker {
    pub fn new(
        config: Arc<Config>,
        hosts: HostMap,
        classification: Arc<ArcSwap<fplf_config::ClassificationTable>>,
        registry: SessionRegistry,
        capture: Arc<CaptureBuffer>,
    ) -> Self {
        let installer = FlowInstaller::new(
            config.flows.idle_timeout_secs,
            config.flows.hard_timeout_secs,
            Duration::from_millis(config.flows.install_budget_ms),
        );
        Self {
            config,
            graph: TopologyGraph::new(),
            sampler: PortSampler::new(),
            hosts,
            classification,
            registry,
            capture,
            installer,
            switch_ports: HashMap::new(),
        }
    }

    fn run(&mut self, events: crossbeam_channel::Receiver<ComputeEvent>) {
        info!("Compute worker started");
        while let Ok(event) = events.recv() {
            self.handle(event);
        }
        info!("Compute worker shutting down: event channel closed");
    }

    pub fn handle(&mut self, event: ComputeEvent) {
        match event {
            ComputeEvent::SwitchUp { dpid, ports } => self.on_switch_up(dpid, ports),
            ComputeEvent::SwitchDown { dpid } => self.on_switch_down(dpid),
            ComputeEvent::PacketIn { dpid, packet_in } => self.on_packet_in(dpid, packet_in),
            ComputeEvent::PortStats { dpid, stats } => {
                let now = unix_now_f64().unwrap_or(0.0);
                self.on_port_stats(dpid, &stats, now);
            }
            ComputeEvent::PortDown { dpid, port_no } => {
                info!("Port {port_no} on switch {dpid:#018x} went down");
                self.graph.remove_links_on_port(dpid, port_no);
            }
            ComputeEvent::LinkAdd { a_dpid, a_port, b_dpid, b_port, capacity_mbps } => {
                let capacity =
                    capacity_mbps.unwrap_or(self.config.sampling.default_capacity_mbps);
                self.graph.add_link(a_dpid, a_port, b_dpid, b_port, capacity);
            }
            ComputeEvent::LinkRemove { a_dpid, b_dpid } => {
                self.graph.remove_link(a_dpid, b_dpid);
            }
        }
    }

    // -- switch lifecycle ---------------------------------------------

    fn on_switch_up(&mut self, dpid: u64, ports: Vec<PortDesc>) {
        // Stale flow state attributed to this dpid dies here, both on
        // the switch and in the install tracker.
        self.installer.forget_switch(dpid);
        self.sampler.forget_switch(dpid);
        self.graph.add_switch(dpid);
        self.switch_ports.insert(
            dpid,
            ports
                .iter()
                .map(|p| p.port_no)
                .filter(|p| *p < OFPP_MAX)
                .collect(),
        );

        if let Some(handle) = self.registry.get(&dpid) {
            let _ = handle.send(OfMessage::FlowMod(FlowMod::delete_all()));
            // Table-miss: full packet to the controller, no buffering.
            let _ = handle.send(OfMessage::FlowMod(FlowMod::add(
                FlowMatch::All,
                vec![Action::output(OFPP_CONTROLLER)],
                0,
            )));
            // ARP punt-and-flood, so discovery traffic both reaches
            // the controller and propagates.
            let _ = handle.send(OfMessage::FlowMod(FlowMod::add(
                FlowMatch::EthType(ETHERTYPE_ARP),
                vec![Action::output(OFPP_CONTROLLER), Action::output(OFPP_FLOOD)],
                ARP_RULE_PRIORITY,
            )));
        }

        // Static links become live once both endpoints are connected.
        if let Some(topology) = &self.config.topology {
            for link in &topology.links {
                let peer = if link.a_dpid == dpid {
                    link.b_dpid
                } else if link.b_dpid == dpid {
                    link.a_dpid
                } else {
                    continue;
                };
                if self.switch_ports.contains_key(&peer) {
                    let capacity = link
                        .capacity_mbps
                        .unwrap_or(self.config.sampling.default_capacity_mbps);
                    self.graph
                        .add_link(link.a_dpid, link.a_port, link.b_dpid, link.b_port, capacity);
                }
            }
        }

        info!(
            "Switch {dpid:#018x} registered: table-miss installed, {} switches / {} links known",
            self.graph.switch_count(),
            self.graph.link_count()
        );
    }

    fn on_switch_down(&mut self, dpid: u64) {
        self.graph.remove_switch(dpid);
        self.sampler.forget_switch(dpid);
        self.installer.forget_switch(dpid);
        self.switch_ports.remove(&dpid);
        info!(
            "Switch {dpid:#018x} removed: {} switches / {} links remain",
            self.graph.switch_count(),
            self.graph.link_count()
        );
    }

    // -- statistics ----------------------------------------------------

    pub fn on_port_stats(&mut self, dpid: u64, stats: &[PortStats], now: f64) {
        for stat in stats {
            if stat.port_no >= OFPP_MAX {
                continue;
            }
            let total = stat.tx_bytes.saturating_add(stat.rx_bytes);
            // First sample only sets the baseline; no weight moves.
            let Some(mbps) = self.sampler.record(dpid, stat.port_no, total, now) else {
                continue;
            };
            let capacity = self
                .graph
                .link_capacity_on_port(dpid, stat.port_no)
                .unwrap_or(self.config.sampling.default_capacity_mbps);
            let u = port_utilisation(mbps, capacity);
            self.graph.set_port_utilisation(dpid, stat.port_no, u);
        }
    }

    // -- packet handling ----------------------------------------------

    fn on_packet_in(&mut self, dpid: u64, packet_in: PacketIn) {
        let started = Instant::now();
        let Some(parsed) = ParsedPacket::parse(&packet_in.data) else {
            return;
        };
        if parsed.is_lldp() {
            return;
        }

        let timestamp = unix_now_f64().unwrap_or(0.0);
        self.capture.push(CapturedPacket::from_parsed(
            timestamp,
            dpid,
            packet_in.in_port,
            &parsed,
        ));

        self.learn(dpid, packet_in.in_port, &parsed);

        if let Some(arp) = parsed.arp {
            self.handle_arp(dpid, &packet_in, &parsed, arp);
            return;
        }
        if let Some(ip) = parsed.ipv4 {
            self.route_and_install(dpid, &packet_in, &parsed, ip, started);
            return;
        }
        // Anything else (IPv6 and friends) is best-effort flooded.
        self.flood(dpid, &packet_in);
    }

    /// MAC learning, guarded by the pre-seeded host map: an observed
    /// port only counts when it agrees with the seeded location, and
    /// nothing is learned from inter-switch ports (packets in transit
    /// would teach us wrong host locations during reroutes).
    fn learn(&mut self, dpid: u64, in_port: u32, parsed: &ParsedPacket) {
        if self.graph.is_inter_switch_port(dpid, in_port) {
            return;
        }
        let Some(entry) = self.hosts.locate(parsed.eth_src) else {
            return;
        };
        if entry.dpid != dpid || entry.port != in_port {
            debug!(
                "MAC {} observed on {}:{} but seeded at {}:{}; ignoring",
                parsed.eth_src, dpid, in_port, entry.dpid, entry.port
            );
            return;
        }
        if let Some(ip) = parsed.ipv4.map(|ip| ip.src) {
            self.hosts.observe_ip(parsed.eth_src, ip);
        } else if let Some(arp) = parsed.arp {
            self.hosts.observe_ip(parsed.eth_src, arp.sender_ip);
        }
    }

    fn handle_arp(
        &mut self,
        dpid: u64,
        packet_in: &PacketIn,
        parsed: &ParsedPacket,
        arp: fplf_proto::packet::ArpInfo,
    ) {
        // Replies to a locally attached host go straight out the host
        // port; everything else floods.
        if arp.is_reply() {
            if let Some(entry) = self.hosts.locate(parsed.eth_dst) {
                if entry.dpid == dpid {
                    debug!("Forwarding ARP reply for {} to port {}", parsed.eth_dst, entry.port);
                    self.packet_out(dpid, packet_in.in_port, entry.port, packet_in.data.clone());
                    return;
                }
            }
        }
        // Flood port by port, skipping the ingress.
        let ports = self.switch_ports.get(&dpid).cloned().unwrap_or_default();
        for port in ports {
            if port == packet_in.in_port {
                continue;
            }
            self.packet_out(dpid, packet_in.in_port, port, packet_in.data.clone());
        }
    }

    fn route_and_install(
        &mut self,
        dpid: u64,
        packet_in: &PacketIn,
        parsed: &ParsedPacket,
        ip: fplf_proto::packet::Ipv4Info,
        started: Instant,
    ) {
        // Unknown hosts never get cross-switch routes: flood on the
        // ingress switch only.
        if parsed.eth_dst.is_multicast() {
            self.flood(dpid, packet_in);
            return;
        }
        let Some(dst_entry) = self.hosts.locate(parsed.eth_dst).cloned() else {
            debug!("Destination {} not in host map; flooding", parsed.eth_dst);
            self.flood(dpid, packet_in);
            return;
        };
        let Some(src_entry) = self.hosts.locate(parsed.eth_src).cloned() else {
            debug!("Source {} not in host map; flooding", parsed.eth_src);
            self.flood(dpid, packet_in);
            return;
        };
        // Strays flooded onto transit switches must not install
        // rules anchored to the wrong ingress.
        if src_entry.dpid != dpid {
            debug!(
                "Packet from {} arrived on transit switch {dpid}; flooding",
                parsed.eth_src
            );
            self.flood(dpid, packet_in);
            return;
        }

        // The classification record only applies when both ends map
        // to known host ids.
        let src_host = src_entry
            .host_id
            .clone()
            .or_else(|| fplf_config::conventional_host_id(ip.src));
        let dst_host = dst_entry
            .host_id
            .clone()
            .or_else(|| fplf_config::conventional_host_id(ip.dst));
        let record = match (&src_host, &dst_host) {
            (Some(src), Some(dst)) => self.classification.load().lookup(src, dst),
            _ => fplf_config::ClassificationRecord {
                class: TrafficClass::Unknown,
                confidence: 0.0,
            },
        };
        let priority = record.class.priority();

        let outcome = match route(
            &self.graph,
            dpid,
            dst_entry.dpid,
            priority,
            self.config.sampling.congestion_threshold,
        ) {
            Ok(outcome) => outcome,
            Err(RouteError::NoRoute) => {
                // Possibly transient during link flap: drop and let
                // the next PACKET_IN retry.
                debug!("No route from {} to {}; dropping packet", dpid, dst_entry.dpid);
                return;
            }
        };

        let Some((forward, reverse)) =
            self.build_hops(&outcome.path, src_entry.port, dst_entry.port)
        else {
            debug!("Path edge vanished during computation; dropping packet");
            return;
        };

        let flow_match = if self.config.flows.fine_grained_matches && parsed.l4.dst_port != 0 {
            FlowMatch::FiveTuple {
                ip_src: ip.src,
                ip_dst: ip.dst,
                ip_proto: ip.proto,
                src_port: parsed.l4.src_port,
                dst_port: parsed.l4.dst_port,
            }
        } else {
            FlowMatch::L2 {
                eth_src: parsed.eth_src,
                eth_dst: parsed.eth_dst,
            }
        };

        let report = self.installer.install(
            &self.registry,
            parsed.eth_src,
            parsed.eth_dst,
            forward,
            reverse,
            flow_match,
            priority,
            TriggerPacket {
                in_port: packet_in.in_port,
                data: packet_in.data.clone(),
            },
            started,
        );

        if matches!(report, InstallReport::Installed | InstallReport::Rerouted) {
            let path = outcome
                .path
                .iter()
                .map(|d| format!("s{d}"))
                .collect::<Vec<_>>()
                .join(" -> ");
            info!(
                "Route {}:{} -> {}:{} [{} p{} conf {:.2}] path {} (baseline {}, changed={}, weights {:?})",
                src_host.as_deref().unwrap_or("?"),
                parsed.l4.src_port,
                dst_host.as_deref().unwrap_or("?"),
                parsed.l4.dst_port,
                record.class,
                priority,
                record.confidence,
                path,
                outcome
                    .baseline
                    .iter()
                    .map(|d| format!("s{d}"))
                    .collect::<Vec<_>>()
                    .join(" -> "),
                outcome.route_changed,
                outcome
                    .edges
                    .iter()
                    .map(|e| (e.w_base, e.w_adj))
                    .collect::<Vec<_>>()
            );
        }
    }

    /// Per-hop egress ports for both directions of a path.
    fn build_hops(
        &self,
        path: &[u64],
        src_host_port: u32,
        dst_host_port: u32,
    ) -> Option<(Vec<PathHop>, Vec<PathHop>)> {
        let mut forward = Vec::with_capacity(path.len());
        for (i, &dpid) in path.iter().enumerate() {
            let out_port = if i == path.len() - 1 {
                dst_host_port
            } else {
                self.graph.egress_port(dpid, path[i + 1])?
            };
            forward.push(PathHop { dpid, out_port });
        }
        let mut reverse = Vec::with_capacity(path.len());
        for (i, &dpid) in path.iter().rev().enumerate() {
            let out_port = if i == path.len() - 1 {
                src_host_port
            } else {
                let next = path[path.len() - 2 - i];
                self.graph.egress_port(dpid, next)?
            };
            reverse.push(PathHop { dpid, out_port });
        }
        Some((forward, reverse))
    }

    fn flood(&self, dpid: u64, packet_in: &PacketIn) {
        self.packet_out(dpid, packet_in.in_port, OFPP_FLOOD, packet_in.data.clone());
    }

    fn packet_out(&self, dpid: u64, in_port: u32, out_port: u32, data: Vec<u8>) {
        let Some(handle) = self.registry.get(&dpid) else {
            return;
        };
        let _ = handle.send(OfMessage::PacketOut(PacketOut {
            buffer_id: OFP_NO_BUFFER,
            in_port,
            actions: vec![Action::output(out_port)],
            data,
        }));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::{SessionHandle, SESSION_QUEUE_DEPTH};
    use crate::installer::FLOW_PRIORITY_BASE;
    use dashmap::DashMap;
    use fplf_config::{ClassificationTable, StaticLink, StaticTopology};
    use fplf_proto::packet::{build_test_frame, IPPROTO_UDP};
    use fplf_proto::{FlowModCommand, PacketInReason};
    use fplf_utils::MacAddr;
    use std::io::Write;
    use tokio::sync::mpsc;

    const HOST_MAP: &str = "\
00:00:00:00:00:01 1 1 h1
00:00:00:00:00:03 3 1 h3
";

    const CLASSIFICATION: &str = "\
flow_id,src_host,dst_host,src_ip,dst_ip,src_port,dst_port,protocol,traffic_type,confidence,total_packets,total_bytes,flow_duration,packets_per_second
1,h1,h3,10.0.0.1,10.0.0.3,44000,5004,UDP,VIDEO,0.97,1200,1500000,12.5,96.00
";

    struct Harness {
        worker: ComputeWorker,
        receivers: HashMap<u64, mpsc::Receiver<OfMessage>>,
        capture: Arc<CaptureBuffer>,
    }

    /// Triangle of switches 1-2-3 with all three links, h1 on s1:1
    /// and h3 on s3:1, and one VIDEO classification for h1 -> h3.
    fn harness() -> Harness {
        let mut config = Config::default();
        config.topology = Some(StaticTopology {
            links: vec![
                StaticLink { a_dpid: 1, a_port: 2, b_dpid: 2, b_port: 2, capacity_mbps: None },
                StaticLink { a_dpid: 2, a_port: 3, b_dpid: 3, b_port: 3, capacity_mbps: None },
                StaticLink { a_dpid: 1, a_port: 4, b_dpid: 3, b_port: 4, capacity_mbps: None },
            ],
        });

        let mut table_file = tempfile::NamedTempFile::new().unwrap();
        table_file.write_all(CLASSIFICATION.as_bytes()).unwrap();
        let table = ClassificationTable::load(table_file.path()).unwrap();

        let registry: SessionRegistry = Arc::new(DashMap::new());
        let mut receivers = HashMap::new();
        for dpid in [1u64, 2, 3] {
            let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
            registry.insert(dpid, SessionHandle::new(tx));
            receivers.insert(dpid, rx);
        }

        let capture = Arc::new(CaptureBuffer::new(16_384));
        let worker = ComputeWorker::new(
            Arc::new(config),
            HostMap::parse(HOST_MAP),
            Arc::new(ArcSwap::new(Arc::new(table))),
            registry,
            capture.clone(),
        );
        Harness { worker, receivers, capture }
    }

    impl Harness {
        fn bring_up_all(&mut self) {
            for dpid in [1u64, 2, 3] {
                self.worker.handle(ComputeEvent::SwitchUp {
                    dpid,
                    ports: (1..=4)
                        .map(|port_no| PortDesc {
                            port_no,
                            hw_addr: MacAddr::default(),
                            name: format!("s{dpid}-eth{port_no}"),
                            config: 0,
                            state: 0,
                            curr_speed: 100_000,
                            max_speed: 100_000,
                        })
                        .collect(),
                });
                self.drain(dpid);
            }
        }

        fn drain(&mut self, dpid: u64) -> Vec<OfMessage> {
            let rx = self.receivers.get_mut(&dpid).unwrap();
            let mut out = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn flow_mods(&mut self, dpid: u64) -> Vec<FlowMod> {
            self.drain(dpid)
                .into_iter()
                .filter_map(|m| match m {
                    OfMessage::FlowMod(fm) => Some(fm),
                    _ => None,
                })
                .collect()
        }

        /// Feed two samples so the port shows a stable rate:
        /// `mbps` megabits over one second on (dpid, port).
        fn set_port_rate(&mut self, dpid: u64, port: u32, mbps: u64) {
            let bytes = mbps * 1_000_000 / 8;
            self.worker.on_port_stats(
                dpid,
                &[PortStats { port_no: port, ..Default::default() }],
                100.0,
            );
            self.worker.on_port_stats(
                dpid,
                &[PortStats { port_no: port, tx_bytes: bytes, ..Default::default() }],
                101.0,
            );
        }

        fn packet_in(&mut self, dpid: u64, in_port: u32, data: Vec<u8>) {
            self.worker.handle(ComputeEvent::PacketIn {
                dpid,
                packet_in: PacketIn {
                    buffer_id: OFP_NO_BUFFER,
                    total_len: data.len() as u16,
                    reason: PacketInReason::NoMatch,
                    table_id: 0,
                    cookie: 0,
                    in_port,
                    data,
                },
            });
        }
    }

    fn h1_to_h3_frame() -> Vec<u8> {
        build_test_frame(
            "00:00:00:00:00:01".parse().unwrap(),
            "00:00:00:00:00:03".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
            IPPROTO_UDP,
            44000,
            5004,
        )
    }

    #[test]
    fn switch_up_seeds_flow_table() {
        let mut harness = harness();
        harness.worker.handle(ComputeEvent::SwitchUp { dpid: 1, ports: Vec::new() });
        let mods = harness.flow_mods(1);
        assert_eq!(mods.len(), 3);
        // Wipe, then table-miss, then the ARP punt rule.
        assert_eq!(mods[0].command, FlowModCommand::Delete);
        assert_eq!(mods[1].priority, 0);
        assert_eq!(mods[1].flow_match, FlowMatch::All);
        assert_eq!(mods[1].actions, vec![Action::output(OFPP_CONTROLLER)]);
        assert_eq!(mods[2].priority, ARP_RULE_PRIORITY);
        assert_eq!(mods[2].flow_match, FlowMatch::EthType(ETHERTYPE_ARP));
    }

    #[test]
    fn discovery_link_events_mutate_the_graph() {
        let mut harness = harness();
        harness.worker.handle(ComputeEvent::LinkAdd {
            a_dpid: 7,
            a_port: 1,
            b_dpid: 8,
            b_port: 1,
            capacity_mbps: Some(10),
        });
        assert_eq!(harness.worker.graph.link_count(), 1);
        assert_eq!(harness.worker.graph.link_between(7, 8).unwrap().capacity_mbps, 10);

        harness.worker.handle(ComputeEvent::LinkRemove { a_dpid: 7, b_dpid: 8 });
        assert_eq!(harness.worker.graph.link_count(), 0);
    }

    #[test]
    fn static_links_activate_when_both_ends_are_up() {
        let mut harness = harness();
        harness.worker.handle(ComputeEvent::SwitchUp { dpid: 1, ports: Vec::new() });
        assert_eq!(harness.worker.graph.link_count(), 0);
        harness.worker.handle(ComputeEvent::SwitchUp { dpid: 2, ports: Vec::new() });
        assert_eq!(harness.worker.graph.link_count(), 1);
        harness.worker.handle(ComputeEvent::SwitchUp { dpid: 3, ports: Vec::new() });
        assert_eq!(harness.worker.graph.link_count(), 3);
    }

    #[test]
    fn idle_topology_routes_direct_and_installs_both_directions() {
        let mut harness = harness();
        harness.bring_up_all();
        harness.packet_in(1, 1, h1_to_h3_frame());

        let on_s1 = harness.drain(1);
        assert!(on_s1.iter().any(|m| matches!(m, OfMessage::PacketOut(_))));
        let mods_s1: Vec<&FlowMod> = on_s1
            .iter()
            .filter_map(|m| match m {
                OfMessage::FlowMod(fm) => Some(fm),
                _ => None,
            })
            .collect();
        // Forward toward s3 over the direct link (port 4), reverse to
        // the host port.
        assert_eq!(mods_s1.len(), 2);
        assert_eq!(mods_s1[0].actions, vec![Action::output(4)]);
        assert_eq!(mods_s1[1].actions, vec![Action::output(1)]);
        assert_eq!(mods_s1[0].priority, FLOW_PRIORITY_BASE + 4);

        // The detour switch stays untouched.
        assert!(harness.flow_mods(2).is_empty());
        let mods_s3 = harness.flow_mods(3);
        assert_eq!(mods_s3.len(), 2);
        // Egress rule delivers to the host port on s3.
        assert_eq!(mods_s3[0].actions, vec![Action::output(1)]);
    }

    #[test]
    fn congested_shortcut_takes_the_detour() {
        let mut harness = harness();
        harness.bring_up_all();
        // Direct link s1-s3 at 95 Mbit/s; detour legs at 10 Mbit/s.
        harness.set_port_rate(1, 4, 95);
        harness.set_port_rate(1, 2, 10);
        harness.set_port_rate(2, 3, 10);

        harness.packet_in(1, 1, h1_to_h3_frame());

        let mods_s1 = harness.flow_mods(1);
        assert!(!mods_s1.is_empty());
        // Forward egress now points at the detour port.
        assert_eq!(mods_s1[0].actions, vec![Action::output(2)]);
        // The transit switch carries both directions.
        let mods_s2 = harness.flow_mods(2);
        assert_eq!(mods_s2.len(), 2);
        assert_eq!(mods_s2[0].actions, vec![Action::output(3)]);
        assert_eq!(mods_s2[1].actions, vec![Action::output(2)]);
    }

    #[test]
    fn unknown_destination_floods_ingress_only() {
        let mut harness = harness();
        harness.bring_up_all();
        let frame = build_test_frame(
            "00:00:00:00:00:01".parse().unwrap(),
            "00:00:00:00:00:99".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            "10.0.0.99".parse().unwrap(),
            IPPROTO_UDP,
            1000,
            2000,
        );
        harness.packet_in(1, 1, frame);

        let on_s1 = harness.drain(1);
        assert_eq!(on_s1.len(), 1);
        match &on_s1[0] {
            OfMessage::PacketOut(po) => {
                assert_eq!(po.actions, vec![Action::output(OFPP_FLOOD)]);
            }
            other => panic!("expected flood packet-out, got {other:?}"),
        }
        assert!(harness.drain(2).is_empty());
        assert!(harness.drain(3).is_empty());
    }

    #[test]
    fn lldp_is_ignored_but_traffic_is_captured() {
        let mut harness = harness();
        harness.bring_up_all();

        let mut lldp = vec![0u8; 20];
        lldp[12..14].copy_from_slice(&0x88ccu16.to_be_bytes());
        harness.packet_in(1, 2, lldp);
        assert_eq!(harness.capture.len(), 0);
        assert!(harness.drain(1).is_empty());

        harness.packet_in(1, 1, h1_to_h3_frame());
        assert_eq!(harness.capture.len(), 1);
    }

    #[test]
    fn switch_down_removes_links_and_paths() {
        let mut harness = harness();
        harness.bring_up_all();
        harness.packet_in(1, 1, h1_to_h3_frame());
        for dpid in [1, 2, 3] {
            harness.drain(dpid);
        }

        harness.worker.handle(ComputeEvent::SwitchDown { dpid: 3 });
        assert_eq!(harness.worker.graph.switch_count(), 2);
        assert_eq!(harness.worker.graph.link_count(), 1);
        assert_eq!(harness.worker.installer.tracked_paths(), 0);
    }

    #[test]
    fn port_down_removes_link() {
        let mut harness = harness();
        harness.bring_up_all();
        harness.worker.handle(ComputeEvent::PortDown { dpid: 1, port_no: 4 });
        assert_eq!(harness.worker.graph.link_count(), 2);
        assert!(harness.worker.graph.link_between(1, 3).is_none());
    }

    #[test]
    fn arp_request_floods_all_other_ports() {
        let mut harness = harness();
        harness.bring_up_all();

        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xff; 6]);
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&[0, 1, 0x08, 0, 6, 4, 0, 1]);
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&[10, 0, 0, 1]);
        frame.extend_from_slice(&[0; 6]);
        frame.extend_from_slice(&[10, 0, 0, 3]);

        harness.packet_in(1, 1, frame);
        let out = harness.drain(1);
        // Four ports on the switch, one is the ingress.
        assert_eq!(out.len(), 3);
        for msg in out {
            assert!(matches!(msg, OfMessage::PacketOut(_)));
        }
    }

    #[test]
    fn observed_ip_is_learned_from_seeded_port_only() {
        let mut harness = harness();
        harness.bring_up_all();

        // h1's MAC showing up on the wrong switch is ignored.
        let spoofed = build_test_frame(
            "00:00:00:00:00:01".parse().unwrap(),
            "00:00:00:00:00:03".parse().unwrap(),
            "10.9.9.9".parse().unwrap(),
            "10.0.0.3".parse().unwrap(),
            IPPROTO_UDP,
            1,
            2,
        );
        harness.packet_in(2, 1, spoofed);
        assert!(harness
            .worker
            .hosts
            .locate_by_ip("10.9.9.9".parse().unwrap())
            .is_none());

        // From the seeded port the IP sticks.
        harness.packet_in(1, 1, h1_to_h3_frame());
        let entry = harness
            .worker
            .hosts
            .locate_by_ip("10.0.0.1".parse().unwrap())
            .unwrap();
        assert_eq!(entry.host_id.as_deref(), Some("h1"));
    }
}

