//! One logical session per connected switch: OF 1.3 handshake, then a
//! read loop that answers keepalives locally and forwards everything
//! else to the compute worker. Handlers never block on external IO;
//! long work is posted to the worker queue.

use crate::events::{ComputeEvent, SessionHandle, SESSION_QUEUE_DEPTH};
use dashmap::DashMap;
use fplf_proto::{codec, OfMessage, PortDesc, PortReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// OFPPS_LINK_DOWN: no physical link present.
const PORT_STATE_LINK_DOWN: u32 = 1 << 0;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one switch connection to completion. Returns when the switch
/// disconnects or the session dies on a protocol error.
pub async fn run_session<S>(
    stream: S,
    registry: Arc<DashMap<u64, SessionHandle>>,
    events: crossbeam_channel::Sender<ComputeEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = split(stream);

    let (tx, mut rx) = mpsc::channel::<OfMessage>(SESSION_QUEUE_DEPTH);
    let handle = SessionHandle::new(tx.clone());

    // Writer half: drains the session queue onto the socket, stamping
    // transaction ids.
    let writer_task = tokio::spawn(async move {
        let mut xid: u32 = 1;
        while let Some(msg) = rx.recv().await {
            if codec::write_message(&mut writer, xid, &msg).await.is_err() {
                debug!("Switch socket write failed; writer exiting");
                break;
            }
            xid = xid.wrapping_add(1);
        }
    });

    let negotiated = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        handshake(&mut reader, &handle),
    )
    .await;
    let (dpid, ports) = match negotiated {
        Ok(Some(result)) => result,
        Ok(None) => {
            debug!("Switch handshake failed; dropping connection");
            writer_task.abort();
            return;
        }
        Err(_) => {
            warn!("Switch handshake timed out; dropping connection");
            writer_task.abort();
            return;
        }
    };

    if registry.insert(dpid, handle.clone()).is_some() {
        warn!("Replacing existing session for dpid {dpid}");
    }
    info!("Switch {dpid:#018x} connected with {} ports", ports.len());
    let _ = events.send(ComputeEvent::SwitchUp { dpid, ports });

    // Main dispatch loop. PACKET_IN events from a single switch reach
    // the compute worker in arrival order because this loop is the
    // only producer for this dpid.
    loop {
        let msg = match codec::read_message(&mut reader).await {
            Ok((_, msg)) => msg,
            Err(fplf_proto::ProtocolError::StreamReadError) => {
                info!("Switch {dpid:#018x} disconnected");
                break;
            }
            Err(e) => {
                // Malformed OpenFlow: close the session, the switch
                // drives reconnection.
                error!("Protocol error on switch {dpid:#018x}: {e}; closing session");
                break;
            }
        };

        match msg {
            OfMessage::EchoRequest(data) => {
                let _ = handle.send(OfMessage::EchoReply(data));
            }
            OfMessage::PacketIn(packet_in) => {
                if events
                    .try_send(ComputeEvent::PacketIn { dpid, packet_in })
                    .is_err()
                {
                    debug!("Compute queue saturated; shedding a PACKET_IN from {dpid:#018x}");
                }
            }
            OfMessage::PortStatsReply(stats) => {
                if events
                    .try_send(ComputeEvent::PortStats { dpid, stats })
                    .is_err()
                {
                    debug!("Compute queue saturated; shedding a stats sample from {dpid:#018x}");
                }
            }
            OfMessage::PortStatus(status) => {
                let down = status.reason == PortReason::Delete
                    || status.desc.state & PORT_STATE_LINK_DOWN != 0;
                if down {
                    let _ = events.send(ComputeEvent::PortDown {
                        dpid,
                        port_no: status.desc.port_no,
                    });
                }
            }
            OfMessage::Error { err_type, code, .. } => {
                warn!("Switch {dpid:#018x} reported error type={err_type} code={code}");
            }
            OfMessage::Hello | OfMessage::EchoReply(_) => {}
            other => {
                debug!("Ignoring message from {dpid:#018x}: {other:?}");
            }
        }
    }

    // Only deregister if a replacement session has not already taken
    // the slot.
    registry.remove_if(&dpid, |_, existing| existing.same_channel(&handle));
    let _ = events.send(ComputeEvent::SwitchDown { dpid });
    writer_task.abort();
}

/// HELLO exchange, feature discovery, then the port inventory. The
/// switch may interleave keepalives; they are answered inline.
async fn handshake<R: AsyncRead + Unpin>(
    reader: &mut R,
    handle: &SessionHandle,
) -> Option<(u64, Vec<PortDesc>)> {
    if handle.send(OfMessage::Hello).is_err() {
        return None;
    }
    if handle.send(OfMessage::FeaturesRequest).is_err() {
        return None;
    }

    let mut dpid = None;
    loop {
        let (_, msg) = codec::read_message(reader).await.ok()?;
        match msg {
            OfMessage::Hello => {}
            OfMessage::EchoRequest(data) => {
                let _ = handle.send(OfMessage::EchoReply(data));
            }
            OfMessage::FeaturesReply(features) => {
                dpid = Some(features.datapath_id);
                handle.send(OfMessage::PortDescRequest).ok()?;
            }
            OfMessage::PortDescReply(ports) => {
                let dpid = dpid?;
                return Some((dpid, ports));
            }
            other => {
                debug!("Ignoring pre-handshake message: {other:?}");
            }
        }
    }
}
