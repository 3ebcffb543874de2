//! OpenFlow 1.3 protocol support for the FPLF controller: the message
//! subset the controller speaks, a tokio-friendly framed codec, parsing
//! of packet payloads carried in PACKET_IN, and the capture snapshot
//! record shared with the offline pipeline.

pub mod capture;
pub mod codec;
pub mod messages;
pub mod packet;
mod wire;

pub use capture::CapturedPacket;
pub use codec::{read_message, write_message};
pub use messages::*;
pub use wire::ProtocolError;
