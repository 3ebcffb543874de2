//! Async framing for OpenFlow messages. The OpenFlow header carries
//! its own length field, so framing is: read 8 bytes, validate, read
//! the remainder, decode.

use crate::messages::OfMessage;
use crate::wire::{self, ProtocolError, MAX_MESSAGE_BYTES, OFP_HEADER_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::error;

/// Read one complete OpenFlow message from the stream.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(u32, OfMessage), ProtocolError> {
    let mut header = [0u8; OFP_HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| ProtocolError::StreamReadError)?;

    let length = u16::from_be_bytes([header[2], header[3]]) as usize;
    if length < OFP_HEADER_LEN {
        error!("Message length {} below the OpenFlow header size.", length);
        return Err(ProtocolError::BadLength(length));
    }
    if length > MAX_MESSAGE_BYTES {
        error!(
            "Message length {} exceeds MAX_MESSAGE_BYTES {}.",
            length, MAX_MESSAGE_BYTES
        );
        return Err(ProtocolError::BadLength(length));
    }

    let mut message = vec![0u8; length];
    message[..OFP_HEADER_LEN].copy_from_slice(&header);
    if length > OFP_HEADER_LEN {
        reader
            .read_exact(&mut message[OFP_HEADER_LEN..])
            .await
            .map_err(|_| ProtocolError::StreamReadError)?;
    }

    wire::decode_message(&message)
}

/// Write one message to the stream.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    xid: u32,
    msg: &OfMessage,
) -> Result<(), ProtocolError> {
    let bytes = wire::encode_message(xid, msg)?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|_| ProtocolError::StreamWriteError)?;
    Ok(())
}
