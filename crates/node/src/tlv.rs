//! TLV message exchange over the socket facade.
//!
//! Composes the frame header model from `anp_proto` with
//! [`BootstrapSocket`]: `send_tlv` writes header then payload in order,
//! `recv_tlv` reads and validates the 8-byte header before reading the
//! payload. Every framing violation surfaces as the protocol error class.

use tracing::trace;

use anp_common::BootstrapError;
use anp_proto::{FrameHeader, MsgType, HEADER_LEN, MAX_FRAME};

use crate::socket::BootstrapSocket;

/// Send one TLV message.
pub fn send_tlv(
    sock: &mut BootstrapSocket,
    msg_type: MsgType,
    payload: &[u8],
) -> Result<(), BootstrapError> {
    if payload.len() > MAX_FRAME {
        return Err(BootstrapError::Protocol(format!(
            "refusing to send {}-byte frame (cap {})",
            payload.len(),
            MAX_FRAME
        )));
    }

    let header = FrameHeader::new(msg_type, payload.len() as u32);
    sock.send_all(&header.to_bytes())?;
    if !payload.is_empty() {
        sock.send_all(payload)?;
    }
    trace!(?msg_type, len = payload.len(), "sent TLV");
    Ok(())
}

/// Receive one TLV message, enforcing the type set and the frame cap.
pub fn recv_tlv(sock: &mut BootstrapSocket) -> Result<(MsgType, Vec<u8>), BootstrapError> {
    let header_bytes = sock.recv_exact(HEADER_LEN)?;
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&header_bytes);

    let header = FrameHeader::parse(raw)
        .map_err(|e| BootstrapError::Protocol(format!("bad TLV header: {}", e)))?;

    let payload = if header.length > 0 {
        sock.recv_exact(header.length as usize)?
    } else {
        Vec::new()
    };

    trace!(msg_type = ?header.msg_type, len = payload.len(), "received TLV");
    Ok((header.msg_type, payload))
}
