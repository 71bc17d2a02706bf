//! TLV frame header for the bootstrap control channel.
//!
//! Every message is `[type:4][length:4][payload:length]`, both header words
//! big-endian. Exactly three message types are legal on this channel; the
//! payload of a frame is bounded by [`MAX_FRAME`].

use thiserror::Error;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest accepted payload: 8 MiB.
pub const MAX_FRAME: usize = 8 * 1024 * 1024;

/// The three legal control-channel messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Root asks a leaf for its planar configuration. Empty payload.
    PlanarConfigRequest = 1,
    /// Leaf answers with its single-host encoding.
    ConfigResponse = 2,
    /// Root distributes the merged all-hosts encoding.
    CompositeConfig = 3,
}

impl MsgType {
    /// Wire code of this message type.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for MsgType {
    type Error = FrameError;

    fn try_from(code: u32) -> Result<Self, FrameError> {
        match code {
            1 => Ok(MsgType::PlanarConfigRequest),
            2 => Ok(MsgType::ConfigResponse),
            3 => Ok(MsgType::CompositeConfig),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Frame validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown TLV message type {0}")]
    UnknownType(u32),

    #[error("frame length {0} exceeds the {MAX_FRAME}-byte cap")]
    Oversized(u32),
}

/// Parsed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MsgType,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(msg_type: MsgType, length: u32) -> Self {
        FrameHeader { msg_type, length }
    }

    /// Serialize the header words in wire order.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.msg_type.code().to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Parse and validate a header: the type must be known and the length
    /// within [`MAX_FRAME`].
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let code = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let msg_type = MsgType::try_from(code)?;
        if length as usize > MAX_FRAME {
            return Err(FrameError::Oversized(length));
        }
        Ok(FrameHeader { msg_type, length })
    }
}
