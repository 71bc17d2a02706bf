//! Wire formats for the bootstrap control channel: the binary host codec
//! and the TLV frame header. Everything here is pure byte manipulation;
//! socket plumbing lives in the node crate.

pub mod frame;
pub mod wire;

pub use frame::{FrameError, FrameHeader, MsgType, HEADER_LEN, MAX_FRAME};
pub use wire::{
    decode_all_hosts, decode_host, decode_host_exact, encode_all_hosts, encode_host,
    encode_host_vec, WireError, MAX_HOSTS,
};
