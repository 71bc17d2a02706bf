//! Binary wire codec for host topology records.
//!
//! The format is deliberately independent of the JSON file schema: all
//! integers are 32-bit big-endian, strings are length-prefixed raw bytes
//! (no terminator), and IPv4/IPv6 addresses are written as their raw 4 and
//! 16 octets. A single-host record is:
//!
//! ```text
//! [host_name len:4][bytes][host_ip len:4][bytes][num_devices:4]
//!   per device: [virtual_intf len:4][bytes][virtual_ip:4][num_intfs:4]
//!     per intf: [id len:4][bytes][name len:4][bytes][ipv4:4][ipv6:16]
//! ```
//!
//! The all-hosts form is `[num_hosts:4]` followed by that many single-host
//! records in arbitrary order.
//!
//! Decoding is strict: any length prefix that overruns the buffer, any
//! string beyond [`MAX_STRING_FIELD`] bytes, any count beyond the model
//! caps, and any bytes left over after the outer frame completes are all
//! rejected. Over valid inputs the codec is a bijection; encode-then-decode
//! reproduces the input exactly.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use anp_common::topology::{
    Device, Host, PlanarInterface, MAX_DEVICES, MAX_INTERFACES_PER_DEVICE, MAX_STRING_FIELD,
};

/// Upper bound on `num_hosts` in an all-hosts payload.
pub const MAX_HOSTS: usize = 4096;

/// Codec failure. Converted to the protocol error class by callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer truncated at offset {0}")]
    Truncated(usize),

    #[error("string field of {0} bytes exceeds the {MAX_STRING_FIELD}-byte cap")]
    StringTooLong(usize),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("host declares {0} devices, cap is {MAX_DEVICES}")]
    TooManyDevices(u32),

    #[error("device declares {0} planar interfaces, cap is {MAX_INTERFACES_PER_DEVICE}")]
    TooManyInterfaces(u32),

    #[error("payload declares {0} hosts, cap is {MAX_HOSTS}")]
    TooManyHosts(u32),

    #[error("{0} trailing bytes after final record")]
    TrailingBytes(usize),
}

// ── Encoding ────────────────────────────────────────────────────────────────

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Append the single-host encoding of `host` to `buf`.
pub fn encode_host(host: &Host, buf: &mut Vec<u8>) {
    put_str(buf, &host.host_name);
    put_str(buf, &host.host_ip);
    buf.extend_from_slice(&(host.devices.len() as u32).to_be_bytes());

    for dev in &host.devices {
        put_str(buf, &dev.virtual_intf);
        buf.extend_from_slice(&dev.virtual_ip.octets());
        buf.extend_from_slice(&(dev.planar_intfs.len() as u32).to_be_bytes());

        for pi in &dev.planar_intfs {
            put_str(buf, &pi.id);
            put_str(buf, &pi.name);
            buf.extend_from_slice(&pi.ipv4.octets());
            buf.extend_from_slice(&pi.ipv6.octets());
        }
    }
}

/// Single-host encoding as an owned buffer.
pub fn encode_host_vec(host: &Host) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_host(host, &mut buf);
    buf
}

/// Encode the whole cluster view. Host order on the wire is whatever the
/// map yields; the decoded form is keyed by `host_ip` so order carries no
/// meaning.
pub fn encode_all_hosts(all_hosts: &HashMap<String, Host>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(all_hosts.len() as u32).to_be_bytes());
    for host in all_hosts.values() {
        encode_host(host, &mut buf);
    }
    buf
}

// ── Decoding ────────────────────────────────────────────────────────────────

fn take<'a>(buf: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8], WireError> {
    let end = off.checked_add(n).ok_or(WireError::Truncated(*off))?;
    if end > buf.len() {
        return Err(WireError::Truncated(*off));
    }
    let out = &buf[*off..end];
    *off = end;
    Ok(out)
}

fn take_u32(buf: &[u8], off: &mut usize) -> Result<u32, WireError> {
    let bytes = take(buf, off, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn take_str(buf: &[u8], off: &mut usize) -> Result<String, WireError> {
    let len = take_u32(buf, off)? as usize;
    if len > MAX_STRING_FIELD {
        return Err(WireError::StringTooLong(len));
    }
    let bytes = take(buf, off, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn take_ipv4(buf: &[u8], off: &mut usize) -> Result<Ipv4Addr, WireError> {
    let bytes = take(buf, off, 4)?;
    Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn take_ipv6(buf: &[u8], off: &mut usize) -> Result<Ipv6Addr, WireError> {
    let bytes = take(buf, off, 16)?;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    Ok(Ipv6Addr::from(octets))
}

/// Decode one single-host record starting at `*off`, advancing `*off` past
/// the record on success.
pub fn decode_host(buf: &[u8], off: &mut usize) -> Result<Host, WireError> {
    let host_name = take_str(buf, off)?;
    let host_ip = take_str(buf, off)?;

    let num_devices = take_u32(buf, off)?;
    if num_devices as usize > MAX_DEVICES {
        return Err(WireError::TooManyDevices(num_devices));
    }

    let mut devices = Vec::with_capacity(num_devices as usize);
    for _ in 0..num_devices {
        let virtual_intf = take_str(buf, off)?;
        let virtual_ip = take_ipv4(buf, off)?;

        let num_intfs = take_u32(buf, off)?;
        if num_intfs as usize > MAX_INTERFACES_PER_DEVICE {
            return Err(WireError::TooManyInterfaces(num_intfs));
        }

        let mut planar_intfs = Vec::with_capacity(num_intfs as usize);
        for _ in 0..num_intfs {
            let id = take_str(buf, off)?;
            let name = take_str(buf, off)?;
            let ipv4 = take_ipv4(buf, off)?;
            let ipv6 = take_ipv6(buf, off)?;
            planar_intfs.push(PlanarInterface { id, name, ipv4, ipv6 });
        }

        devices.push(Device { virtual_intf, virtual_ip, planar_intfs });
    }

    Ok(Host { host_name, host_ip, devices })
}

/// Decode a complete single-host payload, rejecting trailing bytes.
pub fn decode_host_exact(buf: &[u8]) -> Result<Host, WireError> {
    let mut off = 0;
    let host = decode_host(buf, &mut off)?;
    if off != buf.len() {
        return Err(WireError::TrailingBytes(buf.len() - off));
    }
    Ok(host)
}

/// Decode an all-hosts payload into a map keyed by `host_ip`.
pub fn decode_all_hosts(buf: &[u8]) -> Result<HashMap<String, Host>, WireError> {
    let mut off = 0;
    let num_hosts = take_u32(buf, &mut off)?;
    if num_hosts as usize > MAX_HOSTS {
        return Err(WireError::TooManyHosts(num_hosts));
    }

    let mut all_hosts = HashMap::with_capacity(num_hosts as usize);
    for _ in 0..num_hosts {
        let host = decode_host(buf, &mut off)?;
        all_hosts.insert(host.host_ip.clone(), host);
    }

    if off != buf.len() {
        return Err(WireError::TrailingBytes(buf.len() - off));
    }
    Ok(all_hosts)
}
