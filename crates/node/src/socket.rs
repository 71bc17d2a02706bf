//! Blocking socket facade for the bootstrap channel.
//!
//! Thin wrapper over `std::net` that gives the state machines exactly the
//! operations they need: bind/accept on the root, connect on the leaf, and
//! whole-buffer send/recv. Short reads never escape this layer; `recv_exact`
//! loops until the requested byte count arrives and reports EOF before that
//! as [`BootstrapError::PeerClosed`].
//!
//! The handshake magic travels in the descriptor for cross-version sanity
//! checks; it is never written to the wire on this channel.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};

use tracing::debug;

use anp_common::BootstrapError;

/// Handshake magic retained in every bootstrap socket descriptor.
pub const SOCKET_MAGIC: u64 = 0xA1B2_C3D4_E5F6_ABCD;

/// One established bootstrap connection. Closed on drop.
#[derive(Debug)]
pub struct BootstrapSocket {
    stream: TcpStream,
    #[allow(dead_code)]
    magic: u64,
}

impl BootstrapSocket {
    /// Connect to `addr`. Failures are transient; the leaf retries them.
    pub fn connect(addr: SocketAddr, magic: u64) -> Result<Self, BootstrapError> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| BootstrapError::Transient(format!("connect {}: {}", addr, e)))?;
        debug!(%addr, "connected");
        Ok(BootstrapSocket { stream, magic })
    }

    fn from_stream(stream: TcpStream, magic: u64) -> Self {
        BootstrapSocket { stream, magic }
    }

    /// Remote IPv4 address of this connection, if the peer is IPv4.
    pub fn peer_ipv4(&self) -> Option<Ipv4Addr> {
        match self.stream.peer_addr() {
            Ok(SocketAddr::V4(v4)) => Some(*v4.ip()),
            _ => None,
        }
    }

    /// Write the entire buffer.
    pub fn send_all(&mut self, buf: &[u8]) -> Result<(), BootstrapError> {
        self.stream.write_all(buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
                BootstrapError::PeerClosed
            }
            _ => BootstrapError::Protocol(format!("send failed: {}", e)),
        })
    }

    /// Read exactly `n` bytes, looping over partial reads. EOF before `n`
    /// bytes is [`BootstrapError::PeerClosed`].
    pub fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>, BootstrapError> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => BootstrapError::PeerClosed,
            _ => BootstrapError::Protocol(format!("recv failed: {}", e)),
        })?;
        Ok(buf)
    }
}

/// Listening socket held by the root for the duration of bootstrap.
#[derive(Debug)]
pub struct BootstrapListener {
    listener: TcpListener,
    magic: u64,
}

impl BootstrapListener {
    /// Bind the control-channel listener. A bind failure is unrecoverable
    /// for the root.
    pub fn bind(addr: SocketAddr, magic: u64) -> Result<Self, BootstrapError> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| BootstrapError::Fatal(format!("bind {}: {}", addr, e)))?;
        Ok(BootstrapListener { listener, magic })
    }

    /// Actual bound address (useful when binding port 0 in tests).
    pub fn local_addr(&self) -> Result<SocketAddr, BootstrapError> {
        self.listener
            .local_addr()
            .map_err(|e| BootstrapError::Fatal(format!("local_addr: {}", e)))
    }

    /// Accept one connection. Failures are transient and retried by the
    /// caller.
    pub fn accept(&self) -> Result<(BootstrapSocket, SocketAddr), BootstrapError> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| BootstrapError::Transient(format!("accept: {}", e)))?;
        Ok((BootstrapSocket::from_stream(stream, self.magic), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::thread;

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn test_send_recv_exact() {
        let listener = BootstrapListener::bind(loopback(), SOCKET_MAGIC).expect("bind");
        let addr = listener.local_addr().expect("addr");

        let handle = thread::spawn(move || {
            let (mut sock, _) = listener.accept().expect("accept");
            sock.send_all(b"abc").expect("send 1");
            sock.send_all(b"defgh").expect("send 2");
        });

        let mut client = BootstrapSocket::connect(addr, SOCKET_MAGIC).expect("connect");
        // One read spanning both writes: the facade must loop internally.
        let got = client.recv_exact(8).expect("recv");
        assert_eq!(&got, b"abcdefgh");
        handle.join().expect("join");
    }

    #[test]
    fn test_eof_is_peer_closed() {
        let listener = BootstrapListener::bind(loopback(), SOCKET_MAGIC).expect("bind");
        let addr = listener.local_addr().expect("addr");

        let handle = thread::spawn(move || {
            let (mut sock, _) = listener.accept().expect("accept");
            sock.send_all(b"xy").expect("send");
            // Drop closes the connection with only 2 of 4 bytes delivered.
        });

        let mut client = BootstrapSocket::connect(addr, SOCKET_MAGIC).expect("connect");
        handle.join().expect("join");
        let err = client.recv_exact(4).unwrap_err();
        assert!(matches!(err, BootstrapError::PeerClosed), "{:?}", err);
    }

    #[test]
    fn test_connect_refused_is_transient() {
        // Reserve a port, then close it so nothing is listening.
        let probe = TcpListener::bind(loopback()).expect("bind probe");
        let addr = probe.local_addr().expect("addr");
        drop(probe);

        let err = BootstrapSocket::connect(addr, SOCKET_MAGIC).unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }

    #[test]
    fn test_peer_ipv4() {
        let listener = BootstrapListener::bind(loopback(), SOCKET_MAGIC).expect("bind");
        let addr = listener.local_addr().expect("addr");

        let handle = thread::spawn(move || {
            let (sock, peer) = listener.accept().expect("accept");
            (sock.peer_ipv4(), peer)
        });

        let _client = BootstrapSocket::connect(addr, SOCKET_MAGIC).expect("connect");
        let (peer_ip, peer_addr) = handle.join().expect("join");
        assert_eq!(peer_ip, Some(Ipv4Addr::LOCALHOST));
        assert_eq!(peer_addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
