//! # Bootstrap State Machines
//!
//! The root/leaf exchange that turns N hosts with local knowledge into N
//! hosts sharing the merged cluster topology.
//!
//! The root accepts one connection per leaf, prompts each for its planar
//! configuration, collects the responses with one receiver thread per peer,
//! merges everything into its [`HostDb`], and distributes the composite back
//! on every surviving connection. A leaf connects (retrying until the root
//! is up), answers the prompt with its own configuration, and blocks until
//! the composite arrives.
//!
//! Per connection the message sequence is strictly
//! request / response / composite; across connections nothing is ordered.
//! A misbehaving peer costs the root only that peer: its socket is closed,
//! its host is absent from the composite, and bootstrap continues.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use anp_common::planar_config::{self, file_from_host, PlanarConfigFile};
use anp_common::{BootstrapError, Host, HostDb};
use anp_proto::{decode_all_hosts, decode_host_exact, encode_all_hosts, encode_host_vec, MsgType};

use crate::socket::{BootstrapListener, BootstrapSocket, SOCKET_MAGIC};
use crate::tlv::{recv_tlv, send_tlv};

// ════════════════════════════════════════════════════════════════════════════
// ROOT
// ════════════════════════════════════════════════════════════════════════════

/// The elected coordinator's side of the exchange.
pub struct RootNode {
    listener: BootstrapListener,
}

impl RootNode {
    /// Bind the control-channel listener on the local address.
    pub fn bind(addr: SocketAddr) -> Result<Self, BootstrapError> {
        let listener = BootstrapListener::bind(addr, SOCKET_MAGIC)?;
        Ok(RootNode { listener })
    }

    /// Actual bound address; relevant when binding port 0 in tests.
    pub fn local_addr(&self) -> Result<SocketAddr, BootstrapError> {
        self.listener.local_addr()
    }

    /// Run the full root exchange against `leaves` peers and return the
    /// merged cluster view, indexes rebuilt.
    ///
    /// `deadline` bounds the accept phase; the default `None` waits forever,
    /// matching the protocol's retry-forever contract. The check is coarse:
    /// it runs between blocking accepts.
    pub fn run(
        self,
        leaves: usize,
        local_host: Host,
        deadline: Option<Duration>,
    ) -> Result<HostDb, BootstrapError> {
        let started = Instant::now();
        let addr = self.local_addr()?;
        info!(
            local = %local_host.host_ip,
            %addr,
            leaves,
            "elected root, listening"
        );
        debug!("{}", local_host.summary());

        let db = HostDb::with_local(local_host);

        // ── Accept exactly one connection per leaf ──────────────────────
        let mut conns: Vec<(BootstrapSocket, Ipv4Addr)> = Vec::with_capacity(leaves);
        while conns.len() < leaves {
            if let Some(limit) = deadline {
                if started.elapsed() > limit {
                    return Err(BootstrapError::Fatal(format!(
                        "bootstrap deadline exceeded with {}/{} leaves joined",
                        conns.len(),
                        leaves
                    )));
                }
            }
            match self.listener.accept() {
                Ok((sock, _peer)) => {
                    let peer_ip = sock.peer_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);
                    info!(%peer_ip, joined = conns.len() + 1, total = leaves, "leaf connected");
                    conns.push((sock, peer_ip));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed, retrying");
                }
            }
        }

        // ── Prompt every leaf, in accept order ──────────────────────────
        for (sock, peer_ip) in conns.iter_mut() {
            match send_tlv(sock, MsgType::PlanarConfigRequest, &[]) {
                Ok(()) => debug!(%peer_ip, "sent config request"),
                // The receiver for this peer will observe the same dead
                // socket and abandon it; nothing else to do here.
                Err(e) => error!(%peer_ip, error = %e, "failed to prompt leaf"),
            }
        }

        // ── Collect one response per leaf, a receiver thread each ───────
        let db = Mutex::new(db);
        let db_ref = &db;
        let survivors: Vec<(BootstrapSocket, Ipv4Addr)> = thread::scope(|s| {
            let handles: Vec<_> = conns
                .into_iter()
                .map(|(sock, peer_ip)| s.spawn(move || collect_one(sock, peer_ip, db_ref)))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap_or(None))
                .collect()
        });
        let mut db = db.into_inner();
        info!(
            collected = db.all_hosts.len() - 1,
            expected = leaves,
            "all receivers finished"
        );

        // ── Merge ───────────────────────────────────────────────────────
        db.rebuild_indexes();

        // ── Distribute the composite, serialized once ───────────────────
        let composite = encode_all_hosts(&db.all_hosts);
        info!(
            bytes = composite.len(),
            hosts = db.all_hosts.len(),
            "distributing composite configuration"
        );
        for (mut sock, peer_ip) in survivors {
            match send_tlv(&mut sock, MsgType::CompositeConfig, &composite) {
                Ok(()) => debug!(%peer_ip, "sent composite"),
                Err(e) => error!(%peer_ip, error = %e, "failed to send composite"),
            }
            // Socket drops here: the peer connection closes once served.
        }

        Ok(db)
    }
}

/// Receive and merge a single leaf's response. Returns the socket for the
/// distribution phase, or `None` when the peer is abandoned.
fn collect_one(
    mut sock: BootstrapSocket,
    peer_ip: Ipv4Addr,
    db: &Mutex<HostDb>,
) -> Option<(BootstrapSocket, Ipv4Addr)> {
    let (msg_type, payload) = match recv_tlv(&mut sock) {
        Ok(frame) => frame,
        Err(e) => {
            error!(%peer_ip, error = %e, "receive failed, abandoning peer");
            return None;
        }
    };

    if msg_type != MsgType::ConfigResponse {
        error!(%peer_ip, ?msg_type, "unexpected message, abandoning peer");
        return None;
    }

    let host = match decode_host_exact(&payload) {
        Ok(host) => host,
        Err(e) => {
            error!(%peer_ip, error = %e, "malformed config response, abandoning peer");
            return None;
        }
    };

    info!(%peer_ip, host = %host.host_ip, bytes = payload.len(), "collected configuration");
    debug!("{}", host.summary());
    db.lock().insert_host(host);
    Some((sock, peer_ip))
}

// ════════════════════════════════════════════════════════════════════════════
// LEAF
// ════════════════════════════════════════════════════════════════════════════

/// Run the leaf side of the exchange against the root at `root` and return
/// the received cluster view, indexes rebuilt.
///
/// The connect loop retries every `retry` until the root starts listening;
/// leaves routinely come up first. `deadline` bounds the loop when set.
pub fn run_leaf(
    root: SocketAddr,
    planar_config_path: &Path,
    retry: Duration,
    deadline: Option<Duration>,
) -> Result<HostDb, BootstrapError> {
    let started = Instant::now();

    // ── Connect, retrying until the root binds ──────────────────────────
    let mut attempt = 0u64;
    let mut sock = loop {
        attempt += 1;
        match BootstrapSocket::connect(root, SOCKET_MAGIC) {
            Ok(sock) => {
                info!(%root, attempt, "connected to root");
                break sock;
            }
            Err(e) => {
                debug!(%root, attempt, error = %e, "connect failed, retrying");
                if let Some(limit) = deadline {
                    if started.elapsed() > limit {
                        return Err(BootstrapError::Fatal(format!(
                            "could not reach root {} within deadline ({} attempts)",
                            root, attempt
                        )));
                    }
                }
                thread::sleep(retry);
            }
        }
    };

    // ── Wait for the prompt ─────────────────────────────────────────────
    let (msg_type, payload) = recv_tlv(&mut sock)?;
    if msg_type != MsgType::PlanarConfigRequest || !payload.is_empty() {
        return Err(BootstrapError::Protocol(format!(
            "expected empty config request, got {:?} with {} bytes",
            msg_type,
            payload.len()
        )));
    }
    debug!("received config request");

    // ── Send our configuration ──────────────────────────────────────────
    let local_host = planar_config::load_host(planar_config_path)?;
    info!(local = %local_host.host_ip, "sending local configuration");
    debug!("{}", local_host.summary());
    let local_ip = local_host.host_ip.clone();
    let encoded = encode_host_vec(&local_host);
    send_tlv(&mut sock, MsgType::ConfigResponse, &encoded)?;

    // ── Block until the composite arrives ───────────────────────────────
    let (msg_type, payload) = recv_tlv(&mut sock)?;
    if msg_type != MsgType::CompositeConfig {
        return Err(BootstrapError::Protocol(format!(
            "expected composite config, got {:?}",
            msg_type
        )));
    }
    let all_hosts = decode_all_hosts(&payload)
        .map_err(|e| BootstrapError::Protocol(format!("malformed composite: {}", e)))?;
    info!(hosts = all_hosts.len(), bytes = payload.len(), "received composite configuration");
    for host in all_hosts.values() {
        debug!("{}", host.summary());
    }

    let mut db = HostDb::from_all_hosts(local_ip, all_hosts);
    db.rebuild_indexes();
    Ok(db)
    // Socket drops here, closing the channel.
}

// ════════════════════════════════════════════════════════════════════════════
// COMPOSITE SNAPSHOT
// ════════════════════════════════════════════════════════════════════════════

/// Write the merged view to `<dir>/<local_ip>_composite_config.json` as a
/// JSON array in the topology-file schema, via write-tmp-then-rename so a
/// crash never leaves a torn file. Best effort; callers only warn on error.
pub fn dump_composite(db: &HostDb, dir: &Path) -> std::io::Result<PathBuf> {
    let mut hosts: Vec<&Host> = db.all_hosts.values().collect();
    hosts.sort_by(|a, b| a.host_ip.cmp(&b.host_ip));
    let files: Vec<PlanarConfigFile> = hosts.into_iter().map(file_from_host).collect();

    let data = serde_json::to_vec_pretty(&files)?;
    let path = dir.join(format!("{}_composite_config.json", db.local_ip));
    let tmp = dir.join(format!("{}_composite_config.json.tmp", db.local_ip));

    std::fs::write(&tmp, &data)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}
