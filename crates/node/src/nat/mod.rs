//! # NAT Rule Programming
//!
//! Derives the SNAT/DNAT rules a host must install from the merged cluster
//! view, and pushes them through a packet-filter backend.
//!
//! Three rule shapes cover the dataplane:
//!
//! - egress SNAT (`POSTROUTING`): locally originated traffic leaving a
//!   planar interface has its VIP source rewritten to the planar address;
//! - VIP DNAT (`OUTPUT`): traffic addressed to a VIP is steered onto the
//!   planar address, whether the VIP is owned locally or remotely;
//! - ingress SNAT (`INPUT`): traffic arriving from a remote planar address
//!   is presented to the stack under the remote VIP.
//!
//! The local host's rules are installed in full before any remote host's,
//! so there is never a window where a VIP has remote plumbing but not its
//! own. Derivation is pure; only [`program`] touches the system, through
//! the [`backend::NatBackend`] abstraction, and per-rule failures are
//! counted rather than propagated.

pub mod backend;
pub mod iptables;
pub mod nftables;

use std::fmt;
use std::net::Ipv4Addr;

use tracing::{debug, error, info, warn};

use anp_common::{Host, HostDb};

use backend::{NatBackend, RuleOutcome};

/// Packet-filter table every rule lives in.
pub const NAT_TABLE: &str = "nat";

/// Chains used by the three rule shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Postrouting,
    Output,
    Input,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Postrouting => "POSTROUTING",
            Chain::Output => "OUTPUT",
            Chain::Input => "INPUT",
        }
    }
}

/// Address the rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMatch {
    Source(Ipv4Addr),
    Dest(Ipv4Addr),
}

/// Interface the rule is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iface {
    In(String),
    Out(String),
}

/// Translation the rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatAction {
    Snat(Ipv4Addr),
    Dnat(Ipv4Addr),
}

/// One declarative NAT rule. Backends render it; nothing here depends on a
/// particular packet-filter tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub chain: Chain,
    pub addr: AddrMatch,
    pub iface: Iface,
    pub action: NatAction,
}

impl NatRule {
    /// Locally originated traffic: rewrite the VIP source onto the planar
    /// address as it leaves the planar interface.
    pub fn egress_snat(vip: Ipv4Addr, planar: Ipv4Addr, iface: &str) -> Self {
        NatRule {
            chain: Chain::Postrouting,
            addr: AddrMatch::Source(vip),
            iface: Iface::Out(iface.to_string()),
            action: NatAction::Snat(planar),
        }
    }

    /// Traffic addressed to a VIP: steer it onto the backing planar address.
    pub fn vip_dnat(vip: Ipv4Addr, planar: Ipv4Addr, iface: &str) -> Self {
        NatRule {
            chain: Chain::Output,
            addr: AddrMatch::Dest(vip),
            iface: Iface::Out(iface.to_string()),
            action: NatAction::Dnat(planar),
        }
    }

    /// Traffic arriving from a remote planar address: present it under the
    /// remote VIP.
    pub fn ingress_snat(vip: Ipv4Addr, planar: Ipv4Addr, iface: &str) -> Self {
        NatRule {
            chain: Chain::Input,
            addr: AddrMatch::Source(planar),
            iface: Iface::In(iface.to_string()),
            action: NatAction::Snat(vip),
        }
    }
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.chain.as_str())?;
        match self.addr {
            AddrMatch::Source(ip) => write!(f, "src={} ", ip)?,
            AddrMatch::Dest(ip) => write!(f, "dst={} ", ip)?,
        }
        match &self.iface {
            Iface::In(name) => write!(f, "in={} ", name)?,
            Iface::Out(name) => write!(f, "out={} ", name)?,
        }
        match self.action {
            NatAction::Snat(ip) => write!(f, "SNAT->{}", ip),
            NatAction::Dnat(ip) => write!(f, "DNAT->{}", ip),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DERIVATION
// ════════════════════════════════════════════════════════════════════════════

/// Derive the complete rule list for this host from the merged view.
///
/// Pure function of the view contents: local rules first, then remote hosts
/// in ascending `host_ip` order, devices and planar interfaces in their
/// stored order. Interfaces with an unset IPv4 and devices with an unset
/// VIP contribute nothing; IPv6 addresses are carried but never translated.
pub fn derive_rules(db: &HostDb) -> Vec<NatRule> {
    let mut rules = Vec::new();

    match db.local_host() {
        Some(local) => {
            for (vip, pi) in eligible_pairs(local) {
                rules.push(NatRule::egress_snat(vip, pi.ipv4, &pi.name));
                rules.push(NatRule::vip_dnat(vip, pi.ipv4, &pi.name));
            }
        }
        None => warn!(local = %db.local_ip, "local host absent from merged view, no local rules"),
    }

    let mut remote: Vec<&Host> = db
        .all_hosts
        .values()
        .filter(|h| h.host_ip != db.local_ip)
        .collect();
    remote.sort_by(|a, b| a.host_ip.cmp(&b.host_ip));

    for host in remote {
        for (vip, pi) in eligible_pairs(host) {
            rules.push(NatRule::vip_dnat(vip, pi.ipv4, &pi.name));
            rules.push(NatRule::ingress_snat(vip, pi.ipv4, &pi.name));
        }
    }

    rules
}

/// (vip, planar) pairs that actually produce rules: both addresses set.
fn eligible_pairs(
    host: &Host,
) -> impl Iterator<Item = (Ipv4Addr, &anp_common::PlanarInterface)> {
    host.devices
        .iter()
        .filter(|dev| !dev.virtual_ip.is_unspecified())
        .flat_map(|dev| {
            dev.planar_intfs
                .iter()
                .filter(|pi| pi.has_ipv4())
                .map(move |pi| (dev.virtual_ip, pi))
        })
}

// ════════════════════════════════════════════════════════════════════════════
// APPLICATION
// ════════════════════════════════════════════════════════════════════════════

/// Outcome counters for one programming pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgramStats {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Apply every derived rule through the backend, sequentially. Failures are
/// logged and counted; programming always runs to completion.
pub fn program(db: &HostDb, backend: &dyn NatBackend) -> ProgramStats {
    let rules = derive_rules(db);
    info!(rules = rules.len(), backend = backend.name(), "programming NAT rules");

    let mut stats = ProgramStats::default();
    for rule in &rules {
        match backend.ensure(rule) {
            Ok(RuleOutcome::Applied) => {
                info!(%rule, "rule applied");
                stats.applied += 1;
            }
            Ok(RuleOutcome::Skipped) => {
                debug!(%rule, "rule already present");
                stats.skipped += 1;
            }
            Err(e) => {
                error!(%rule, error = %e, "rule installation failed");
                stats.failed += 1;
            }
        }
    }

    if stats.failed > 0 {
        warn!(failed = stats.failed, "NAT programming finished with failures");
    } else {
        info!(applied = stats.applied, skipped = stats.skipped, "NAT programming finished");
    }
    stats
}
