//! # Cluster Topology Model
//!
//! In-memory records for the planar topology: a [`Host`] owns up to
//! [`MAX_DEVICES`] devices, each fronting a virtual IP over an ordered list
//! of planar interfaces. [`HostDb`] is the per-process cluster view plus two
//! derived lookup indexes.
//!
//! ## Guarantees
//!
//! - The derived indexes are a pure function of `all_hosts`. Any mutation of
//!   the host set invalidates them; [`HostDb::rebuild_indexes`] must run
//!   before the next lookup.
//! - Device order and planar-interface order are preserved exactly as
//!   ingested; the wire codec and the NAT programmer both depend on it.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::warn;

/// Maximum devices carried per host. Producers truncate beyond this.
pub const MAX_DEVICES: usize = 8;

/// Maximum planar interfaces per device. Producers truncate beyond this.
pub const MAX_INTERFACES_PER_DEVICE: usize = 64;

/// Maximum length in bytes of any string field on the wire.
pub const MAX_STRING_FIELD: usize = 63;

/// One underlying physical interface carrying traffic for a virtual IP.
///
/// `Ipv4Addr::UNSPECIFIED` / `Ipv6Addr::UNSPECIFIED` are the "unset"
/// sentinels; interfaces with an unset IPv4 never enter the indexes and
/// never produce NAT rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanarInterface {
    pub id: String,
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
}

impl PlanarInterface {
    /// True when the IPv4 address is set (non-zero).
    pub fn has_ipv4(&self) -> bool {
        !self.ipv4.is_unspecified()
    }
}

/// A device advertising one virtual IP over an ordered planar list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub virtual_intf: String,
    pub virtual_ip: Ipv4Addr,
    pub planar_intfs: Vec<PlanarInterface>,
}

/// One cluster member. `host_ip` doubles as the host's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub host_name: String,
    pub host_ip: String,
    pub devices: Vec<Device>,
}

impl Host {
    /// Multi-line human-readable dump, used when logging a freshly parsed
    /// or freshly received host configuration.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "host {} ({})", self.host_name, self.host_ip);
        for dev in &self.devices {
            let _ = writeln!(out, "  device {} vip={}", dev.virtual_intf, dev.virtual_ip);
            for pi in &dev.planar_intfs {
                if pi.ipv6.is_unspecified() {
                    let _ = writeln!(out, "    planar {} ({}) ipv4={}", pi.id, pi.name, pi.ipv4);
                } else {
                    let _ = writeln!(
                        out,
                        "    planar {} ({}) ipv4={} ipv6={}",
                        pi.id, pi.name, pi.ipv4, pi.ipv6
                    );
                }
            }
        }
        out
    }
}

/// The cluster-wide view held by every process after bootstrap.
///
/// `all_hosts` is keyed by `host_ip`. The two lookup maps are derived and
/// rebuilt wholesale; they are intentionally not updated incrementally.
#[derive(Debug, Default)]
pub struct HostDb {
    /// Identity of this process's host.
    pub local_ip: String,
    /// Every known host, keyed by `host_ip`.
    pub all_hosts: HashMap<String, Host>,
    /// planar IPv4 of any device anywhere in the cluster -> that device's VIP.
    planar_to_virtual: HashMap<Ipv4Addr, Ipv4Addr>,
    /// VIP -> ordered planar interfaces backing it.
    virtual_to_planar: HashMap<Ipv4Addr, Vec<PlanarInterface>>,
}

impl HostDb {
    /// Create a view with only the local host installed.
    pub fn with_local(host: Host) -> Self {
        let mut db = HostDb {
            local_ip: host.host_ip.clone(),
            ..HostDb::default()
        };
        db.insert_host(host);
        db
    }

    /// Create a view from a complete host map received in one piece, as a
    /// leaf does when the composite configuration arrives.
    pub fn from_all_hosts(local_ip: String, all_hosts: HashMap<String, Host>) -> Self {
        HostDb {
            local_ip,
            all_hosts,
            planar_to_virtual: HashMap::new(),
            virtual_to_planar: HashMap::new(),
        }
    }

    /// Insert or replace a host record. Invalidates the derived indexes.
    pub fn insert_host(&mut self, host: Host) {
        if self.all_hosts.insert(host.host_ip.clone(), host).is_some() {
            warn!("replaced existing host record during insert");
        }
        self.planar_to_virtual.clear();
        self.virtual_to_planar.clear();
    }

    /// The local host's record, if the composite contains it.
    pub fn local_host(&self) -> Option<&Host> {
        self.all_hosts.get(&self.local_ip)
    }

    /// Rebuild both lookup indexes from `all_hosts`.
    ///
    /// Planar entries with an unset IPv4 are skipped, as are devices with an
    /// unset VIP. Within one rebuild the ordering of `virtual_to_planar`
    /// entries follows the visit order of devices and their planar lists.
    pub fn rebuild_indexes(&mut self) {
        self.planar_to_virtual.clear();
        self.virtual_to_planar.clear();

        for host in self.all_hosts.values() {
            for dev in &host.devices {
                if dev.virtual_ip.is_unspecified() {
                    continue;
                }
                for pi in &dev.planar_intfs {
                    if !pi.has_ipv4() {
                        continue;
                    }
                    if let Some(prev) = self.planar_to_virtual.insert(pi.ipv4, dev.virtual_ip) {
                        // Planar IPv4s are supposed to be unique cluster-wide.
                        warn!(
                            planar = %pi.ipv4,
                            prev_vip = %prev,
                            vip = %dev.virtual_ip,
                            "duplicate planar IPv4 across cluster"
                        );
                    }
                    self.virtual_to_planar
                        .entry(dev.virtual_ip)
                        .or_default()
                        .push(pi.clone());
                }
            }
        }
    }

    /// VIP owning the given planar IPv4, if any.
    pub fn lookup_virtual(&self, planar: Ipv4Addr) -> Option<Ipv4Addr> {
        self.planar_to_virtual.get(&planar).copied()
    }

    /// Ordered planar interfaces backing the given VIP, if any.
    pub fn lookup_planars(&self, virtual_ip: Ipv4Addr) -> Option<&[PlanarInterface]> {
        self.virtual_to_planar.get(&virtual_ip).map(|v| v.as_slice())
    }
}
