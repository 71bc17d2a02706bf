//! Planar topology JSON ingestion.
//!
//! Reads the per-host topology file (canonically
//! `/etc/ainic_planar_config.json`) into a [`Host`], enforcing the model
//! caps on the producer side: devices past [`MAX_DEVICES`], interfaces past
//! [`MAX_INTERFACES_PER_DEVICE`], and string bytes past [`MAX_STRING_FIELD`]
//! are dropped or truncated with a warning, never carried through.
//!
//! The same mirror structs serialize the other direction for the composite
//! snapshot each host dumps after bootstrap.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BootstrapError;
use crate::topology::{
    Device, Host, PlanarInterface, MAX_DEVICES, MAX_INTERFACES_PER_DEVICE, MAX_STRING_FIELD,
};

/// Mirror of the on-disk topology file. Field names match the JSON keys
/// exactly; everything except the host identity is optional so partial
/// configs still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanarConfigFile {
    pub host_name: String,
    pub host_ip: String,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub virtual_intf: String,
    #[serde(default)]
    pub virtual_ip: String,
    #[serde(default)]
    pub planar_intfs: Vec<PlanarIntfEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanarIntfEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ipv4_addr: String,
    #[serde(default)]
    pub ipv6_addr: String,
}

/// Load and convert the topology file at `path`.
pub fn load_host(path: &Path) -> Result<Host, BootstrapError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        BootstrapError::Config(format!("cannot read topology file {}: {}", path.display(), e))
    })?;
    parse_host(&text)
}

/// Parse topology JSON text into a [`Host`].
pub fn parse_host(text: &str) -> Result<Host, BootstrapError> {
    let file: PlanarConfigFile = serde_json::from_str(text)
        .map_err(|e| BootstrapError::Config(format!("topology JSON parse failed: {}", e)))?;
    Ok(host_from_file(file))
}

fn host_from_file(file: PlanarConfigFile) -> Host {
    if file.devices.len() > MAX_DEVICES {
        warn!(
            dropped = file.devices.len() - MAX_DEVICES,
            "topology lists more than {} devices, extras ignored", MAX_DEVICES
        );
    }

    let devices = file
        .devices
        .into_iter()
        .take(MAX_DEVICES)
        .map(|dev| {
            if dev.planar_intfs.len() > MAX_INTERFACES_PER_DEVICE {
                warn!(
                    device = %dev.virtual_intf,
                    dropped = dev.planar_intfs.len() - MAX_INTERFACES_PER_DEVICE,
                    "device lists more than {} planar interfaces, extras ignored",
                    MAX_INTERFACES_PER_DEVICE
                );
            }
            Device {
                virtual_ip: parse_ipv4(&dev.virtual_ip, "virtual_ip"),
                virtual_intf: clamp_str(dev.virtual_intf, "virtual_intf"),
                planar_intfs: dev
                    .planar_intfs
                    .into_iter()
                    .take(MAX_INTERFACES_PER_DEVICE)
                    .map(|pi| PlanarInterface {
                        ipv4: parse_ipv4(&pi.ipv4_addr, "ipv4_addr"),
                        ipv6: parse_ipv6(&pi.ipv6_addr),
                        id: clamp_str(pi.id, "id"),
                        name: clamp_str(pi.name, "name"),
                    })
                    .collect(),
            }
        })
        .collect();

    Host {
        host_name: clamp_str(file.host_name, "host_name"),
        host_ip: clamp_str(file.host_ip, "host_ip"),
        devices,
    }
}

/// Convert a [`Host`] back into the file schema, used by the snapshot dump.
pub fn file_from_host(host: &Host) -> PlanarConfigFile {
    PlanarConfigFile {
        host_name: host.host_name.clone(),
        host_ip: host.host_ip.clone(),
        devices: host
            .devices
            .iter()
            .map(|dev| DeviceEntry {
                virtual_intf: dev.virtual_intf.clone(),
                virtual_ip: ip_string(dev.virtual_ip),
                planar_intfs: dev
                    .planar_intfs
                    .iter()
                    .map(|pi| PlanarIntfEntry {
                        id: pi.id.clone(),
                        name: pi.name.clone(),
                        ipv4_addr: ip_string(pi.ipv4),
                        ipv6_addr: if pi.ipv6.is_unspecified() {
                            String::new()
                        } else {
                            pi.ipv6.to_string()
                        },
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn ip_string(ip: Ipv4Addr) -> String {
    if ip.is_unspecified() {
        String::new()
    } else {
        ip.to_string()
    }
}

/// Truncate a string field to the wire cap, keeping a valid UTF-8 boundary.
fn clamp_str(mut s: String, field: &str) -> String {
    if s.len() > MAX_STRING_FIELD {
        warn!(field, len = s.len(), "string field exceeds {} bytes, truncated", MAX_STRING_FIELD);
        let mut end = MAX_STRING_FIELD;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// Parse a dotted IPv4, falling back to the zero sentinel on failure.
fn parse_ipv4(s: &str, field: &str) -> Ipv4Addr {
    if s.is_empty() {
        return Ipv4Addr::UNSPECIFIED;
    }
    s.parse().unwrap_or_else(|_| {
        warn!(field, value = s, "unparseable IPv4 address, treating as unset");
        Ipv4Addr::UNSPECIFIED
    })
}

fn parse_ipv6(s: &str) -> Ipv6Addr {
    if s.is_empty() {
        return Ipv6Addr::UNSPECIFIED;
    }
    s.parse().unwrap_or_else(|_| {
        warn!(value = s, "unparseable IPv6 address, treating as unset");
        Ipv6Addr::UNSPECIFIED
    })
}
