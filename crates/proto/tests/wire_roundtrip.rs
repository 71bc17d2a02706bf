//! Codec integration tests: golden wire bytes for a known host, bijection
//! over representative inputs, and rejection of malformed payloads.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use anp_common::{Device, Host, PlanarInterface};
use anp_proto::{
    decode_all_hosts, decode_host_exact, encode_all_hosts, encode_host_vec, WireError,
};

fn intf(id: &str, name: &str, ipv4: [u8; 4], ipv6: &str) -> PlanarInterface {
    PlanarInterface {
        id: id.to_string(),
        name: name.to_string(),
        ipv4: Ipv4Addr::from(ipv4),
        ipv6: if ipv6.is_empty() {
            Ipv6Addr::UNSPECIFIED
        } else {
            ipv6.parse().unwrap()
        },
    }
}

/// The two-interface host from the reference scenario: VIP 192.168.1.1
/// fronting eth1/eth2.
fn reference_host() -> Host {
    Host {
        host_name: "gpu-a".to_string(),
        host_ip: "10.0.0.2".to_string(),
        devices: vec![Device {
            virtual_intf: "vip0".to_string(),
            virtual_ip: Ipv4Addr::new(192, 168, 1, 1),
            planar_intfs: vec![
                intf("p0", "eth1", [10, 1, 0, 1], ""),
                intf("p1", "eth2", [10, 2, 0, 1], ""),
            ],
        }],
    }
}

/// Hand-assembled expected encoding of [`reference_host`].
fn golden_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    let mut put_str = |buf: &mut Vec<u8>, s: &str| {
        buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
        buf.extend_from_slice(s.as_bytes());
    };

    put_str(&mut buf, "gpu-a");
    put_str(&mut buf, "10.0.0.2");
    buf.extend_from_slice(&1u32.to_be_bytes()); // one device

    put_str(&mut buf, "vip0");
    buf.extend_from_slice(&[192, 168, 1, 1]);
    buf.extend_from_slice(&2u32.to_be_bytes()); // two planar interfaces

    put_str(&mut buf, "p0");
    put_str(&mut buf, "eth1");
    buf.extend_from_slice(&[10, 1, 0, 1]);
    buf.extend_from_slice(&[0u8; 16]);

    put_str(&mut buf, "p1");
    put_str(&mut buf, "eth2");
    buf.extend_from_slice(&[10, 2, 0, 1]);
    buf.extend_from_slice(&[0u8; 16]);

    buf
}

#[test]
fn reference_host_encodes_byte_exact() {
    assert_eq!(encode_host_vec(&reference_host()), golden_bytes());
}

#[test]
fn reference_host_round_trips_byte_for_byte() {
    let first = encode_host_vec(&reference_host());
    let decoded = decode_host_exact(&first).expect("decode");
    let second = encode_host_vec(&decoded);
    assert_eq!(first, second);
    assert_eq!(decoded, reference_host());
}

#[test]
fn ipv6_addresses_survive_the_wire() {
    let mut host = reference_host();
    host.devices[0].planar_intfs[1].ipv6 = "fd00:1234::9".parse().unwrap();
    let decoded = decode_host_exact(&encode_host_vec(&host)).expect("decode");
    assert_eq!(decoded, host);
}

#[test]
fn cluster_round_trips_as_a_set() {
    let mut all = HashMap::new();
    for (name, ip, vip, planar) in [
        ("gpu-a", "10.0.0.2", [192, 168, 1, 1], [10, 1, 0, 1]),
        ("gpu-b", "10.0.0.5", [192, 168, 2, 1], [10, 1, 0, 5]),
        ("gpu-c", "10.0.0.9", [192, 168, 3, 1], [10, 1, 0, 9]),
    ] {
        let host = Host {
            host_name: name.to_string(),
            host_ip: ip.to_string(),
            devices: vec![Device {
                virtual_intf: "vip0".to_string(),
                virtual_ip: Ipv4Addr::from(vip),
                planar_intfs: vec![intf("p0", "eth1", planar, "")],
            }],
        };
        all.insert(host.host_ip.clone(), host);
    }

    let decoded = decode_all_hosts(&encode_all_hosts(&all)).expect("decode");
    assert_eq!(decoded, all);
}

#[test]
fn hosts_with_maximum_shape_round_trip() {
    // A host at the model caps: 8 devices of 64 interfaces each.
    let devices: Vec<Device> = (0..8)
        .map(|d| Device {
            virtual_intf: format!("vip{}", d),
            virtual_ip: Ipv4Addr::new(192, 168, d as u8 + 1, 1),
            planar_intfs: (0..64)
                .map(|i| intf(&format!("p{}", i), &format!("eth{}", i), [10, d as u8, i as u8, 1], ""))
                .collect(),
        })
        .collect();
    let host = Host {
        host_name: "dense".to_string(),
        host_ip: "10.0.0.3".to_string(),
        devices,
    };

    let decoded = decode_host_exact(&encode_host_vec(&host)).expect("decode");
    assert_eq!(decoded, host);
}

#[test]
fn every_truncation_point_is_rejected() {
    let buf = encode_host_vec(&reference_host());
    for cut in 0..buf.len() {
        let err = decode_host_exact(&buf[..cut]).expect_err("truncated input accepted");
        assert!(
            matches!(err, WireError::Truncated(_)),
            "cut {} produced {:?}",
            cut,
            err
        );
    }
}

#[test]
fn trailing_garbage_is_rejected_on_both_frames() {
    let mut single = encode_host_vec(&reference_host());
    single.push(0xFF);
    assert!(matches!(
        decode_host_exact(&single),
        Err(WireError::TrailingBytes(1))
    ));

    let mut all = HashMap::new();
    let host = reference_host();
    all.insert(host.host_ip.clone(), host);
    let mut cluster = encode_all_hosts(&all);
    cluster.extend_from_slice(&[1, 2, 3]);
    assert!(matches!(
        decode_all_hosts(&cluster),
        Err(WireError::TrailingBytes(3))
    ));
}
