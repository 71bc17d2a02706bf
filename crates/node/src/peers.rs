//! Peer-list ingestion, local-address discovery, and root election.
//!
//! The peer list is a plain text file, one dotted IPv4 per line. Every host
//! in the cluster reads the same file and independently reaches the same
//! conclusion about who the root is: the entry with the numerically lowest
//! 32-bit value. Election is stateless and deterministic, so no messages
//! are needed to agree on it.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;

use tracing::warn;

use anp_common::BootstrapError;

/// Maximum peer-list entries honored; extra lines are ignored with a warning.
pub const MAX_PEERS: usize = 64;

/// Read and parse the peer-list file.
pub fn read_peer_list(path: &Path) -> Result<Vec<Ipv4Addr>, BootstrapError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        BootstrapError::Config(format!("cannot read peer list {}: {}", path.display(), e))
    })?;
    parse_peer_list(&text)
}

/// Parse peer-list text: blank lines dropped, surrounding whitespace and CR
/// trimmed, order preserved. An unparseable non-blank line is a
/// configuration error; an empty result is too.
pub fn parse_peer_list(text: &str) -> Result<Vec<Ipv4Addr>, BootstrapError> {
    let mut peers = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if peers.len() == MAX_PEERS {
            warn!(lineno = lineno + 1, "peer list has more than {} entries, rest ignored", MAX_PEERS);
            break;
        }
        let ip: Ipv4Addr = line.parse().map_err(|_| {
            BootstrapError::Config(format!("peer list line {}: bad IPv4 {:?}", lineno + 1, line))
        })?;
        if peers.contains(&ip) {
            // Duplicates are tolerated for election but inflate the leaf
            // count the root waits for.
            warn!(%ip, lineno = lineno + 1, "duplicate peer-list entry");
        }
        peers.push(ip);
    }

    if peers.is_empty() {
        return Err(BootstrapError::Config("peer list contains no addresses".to_string()));
    }
    Ok(peers)
}

/// First peer-list entry that is an address of a local interface.
///
/// Detection is by bind-probe: binding a UDP socket to `(candidate, 0)`
/// succeeds exactly when the candidate is assigned to this host.
pub fn find_local_ip(peers: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    peers.iter().copied().find(|ip| is_local(*ip))
}

fn is_local(ip: Ipv4Addr) -> bool {
    UdpSocket::bind(SocketAddr::from((ip, 0))).is_ok()
}

/// Deterministic root election: the entry with the lowest 32-bit value.
/// With duplicate entries the first occurrence wins.
pub fn elect_root(peers: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    let mut best: Option<Ipv4Addr> = None;
    for &ip in peers {
        match best {
            Some(b) if u32::from(ip) >= u32::from(b) => {}
            _ => best = Some(ip),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let peers = parse_peer_list("10.0.0.5\n10.0.0.2\n10.0.0.9\n").expect("parse");
        assert_eq!(
            peers,
            vec![
                Ipv4Addr::new(10, 0, 0, 5),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 9),
            ]
        );
    }

    #[test]
    fn test_parse_tolerates_crlf_and_blanks() {
        let peers = parse_peer_list("10.0.0.5\r\n\n  10.0.0.2  \r\n\n").expect("parse");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1], Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_parse_rejects_garbage_line() {
        let err = parse_peer_list("10.0.0.5\nnot-an-ip\n").unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse_peer_list("\n\n").is_err());
    }

    #[test]
    fn test_parse_caps_entries() {
        let text: String = (0..70).map(|i| format!("10.0.{}.1\n", i)).collect();
        let peers = parse_peer_list(&text).expect("parse");
        assert_eq!(peers.len(), MAX_PEERS);
    }

    #[test]
    fn test_election_lowest_wins_everywhere() {
        // Every permutation elects the same root.
        let base = [
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 9),
        ];
        let perms: [[usize; 3]; 6] =
            [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for p in perms {
            let order: Vec<Ipv4Addr> = p.iter().map(|&i| base[i]).collect();
            assert_eq!(elect_root(&order), Some(Ipv4Addr::new(10, 0, 0, 2)));
        }
    }

    #[test]
    fn test_election_is_numeric_not_lexical() {
        // "9.x" sorts after "10.x" as a string but before it numerically.
        let peers = [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(9, 200, 0, 1)];
        assert_eq!(elect_root(&peers), Some(Ipv4Addr::new(9, 200, 0, 1)));
    }

    #[test]
    fn test_election_empty() {
        assert_eq!(elect_root(&[]), None);
    }

    #[test]
    fn test_find_local_ip_loopback() {
        let peers = [Ipv4Addr::new(203, 0, 113, 1), Ipv4Addr::LOCALHOST];
        assert_eq!(find_local_ip(&peers), Some(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_find_local_ip_none_match() {
        // TEST-NET-3 addresses are never assigned locally.
        let peers = [Ipv4Addr::new(203, 0, 113, 1), Ipv4Addr::new(203, 0, 113, 2)];
        assert_eq!(find_local_ip(&peers), None);
    }
}
