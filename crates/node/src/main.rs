//! # Planar Bootstrap Entry Point
//!
//! ```text
//! anp-bootstrap <peer-list-file>
//! ```
//!
//! Every host in the cluster runs the same binary with the same peer-list
//! file. Each reads the list, finds itself in it, and independently elects
//! the lowest address as root. The root gathers every leaf's planar
//! configuration, merges, and redistributes; leaves send theirs and wait
//! for the merged view. Afterwards every host programs its own NAT rules
//! and dumps a composite snapshot for inspection.
//!
//! Exit codes: 0 on success (rule-installation failures only warn),
//! 2 for configuration errors, 3 for protocol violations fatal to this
//! host, 4 for unrecoverable runtime failures such as a root bind error.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn, Level};

use anp_common::{planar_config, BootstrapError, HostDb, NodeConfig};
use anp_node::bootstrap::{dump_composite, run_leaf, RootNode};
use anp_node::nat::{
    self,
    backend::{make_backend, SystemRunner},
};
use anp_node::peers::{elect_root, find_local_ip, read_peer_list};

fn main() {
    init_tracing();

    let cfg = match parse_args() {
        Ok(cfg) => cfg,
        Err(usage) => {
            error!("{}", usage);
            std::process::exit(anp_common::error::EXIT_CONFIG);
        }
    };
    if let Err(e) = cfg.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(anp_common::error::EXIT_CONFIG);
    }

    if let Err(e) = run(&cfg) {
        error!("bootstrap failed: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Log to stderr with file/line context; `ANP_LOG` picks the level.
fn init_tracing() {
    let level = std::env::var("ANP_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args() -> Result<NodeConfig, String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        return Err(format!("usage: {} <peer-list-file>", args[0]));
    }
    Ok(NodeConfig::new(PathBuf::from(&args[1])))
}

fn run(cfg: &NodeConfig) -> Result<(), BootstrapError> {
    // Who is in the cluster, who are we, who coordinates.
    let peer_list = read_peer_list(&cfg.peer_file)?;
    let local_ip = find_local_ip(&peer_list).ok_or_else(|| {
        BootstrapError::Config(format!(
            "no entry in {} matches a local interface address",
            cfg.peer_file.display()
        ))
    })?;
    let root_ip = elect_root(&peer_list)
        .ok_or_else(|| BootstrapError::Config("empty peer list".to_string()))?;

    let is_root = local_ip == root_ip;
    info!(
        peers = peer_list.len(),
        %local_ip,
        %root_ip,
        role = if is_root { "root" } else { "leaf" },
        "peer list loaded, root elected"
    );

    let db = if is_root {
        let local_host = planar_config::load_host(&cfg.planar_config)?;
        let node = RootNode::bind(SocketAddr::new(IpAddr::V4(local_ip), cfg.port))?;
        node.run(peer_list.len() - 1, local_host, cfg.deadline)?
    } else {
        run_leaf(
            SocketAddr::new(IpAddr::V4(root_ip), cfg.port),
            &cfg.planar_config,
            cfg.connect_retry,
            cfg.deadline,
        )?
    };

    program_and_snapshot(cfg, &db);
    info!(hosts = db.all_hosts.len(), "bootstrap complete");
    Ok(())
}

/// Post-exchange work shared by both roles: install NAT rules and leave a
/// composite snapshot behind. Neither can fail the bootstrap.
fn program_and_snapshot(cfg: &NodeConfig, db: &HostDb) {
    let backend = make_backend(Arc::new(SystemRunner));
    let stats = nat::program(db, backend.as_ref());
    if stats.failed > 0 {
        warn!(failed = stats.failed, "some NAT rules could not be installed");
    }

    match dump_composite(db, &cfg.dump_dir) {
        Ok(path) => info!(path = %path.display(), "composite snapshot written"),
        Err(e) => warn!(error = %e, "composite snapshot not written"),
    }
}
