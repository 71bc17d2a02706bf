//! Runtime configuration for the bootstrap daemon.
//!
//! The only required input is the positional peer-list path. Everything else
//! has a compiled default that individual `ANP_*` environment variables can
//! override; unset or empty variables leave the default untouched, and
//! unparseable numeric values warn and fall through.
//!
//! | variable | overrides | default |
//! |----------|-----------|---------|
//! | `ANP_PLANAR_CONFIG` | topology file path | `/etc/ainic_planar_config.json` |
//! | `ANP_BOOTSTRAP_PORT` | control-channel port | `34567` |
//! | `ANP_CONNECT_RETRY_SECS` | leaf reconnect delay | `1` |
//! | `ANP_BOOTSTRAP_DEADLINE_SECS` | overall bootstrap deadline | none (unbounded) |
//! | `ANP_DUMP_DIR` | composite snapshot directory | `/tmp` |

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Canonical location of the per-host topology file.
pub const DEFAULT_PLANAR_CONFIG: &str = "/etc/ainic_planar_config.json";

/// Fixed control-channel port for bootstrap connections.
pub const DEFAULT_PORT: u16 = 34567;

/// Delay between leaf connect attempts, in seconds.
pub const DEFAULT_CONNECT_RETRY_SECS: u64 = 1;

/// Directory receiving the post-bootstrap composite snapshot.
pub const DEFAULT_DUMP_DIR: &str = "/tmp";

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Path to the peer-list file (one IPv4 per line).
    pub peer_file: PathBuf,
    /// Path to the local topology JSON.
    pub planar_config: PathBuf,
    /// TCP port the root listens on and leaves connect to.
    pub port: u16,
    /// Delay between leaf connect attempts.
    pub connect_retry: Duration,
    /// Optional whole-bootstrap deadline. `None` keeps the original
    /// retry-forever behavior.
    pub deadline: Option<Duration>,
    /// Directory for the composite snapshot dump.
    pub dump_dir: PathBuf,
}

impl NodeConfig {
    /// Build a configuration from the positional peer-list argument, then
    /// apply environment overrides on top of the defaults.
    pub fn new(peer_file: PathBuf) -> Self {
        let mut cfg = NodeConfig {
            peer_file,
            planar_config: PathBuf::from(DEFAULT_PLANAR_CONFIG),
            port: DEFAULT_PORT,
            connect_retry: Duration::from_secs(DEFAULT_CONNECT_RETRY_SECS),
            deadline: None,
            dump_dir: PathBuf::from(DEFAULT_DUMP_DIR),
        };
        cfg.apply_env_overrides();
        cfg
    }

    /// Apply `ANP_*` overrides. Only set-and-non-empty variables take effect.
    fn apply_env_overrides(&mut self) {
        if let Ok(s) = std::env::var("ANP_PLANAR_CONFIG") {
            if !s.is_empty() {
                self.planar_config = PathBuf::from(s);
            }
        }
        if let Some(port) = env_parse::<u16>("ANP_BOOTSTRAP_PORT") {
            self.port = port;
        }
        if let Some(secs) = env_parse::<u64>("ANP_CONNECT_RETRY_SECS") {
            self.connect_retry = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("ANP_BOOTSTRAP_DEADLINE_SECS") {
            self.deadline = Some(Duration::from_secs(secs));
        }
        if let Ok(s) = std::env::var("ANP_DUMP_DIR") {
            if !s.is_empty() {
                self.dump_dir = PathBuf::from(s);
            }
        }
    }

    /// Sanity-check the assembled configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.peer_file.as_os_str().is_empty() {
            return Err("peer-list path is empty".to_string());
        }
        if self.port == 0 {
            return Err("bootstrap port cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Parse an env var into a typed value. Unset and empty return `None`;
/// unparseable values warn and return `None`.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok().filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = raw, "unparseable env override ignored");
            None
        }
    }
}
