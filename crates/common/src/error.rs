//! Error taxonomy for the planar bootstrap daemon.
//!
//! Every failure in the system falls into one of six classes, and the class
//! decides the policy: `Config` and `Fatal` terminate the process, `Transient`
//! is retried without bound, `Protocol` is fatal on a leaf but only abandons
//! the offending peer on the root, and `Backend` failures are counted and
//! reported without aborting rule programming.

use thiserror::Error;

/// Process exit code used for configuration failures.
pub const EXIT_CONFIG: i32 = 2;
/// Process exit code used for protocol failures fatal to this process.
pub const EXIT_PROTOCOL: i32 = 3;
/// Process exit code used for unrecoverable runtime failures (bind, OOM).
pub const EXIT_FATAL: i32 = 4;

/// Top-level error type shared across the bootstrap crates.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Unusable startup input: missing peer file, unparseable topology JSON,
    /// or no peer-list entry matching a local interface address.
    #[error("config error: {0}")]
    Config(String),

    /// A violation of the control-channel contract: unexpected TLV type,
    /// malformed payload, or a frame length outside the allowed range.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection before a full read completed.
    /// Treated with `Protocol` policy everywhere.
    #[error("peer closed connection mid-read")]
    PeerClosed,

    /// A packet-filter backend invocation failed. Never fatal; callers
    /// count these and keep going.
    #[error("backend error: {0}")]
    Backend(String),

    /// A retryable socket failure during accept or connect.
    #[error("transient error: {0}")]
    Transient(String),

    /// Unrecoverable runtime failure, e.g. the root cannot bind its port.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl BootstrapError {
    /// Exit code this error maps to when it terminates the process.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapError::Config(_) => EXIT_CONFIG,
            BootstrapError::Protocol(_) | BootstrapError::PeerClosed => EXIT_PROTOCOL,
            BootstrapError::Fatal(_) => EXIT_FATAL,
            BootstrapError::Backend(_) | BootstrapError::Transient(_) => 1,
        }
    }

    /// True for failures the caller is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BootstrapError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(BootstrapError::Config("x".into()).exit_code(), EXIT_CONFIG);
        assert_eq!(BootstrapError::Protocol("x".into()).exit_code(), EXIT_PROTOCOL);
        assert_eq!(BootstrapError::PeerClosed.exit_code(), EXIT_PROTOCOL);
        assert_eq!(BootstrapError::Fatal("x".into()).exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_transient_classification() {
        assert!(BootstrapError::Transient("accept".into()).is_transient());
        assert!(!BootstrapError::Fatal("bind".into()).is_transient());
    }
}
