//! Backend abstraction for rule installation.
//!
//! A [`NatBackend`] owns idempotence: `ensure` probes the kernel state and
//! appends only when the rule is absent, so running the programmer twice
//! leaves the same final state. Two concrete backends exist (classic
//! iptables and the kernel table engine); which one a host gets is decided
//! by a single probe of the classic tool's version string, cached for the
//! process lifetime.
//!
//! All external tool invocations flow through [`CommandRunner`], so tests
//! drive the backends with a scripted fake instead of a live kernel.

use std::process::Command;
use std::sync::{Arc, OnceLock};

use tracing::warn;

use anp_common::BootstrapError;

use super::NatRule;

/// What `ensure` did about a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule was absent and has been appended.
    Applied,
    /// The rule was already present; nothing was changed.
    Skipped,
}

/// A packet-filter backend able to idempotently realize [`NatRule`]s.
pub trait NatBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Make the rule present, probing first so repeats are no-ops.
    fn ensure(&self, rule: &NatRule) -> Result<RuleOutcome, BootstrapError>;

    /// Remove infrastructure this backend created itself (and only that).
    fn teardown_if_owned(&self) -> Result<(), BootstrapError>;
}

/// Captured result of one external tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Executes external packet-filter tools. The one seam between rule
/// programming and the system.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, BootstrapError>;
}

/// Production runner: spawns the tool and waits for it.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, BootstrapError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| BootstrapError::Backend(format!("spawn {}: {}", program, e)))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The two supported rule-installation mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    IptablesLegacy,
    Nftables,
}

/// Raw probe: classify the backend from `iptables --version`.
///
/// The version string mentions `nf_tables` when the classic binary is the
/// nft shim, and `legacy` for the real thing. Anything else (including a
/// missing binary) falls back to the legacy renderer with a warning.
pub fn probe_backend(runner: &dyn CommandRunner) -> BackendKind {
    match runner.run("iptables", &["--version"]) {
        Ok(out) if out.success && out.stdout.contains("nf_tables") => BackendKind::Nftables,
        Ok(out) if out.success && out.stdout.contains("legacy") => BackendKind::IptablesLegacy,
        Ok(out) => {
            warn!(version = out.stdout.trim(), "unrecognized iptables flavor, assuming legacy");
            BackendKind::IptablesLegacy
        }
        Err(e) => {
            warn!(error = %e, "iptables probe failed, assuming legacy");
            BackendKind::IptablesLegacy
        }
    }
}

/// Probe once per process; every later call returns the cached answer.
pub fn detect_backend(runner: &dyn CommandRunner) -> BackendKind {
    static CACHE: OnceLock<BackendKind> = OnceLock::new();
    *CACHE.get_or_init(|| probe_backend(runner))
}

/// Probe (cached) and construct the matching backend.
pub fn make_backend(runner: Arc<dyn CommandRunner>) -> Box<dyn NatBackend> {
    match detect_backend(runner.as_ref()) {
        BackendKind::IptablesLegacy => Box::new(super::iptables::IptablesBackend::new(runner)),
        BackendKind::Nftables => Box::new(super::nftables::NftablesBackend::new(runner)),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeRunner;
    use super::*;

    #[test]
    fn test_probe_nft_shim() {
        let runner = FakeRunner::new(vec![(
            "iptables --version",
            FakeRunner::ok("iptables v1.8.7 (nf_tables)"),
        )]);
        assert_eq!(probe_backend(&runner), BackendKind::Nftables);
    }

    #[test]
    fn test_probe_legacy() {
        let runner = FakeRunner::new(vec![(
            "iptables --version",
            FakeRunner::ok("iptables v1.8.7 (legacy)"),
        )]);
        assert_eq!(probe_backend(&runner), BackendKind::IptablesLegacy);
    }

    #[test]
    fn test_probe_unknown_falls_back_to_legacy() {
        let runner = FakeRunner::new(vec![(
            "iptables --version",
            FakeRunner::ok("iptables v1.4.21"),
        )]);
        assert_eq!(probe_backend(&runner), BackendKind::IptablesLegacy);
    }

    #[test]
    fn test_probe_missing_tool_falls_back_to_legacy() {
        struct NoTool;
        impl CommandRunner for NoTool {
            fn run(&self, _: &str, _: &[&str]) -> Result<CommandOutput, BootstrapError> {
                Err(BootstrapError::Backend("not found".to_string()))
            }
        }
        assert_eq!(probe_backend(&NoTool), BackendKind::IptablesLegacy);
    }

    #[test]
    fn test_detect_backend_is_cached() {
        // Whatever the first probe in this process said, later calls must
        // agree without re-probing (the fake would answer legacy).
        let runner = FakeRunner::new(vec![(
            "iptables --version",
            FakeRunner::ok("iptables v1.8.7 (legacy)"),
        )]);
        let first = detect_backend(&runner);
        let second = detect_backend(&runner);
        assert_eq!(first, second);
    }
}
