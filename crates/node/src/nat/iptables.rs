//! Classic packet-filter backend.
//!
//! Renders rules as `iptables -t nat` invocations. Idempotence comes from
//! the tool itself: `-C` checks for an identical rule and exits zero when
//! present, so `ensure` appends with `-A` only after a failed check.

use std::sync::Arc;

use tracing::debug;

use anp_common::BootstrapError;

use super::backend::{CommandRunner, NatBackend, RuleOutcome};
use super::{AddrMatch, Iface, NatAction, NatRule, NAT_TABLE};

pub struct IptablesBackend {
    runner: Arc<dyn CommandRunner>,
}

impl IptablesBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        IptablesBackend { runner }
    }
}

/// Argument vector for `iptables`, with `action` being `-C` or `-A`.
fn rule_args(rule: &NatRule, action: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-t".to_string(),
        NAT_TABLE.to_string(),
        action.to_string(),
        rule.chain.as_str().to_string(),
    ];
    match rule.addr {
        AddrMatch::Source(ip) => {
            args.push("-s".to_string());
            args.push(ip.to_string());
        }
        AddrMatch::Dest(ip) => {
            args.push("-d".to_string());
            args.push(ip.to_string());
        }
    }
    match &rule.iface {
        Iface::In(name) => {
            args.push("-i".to_string());
            args.push(name.clone());
        }
        Iface::Out(name) => {
            args.push("-o".to_string());
            args.push(name.clone());
        }
    }
    match rule.action {
        NatAction::Snat(ip) => {
            args.push("-j".to_string());
            args.push("SNAT".to_string());
            args.push("--to-source".to_string());
            args.push(ip.to_string());
        }
        NatAction::Dnat(ip) => {
            args.push("-j".to_string());
            args.push("DNAT".to_string());
            args.push("--to-destination".to_string());
            args.push(ip.to_string());
        }
    }
    args
}

impl NatBackend for IptablesBackend {
    fn name(&self) -> &'static str {
        "iptables"
    }

    fn ensure(&self, rule: &NatRule) -> Result<RuleOutcome, BootstrapError> {
        let check: Vec<String> = rule_args(rule, "-C");
        let check_refs: Vec<&str> = check.iter().map(String::as_str).collect();
        let probe = self.runner.run("iptables", &check_refs)?;
        if probe.success {
            debug!(%rule, "iptables check found rule present");
            return Ok(RuleOutcome::Skipped);
        }

        let append: Vec<String> = rule_args(rule, "-A");
        let append_refs: Vec<&str> = append.iter().map(String::as_str).collect();
        let result = self.runner.run("iptables", &append_refs)?;
        if result.success {
            Ok(RuleOutcome::Applied)
        } else {
            Err(BootstrapError::Backend(format!(
                "iptables append failed for [{}]: {}",
                rule,
                result.stderr.trim()
            )))
        }
    }

    fn teardown_if_owned(&self) -> Result<(), BootstrapError> {
        // Rules live in the system's own nat chains; nothing here was
        // created by this backend, so nothing is torn down.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::testing::FakeRunner;
    use super::*;
    use std::net::Ipv4Addr;

    fn rule() -> NatRule {
        NatRule::egress_snat(
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(10, 1, 0, 1),
            "eth1",
        )
    }

    #[test]
    fn test_rendered_command() {
        let args = rule_args(&rule(), "-A");
        assert_eq!(
            args,
            vec![
                "-t", "nat", "-A", "POSTROUTING", "-s", "192.168.1.1", "-o", "eth1", "-j",
                "SNAT", "--to-source", "10.1.0.1",
            ]
        );
    }

    #[test]
    fn test_rendered_dnat_command() {
        let dnat = NatRule::vip_dnat(
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(10, 1, 0, 1),
            "eth1",
        );
        let args = rule_args(&dnat, "-C");
        assert_eq!(
            args,
            vec![
                "-t", "nat", "-C", "OUTPUT", "-d", "192.168.1.1", "-o", "eth1", "-j", "DNAT",
                "--to-destination", "10.1.0.1",
            ]
        );
    }

    #[test]
    fn test_ensure_appends_when_absent() {
        let runner = Arc::new(FakeRunner::new(vec![
            ("-C POSTROUTING", FakeRunner::fail("No chain/target/match by that name")),
        ]));
        let backend = IptablesBackend::new(runner.clone());

        let outcome = backend.ensure(&rule()).expect("ensure");
        assert_eq!(outcome, RuleOutcome::Applied);

        let calls = runner.joined_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("-C POSTROUTING"));
        assert!(calls[1].contains("-A POSTROUTING"));
    }

    #[test]
    fn test_ensure_skips_when_present() {
        let runner = Arc::new(FakeRunner::new(vec![("-C POSTROUTING", FakeRunner::ok(""))]));
        let backend = IptablesBackend::new(runner.clone());

        let outcome = backend.ensure(&rule()).expect("ensure");
        assert_eq!(outcome, RuleOutcome::Skipped);
        assert_eq!(runner.joined_calls().len(), 1);
    }

    #[test]
    fn test_ensure_reports_append_failure() {
        let runner = Arc::new(FakeRunner::new(vec![
            ("-C POSTROUTING", FakeRunner::fail("absent")),
            ("-A POSTROUTING", FakeRunner::fail("permission denied")),
        ]));
        let backend = IptablesBackend::new(runner);

        let err = backend.ensure(&rule()).unwrap_err();
        assert!(matches!(err, BootstrapError::Backend(_)), "{:?}", err);
    }

    #[test]
    fn test_ensure_twice_converges() {
        // First ensure applies; a second run against a kernel that now has
        // the rule (check succeeds) skips. Final state identical.
        let absent = Arc::new(FakeRunner::new(vec![
            ("-C POSTROUTING", FakeRunner::fail("absent")),
        ]));
        let backend = IptablesBackend::new(absent);
        assert_eq!(backend.ensure(&rule()).unwrap(), RuleOutcome::Applied);

        let present = Arc::new(FakeRunner::new(vec![("-C POSTROUTING", FakeRunner::ok(""))]));
        let backend = IptablesBackend::new(present);
        assert_eq!(backend.ensure(&rule()).unwrap(), RuleOutcome::Skipped);
    }
}
