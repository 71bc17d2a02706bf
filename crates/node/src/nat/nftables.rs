//! Kernel table-engine backend.
//!
//! Renders rules as `nft add rule ip nat …`. The `nat` table and its three
//! base chains (standard NAT hook priorities: postrouting 100, output 0,
//! input 0) are materialized at most once per process, and only if absent.
//! `nft add rule` happily inserts duplicates, so `ensure` probes by listing
//! the chain and matching the rule's rendered components before adding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use anp_common::BootstrapError;

use super::backend::{CommandRunner, NatBackend, RuleOutcome};
use super::{AddrMatch, Iface, NatAction, NatRule, NAT_TABLE};

/// (chain name, hook, priority) for the chains this backend manages.
const CHAINS: [(&str, &str, &str); 3] = [
    ("POSTROUTING", "postrouting", "100"),
    ("OUTPUT", "output", "0"),
    ("INPUT", "input", "0"),
];

pub struct NftablesBackend {
    runner: Arc<dyn CommandRunner>,
    setup: OnceLock<()>,
    owns_table: AtomicBool,
}

impl NftablesBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        NftablesBackend {
            runner,
            setup: OnceLock::new(),
            owns_table: AtomicBool::new(false),
        }
    }

    /// Create the nat table and chains if they do not exist. Best effort:
    /// failures are logged here and resurface as add-rule errors.
    fn setup_tables(&self) {
        let table_present = self
            .runner
            .run("nft", &["list", "table", "ip", NAT_TABLE])
            .map(|out| out.success)
            .unwrap_or(false);

        if !table_present {
            match self.runner.run("nft", &["add", "table", "ip", NAT_TABLE]) {
                Ok(out) if out.success => {
                    self.owns_table.store(true, Ordering::Relaxed);
                    debug!("created nat table");
                }
                Ok(out) => warn!(stderr = out.stderr.trim(), "creating nat table failed"),
                Err(e) => warn!(error = %e, "creating nat table failed"),
            }
        }

        for (chain, hook, priority) in CHAINS {
            let chain_present = self
                .runner
                .run("nft", &["list", "chain", "ip", NAT_TABLE, chain])
                .map(|out| out.success)
                .unwrap_or(false);
            if chain_present {
                continue;
            }
            let chain_def = [
                "add", "chain", "ip", NAT_TABLE, chain, "{", "type", "nat", "hook", hook,
                "priority", priority, ";", "}",
            ];
            match self.runner.run("nft", &chain_def) {
                Ok(out) if out.success => debug!(chain, "created nat chain"),
                Ok(out) => warn!(chain, stderr = out.stderr.trim(), "creating chain failed"),
                Err(e) => warn!(chain, error = %e, "creating chain failed"),
            }
        }
    }

    /// The three rendered components a chain listing must contain on one
    /// line for the rule to count as present.
    fn rule_components(rule: &NatRule) -> [String; 3] {
        let addr = match rule.addr {
            AddrMatch::Source(ip) => format!("saddr {}", ip),
            AddrMatch::Dest(ip) => format!("daddr {}", ip),
        };
        let iface = match &rule.iface {
            Iface::In(name) => name.clone(),
            Iface::Out(name) => name.clone(),
        };
        let action = match rule.action {
            NatAction::Snat(ip) => format!("snat to {}", ip),
            NatAction::Dnat(ip) => format!("dnat to {}", ip),
        };
        [addr, iface, action]
    }

    /// Expression tokens appended after `add rule ip nat <chain>`.
    fn rule_expr(rule: &NatRule) -> Vec<String> {
        let mut expr = vec!["ip".to_string()];
        match rule.addr {
            AddrMatch::Source(ip) => {
                expr.push("saddr".to_string());
                expr.push(ip.to_string());
            }
            AddrMatch::Dest(ip) => {
                expr.push("daddr".to_string());
                expr.push(ip.to_string());
            }
        }
        match &rule.iface {
            Iface::In(name) => {
                expr.push("iif".to_string());
                expr.push(name.clone());
            }
            Iface::Out(name) => {
                expr.push("oif".to_string());
                expr.push(name.clone());
            }
        }
        match rule.action {
            NatAction::Snat(ip) => {
                expr.push("snat".to_string());
                expr.push("to".to_string());
                expr.push(ip.to_string());
            }
            NatAction::Dnat(ip) => {
                expr.push("dnat".to_string());
                expr.push("to".to_string());
                expr.push(ip.to_string());
            }
        }
        expr
    }
}

impl NatBackend for NftablesBackend {
    fn name(&self) -> &'static str {
        "nftables"
    }

    fn ensure(&self, rule: &NatRule) -> Result<RuleOutcome, BootstrapError> {
        self.setup.get_or_init(|| self.setup_tables());

        let chain = rule.chain.as_str();
        let listing = self
            .runner
            .run("nft", &["list", "chain", "ip", NAT_TABLE, chain])?;
        if listing.success {
            let components = Self::rule_components(rule);
            let present = listing
                .stdout
                .lines()
                .any(|line| components.iter().all(|c| line.contains(c.as_str())));
            if present {
                debug!(%rule, "chain listing shows rule present");
                return Ok(RuleOutcome::Skipped);
            }
        }

        let mut args: Vec<String> = vec![
            "add".to_string(),
            "rule".to_string(),
            "ip".to_string(),
            NAT_TABLE.to_string(),
            chain.to_string(),
        ];
        args.extend(Self::rule_expr(rule));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let result = self.runner.run("nft", &arg_refs)?;
        if result.success {
            Ok(RuleOutcome::Applied)
        } else {
            Err(BootstrapError::Backend(format!(
                "nft add rule failed for [{}]: {}",
                rule,
                result.stderr.trim()
            )))
        }
    }

    fn teardown_if_owned(&self) -> Result<(), BootstrapError> {
        if !self.owns_table.load(Ordering::Relaxed) {
            return Ok(());
        }
        let result = self
            .runner
            .run("nft", &["delete", "table", "ip", NAT_TABLE])?;
        if result.success {
            Ok(())
        } else {
            Err(BootstrapError::Backend(format!(
                "nft delete table failed: {}",
                result.stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::backend::testing::FakeRunner;
    use super::*;
    use std::net::Ipv4Addr;

    fn rule() -> NatRule {
        NatRule::ingress_snat(
            Ipv4Addr::new(192, 168, 2, 1),
            Ipv4Addr::new(10, 1, 0, 5),
            "eth1",
        )
    }

    #[test]
    fn test_rule_expr_rendering() {
        let expr = NftablesBackend::rule_expr(&rule());
        assert_eq!(
            expr,
            vec!["ip", "saddr", "10.1.0.5", "iif", "eth1", "snat", "to", "192.168.2.1"]
        );
    }

    #[test]
    fn test_fresh_system_sets_up_then_adds() {
        let runner = Arc::new(FakeRunner::new(vec![
            // Nothing exists yet: listings fail until we create things.
            ("list table ip nat", FakeRunner::fail("No such file or directory")),
            ("list chain ip nat", FakeRunner::fail("No such file or directory")),
        ]));
        let backend = NftablesBackend::new(runner.clone());

        let outcome = backend.ensure(&rule()).expect("ensure");
        assert_eq!(outcome, RuleOutcome::Applied);
        assert!(backend.owns_table.load(Ordering::Relaxed));

        let calls = runner.joined_calls();
        assert!(calls.iter().any(|c| c.contains("add table ip nat")));
        // All three chains materialized with their hooks.
        for hook in ["postrouting", "output", "input"] {
            assert!(
                calls.iter().any(|c| c.contains(&format!("hook {}", hook))),
                "missing chain for hook {}",
                hook
            );
        }
        assert!(calls.iter().any(|c| c.contains("add rule ip nat INPUT")));
    }

    #[test]
    fn test_setup_runs_once() {
        let runner = Arc::new(FakeRunner::new(vec![
            ("list table ip nat", FakeRunner::fail("no table")),
            ("list chain ip nat", FakeRunner::fail("no chain")),
        ]));
        let backend = NftablesBackend::new(runner.clone());

        backend.ensure(&rule()).expect("first");
        backend.ensure(&rule()).expect("second");

        let table_adds = runner
            .joined_calls()
            .iter()
            .filter(|c| c.contains("add table ip nat"))
            .count();
        assert_eq!(table_adds, 1);
    }

    #[test]
    fn test_present_rule_skipped() {
        let listing = "table ip nat {\n\
                       \tchain INPUT {\n\
                       \t\ttype nat hook input priority 0; policy accept;\n\
                       \t\tip saddr 10.1.0.5 iif \"eth1\" snat to 192.168.2.1\n\
                       \t}\n}";
        let runner = Arc::new(FakeRunner::new(vec![
            ("list table ip nat", FakeRunner::ok("table ip nat")),
            ("list chain ip nat INPUT", FakeRunner::ok(listing)),
        ]));
        let backend = NftablesBackend::new(runner.clone());

        let outcome = backend.ensure(&rule()).expect("ensure");
        assert_eq!(outcome, RuleOutcome::Skipped);
        assert!(!runner.joined_calls().iter().any(|c| c.contains("add rule")));
    }

    #[test]
    fn test_teardown_only_if_owned() {
        // Table pre-existed: teardown must not touch it.
        let runner = Arc::new(FakeRunner::new(vec![
            ("list table ip nat", FakeRunner::ok("table ip nat")),
            ("list chain ip nat", FakeRunner::ok("chain")),
        ]));
        let backend = NftablesBackend::new(runner.clone());
        backend.ensure(&rule()).expect("ensure");
        backend.teardown_if_owned().expect("teardown");
        assert!(!runner.joined_calls().iter().any(|c| c.contains("delete table")));

        // Table created by us: teardown removes it.
        let runner = Arc::new(FakeRunner::new(vec![
            ("list table ip nat", FakeRunner::fail("no table")),
            ("list chain ip nat", FakeRunner::fail("no chain")),
        ]));
        let backend = NftablesBackend::new(runner.clone());
        backend.ensure(&rule()).expect("ensure");
        backend.teardown_if_owned().expect("teardown");
        assert!(runner.joined_calls().iter().any(|c| c.contains("delete table ip nat")));
    }
}
