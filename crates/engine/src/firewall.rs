// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Packet-filter reconciler — grounded on `original_source/firewall/firewall.go`,
//! `nat_rule.go`, and `forward_rule.go`.
//!
//! `firewall.go` in the original only reconciles the NAT chain; the forward
//! chain's apply/delete helpers exist in `forward_rule.go` but are never
//! wired into a single `Perform`. Both chains are named explicitly here,
//! so this module reconciles both as one operation, continuing the original's
//! pure textual diff over `iptables-save` output.

use backup_agent_adapters::packet_filter::{PacketFilter, FORWARD_CHAIN, NAT_CHAIN};
use backup_agent_core::firewall::{ForwardRule, NatRule};
use backup_agent_core::AgentError;

/// Reconciles the `expose-ports` NAT chain against `expected`: deletes any
/// currently-applied line absent from `expected`, then applies any expected
/// line not yet present.
pub async fn reconcile_nat(expected: &[NatRule], filter: &dyn PacketFilter) -> Result<(), AgentError> {
    let wanted: Vec<String> = expected.iter().map(NatRule::render).collect();
    reconcile_chain(&wanted, filter, NAT_CHAIN).await
}

/// Reconciles the `container-inbound` forward chain against `expected`,
/// skipping any rule owned by the managed overlay network — the overlay
/// programs its own forwarding and this agent must not fight it.
pub async fn reconcile_forward(
    expected: &[ForwardRule],
    filter: &dyn PacketFilter,
    overlay_driver: &str,
) -> Result<(), AgentError> {
    let wanted: Vec<String> = expected
        .iter()
        .filter(|r| !r.owned_by_overlay(overlay_driver))
        .map(ForwardRule::render)
        .collect();
    reconcile_chain(&wanted, filter, FORWARD_CHAIN).await
}

async fn reconcile_chain(wanted: &[String], filter: &dyn PacketFilter, chain: &str) -> Result<(), AgentError> {
    let current = filter.current_rules(chain).await?;

    for line in &current {
        if !wanted.iter().any(|w| w == line) {
            filter.delete_rule(line).await?;
        }
    }
    for line in wanted {
        if !current.iter().any(|c| c == line) {
            filter.apply_rule(line).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_adapters::packet_filter::FakePacketFilter;

    fn nat_rule(port: u16) -> NatRule {
        NatRule { container_ip: "10.0.0.5".into(), host_port: port, container_port: 80, protocol: "tcp".into(), driver: String::new() }
    }

    #[tokio::test]
    async fn applies_missing_and_deletes_extra_nat_rules() {
        let filter = FakePacketFilter::new();
        let stale = nat_rule(9999).render();
        filter.seed(NAT_CHAIN, vec![stale.clone()]);

        let expected = vec![nat_rule(8080)];
        reconcile_nat(&expected, &filter).await.unwrap();

        assert_eq!(filter.deleted.lock().as_slice(), [stale]);
        assert_eq!(filter.applied.lock().as_slice(), [nat_rule(8080).render()]);
    }

    #[tokio::test]
    async fn forward_rules_owned_by_the_managed_overlay_are_never_applied() {
        let filter = FakePacketFilter::new();
        let rule = ForwardRule { container_ip: "10.0.0.5".into(), container_port: 80, protocol: "tcp".into(), driver: "calico-node".into() };
        reconcile_forward(&[rule], &filter, "calico-node").await.unwrap();
        assert!(filter.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn already_correct_chain_causes_no_changes() {
        let filter = FakePacketFilter::new();
        let rule = nat_rule(8080);
        filter.seed(NAT_CHAIN, vec![rule.render()]);
        reconcile_nat(&[rule], &filter).await.unwrap();
        assert!(filter.applied.lock().is_empty());
        assert!(filter.deleted.lock().is_empty());
    }
}
