// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Packet-filter rule entities — grounded on
//! `original_source/firewall/nat_rule.go` and `forward_rule.go`.

use serde::{Deserialize, Serialize};

/// A single port-exposure rule in the `expose-ports` NAT chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatRule {
    pub container_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: String,
    /// Overlay network driver that owns this container's networking, if any.
    /// Present on the newer data model; absent on the older one retained in
    /// `original_source/` — this crate always requires it (defaulting to
    /// empty), see DESIGN.md "NatRule.driver".
    #[serde(default)]
    pub driver: String,
}

impl NatRule {
    /// Renders the canonical `iptables-save`-style line for the NAT chain.
    pub fn render(&self) -> String {
        format!(
            "-A expose-ports -p {} -m {} --dport {} -j DNAT --to-destination {}:{}",
            self.protocol, self.protocol, self.host_port, self.container_ip, self.container_port
        )
    }
}

/// A single inbound-forward rule in the `container-inbound` chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRule {
    pub container_ip: String,
    pub container_port: u16,
    pub protocol: String,
    #[serde(default)]
    pub driver: String,
}

impl ForwardRule {
    pub fn render(&self) -> String {
        format!(
            "-A container-inbound -d {} -p {} -m {} --dport {} -j ACCEPT",
            self.container_ip, self.protocol, self.protocol, self.container_port
        )
    }

    /// The managed overlay network (Calico) programs its own forwarding
    /// rules; this agent must not duplicate or fight them.
    pub fn owned_by_overlay(&self, overlay_driver: &str) -> bool {
        !overlay_driver.is_empty() && self.driver == overlay_driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nat_rule_renders_dnat_line() {
        let rule = NatRule {
            container_ip: "10.0.0.5".into(),
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".into(),
            driver: String::new(),
        };
        assert_eq!(
            rule.render(),
            "-A expose-ports -p tcp -m tcp --dport 8080 -j DNAT --to-destination 10.0.0.5:80"
        );
    }

    #[test]
    fn forward_rule_owned_by_managed_overlay_is_skipped() {
        let rule = ForwardRule {
            container_ip: "10.0.0.5".into(),
            container_port: 80,
            protocol: "tcp".into(),
            driver: "calico-node".into(),
        };
        assert!(rule.owned_by_overlay("calico-node"));
        assert!(!rule.owned_by_overlay(""));
    }
}
