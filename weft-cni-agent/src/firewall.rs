//! Host firewall rules gating traffic to and from local pods.
//!
//! Rules are identified by name only. The platform firewall is authoritative,
//! nothing is cached here.

use std::fmt;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use tracing::{debug, error, info};

use crate::Result;
use crate::platform::FirewallStore;
use crate::platform::powershell::quote;

pub const INBOUND_RULE_NAME: &str = "accept packets from local pods";
pub const OUTBOUND_RULE_NAME: &str = "accept packets to local pods";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Block,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Allow => f.write_str("Allow"),
            RuleAction::Block => f.write_str("Block"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for RuleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleDirection::Inbound => f.write_str("Inbound"),
            RuleDirection::Outbound => f.write_str("Outbound"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleProtocol {
    Any,
    Tcp,
    Udp,
}

impl fmt::Display for RuleProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleProtocol::Any => f.write_str("Any"),
            RuleProtocol::Tcp => f.write_str("TCP"),
            RuleProtocol::Udp => f.write_str("UDP"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub action: RuleAction,
    pub direction: RuleDirection,
    pub protocol: RuleProtocol,
    pub local_address: Option<Ipv4Network>,
    pub remote_address: Option<Ipv4Network>,
    pub local_ports: Vec<u16>,
    pub remote_ports: Vec<u16>,
}

impl FirewallRule {
    pub fn new(
        name: impl Into<String>,
        direction: RuleDirection,
        action: RuleAction,
        protocol: RuleProtocol,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            direction,
            protocol,
            local_address: None,
            remote_address: None,
            local_ports: Vec::new(),
            remote_ports: Vec::new(),
        }
    }

    pub fn with_local_address(mut self, address: Ipv4Network) -> Self {
        self.local_address = Some(address);
        self
    }

    pub fn with_remote_address(mut self, address: Ipv4Network) -> Self {
        self.remote_address = Some(address);
        self
    }

    pub fn with_local_ports(mut self, ports: &[u16]) -> Self {
        self.local_ports = ports.to_vec();
        self
    }

    pub fn with_remote_ports(mut self, ports: &[u16]) -> Self {
        self.remote_ports = ports.to_vec();
        self
    }

    /// Parameters accepted by `New-NetFirewallRule`.
    pub fn command_string(&self) -> String {
        let name = quote(&self.name);
        let mut cmd = format!(
            "-Name {name} -DisplayName {name} -Direction {} -Action {} -Protocol {}",
            self.direction, self.action, self.protocol
        );
        if let Some(addr) = self.local_address {
            cmd.push_str(&format!(" -LocalAddress {addr}"));
        }
        if let Some(addr) = self.remote_address {
            cmd.push_str(&format!(" -RemoteAddress {addr}"));
        }
        if !self.local_ports.is_empty() {
            cmd.push_str(&format!(" -LocalPort {}", ports_string(&self.local_ports)));
        }
        if !self.remote_ports.is_empty() {
            cmd.push_str(&format!(" -RemotePort {}", ports_string(&self.remote_ports)));
        }
        cmd
    }
}

fn ports_string(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// The two rules admitting all traffic between the local pod subnet and the
/// rest of the host.
pub fn pod_rules(pod_cidr: Ipv4Network) -> [FirewallRule; 2] {
    [
        FirewallRule::new(
            INBOUND_RULE_NAME,
            RuleDirection::Inbound,
            RuleAction::Allow,
            RuleProtocol::Any,
        )
        .with_remote_address(pod_cidr),
        FirewallRule::new(
            OUTBOUND_RULE_NAME,
            RuleDirection::Outbound,
            RuleAction::Allow,
            RuleProtocol::Any,
        )
        .with_local_address(pod_cidr),
    ]
}

pub struct FirewallManager<F> {
    store: Arc<F>,
}

impl<F> FirewallManager<F>
where
    F: FirewallStore,
{
    pub fn new(store: Arc<F>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &F {
        &self.store
    }

    /// Adds `rule` unless a rule with the same name already exists.
    /// Returns whether the rule was created.
    pub async fn ensure_rule(&self, rule: &FirewallRule) -> Result<bool> {
        if self.store.rule_exists(&rule.name).await? {
            debug!(rule = %rule.name, "firewall rule already exists");
            return Ok(false);
        }
        if let Err(e) = self.store.add_rule(rule).await {
            error!(rule = %rule.name, %e, "failed to add firewall rule {}", rule.command_string());
            return Err(e);
        }
        info!(rule = %rule.name, "added firewall rule {}", rule.command_string());
        Ok(true)
    }

    pub async fn ensure_pod_rules(&self, pod_cidr: Ipv4Network) -> Result<()> {
        for rule in pod_rules(pod_cidr) {
            self.ensure_rule(&rule).await?;
        }
        Ok(())
    }

    /// Deletes both pod rules, skipping any that are already gone.
    pub async fn remove_pod_rules(&self) -> Result<()> {
        for name in [INBOUND_RULE_NAME, OUTBOUND_RULE_NAME] {
            if !self.store.rule_exists(name).await? {
                continue;
            }
            self.store.delete_rule(name).await?;
            info!(rule = name, "removed firewall rule");
        }
        Ok(())
    }
}
