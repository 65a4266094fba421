//! Seams towards the host operating system.
//!
//! Everything the agent mutates on the host goes through one of the traits
//! below. The production implementation drives PowerShell, tests use the
//! in-memory [`fake`] platform.

#[cfg(test)]
pub(crate) mod fake;
pub mod powershell;

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use ipnetwork::{IpNetwork, Ipv4Network};
use tokio::process::Command;
use tracing::trace;

use crate::firewall::FirewallRule;
use crate::{Error, Result};

/// One row of the host routing table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformRoute {
    pub link_index: u32,
    pub destination: IpNetwork,
    pub gateway: IpAddr,
}

#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Every route known to the host, across all links.
    async fn list_routes(&self) -> Result<Vec<PlatformRoute>>;
    async fn add_route(&self, route: &PlatformRoute) -> Result<()>;
    async fn remove_route(&self, route: &PlatformRoute) -> Result<()>;
}

#[async_trait]
pub trait FirewallStore: Send + Sync {
    async fn rule_exists(&self, name: &str) -> Result<bool>;
    async fn add_rule(&self, rule: &FirewallRule) -> Result<()>;
    async fn delete_rule(&self, name: &str) -> Result<()>;
}

/// The platform virtual network the uplink adapter belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNetwork {
    pub name: String,
    pub adapter_name: String,
    pub source_mac: MacAddress,
    /// Address and prefix of the management interface, e.g. `10.10.0.5/24`.
    pub management_ip: String,
}

#[async_trait]
pub trait HostNetwork: Send + Sync {
    async fn local_network(&self, name: &str) -> Result<LocalNetwork>;
    async fn link_index(&self, adapter: &str) -> Result<u32>;
    async fn enable_adapter(&self, adapter: &str) -> Result<()>;
    async fn set_mac_address(&self, adapter: &str, mac: &MacAddress) -> Result<()>;
    async fn ipv4_address(&self, adapter: &str) -> Result<Option<Ipv4Network>>;
    async fn remove_ipv4_addresses(&self, adapter: &str) -> Result<()>;
    async fn add_ipv4_address(&self, adapter: &str, address: Ipv4Network) -> Result<()>;
    async fn enable_ip_forwarding(&self, adapter: &str) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Lowercase hex digits without separators.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidMacAddress(s.to_string());
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Runs a program to completion and returns its stdout.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String> {
    trace!(program, ?args, "running command");
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(Error::Command {
            cmd: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
