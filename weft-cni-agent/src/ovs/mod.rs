//! Open vSwitch control.
//!
//! The agent never implements the switch. It only creates the uplink port,
//! pins the datapath id and installs a fixed set of flows.

#[cfg(test)]
pub(crate) mod fake;
pub mod ofctl;
pub mod vsctl;

use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;

use crate::Result;

pub type OfPort = u32;

/// Port number reserved for the uplink adapter.
pub const UPLINK_OFPORT: OfPort = 3;
/// The bridge-local port (OpenFlow `LOCAL`).
pub const BRIDGE_OFPORT: OfPort = 0xfffffffe;

#[async_trait]
pub trait BridgeClient: Send + Sync {
    fn bridge_name(&self) -> &str;
    async fn set_datapath_id(&self, datapath_id: &str) -> Result<()>;
    /// `None` when no interface with that name is attached to the bridge.
    async fn get_ofport(&self, name: &str) -> Result<Option<OfPort>>;
    /// Attaches `name` with a requested port number and returns the port uuid.
    async fn create_uplink_port(&self, name: &str, ofport: OfPort) -> Result<String>;
}

#[async_trait]
pub trait FlowClient: Send + Sync {
    async fn install_host_network_flows(&self, uplink: OfPort, bridge: OfPort) -> Result<()>;
    async fn install_external_flows(&self, node_ip: Ipv4Addr, pod_cidr: Ipv4Network) -> Result<()>;
}
