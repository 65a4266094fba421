//! One-time node dataplane setup.
//!
//! Runs before any pod traffic is expected: the uplink becomes an OVS port,
//! its address and MAC move to the bridge interface and the base flows are
//! installed.

mod bridge;
pub mod interfaces;

use std::net::Ipv4Addr;
use std::sync::Arc;

pub use bridge::{BridgeSetup, datapath_id};
use ipnetwork::Ipv4Network;
use tracing::{error, info};

use crate::config::{GatewayConfig, NodeConfig};
use crate::dataplane::interfaces::InterfaceStore;
use crate::ovs::{BRIDGE_OFPORT, BridgeClient, FlowClient, UPLINK_OFPORT};
use crate::platform::HostNetwork;
use crate::{Error, Result};

/// Initialization steps in execution order. Each step relies on the state
/// left by the previous one: the datapath id is pinned before the uplink port
/// exists, and the bridge carries the host address before flows are added.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStep {
    PrepareBridge,
    InstallHostNetworkFlows,
    InstallExternalFlows,
}

impl InitStep {
    pub const PIPELINE: [InitStep; 3] = [
        InitStep::PrepareBridge,
        InitStep::InstallHostNetworkFlows,
        InitStep::InstallExternalFlows,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InitStep::PrepareBridge => "prepare-bridge",
            InitStep::InstallHostNetworkFlows => "install-host-network-flows",
            InitStep::InstallExternalFlows => "install-external-flows",
        }
    }
}

/// Resolves the gateway link and assembles the node configuration.
pub async fn node_config<H>(
    host: &H,
    name: &str,
    pod_cidr: Ipv4Network,
    node_ip: Ipv4Addr,
    gateway_name: &str,
    bridge_name: &str,
) -> Result<NodeConfig>
where
    H: HostNetwork,
{
    if pod_cidr.network() != pod_cidr.ip() {
        return Err(Error::InvalidNodeConfig(format!(
            "pod cidr {pod_cidr} has host bits set"
        )));
    }
    let link_index = host.link_index(gateway_name).await?;
    Ok(NodeConfig {
        name: name.to_string(),
        pod_cidr,
        node_ip,
        gateway: GatewayConfig {
            name: gateway_name.to_string(),
            link_index,
        },
        bridge_name: bridge_name.to_string(),
    })
}

pub struct Initializer<H, B, F> {
    host: Arc<H>,
    bridge: Arc<B>,
    flows: Arc<F>,
    interfaces: Arc<InterfaceStore>,
    local_network: String,
    node_config: Arc<NodeConfig>,
}

impl<H, B, F> Initializer<H, B, F>
where
    H: HostNetwork,
    B: BridgeClient,
    F: FlowClient,
{
    pub fn new(
        host: Arc<H>,
        bridge: Arc<B>,
        flows: Arc<F>,
        interfaces: Arc<InterfaceStore>,
        local_network: impl Into<String>,
        node_config: Arc<NodeConfig>,
    ) -> Self {
        Self {
            host,
            bridge,
            flows,
            interfaces,
            local_network: local_network.into(),
            node_config,
        }
    }

    /// Runs every step of [`InitStep::PIPELINE`], stopping at the first
    /// failure. The error names the step that failed.
    pub async fn run(&self) -> Result<BridgeSetup> {
        let mut setup = BridgeSetup::Configured;
        for step in InitStep::PIPELINE {
            info!(step = step.name(), "running initialization step");
            let res = match step {
                InitStep::PrepareBridge => self.prepare_bridge().await.map(|s| setup = s),
                InitStep::InstallHostNetworkFlows => self.install_host_network_flows().await,
                InitStep::InstallExternalFlows => self.install_external_flows().await,
            };
            if let Err(e) = res {
                error!(step = step.name(), %e, "initialization step failed");
                return Err(Error::InitStep {
                    step: step.name(),
                    source: Box::new(e),
                });
            }
        }
        Ok(setup)
    }

    pub async fn install_host_network_flows(&self) -> Result<()> {
        self.flows
            .install_host_network_flows(UPLINK_OFPORT, BRIDGE_OFPORT)
            .await
    }

    /// SNAT for pod traffic leaving the node.
    pub async fn install_external_flows(&self) -> Result<()> {
        let node_ip = self.node_config.node_ip;
        let pod_cidr = self.node_config.pod_cidr;
        if let Err(e) = self.flows.install_external_flows(node_ip, pod_cidr).await {
            error!(%e, %node_ip, %pod_cidr, "failed to install SNAT flows");
            return Err(e);
        }
        Ok(())
    }
}
