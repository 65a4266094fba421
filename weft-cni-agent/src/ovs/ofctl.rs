use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use tracing::debug;

use crate::Result;
use crate::ovs::{BRIDGE_OFPORT, FlowClient, OfPort, UPLINK_OFPORT};
use crate::platform::run_command;

const OVS_OFCTL: &str = "ovs-ofctl";
const OPENFLOW_VERSION: &str = "OpenFlow13";
/// Conntrack zone used for node SNAT.
const SNAT_CT_ZONE: u16 = 65520;

#[derive(Clone, Debug)]
pub struct OvsOfctl {
    bridge: String,
    program: String,
}

impl OvsOfctl {
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            program: OVS_OFCTL.into(),
        }
    }

    /// `add-flow` replaces a flow with an identical match, so reinstalling is a no-op.
    async fn add_flows(&self, flows: &[String]) -> Result<()> {
        for flow in flows {
            debug!(%flow, "adding flow");
            run_command(
                &self.program,
                &["-O", OPENFLOW_VERSION, "add-flow", &self.bridge, flow],
            )
            .await?;
        }
        Ok(())
    }
}

fn port(ofport: OfPort) -> String {
    if ofport == BRIDGE_OFPORT {
        "LOCAL".into()
    } else {
        ofport.to_string()
    }
}

pub(crate) fn host_network_flows(uplink: OfPort, bridge: OfPort) -> Vec<String> {
    vec![
        format!(
            "table=0,priority=200,in_port={},actions=output:{}",
            port(uplink),
            port(bridge)
        ),
        format!(
            "table=0,priority=200,in_port={},actions=output:{}",
            port(bridge),
            port(uplink)
        ),
    ]
}

/// Pod traffic leaving the local subnet is handed to the host, which routes
/// peer pod subnets over the gateway link. Only what the host sends back out
/// through LOCAL is source NAT'ed to the node address.
pub(crate) fn external_flows(node_ip: Ipv4Addr, pod_cidr: Ipv4Network) -> Vec<String> {
    let uplink = port(UPLINK_OFPORT);
    let local = port(BRIDGE_OFPORT);
    vec![
        // replies to SNAT'ed pod traffic
        format!(
            "table=0,priority=210,ip,in_port={uplink},nw_dst={node_ip},actions=ct(table=1,zone={SNAT_CT_ZONE},nat)"
        ),
        format!("table=1,priority=200,ip,ct_state=+trk+est,nw_dst={pod_cidr},actions=NORMAL"),
        format!("table=1,priority=190,ip,actions=output:{local}"),
        format!(
            "table=0,priority=210,ip,in_port={local},nw_src={pod_cidr},actions=ct(commit,table=2,zone={SNAT_CT_ZONE},nat(src={node_ip}))"
        ),
        format!("table=2,priority=200,ip,actions=output:{uplink}"),
        format!("table=0,priority=200,ip,nw_src={pod_cidr},nw_dst={pod_cidr},actions=NORMAL"),
        format!("table=0,priority=190,ip,nw_src={pod_cidr},actions=output:{local}"),
    ]
}

#[async_trait]
impl FlowClient for OvsOfctl {
    async fn install_host_network_flows(&self, uplink: OfPort, bridge: OfPort) -> Result<()> {
        self.add_flows(&host_network_flows(uplink, bridge)).await
    }

    async fn install_external_flows(&self, node_ip: Ipv4Addr, pod_cidr: Ipv4Network) -> Result<()> {
        self.add_flows(&external_flows(node_ip, pod_cidr)).await
    }
}
