use std::net::{Ipv4Addr, SocketAddr};

use clap::{Parser, Subcommand};
use ipnetwork::Ipv4Network;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    Agent(AgentArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct AgentArgs {
    /// Name of the node the agent is running on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// OVS bridge the uplink is attached to
    #[arg(long, default_value = "br-int")]
    pub ovs_bridge: String,

    /// Host interface used as next hop for peer pod subnets
    #[arg(long, default_value = "gw0")]
    pub host_gateway: String,

    /// Platform virtual network whose adapter becomes the uplink
    #[arg(long, default_value = "weft-hnsnetwork")]
    pub local_network: String,

    /// Metrics listener for agent
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Seconds between full route reconciliation passes
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub resync_interval: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub name: String,
    pub link_index: u32,
}

/// Node network settings, fixed once the agent has started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub pod_cidr: Ipv4Network,
    pub node_ip: Ipv4Addr,
    pub gateway: GatewayConfig,
    pub bridge_name: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_agent_defaults() {
        let cli = Cli::parse_from(["weft-cni-agent", "agent", "--node-name", "node1"]);
        let Commands::Agent(args) = cli.command;
        assert_eq!(args.node_name, "node1");
        assert_eq!(args.ovs_bridge, "br-int");
        assert_eq!(args.host_gateway, "gw0");
        assert_eq!(args.local_network, "weft-hnsnetwork");
        assert_eq!(args.metrics_address, "0.0.0.0:9090".parse().unwrap());
        assert_eq!(args.resync_interval, 30);
    }

    #[test]
    fn test_agent_overrides() {
        let cli = Cli::parse_from([
            "weft-cni-agent",
            "agent",
            "--node-name",
            "node2",
            "--ovs-bridge",
            "br-ext",
            "--resync-interval",
            "5",
        ]);
        let Commands::Agent(args) = cli.command;
        assert_eq!(args.ovs_bridge, "br-ext");
        assert_eq!(args.resync_interval, 5);
    }

    #[test]
    fn test_zero_resync_interval_rejected() {
        let res = Cli::try_parse_from([
            "weft-cni-agent",
            "agent",
            "--node-name",
            "node1",
            "--resync-interval",
            "0",
        ]);
        assert!(res.is_err());
    }
}
