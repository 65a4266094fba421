use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use tracing::info;
use weft_cni_node_controller::{node_internal_ip, node_pod_cidr};

use crate::{Error, Result};

/// Network identity of the node the agent runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNode {
    pub name: String,
    pub pod_cidr: Ipv4Network,
    pub node_ip: Ipv4Addr,
}

impl TryFrom<&Node> for LocalNode {
    type Error = Error;

    fn try_from(node: &Node) -> Result<Self> {
        let name = node.name_any();
        let pod_cidr = node_pod_cidr(node)?.ok_or_else(|| {
            Error::InvalidNodeConfig(format!("node {name} has no IPv4 pod cidr"))
        })?;
        let node_ip = match node_internal_ip(node) {
            Some(IpAddr::V4(ip)) => ip,
            _ => {
                return Err(Error::InvalidNodeConfig(format!(
                    "node {name} has no IPv4 internal address"
                )));
            }
        };
        Ok(Self {
            name,
            pod_cidr,
            node_ip,
        })
    }
}

pub async fn local_node(client: Client, name: &str) -> Result<LocalNode> {
    let node = Api::<Node>::all(client).get(name).await?;
    let local = LocalNode::try_from(&node)?;
    info!(
        node = name,
        pod_cidr = %local.pod_cidr,
        node_ip = %local.node_ip,
        "found local node"
    );
    Ok(local)
}
