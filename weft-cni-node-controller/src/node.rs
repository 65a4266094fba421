use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

use ipnetwork::{IpNetwork, Ipv4Network};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::warn;

use crate::{Error, Result};

const NODE_INTERNAL_IP: &str = "InternalIP";

/// First IPv4 pod subnet assigned to the node, in canonical network form.
pub fn node_pod_cidr(node: &Node) -> Result<Option<Ipv4Network>> {
    let Some(spec) = node.spec.as_ref() else {
        return Ok(None);
    };
    let candidates = spec
        .pod_cidrs
        .iter()
        .flatten()
        .chain(spec.pod_cidr.iter());

    for cidr in candidates {
        let invalid = |source| Error::InvalidPodCidr {
            node: node.name_any(),
            cidr: cidr.to_owned(),
            source,
        };
        if let IpNetwork::V4(net) = IpNetwork::from_str(cidr).map_err(invalid)? {
            let net = Ipv4Network::new(net.network(), net.prefix()).map_err(invalid)?;
            return Ok(Some(net));
        }
    }
    Ok(None)
}

/// Internal address of the node, IPv4 preferred.
pub fn node_internal_ip(node: &Node) -> Option<IpAddr> {
    let addrs = node.status.as_ref()?.addresses.as_ref()?;
    let ips: Vec<IpAddr> = addrs
        .iter()
        .filter(|na| na.type_ == NODE_INTERNAL_IP)
        .filter_map(|na| IpAddr::from_str(&na.address).ok())
        .collect();
    ips.iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| ips.first())
        .copied()
}

/// The gateway of a pod subnet is its first host address.
pub fn peer_gateway_ip(pod_cidr: &Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(pod_cidr.network()).saturating_add(1))
}

/// Pod subnets of the local node and every live peer node.
///
/// The local subnet stays in the set: the host keeps a connected route for it
/// on the gateway link and a full pass must not prune it.
pub fn desired_pod_cidrs(nodes: &[Arc<Node>], local_node: &str) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| node.name_any() == local_node || !is_deleting(node))
        .filter_map(|node| match node_pod_cidr(node) {
            Ok(cidr) => cidr.map(|c| c.to_string()),
            Err(e) => {
                warn!(%e, "skipping node with invalid pod cidr");
                None
            }
        })
        .collect()
}

pub(crate) fn is_deleting(node: &Node) -> bool {
    node.metadata.deletion_timestamp.is_some()
}
