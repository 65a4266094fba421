mod context;
mod controller;
mod error;
mod node;
mod runtime;
mod store;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
pub use error::Error;
use ipnetwork::Ipv4Network;
pub use node::{desired_pod_cidrs, node_internal_ip, node_pod_cidr, peer_gateway_ip};
pub use runtime::start_node_route_controller;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Host routes towards the pod subnets of peer nodes.
///
/// The controller only drives this trait; whatever sits behind it owns the
/// platform routing table and its cache.
#[async_trait]
pub trait NodeRouteState: Send + Sync {
    async fn add_routes(
        &self,
        pod_cidr: Ipv4Network,
        peer_node_ip: IpAddr,
        peer_gateway_ip: Ipv4Addr,
    ) -> Result<()>;

    async fn delete_routes(&self, pod_cidr: Ipv4Network) -> Result<()>;

    /// Full pass against the complete set of peer pod subnets.
    async fn reconcile(&self, pod_cidrs: Vec<String>) -> Result<()>;
}

#[async_trait]
impl<S> NodeRouteState for Arc<S>
where
    S: NodeRouteState + ?Sized,
{
    async fn add_routes(
        &self,
        pod_cidr: Ipv4Network,
        peer_node_ip: IpAddr,
        peer_gateway_ip: Ipv4Addr,
    ) -> Result<()> {
        (**self)
            .add_routes(pod_cidr, peer_node_ip, peer_gateway_ip)
            .await
    }

    async fn delete_routes(&self, pod_cidr: Ipv4Network) -> Result<()> {
        (**self).delete_routes(pod_cidr).await
    }

    async fn reconcile(&self, pod_cidrs: Vec<String>) -> Result<()> {
        (**self).reconcile(pod_cidrs).await
    }
}
