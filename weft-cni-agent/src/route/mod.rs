//! Host routes towards the pod subnets of peer nodes.

pub mod store;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use ipnetwork::{IpNetwork, Ipv4Network};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use weft_cni_node_controller::NodeRouteState;

use crate::config::NodeConfig;
use crate::firewall::FirewallManager;
use crate::metrics::RouteMetrics;
use crate::platform::{FirewallStore, HostNetwork, PlatformRoute, RouteTable};
use crate::route::store::{RouteRecord, RouteTableStore, canonical_key, route_key};
use crate::{Error, Result};

pub struct RouteClient<R, F, H> {
    routes: Arc<R>,
    host: Arc<H>,
    firewall: FirewallManager<F>,
    store: RouteTableStore,
    node_config: OnceLock<Arc<NodeConfig>>,
    reconcile_pass: Mutex<()>,
    metrics: RouteMetrics,
}

impl<R, F, H> RouteClient<R, F, H>
where
    R: RouteTable,
    F: FirewallStore,
    H: HostNetwork,
{
    pub fn new(routes: Arc<R>, firewall: Arc<F>, host: Arc<H>, metrics: RouteMetrics) -> Self {
        Self {
            routes,
            host,
            firewall: FirewallManager::new(firewall),
            store: RouteTableStore::default(),
            node_config: OnceLock::new(),
            reconcile_pass: Mutex::new(()),
            metrics,
        }
    }

    fn config(&self) -> Result<&NodeConfig> {
        self.node_config
            .get()
            .map(|c| c.as_ref())
            .ok_or_else(|| Error::InvalidNodeConfig("route client is not initialized".into()))
    }

    /// Records the node config, turns the bridge into a router and makes sure
    /// the pod firewall rules exist.
    pub async fn initialize(&self, node_config: Arc<NodeConfig>) -> Result<()> {
        if self.node_config.set(node_config).is_err() {
            warn!("route client already initialized, keeping the first node config");
        }
        let config = self.config()?;

        if let Err(e) = self.host.enable_ip_forwarding(&config.bridge_name).await {
            error!(%e, bridge = %config.bridge_name, "failed to enable ip forwarding");
            return Err(e);
        }
        self.firewall.ensure_pod_rules(config.pod_cidr).await
    }

    /// Routes on the gateway link that the agent may own, keyed by subnet.
    async fn list_routes(&self, link_index: u32) -> Result<ahash::HashMap<String, RouteRecord>> {
        let routes = self.routes.list_routes().await?;
        Ok(routes
            .into_iter()
            .filter_map(|r| owned_route(r, link_index))
            .map(|r| (r.key(), r))
            .collect())
    }

    /// Brings the gateway link in line with `pod_cidrs`: listed routes that
    /// are desired are adopted into the cache, the others are removed.
    pub async fn reconcile(&self, pod_cidrs: &[String]) -> Result<()> {
        let _pass = self.reconcile_pass.lock().await;
        let _measure = self.metrics.measure_reconcile();
        let link_index = self.config()?.gateway.link_index;

        let desired: HashSet<String> = pod_cidrs
            .iter()
            .filter_map(|cidr| match canonical_key(cidr) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(%e, %cidr, "ignoring invalid desired pod cidr");
                    None
                }
            })
            .collect();

        let cached = self.store.snapshot();
        let listed = match self.list_routes(link_index).await {
            Ok(listed) => listed,
            Err(e) => {
                error!(%e, "failed to list host routes, skipping reconciliation");
                return Err(e);
            }
        };

        for (key, record) in &listed {
            let guard = self.store.lock(key).await;
            if desired.contains(key) {
                if self.store.get(key).as_ref() != Some(record) {
                    self.store.upsert(record.clone());
                    self.metrics.count::<(), Error>("adopt", &Ok(()));
                    debug!(subnet = %key, gateway = %record.gateway, "adopted existing route");
                }
                continue;
            }
            let res = self.routes.remove_route(&record.to_platform()).await;
            self.metrics.count("prune", &res);
            if let Err(e) = res {
                error!(%e, subnet = %key, gateway = %record.gateway, "failed to remove stale route");
                return Err(e);
            }
            self.store.remove(key);
            drop(guard);
            self.store.release(key);
            info!(subnet = %key, gateway = %record.gateway, "removed stale route");
        }

        let evicted = self
            .store
            .evict_unchanged(&cached, |key| {
                desired.contains(key) && listed.contains_key(key)
            })
            .await;
        for key in evicted {
            debug!(subnet = %key, "evicted route missing from host");
        }
        Ok(())
    }

    /// Installs a route to `pod_cidr` via `peer_gateway_ip`, replacing a route
    /// with a different gateway.
    pub async fn add_routes(
        &self,
        pod_cidr: Ipv4Network,
        peer_node_ip: IpAddr,
        peer_gateway_ip: Ipv4Addr,
    ) -> Result<()> {
        let link_index = self.config()?.gateway.link_index;
        let key = route_key(&pod_cidr);
        let gateway = IpAddr::V4(peer_gateway_ip);
        let _guard = self.store.lock(&key).await;

        if let Some(existing) = self.store.get(&key) {
            if existing.gateway == gateway {
                debug!(subnet = %key, %gateway, "route already present");
                return Ok(());
            }
            let res = self.routes.remove_route(&existing.to_platform()).await;
            self.metrics.count("delete", &res);
            if let Err(e) = res {
                error!(%e, subnet = %key, gateway = %existing.gateway, "failed to remove outdated route");
                return Err(e);
            }
            self.store.remove(&key);
            debug!(subnet = %key, gateway = %existing.gateway, "removed outdated route");
        }

        let record = RouteRecord::new(pod_cidr, link_index, gateway);
        let res = self.routes.add_route(&record.to_platform()).await;
        self.metrics.count("add", &res);
        if let Err(e) = res {
            error!(%e, subnet = %key, %gateway, peer = %peer_node_ip, "failed to add route");
            return Err(e);
        }
        self.store.upsert(record);
        info!(subnet = %key, %gateway, peer = %peer_node_ip, "added route");
        Ok(())
    }

    pub async fn delete_routes(&self, pod_cidr: Ipv4Network) -> Result<()> {
        let key = route_key(&pod_cidr);
        let res = {
            let _guard = self.store.lock(&key).await;
            self.delete_cached(&key).await
        };
        self.store.release(&key);
        res
    }

    async fn delete_cached(&self, key: &str) -> Result<()> {
        let Some(existing) = self.store.get(key) else {
            debug!(subnet = %key, "no route to delete");
            return Ok(());
        };
        let res = self.routes.remove_route(&existing.to_platform()).await;
        self.metrics.count("delete", &res);
        if let Err(e) = res {
            error!(%e, subnet = %key, gateway = %existing.gateway, "failed to delete route");
            return Err(e);
        }
        self.store.remove(key);
        info!(subnet = %key, gateway = %existing.gateway, "deleted route");
        Ok(())
    }

    pub async fn remove_firewall_rules(&self) -> Result<()> {
        self.firewall.remove_pod_rules().await
    }

    /// Snapshot of the routes the agent believes are installed.
    pub fn routes(&self) -> ahash::HashMap<String, RouteRecord> {
        self.store.snapshot()
    }
}

/// Keeps IPv4 global unicast routes on `link_index`, minus the broadcast
/// routes the host adds for every configured address.
fn owned_route(route: PlatformRoute, link_index: u32) -> Option<RouteRecord> {
    if route.link_index != link_index {
        return None;
    }
    let IpNetwork::V4(destination) = route.destination else {
        return None;
    };
    if !is_global_unicast(destination.ip()) || destination.ip() == destination.broadcast() {
        return None;
    }
    Some(RouteRecord::new(destination, route.link_index, route.gateway))
}

fn is_global_unicast(ip: Ipv4Addr) -> bool {
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || ip.is_link_local()
        || ip.is_broadcast())
}

#[async_trait]
impl<R, F, H> NodeRouteState for RouteClient<R, F, H>
where
    R: RouteTable,
    F: FirewallStore,
    H: HostNetwork,
{
    async fn add_routes(
        &self,
        pod_cidr: Ipv4Network,
        peer_node_ip: IpAddr,
        peer_gateway_ip: Ipv4Addr,
    ) -> weft_cni_node_controller::Result<()> {
        RouteClient::add_routes(self, pod_cidr, peer_node_ip, peer_gateway_ip)
            .await
            .map_err(|e| weft_cni_node_controller::Error::RouteError(e.to_string()))
    }

    async fn delete_routes(&self, pod_cidr: Ipv4Network) -> weft_cni_node_controller::Result<()> {
        RouteClient::delete_routes(self, pod_cidr)
            .await
            .map_err(|e| weft_cni_node_controller::Error::RouteError(e.to_string()))
    }

    async fn reconcile(&self, pod_cidrs: Vec<String>) -> weft_cni_node_controller::Result<()> {
        RouteClient::reconcile(self, &pod_cidrs)
            .await
            .map_err(|e| weft_cni_node_controller::Error::RouteError(e.to_string()))
    }
}
