use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use ipnetwork::{IpNetwork, Ipv4Network};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::Result;
use crate::platform::PlatformRoute;

const STARTING_ROUTE_CAPACITY: usize = 64;

/// A host route on the gateway link that the agent is responsible for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteRecord {
    pub destination: Ipv4Network,
    pub link_index: u32,
    pub gateway: IpAddr,
}

impl RouteRecord {
    pub fn new(destination: Ipv4Network, link_index: u32, gateway: IpAddr) -> Self {
        Self {
            destination: network_of(destination),
            link_index,
            gateway,
        }
    }

    pub fn key(&self) -> String {
        route_key(&self.destination)
    }

    pub fn to_platform(&self) -> PlatformRoute {
        PlatformRoute {
            link_index: self.link_index,
            destination: IpNetwork::V4(self.destination),
            gateway: self.gateway,
        }
    }
}

fn network_of(net: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(net.network(), net.prefix()).unwrap_or(net)
}

/// Store key of a subnet: network address and prefix, host bits cleared.
pub fn route_key(net: &Ipv4Network) -> String {
    format!("{}/{}", net.network(), net.prefix())
}

/// Parses `cidr` and returns its store key.
pub fn canonical_key(cidr: &str) -> Result<String> {
    let net: Ipv4Network = cidr.trim().parse()?;
    Ok(route_key(&net))
}

/// Routes installed by the agent, keyed by [`route_key`]. At most one record
/// exists per destination subnet.
#[derive(Debug)]
pub struct RouteTableStore {
    routes: DashMap<String, RouteRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for RouteTableStore {
    fn default() -> Self {
        Self {
            routes: DashMap::with_capacity(STARTING_ROUTE_CAPACITY),
            locks: DashMap::with_capacity(STARTING_ROUTE_CAPACITY),
        }
    }
}

impl RouteTableStore {
    /// Serializes mutations of one subnet. The guard must be held across the
    /// whole read-platform-write sequence.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the lock of `key` unless a task holds or waits on it.
    pub fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Evicts the entries of `before` rejected by `keep`. An entry that was
    /// replaced or added after `before` was taken stays.
    pub async fn evict_unchanged(
        &self,
        before: &ahash::HashMap<String, RouteRecord>,
        keep: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut evicted = Vec::new();
        for (key, record) in before {
            if keep(key) {
                continue;
            }
            let guard = self.lock(key).await;
            if self
                .routes
                .remove_if(key, |_, current| current == record)
                .is_some()
            {
                evicted.push(key.clone());
            }
            drop(guard);
            self.release(key);
        }
        evicted
    }

    pub fn get(&self, key: &str) -> Option<RouteRecord> {
        self.routes.get(key).map(|r| r.value().clone())
    }

    pub fn upsert(&self, record: RouteRecord) -> Option<RouteRecord> {
        self.routes.insert(record.key(), record)
    }

    pub fn remove(&self, key: &str) -> Option<RouteRecord> {
        self.routes.remove(key).map(|(_, r)| r)
    }

    pub fn keys(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.key().clone()).collect()
    }

    pub fn snapshot(&self) -> ahash::HashMap<String, RouteRecord> {
        self.routes
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
