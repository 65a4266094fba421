use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ipnetwork::Ipv4Network;

use crate::firewall::FirewallRule;
use crate::platform::{FirewallStore, HostNetwork, LocalNetwork, MacAddress, PlatformRoute, RouteTable};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    AddRoute(PlatformRoute),
    RemoveRoute(PlatformRoute),
    AddRule(String),
    DeleteRule(String),
    EnableAdapter(String),
    SetMacAddress(String, MacAddress),
    RemoveIpv4Addresses(String),
    AddIpv4Address(String, Ipv4Network),
    EnableIpForwarding(String),
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Adapter {
    pub link_index: u32,
    pub enabled: bool,
    pub mac: Option<MacAddress>,
    pub ipv4: Option<Ipv4Network>,
    pub forwarding: bool,
}

#[derive(Default)]
struct Inner {
    routes: Vec<PlatformRoute>,
    rules: BTreeMap<String, FirewallRule>,
    networks: Vec<LocalNetwork>,
    adapters: BTreeMap<String, Adapter>,
    calls: Vec<Call>,
}

/// In-memory host that behaves like the real one for the operations the
/// agent uses: duplicate adds and removals of missing objects fail.
#[derive(Default)]
pub(crate) struct FakePlatform {
    inner: Mutex<Inner>,
    fail_list_routes: AtomicBool,
    fail_add_route: AtomicBool,
    fail_add_rule: AtomicBool,
}

impl FakePlatform {
    /// Seeds a route without recording a call.
    pub fn with_route(self, route: PlatformRoute) -> Self {
        self.inner.lock().unwrap().routes.push(route);
        self
    }

    pub fn with_network(self, network: LocalNetwork) -> Self {
        self.inner.lock().unwrap().networks.push(network);
        self
    }

    pub fn with_adapter(self, name: &str, adapter: Adapter) -> Self {
        self.inner
            .lock()
            .unwrap()
            .adapters
            .insert(name.to_string(), adapter);
        self
    }

    pub fn fail_list_routes(&self, fail: bool) {
        self.fail_list_routes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_route(&self, fail: bool) {
        self.fail_add_route.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_rule(&self, fail: bool) {
        self.fail_add_rule.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn routes(&self) -> Vec<PlatformRoute> {
        self.inner.lock().unwrap().routes.clone()
    }

    pub fn rule(&self, name: &str) -> Option<FirewallRule> {
        self.inner.lock().unwrap().rules.get(name).cloned()
    }

    pub fn adapter(&self, name: &str) -> Option<Adapter> {
        self.inner.lock().unwrap().adapters.get(name).cloned()
    }

    fn with_adapter_mut<T>(&self, name: &str, f: impl FnOnce(&mut Adapter) -> T) -> Result<T> {
        let mut inner = self.inner.lock().unwrap();
        let adapter = inner.adapters.get_mut(name).ok_or_else(|| Error::NotFound {
            kind: "adapter",
            name: name.to_string(),
        })?;
        Ok(f(adapter))
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

fn command_error(cmd: &str, stderr: &str) -> Error {
    Error::Command {
        cmd: cmd.into(),
        stderr: stderr.into(),
    }
}

#[async_trait]
impl RouteTable for FakePlatform {
    async fn list_routes(&self) -> Result<Vec<PlatformRoute>> {
        if self.fail_list_routes.load(Ordering::SeqCst) {
            return Err(command_error("Get-NetRoute", "access denied"));
        }
        Ok(self.routes())
    }

    async fn add_route(&self, route: &PlatformRoute) -> Result<()> {
        if self.fail_add_route.load(Ordering::SeqCst) {
            return Err(command_error("New-NetRoute", "access denied"));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.routes.iter().any(|r| {
            r.link_index == route.link_index && r.destination == route.destination
        }) {
            return Err(command_error("New-NetRoute", "route already exists"));
        }
        inner.routes.push(route.clone());
        inner.calls.push(Call::AddRoute(route.clone()));
        Ok(())
    }

    async fn remove_route(&self, route: &PlatformRoute) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(idx) = inner.routes.iter().position(|r| r == route) else {
            return Err(command_error("Remove-NetRoute", "no matching route"));
        };
        inner.routes.remove(idx);
        inner.calls.push(Call::RemoveRoute(route.clone()));
        Ok(())
    }
}

#[async_trait]
impl FirewallStore for FakePlatform {
    async fn rule_exists(&self, name: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().rules.contains_key(name))
    }

    async fn add_rule(&self, rule: &FirewallRule) -> Result<()> {
        if self.fail_add_rule.load(Ordering::SeqCst) {
            return Err(command_error("New-NetFirewallRule", "access denied"));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.rules.contains_key(&rule.name) {
            return Err(command_error("New-NetFirewallRule", "rule already exists"));
        }
        inner.rules.insert(rule.name.clone(), rule.clone());
        inner.calls.push(Call::AddRule(rule.name.clone()));
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.rules.remove(name).is_none() {
            return Err(command_error("Remove-NetFirewallRule", "no matching rule"));
        }
        inner.calls.push(Call::DeleteRule(name.to_string()));
        Ok(())
    }
}

#[async_trait]
impl HostNetwork for FakePlatform {
    async fn local_network(&self, name: &str) -> Result<LocalNetwork> {
        self.inner
            .lock()
            .unwrap()
            .networks
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "network",
                name: name.to_string(),
            })
    }

    async fn link_index(&self, adapter: &str) -> Result<u32> {
        self.with_adapter_mut(adapter, |a| a.link_index)
    }

    async fn enable_adapter(&self, adapter: &str) -> Result<()> {
        self.with_adapter_mut(adapter, |a| a.enabled = true)?;
        self.record(Call::EnableAdapter(adapter.to_string()));
        Ok(())
    }

    async fn set_mac_address(&self, adapter: &str, mac: &MacAddress) -> Result<()> {
        self.with_adapter_mut(adapter, |a| a.mac = Some(*mac))?;
        self.record(Call::SetMacAddress(adapter.to_string(), *mac));
        Ok(())
    }

    async fn ipv4_address(&self, adapter: &str) -> Result<Option<Ipv4Network>> {
        self.with_adapter_mut(adapter, |a| a.ipv4)
    }

    async fn remove_ipv4_addresses(&self, adapter: &str) -> Result<()> {
        self.with_adapter_mut(adapter, |a| a.ipv4 = None)?;
        self.record(Call::RemoveIpv4Addresses(adapter.to_string()));
        Ok(())
    }

    async fn add_ipv4_address(&self, adapter: &str, address: Ipv4Network) -> Result<()> {
        self.with_adapter_mut(adapter, |a| a.ipv4 = Some(address))?;
        self.record(Call::AddIpv4Address(adapter.to_string(), address));
        Ok(())
    }

    async fn enable_ip_forwarding(&self, adapter: &str) -> Result<()> {
        self.with_adapter_mut(adapter, |a| a.forwarding = true)?;
        self.record(Call::EnableIpForwarding(adapter.to_string()));
        Ok(())
    }
}
