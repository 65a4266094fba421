use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ipnetwork::Ipv4Network;

use crate::ovs::{BridgeClient, FlowClient, OfPort};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SwitchCall {
    SetDatapathId(String),
    CreateUplinkPort(String, OfPort),
    InstallHostNetworkFlows(OfPort, OfPort),
    InstallExternalFlows(Ipv4Addr, Ipv4Network),
}

#[derive(Default)]
struct Inner {
    datapath_id: Option<String>,
    ports: BTreeMap<String, (String, OfPort)>,
    calls: Vec<SwitchCall>,
}

/// Switch that refuses a datapath id change once ports exist, the way a real
/// bridge drops its controller connection.
pub(crate) struct FakeSwitch {
    bridge: String,
    inner: Mutex<Inner>,
    fail_flows: AtomicBool,
}

impl FakeSwitch {
    pub fn new(bridge: &str) -> Self {
        Self {
            bridge: bridge.to_string(),
            inner: Mutex::default(),
            fail_flows: AtomicBool::new(false),
        }
    }

    pub fn with_port(self, name: &str, ofport: OfPort) -> Self {
        self.inner
            .lock()
            .unwrap()
            .ports
            .insert(name.to_string(), (format!("uuid-{name}"), ofport));
        self
    }

    pub fn fail_flows(&self, fail: bool) {
        self.fail_flows.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SwitchCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn datapath_id(&self) -> Option<String> {
        self.inner.lock().unwrap().datapath_id.clone()
    }

    fn flows(&self, call: SwitchCall) -> Result<()> {
        if self.fail_flows.load(Ordering::SeqCst) {
            return Err(Error::Command {
                cmd: "ovs-ofctl add-flow".into(),
                stderr: "connection refused".into(),
            });
        }
        self.inner.lock().unwrap().calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl BridgeClient for FakeSwitch {
    fn bridge_name(&self) -> &str {
        &self.bridge
    }

    async fn set_datapath_id(&self, datapath_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let changed = inner
            .datapath_id
            .as_deref()
            .is_some_and(|current| current != datapath_id);
        if changed && !inner.ports.is_empty() {
            return Err(Error::Command {
                cmd: "ovs-vsctl set Bridge".into(),
                stderr: "datapath id changed with ports attached".into(),
            });
        }
        inner.datapath_id = Some(datapath_id.to_string());
        inner
            .calls
            .push(SwitchCall::SetDatapathId(datapath_id.to_string()));
        Ok(())
    }

    async fn get_ofport(&self, name: &str) -> Result<Option<OfPort>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .ports
            .get(name)
            .map(|(_, ofport)| *ofport))
    }

    async fn create_uplink_port(&self, name: &str, ofport: OfPort) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let uuid = format!("uuid-{name}");
        inner.ports.insert(name.to_string(), (uuid.clone(), ofport));
        inner
            .calls
            .push(SwitchCall::CreateUplinkPort(name.to_string(), ofport));
        Ok(uuid)
    }
}

#[async_trait]
impl FlowClient for FakeSwitch {
    async fn install_host_network_flows(&self, uplink: OfPort, bridge: OfPort) -> Result<()> {
        self.flows(SwitchCall::InstallHostNetworkFlows(uplink, bridge))
    }

    async fn install_external_flows(&self, node_ip: Ipv4Addr, pod_cidr: Ipv4Network) -> Result<()> {
        self.flows(SwitchCall::InstallExternalFlows(node_ip, pod_cidr))
    }
}
