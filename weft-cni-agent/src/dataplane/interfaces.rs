use dashmap::DashMap;

use crate::ovs::OfPort;

const STARTING_INTERFACE_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceKind {
    Uplink,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OvsPortConfig {
    pub port_uuid: String,
    pub ofport: OfPort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: InterfaceKind,
    pub ovs_port: Option<OvsPortConfig>,
}

impl InterfaceConfig {
    pub fn uplink(name: &str, ovs_port: OvsPortConfig) -> Self {
        Self {
            name: name.to_string(),
            kind: InterfaceKind::Uplink,
            ovs_port: Some(ovs_port),
        }
    }
}

/// Interfaces owned by the agent, keyed by interface name.
#[derive(Debug)]
pub struct InterfaceStore {
    interfaces: DashMap<String, InterfaceConfig>,
}

impl Default for InterfaceStore {
    fn default() -> Self {
        Self {
            interfaces: DashMap::with_capacity(STARTING_INTERFACE_CAPACITY),
        }
    }
}

impl InterfaceStore {
    pub fn add_interface(&self, interface: InterfaceConfig) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn get(&self, name: &str) -> Option<InterfaceConfig> {
        self.interfaces.get(name).map(|i| i.value().clone())
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_interface_store() {
        let store = InterfaceStore::default();
        assert!(store.is_empty());
        let port = OvsPortConfig {
            port_uuid: "0b4c".into(),
            ofport: 3,
        };
        store.add_interface(InterfaceConfig::uplink("Ethernet0", port.clone()));
        // recording the same uplink again replaces the entry
        store.add_interface(InterfaceConfig::uplink("Ethernet0", port));

        assert_eq!(store.len(), 1);
        let uplink = store.get("Ethernet0");
        assert_eq!(uplink.as_ref().map(|i| i.kind), Some(InterfaceKind::Uplink));
        assert_eq!(
            uplink.and_then(|i| i.ovs_port).map(|p| p.ofport),
            Some(3)
        );
        assert!(store.get("gw0").is_none());
    }
}
