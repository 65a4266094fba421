use ipnetwork::Ipv4Network;
use tracing::{debug, error, info};

use crate::dataplane::Initializer;
use crate::dataplane::interfaces::{InterfaceConfig, OvsPortConfig};
use crate::ovs::{BridgeClient, FlowClient, UPLINK_OFPORT};
use crate::platform::{HostNetwork, MacAddress};
use crate::Result;

const DATAPATH_ID_PREFIX: &str = "0000";

/// Outcome of bridge preparation. Both variants are successes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeSetup {
    Configured,
    /// The uplink was already attached, nothing was changed.
    AlreadyConfigured,
}

/// Stable datapath id derived from the uplink MAC.
pub fn datapath_id(mac: &MacAddress) -> String {
    format!("{DATAPATH_ID_PREFIX}{}", mac.to_hex())
}

impl<H, B, F> Initializer<H, B, F>
where
    H: HostNetwork,
    B: BridgeClient,
    F: FlowClient,
{
    /// Attaches the uplink to the bridge and moves the host address onto the
    /// bridge interface.
    pub async fn prepare_bridge(&self) -> Result<BridgeSetup> {
        let network = self.host.local_network(&self.local_network).await?;
        let uplink = network.adapter_name.as_str();

        // must be pinned before any port is added or the controller connection drops
        let dpid = datapath_id(&network.source_mac);
        if let Err(e) = self.bridge.set_datapath_id(&dpid).await {
            error!(%e, datapath_id = %dpid, "failed to set datapath id");
            return Err(e);
        }

        if let Some(ofport) = self.bridge.get_ofport(uplink).await? {
            info!(uplink, ofport, "uplink already attached, skipping bridge configuration");
            return Ok(BridgeSetup::AlreadyConfigured);
        }

        let port_uuid = match self.bridge.create_uplink_port(uplink, UPLINK_OFPORT).await {
            Ok(uuid) => uuid,
            Err(e) => {
                error!(%e, uplink, "failed to add uplink port");
                return Err(e);
            }
        };
        self.interfaces.add_interface(InterfaceConfig::uplink(
            uplink,
            OvsPortConfig {
                port_uuid,
                ofport: UPLINK_OFPORT,
            },
        ));

        let address: Ipv4Network = network.management_ip.parse()?;
        info!(%address, network = %network.name, "found management address");
        self.migrate_address(&network.source_mac, address).await?;
        Ok(BridgeSetup::Configured)
    }

    async fn migrate_address(&self, mac: &MacAddress, address: Ipv4Network) -> Result<()> {
        let bridge = self.bridge.bridge_name();
        self.host.enable_adapter(bridge).await?;
        if let Err(e) = self.host.set_mac_address(bridge, mac).await {
            error!(%e, bridge, %mac, "failed to set mac address");
            return Err(e);
        }

        if self.host.ipv4_address(bridge).await? == Some(address) {
            debug!(bridge, %address, "bridge already carries the management address");
            return Ok(());
        }
        if let Err(e) = self.host.remove_ipv4_addresses(bridge).await {
            error!(%e, bridge, "failed to remove existing addresses");
            return Err(e);
        }
        if let Err(e) = self.host.add_ipv4_address(bridge, address).await {
            error!(%e, bridge, %address, "failed to set address");
            return Err(e);
        }
        Ok(())
    }
}
