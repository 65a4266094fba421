use async_trait::async_trait;
use tracing::debug;

use crate::Result;
use crate::ovs::{BridgeClient, OfPort};
use crate::platform::run_command;

const OVS_VSCTL: &str = "ovs-vsctl";

#[derive(Clone, Debug)]
pub struct OvsVsctl {
    bridge: String,
    program: String,
}

impl OvsVsctl {
    pub fn new(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            program: OVS_VSCTL.into(),
        }
    }

    async fn vsctl(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "running ovs-vsctl");
        run_command(&self.program, args).await
    }
}

/// ovs-vsctl prints `[]` or `-1` while the port number is still pending.
fn parse_ofport(output: &str) -> Option<OfPort> {
    match output.trim().parse::<i64>() {
        Ok(port) if port > 0 => OfPort::try_from(port).ok(),
        _ => None,
    }
}

#[async_trait]
impl BridgeClient for OvsVsctl {
    fn bridge_name(&self) -> &str {
        &self.bridge
    }

    async fn set_datapath_id(&self, datapath_id: &str) -> Result<()> {
        let config = format!("other-config:datapath-id={datapath_id}");
        self.vsctl(&["set", "Bridge", &self.bridge, &config]).await?;
        Ok(())
    }

    async fn get_ofport(&self, name: &str) -> Result<Option<OfPort>> {
        let output = self
            .vsctl(&["--if-exists", "get", "Interface", name, "ofport"])
            .await?;
        Ok(parse_ofport(&output))
    }

    async fn create_uplink_port(&self, name: &str, ofport: OfPort) -> Result<String> {
        let request = format!("ofport_request={ofport}");
        self.vsctl(&[
            "add-port",
            &self.bridge,
            name,
            "--",
            "set",
            "Interface",
            name,
            &request,
        ])
        .await?;
        let uuid = self.vsctl(&["get", "Port", name, "_uuid"]).await?;
        Ok(uuid.trim().to_string())
    }
}
