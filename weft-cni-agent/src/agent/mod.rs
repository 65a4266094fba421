use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use weft_cni_node_controller::start_node_route_controller;

use crate::Result;
use crate::config::AgentArgs;
use crate::dataplane::interfaces::InterfaceStore;
use crate::dataplane::{self, BridgeSetup, Initializer};
use crate::kubernetes::local_node;
use crate::metrics::RouteMetrics;
use crate::ovs::{ofctl::OvsOfctl, vsctl::OvsVsctl};
use crate::platform::powershell::PowerShell;
use crate::route::RouteClient;

/// Sets up the node dataplane, then keeps peer routes in sync until `cancel`
/// fires. `ready` is cancelled once the node can forward pod traffic.
pub async fn start(args: AgentArgs, ready: CancellationToken, cancel: CancellationToken) -> Result<()> {
    let kube_client = kube::Client::try_default().await?;
    let local = local_node(kube_client.clone(), &args.node_name).await?;

    let platform = Arc::new(PowerShell::default());
    let node_config = Arc::new(
        dataplane::node_config(
            platform.as_ref(),
            &local.name,
            local.pod_cidr,
            local.node_ip,
            &args.host_gateway,
            &args.ovs_bridge,
        )
        .await?,
    );

    let initializer = Initializer::new(
        platform.clone(),
        Arc::new(OvsVsctl::new(&args.ovs_bridge)),
        Arc::new(OvsOfctl::new(&args.ovs_bridge)),
        Arc::new(InterfaceStore::default()),
        &args.local_network,
        node_config.clone(),
    );
    match initializer.run().await? {
        BridgeSetup::Configured => info!(bridge = %args.ovs_bridge, "bridge configured"),
        BridgeSetup::AlreadyConfigured => {
            info!(bridge = %args.ovs_bridge, "bridge was already configured")
        }
    }

    let route_client = Arc::new(RouteClient::new(
        platform.clone(),
        platform.clone(),
        platform,
        RouteMetrics::registered(),
    ));
    route_client.initialize(node_config).await?;

    ready.cancel();
    info!("agent ready");

    start_node_route_controller(
        kube_client,
        args.node_name,
        Duration::from_secs(args.resync_interval),
        cancel,
        route_client,
    )
    .await?;
    Ok(())
}
