use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Node;
use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::node::{is_deleting, node_internal_ip, node_pod_cidr, peer_gateway_ip};
use crate::{Error, NodeRouteState, Result, context::Context};

pub(crate) const DEFAULT_REQUEUE_DURATION: Duration = Duration::from_secs(300);
const ERROR_REQUEUE_DURATION: Duration = Duration::from_secs(5);

#[tracing::instrument(skip(node, ctx), fields(node = %node.name_any()))]
pub(crate) async fn reconcile<S>(node: Arc<Node>, ctx: Arc<Context<S>>) -> Result<Action>
where
    S: NodeRouteState,
{
    let node_name = node.name_any();
    if node_name == ctx.node_name {
        return Ok(Action::await_change());
    }

    info!("Started reconciling Node {}", node_name);

    let Some(pod_cidr) = node_pod_cidr(&node)? else {
        debug!("Node {} has no IPv4 pod cidr yet", node_name);
        return Ok(Action::await_change());
    };

    if is_deleting(&node) {
        delete_node_routes(&node, &ctx).await?;
        return Ok(Action::await_change());
    }

    let Some(node_ip) = node_internal_ip(&node) else {
        warn!("Node {} has no internal address", node_name);
        return Ok(Action::await_change());
    };
    let gateway_ip = peer_gateway_ip(&pod_cidr);
    ctx.route_state
        .add_routes(pod_cidr, node_ip, gateway_ip)
        .await?;
    debug!("Route to {} via {} is in place", pod_cidr, gateway_ip);

    Ok(Action::requeue(DEFAULT_REQUEUE_DURATION))
}

/// Removes the route towards a node that is leaving the cluster. The local
/// node is skipped.
pub(crate) async fn delete_node_routes<S>(node: &Node, ctx: &Context<S>) -> Result<()>
where
    S: NodeRouteState,
{
    let node_name = node.name_any();
    if node_name == ctx.node_name {
        return Ok(());
    }
    let Some(pod_cidr) = node_pod_cidr(node)? else {
        return Ok(());
    };
    ctx.route_state.delete_routes(pod_cidr).await?;
    info!("Removed route to {} for deleted Node {}", pod_cidr, node_name);
    Ok(())
}

pub(crate) fn error_policy<S>(node: Arc<Node>, error: &Error, _ctx: Arc<Context<S>>) -> Action
where
    S: NodeRouteState,
{
    error!(?error, "reconcile error for Node {}", node.name_any());
    Action::requeue(ERROR_REQUEUE_DURATION)
}
