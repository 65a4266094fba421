use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt, runtime::Controller};
use tokio::sync::mpsc::{self, Receiver};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    NodeRouteState, Result,
    context::Context,
    controller::{delete_node_routes, error_policy, reconcile},
    node::desired_pod_cidrs,
    store::create_store_and_subscriber,
};

const STORE_READY_TIMEOUT: Duration = Duration::from_secs(30);
const DELETED_NODE_BUFFER: usize = 64;

/// Drives host routes from peer Node objects until `cancel` fires.
///
/// Individual nodes are handled by the controller and removed nodes by the
/// delete events of the watch. A full reconciliation pass runs every
/// `resync_interval` against the pod subnets in the store, which also prunes
/// routes of nodes deleted while the agent was not watching.
pub async fn start_node_route_controller<S>(
    client: Client,
    node_name: String,
    resync_interval: Duration,
    cancel: CancellationToken,
    route_state: S,
) -> Result<()>
where
    S: NodeRouteState + 'static,
{
    let (deleted_tx, deleted_rx) = mpsc::channel(DELETED_NODE_BUFFER);
    let (node_store, node_subscriber) = create_store_and_subscriber(
        Api::<Node>::all(client),
        Some(STORE_READY_TIMEOUT),
        Some(deleted_tx),
    )
    .await?;

    let context = Arc::new(Context {
        node_name,
        node_store: node_store.clone(),
        route_state,
    });

    tokio::spawn(resync(context.clone(), resync_interval, cancel.clone()));
    tokio::spawn(watch_deleted_nodes(
        context.clone(),
        deleted_rx,
        cancel.clone(),
    ));

    info!("starting node route controller");
    Controller::for_shared_stream(node_subscriber, node_store)
        .graceful_shutdown_on(shutdown(cancel))
        .run(reconcile, error_policy, context)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn resync<S>(ctx: Arc<Context<S>>, period: Duration, cancel: CancellationToken)
where
    S: NodeRouteState,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = reconcile_all(&ctx).await {
            error!(%e, "route reconciliation failed");
        }
    }
    info!("stopped route resync");
}

/// One full pass against every pod subnet in the node store.
pub(crate) async fn reconcile_all<S>(ctx: &Context<S>) -> Result<()>
where
    S: NodeRouteState,
{
    let desired = desired_pod_cidrs(&ctx.node_store.state(), &ctx.node_name);
    debug!("reconciling routes against {} pod cidrs", desired.len());
    ctx.route_state.reconcile(desired).await
}

async fn watch_deleted_nodes<S>(
    ctx: Arc<Context<S>>,
    mut deleted: Receiver<Node>,
    cancel: CancellationToken,
) where
    S: NodeRouteState,
{
    loop {
        let node = tokio::select! {
            _ = cancel.cancelled() => break,
            node = deleted.recv() => match node {
                Some(node) => node,
                None => break,
            },
        };
        if let Err(e) = delete_node_routes(&node, &ctx).await {
            error!(%e, "failed to remove route of deleted Node {}", node.name_any());
        }
    }
    info!("stopped deleted node watch");
}

async fn shutdown(cancel: CancellationToken) {
    cancel.cancelled().await;
}
