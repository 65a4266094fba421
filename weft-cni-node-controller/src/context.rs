use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::Store;

use crate::NodeRouteState;

pub struct Context<S: NodeRouteState> {
    pub node_name: String,
    pub node_store: Store<Node>,
    pub route_state: S,
}
