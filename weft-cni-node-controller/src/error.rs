use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("failed to create store: {0}")]
    StoreCreation(String),

    #[error("invalid pod cidr {cidr} on node {node}: {source}")]
    InvalidPodCidr {
        node: String,
        cidr: String,
        #[source]
        source: ipnetwork::IpNetworkError,
    },

    #[error("route update error: {0}")]
    RouteError(String),
}
