pub mod agent;
pub mod config;
pub mod dataplane;
pub mod firewall;
pub mod http;
pub mod kubernetes;
pub mod metrics;
pub mod ovs;
pub mod platform;
pub mod route;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("command `{cmd}` failed: {stderr}")]
    Command { cmd: String, stderr: String },

    #[error(transparent)]
    JsonConversion(#[from] serde_json::Error),

    #[error("addr parse error: {0}")]
    AddrParseError(#[from] std::net::AddrParseError),

    #[error("invalid ip network: {0}")]
    InvalidIpNetwork(#[from] ipnetwork::IpNetworkError),

    #[error("invalid mac address: {0}")]
    InvalidMacAddress(String),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid node config: {0}")]
    InvalidNodeConfig(String),

    #[error(transparent)]
    NodeController(#[from] weft_cni_node_controller::Error),

    #[error("initialization step {step} failed: {source}")]
    InitStep {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("task failed: {0}")]
    Task(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
