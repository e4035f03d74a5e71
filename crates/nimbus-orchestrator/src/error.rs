use thiserror::Error;

use nimbus_types::ConfigError;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("stack '{0}' blob failed to deserialize: {1}")]
    Corrupt(String, String),
    #[error("stack '{0}' schema version {found} is newer than the {supported} this build understands")]
    VersionMismatch { stack: String, found: u32, supported: u32 },
    #[error("backend I/O failure for stack '{0}': {1}")]
    Backend(String, String),
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("stack '{0}' is locked by '{1}' since {2}")]
    Locked(String, String, String),
    #[error("lease for stack '{0}' was not held by '{1}'")]
    NotHolder(String, String),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("resource graph for stack '{0}' contains a cycle")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Provider(#[from] nimbus_providers::error::ProviderError),
    #[error(transparent)]
    Remote(#[from] nimbus_remote::RemoteExecError),
    #[error(transparent)]
    Provision(#[from] nimbus_provision::ProvisionError),
    #[error(transparent)]
    Topology(#[from] nimbus_topology::TopologyError),
}
