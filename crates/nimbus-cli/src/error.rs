//! Top-level error type: every crate's error funnels here via `#[from]`, the
//! same aggregation shape `OrchestratorError`/`LifecycleError` use one layer
//! down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] nimbus_types::error::ConfigError),
    #[error(transparent)]
    Orchestrator(#[from] nimbus_orchestrator::OrchestratorError),
    #[error(transparent)]
    State(#[from] nimbus_orchestrator::StateError),
    #[error(transparent)]
    Lifecycle(#[from] nimbus_lifecycle::LifecycleError),
    #[error(transparent)]
    Upgrade(#[from] nimbus_lifecycle::UpgradeError),
    #[error(transparent)]
    Hook(#[from] nimbus_lifecycle::HookError),
    #[error(transparent)]
    Backup(#[from] nimbus_lifecycle::BackupError),
    #[error(transparent)]
    Provider(#[from] nimbus_providers::ProviderError),
    #[error(transparent)]
    Remote(#[from] nimbus_remote::RemoteExecError),
    #[error(transparent)]
    Provision(#[from] nimbus_provision::ProvisionError),
    #[error(transparent)]
    Audit(#[from] nimbus_audit::AuditError),
    #[error("required environment variable '{0}' is not set")]
    MissingEnv(String),
    #[error("could not read cluster description at '{0}': {1}")]
    ReadDescription(String, String),
    #[error("could not parse cluster description: {0}")]
    ParseDescription(String),
    #[error("no stack is currently selected; pass --stack or run `nimbus stacks select`")]
    NoStackSelected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process exit codes (spec.md §6): 0 success, 1 user error/validation, 2
/// in-flight failure, 3 stack locked, 4 nothing to do.
impl EngineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) | EngineError::ParseDescription(_) | EngineError::MissingEnv(_) | EngineError::NoStackSelected | EngineError::ReadDescription(_, _) => 1,
            EngineError::Orchestrator(nimbus_orchestrator::OrchestratorError::Lease(nimbus_orchestrator::LeaseError::Locked(_, _, _))) => 3,
            _ => 2,
        }
    }
}
