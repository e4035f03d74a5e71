use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("upgrade from {from} to {to} crosses a major version boundary")]
    MajorVersionJump { from: String, to: String },
    #[error("upgrade from {from} to {to} is a downgrade")]
    Downgrade { from: String, to: String },
    #[error("upgrade from {from} to {to} skips more than two minor versions")]
    TooManyMinorsSkipped { from: String, to: String },
    #[error("invalid semantic version '{0}'")]
    InvalidVersion(String),
    #[error("pre-check failed: {0}")]
    PreCheckFailed(String),
    #[error("node '{0}' failed to become ready after upgrade and auto-rollback is disabled")]
    NodeUpgradeFailed(String),
    #[error("upgrade step on node '{0}' failed: {1}")]
    StepFailed(String, String),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup component '{0}' failed: {1}")]
    ComponentFailed(String, String),
    #[error("backup artifact '{0}' not found")]
    NotFound(String),
    #[error("storage I/O failure: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook '{0}' timed out after {1:?}")]
    Timeout(String, std::time::Duration),
    #[error("hook '{0}' failed after {1} attempt(s): {2}")]
    Failed(String, u32, String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Provider(#[from] nimbus_providers::ProviderError),
    #[error(transparent)]
    Remote(#[from] nimbus_remote::RemoteExecError),
}
