use thiserror::Error;

use nimbus_remote::RemoteExecError;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Remote(#[from] RemoteExecError),

    #[error("node '{0}' did not reach BootReady within the 15 minute boot budget")]
    BootTimeout(String),

    #[error("node '{0}' did not reach Ready within the join budget")]
    JoinTimeout(String),

    #[error("master #1 install failed, which is fatal for the cluster: {0}")]
    FirstMasterFailed(String),

    #[error("template rendering failed: {0}")]
    TemplateRender(String),

    #[error("illegal node transition: {0}")]
    IllegalTransition(String),
}
