use thiserror::Error;

/// SSH-layer failure (spec.md §7): `dial` is retried up to `DialErrorLimit`,
/// `timeout` is fatal for that call, `nonzero` is left for the caller to
/// interpret (the apt-retry wrapper re-runs; the validator marks the node
/// Failed).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteExecErrorKind {
    #[error("dial")]
    Dial,
    #[error("timeout")]
    Timeout,
    #[error("nonzero")]
    Nonzero,
}

#[derive(Debug, Error, Clone)]
#[error("remote exec error on {host}: {kind} ({detail})")]
pub struct RemoteExecError {
    pub kind: RemoteExecErrorKind,
    pub host: String,
    pub detail: String,
}

impl RemoteExecError {
    pub fn dial(host: impl Into<String>, detail: impl Into<String>) -> Self {
        RemoteExecError { kind: RemoteExecErrorKind::Dial, host: host.into(), detail: detail.into() }
    }

    pub fn timeout(host: impl Into<String>, detail: impl Into<String>) -> Self {
        RemoteExecError { kind: RemoteExecErrorKind::Timeout, host: host.into(), detail: detail.into() }
    }

    pub fn nonzero(host: impl Into<String>, detail: impl Into<String>) -> Self {
        RemoteExecError { kind: RemoteExecErrorKind::Nonzero, host: host.into(), detail: detail.into() }
    }

    pub fn is_retryable_dial(&self) -> bool {
        self.kind == RemoteExecErrorKind::Dial
    }
}
