//! `CredentialError` and `ProviderError` (spec.md §7).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing credentials for provider '{0}': environment variable '{1}' is unset")]
    Missing(String, String),
    #[error("invalid credentials for provider '{0}': {1}")]
    Invalid(String, String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    TransientAuth,
    ServerError,
    InvalidRegion,
    QuotaExceeded,
    NotFound,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::TransientAuth => "transient auth failure",
            ProviderErrorKind::ServerError => "server error",
            ProviderErrorKind::InvalidRegion => "invalid region",
            ProviderErrorKind::QuotaExceeded => "quota exceeded",
            ProviderErrorKind::NotFound => "not found",
        };
        write!(f, "{}", s)
    }
}

impl ProviderError {
    pub fn retryable(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            ProviderErrorKind::RateLimited | ProviderErrorKind::TransientAuth | ProviderErrorKind::ServerError
        );
        ProviderError { kind, message: message.into(), retryable }
    }
}
