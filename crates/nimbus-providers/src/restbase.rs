//! Shared scaffolding for the REST-backed provider implementations. Each
//! provider module customizes the base URL, auth header, and the small set
//! of encoding quirks spec.md §4.1/§4.4 calls out (base64 user-data on
//! Azure/Linode, plain on AWS/DO/Hetzner); the HTTP plumbing itself is one
//! `reqwest::blocking::Client` reused across calls, in the same spirit as
//! `Vault`'s single cached `reqwest::Client`.

use std::env;
use std::sync::OnceLock;

use reqwest::blocking::Client;

use crate::error::{CredentialError, ProviderError, ProviderErrorKind};
use crate::retry::{with_retry, BackoffPolicy};

pub(crate) struct RestContext {
    pub client: Client,
    pub token: String,
    pub base_url: String,
    pub default_region: Option<String>,
}

impl RestContext {
    pub(crate) fn from_env(provider_name: &str, token_env: &str, base_url: &str) -> Result<Self, CredentialError> {
        let token = env::var(token_env)
            .map_err(|_| CredentialError::Missing(provider_name.to_string(), token_env.to_string()))?;
        if token.trim().is_empty() {
            return Err(CredentialError::Invalid(
                provider_name.to_string(),
                "token is empty".to_string(),
            ));
        }
        Ok(RestContext {
            client: Client::new(),
            token,
            base_url: base_url.to_string(),
            default_region: None,
        })
    }
}

pub(crate) fn classify_status(status: reqwest::StatusCode) -> ProviderErrorKind {
    if status.as_u16() == 429 {
        ProviderErrorKind::RateLimited
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        ProviderErrorKind::TransientAuth
    } else if status.is_server_error() {
        ProviderErrorKind::ServerError
    } else if status.as_u16() == 404 {
        ProviderErrorKind::NotFound
    } else {
        ProviderErrorKind::ServerError
    }
}

/// Encodes cloud-init user-data per spec.md §4.4: plain on AWS/DO/Hetzner,
/// base64 on Azure/Linode.
pub(crate) fn encode_user_data(raw: &str, base64_encode: bool) -> String {
    if base64_encode {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    } else {
        raw.to_string()
    }
}

pub(crate) fn cancelled_none() -> bool {
    false
}

pub(crate) fn retry<T>(f: impl FnMut() -> Result<T, ProviderError>) -> Result<T, ProviderError> {
    with_retry(BackoffPolicy::default(), &cancelled_none, f)
}

pub(crate) fn network_init_guard() -> &'static OnceLock<()> {
    static GUARD: OnceLock<()> = OnceLock::new();
    &GUARD
}
