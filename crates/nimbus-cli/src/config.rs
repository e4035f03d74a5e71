//! Environment and on-disk config discovery (spec.md §6): provider
//! credentials, state-backend location, and the cluster description file
//! itself all come from a handful of well-known env vars.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nimbus_types::description::{ClusterDescription, ProviderKind};

use crate::error::EngineError;

pub const STATE_BACKEND_URL_ENV: &str = "NIMBUS_STATE_BACKEND_URL";
pub const STATE_PASSPHRASE_ENV: &str = "NIMBUS_STATE_PASSPHRASE";
pub const CURRENT_STACK_ENV: &str = "NIMBUS_STACK";
pub const BACKUP_STORAGE_URL_ENV: &str = "NIMBUS_BACKUP_STORAGE_URL";

/// `<PROVIDER>_TOKEN` convention, e.g. `HETZNER_TOKEN`, `LINODE_TOKEN`,
/// `DIGITALOCEAN_TOKEN`; AWS and Azure use their own native triples instead
/// since their SDKs already expect those names.
pub fn provider_token_env(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Aws => "AWS_ACCESS_KEY_ID",
        ProviderKind::Azure => "AZURE_CLIENT_SECRET",
        ProviderKind::DigitalOcean => "DIGITALOCEAN_TOKEN",
        ProviderKind::Linode => "LINODE_TOKEN",
        ProviderKind::Hetzner => "HETZNER_TOKEN",
    }
}

pub fn require_env(key: &str) -> Result<String, EngineError> {
    env::var(key).map_err(|_| EngineError::MissingEnv(key.to_string()))
}

pub fn state_backend_url() -> Result<String, EngineError> {
    require_env(STATE_BACKEND_URL_ENV)
}

pub fn backup_storage_url() -> Result<String, EngineError> {
    require_env(BACKUP_STORAGE_URL_ENV)
}

pub fn current_stack_key() -> Option<String> {
    env::var(CURRENT_STACK_ENV).ok()
}

pub fn nimbus_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".nimbus")
}

/// Persists the selected stack key to `~/.nimbus/current-stack` so `stacks
/// select` survives across invocations without requiring the env var every
/// time (spec.md §6 `stacks select`/`stacks current`).
pub fn write_current_stack(stack_key: &str) -> Result<(), EngineError> {
    let home = nimbus_home();
    fs::create_dir_all(&home)?;
    fs::write(home.join("current-stack"), stack_key)?;
    Ok(())
}

pub fn read_current_stack() -> Option<String> {
    if let Some(from_env) = current_stack_key() {
        return Some(from_env);
    }
    fs::read_to_string(nimbus_home().join("current-stack")).ok().map(|s| s.trim().to_string())
}

pub fn resolve_stack_key(explicit: Option<&str>) -> Result<String, EngineError> {
    if let Some(s) = explicit {
        return Ok(s.to_string());
    }
    read_current_stack().ok_or(EngineError::NoStackSelected)
}

/// Loads and verifies a `ClusterDescription` from a YAML file.
pub fn load_description(path: &Path) -> Result<ClusterDescription, EngineError> {
    let raw = fs::read_to_string(path).map_err(|e| EngineError::ReadDescription(path.display().to_string(), e.to_string()))?;
    let description: ClusterDescription = serde_yaml::from_str(&raw).map_err(|e| EngineError::ParseDescription(e.to_string()))?;
    description.verify()?;
    for warning in description.warnings() {
        log::warn!("{warning}");
    }
    Ok(description)
}
