//! `ConfigError` — invalid description; fails validation before any side
//! effect (see spec.md §7). Kept as a typed `thiserror` enum, one variant
//! per validation failure, so callers can match on the exact problem
//! instead of string-matching a message.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cluster description '{0}' has no enabled providers and no explicit node list")]
    NoProviders(String),

    #[error("node pool '{0}' has an empty role set")]
    EmptyRoleSet(String),

    #[error("node pool '{pool}' uses provider '{provider}' which is not in the enabled providers set")]
    PoolProviderNotEnabled { pool: String, provider: String },

    #[error("node pool '{0}' has a non-positive count")]
    NonPositivePoolCount(String),

    #[error("overlay CIDR '{0}' is not a valid IPv4 /24 or larger network")]
    InvalidOverlayCidr(String),

    #[error("bastion allowed CIDRs list is empty: treating as deny-all. Configure `security.bastion.allowed_cidrs` explicitly to permit SSH sources")]
    EmptyBastionAllowlist,

    #[error("duplicate node pool name '{0}'")]
    DuplicatePoolName(String),

    #[error("kubernetes distribution must be one of rke2, k3s (got '{0}')")]
    UnknownDistribution(String),

    #[error("{0}")]
    Other(String),
}
