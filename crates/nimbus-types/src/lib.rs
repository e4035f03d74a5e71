//! Data model for the declarative multi-cloud Kubernetes cluster lifecycle
//! engine: `ClusterDescription` (input), `Node`/`ResourceGraph` (runtime),
//! `Stack` (persistent record), and the cross-cutting `AuditEvent` and
//! `BackupArtifact` records.
//!
//! This crate has no I/O of its own: it is the vocabulary every other
//! `nimbus-*` crate shares, including the binary and any future
//! dashboard or query tool built against the same stack state.

pub mod audit;
pub mod backup;
pub mod description;
pub mod error;
pub mod graph;
pub mod node;
pub mod secrets;
pub mod stack;

pub use audit::{AuditEvent, AuditEventType, Severity};
pub use backup::{BackupArtifact, BackupStatus};
pub use description::{
    ClusterDescription, HookSpec, KubernetesSpec, LifecyclePolicies, Metadata, NetworkSpec, NodePool,
    ProviderKind, ProviderSettings, Role, SecuritySpec,
};
pub use error::ConfigError;
pub use graph::{ResourceId, ResourceKind};
pub use node::{Node, NodeStatus};
pub use secrets::SecretsEnvelope;
pub use stack::{Lease, Stack, StackId};

pub type Result<T> = std::result::Result<T, error::ConfigError>;
