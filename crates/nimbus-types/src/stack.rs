//! `Stack` — the single persistent record of a cluster (spec.md §3, §6).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::BackupArtifact;
use crate::node::{Node, NodeAddresses};
use crate::secrets::SecretsEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct StackId {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackId {
    pub fn new(organization: impl Into<String>, project: impl Into<String>, stack: impl Into<String>) -> Self {
        StackId {
            organization: organization.into(),
            project: project.into(),
            stack: stack.into(),
        }
    }

    /// `<backend>/<org>/<project>/<stack>` path prefix used for every
    /// persisted artifact (spec.md §6).
    pub fn path_prefix(&self) -> String {
        format!("{}/{}/{}", self.organization, self.project, self.stack)
    }
}

impl std::fmt::Display for StackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.organization, self.project, self.stack)
    }
}

/// Mutual-exclusion token that serializes mutations on a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Declared outputs registered by the orchestrator (spec.md §4.6 step 6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackOutputs {
    pub cluster_name: Option<String>,
    pub api_endpoint: Option<String>,
    pub kube_config: Option<String>,
    pub ssh_private_key: Option<String>,
    pub status: Option<String>,
    /// Per-node public/private/VPN IPs, keyed by node name (spec.md §4.6
    /// step 6).
    #[serde(default)]
    pub node_addresses: BTreeMap<String, NodeAddresses>,
    /// Artifacts produced by `nimbus backup create`, pruned by `nimbus
    /// backup prune` (spec.md §4.7); this engine keeps no registry outside
    /// the stack blob itself.
    #[serde(default)]
    pub backup_artifacts: Vec<BackupArtifact>,
}

/// Schema version of the persisted blob; bumped on incompatible changes.
pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    pub schema_version: u32,
    pub nodes: Vec<Node>,
    pub outputs: StackOutputs,
    pub secrets: SecretsEnvelope,
    pub lease: Option<Lease>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl Stack {
    pub fn new(id: StackId, secrets: SecretsEnvelope) -> Self {
        Stack {
            id,
            schema_version: STATE_SCHEMA_VERSION,
            nodes: Vec::new(),
            outputs: StackOutputs::default(),
            secrets,
            lease: None,
            last_reconciled_at: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lease.is_some()
    }
}
