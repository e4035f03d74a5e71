//! `ResourceGraph` vocabulary (spec.md §3). The graph's own traversal
//! (topological sort, bounded-parallel execution) lives in
//! `nimbus-orchestrator`, which is the one crate that depends on
//! `petgraph`; this module defines the typed-node vocabulary the graph is
//! built out of, free of any graph-library dependency so it can be shared
//! with `nimbus-audit` (for resource-id correlation) without pulling
//! `petgraph` in everywhere.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub enum ResourceKind {
    SshKey,
    Network,
    Firewall,
    Bastion,
    Node,
    VpnMesh,
    K8sInstall,
    Addon,
}

/// Identifies one resource-graph node, distinct from a Kubernetes node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    /// Unique within `kind`, e.g. provider name for `SshKey`/`Network`, node
    /// name for `Node`.
    pub key: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        ResourceId { kind, key: key.into() }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.key)
    }
}
