//! Resource-level diff between the last-reconciled graph and the freshly
//! built desired graph (spec.md §4.6 step 4). Diffing stops at the
//! fingerprint: it never inspects the config itself, so `ResourceNode`
//! carries that fingerprint purposely opaque.

use nimbus_types::graph::ResourceId;
use serde::{Deserialize, Serialize};

use crate::graph::ResourceGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub creates: Vec<ResourceId>,
    pub updates: Vec<ResourceId>,
    pub deletes: Vec<ResourceId>,
    pub unchanged: Vec<ResourceId>,
}

impl ResourcePlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

/// Compares `current` (the last-reconciled graph, `None` on first deploy)
/// against `desired`. A node present in both but with a different
/// fingerprint is an update; present only in `desired` is a create; present
/// only in `current` is a delete.
pub fn diff(current: Option<&ResourceGraph>, desired: &ResourceGraph) -> ResourcePlan {
    let mut plan = ResourcePlan { creates: Vec::new(), updates: Vec::new(), deletes: Vec::new(), unchanged: Vec::new() };

    for node in desired.nodes() {
        match current.and_then(|g| g.get(&node.id)) {
            None => plan.creates.push(node.id.clone()),
            Some(prev) if prev.fingerprint != node.fingerprint => plan.updates.push(node.id.clone()),
            Some(_) => plan.unchanged.push(node.id.clone()),
        }
    }

    if let Some(current) = current {
        for node in current.nodes() {
            if desired.get(&node.id).is_none() {
                plan.deletes.push(node.id.clone());
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::graph::ResourceKind;
    use crate::graph::ResourceNode;

    fn node(kind: ResourceKind, key: &str, fp: &str) -> ResourceNode {
        ResourceNode { id: ResourceId::new(kind, key), fingerprint: fp.to_string() }
    }

    #[test]
    fn first_deploy_is_all_creates() {
        let mut desired = ResourceGraph::new();
        desired.add_node(node(ResourceKind::Network, "net", "fp1"));
        let plan = diff(None, &desired);
        assert_eq!(plan.creates.len(), 1);
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn changed_fingerprint_is_an_update() {
        let mut current = ResourceGraph::new();
        current.add_node(node(ResourceKind::Network, "net", "fp1"));
        let mut desired = ResourceGraph::new();
        desired.add_node(node(ResourceKind::Network, "net", "fp2"));
        let plan = diff(Some(&current), &desired);
        assert_eq!(plan.updates, vec![ResourceId::new(ResourceKind::Network, "net")]);
    }

    #[test]
    fn removed_node_is_a_delete() {
        let mut current = ResourceGraph::new();
        current.add_node(node(ResourceKind::Node, "w1", "fp1"));
        let desired = ResourceGraph::new();
        let plan = diff(Some(&current), &desired);
        assert_eq!(plan.deletes, vec![ResourceId::new(ResourceKind::Node, "w1")]);
    }

    #[test]
    fn unchanged_fingerprint_is_neither_create_nor_update() {
        let mut current = ResourceGraph::new();
        current.add_node(node(ResourceKind::Network, "net", "fp1"));
        let mut desired = ResourceGraph::new();
        desired.add_node(node(ResourceKind::Network, "net", "fp1"));
        let plan = diff(Some(&current), &desired);
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged.len(), 1);
    }
}
