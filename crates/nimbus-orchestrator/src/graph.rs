//! `ResourceGraph` (spec.md §3): a DAG of typed resource nodes, edges
//! meaning "A must exist before B". Backed by `petgraph::DiGraph` with
//! `toposort` driving wave assignment.

use std::collections::{BTreeMap, HashMap};

use nimbus_types::graph::{ResourceId, ResourceKind};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    /// Opaque fingerprint of this resource's desired configuration, used by
    /// the diff engine to detect updates without a full deep-equality walk.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    /// Adjacency as `(from, to)` resource-id pairs; kept serializable
    /// (petgraph's `Graph` isn't serde-friendly across our dependency
    /// surface) and rebuilt into a `petgraph::DiGraph` on demand for
    /// traversal.
    edges: Vec<(ResourceId, ResourceId)>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        ResourceGraph::default()
    }

    pub fn add_node(&mut self, node: ResourceNode) {
        if !self.nodes.iter().any(|n| n.id == node.id) {
            self.nodes.push(node);
        }
    }

    pub fn add_edge(&mut self, from: ResourceId, to: ResourceId) {
        self.edges.push((from, to));
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn nodes_of_kind(&self, kind: ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.iter().filter(|n| n.id.kind == kind).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `id` (edges pointing into it).
    pub fn edges_into(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.edges.iter().filter(|(_, to)| to == id).map(|(from, _)| from.clone()).collect()
    }

    fn build_petgraph(&self) -> (DiGraph<ResourceId, ()>, HashMap<ResourceId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for node in &self.nodes {
            let idx = graph.add_node(node.id.clone());
            index_of.insert(node.id.clone(), idx);
        }
        for (from, to) in &self.edges {
            if let (Some(&a), Some(&b)) = (index_of.get(from), index_of.get(to)) {
                graph.add_edge(a, b, ());
            }
        }
        (graph, index_of)
    }

    /// Topological order, dependencies before dependents (spec.md §4.6
    /// step 5: "topologically sort creates+updates").
    pub fn toposort(&self) -> Result<Vec<ResourceId>, GraphError> {
        let (graph, _) = self.build_petgraph();
        let order = toposort(&graph, None).map_err(|_| GraphError::Cycle("<graph>".to_string()))?;
        Ok(order.into_iter().map(|idx| graph[idx].clone()).collect())
    }

    /// Reverse topological order — leaves of the "depended-on" relation
    /// first (spec.md §4.6 "destroy reverses the topological order").
    pub fn destroy_order(&self) -> Result<Vec<ResourceId>, GraphError> {
        let mut order = self.toposort()?;
        order.reverse();
        Ok(order)
    }

    /// Resource ids grouped into waves: everything in wave N has all its
    /// dependencies satisfied by waves `0..N`, so members of one wave can
    /// execute concurrently (spec.md §4.6 "allow independent subtrees to
    /// proceed concurrently").
    pub fn execution_waves(&self) -> Result<Vec<Vec<ResourceId>>, GraphError> {
        let order = self.toposort()?;
        let mut depth: BTreeMap<ResourceId, usize> = BTreeMap::new();
        for id in &order {
            let max_parent_depth = self
                .edges
                .iter()
                .filter(|(_, to)| to == id)
                .filter_map(|(from, _)| depth.get(from).copied())
                .max();
            depth.insert(id.clone(), max_parent_depth.map(|d| d + 1).unwrap_or(0));
        }
        let max_depth = depth.values().copied().max().unwrap_or(0);
        let mut waves = vec![Vec::new(); max_depth + 1];
        for id in order {
            let d = depth[&id];
            waves[d].push(id);
        }
        Ok(waves)
    }

    /// Like `execution_waves`, restricted to `subset`: depths are computed
    /// over the full graph so ordering relative to untouched resources is
    /// preserved, but only `subset` members are returned (spec.md §4.6 step
    /// 5: "topologically sort creates+updates").
    pub fn waves_for(&self, subset: &[ResourceId]) -> Result<Vec<Vec<ResourceId>>, GraphError> {
        let wanted: std::collections::HashSet<&ResourceId> = subset.iter().collect();
        let all_waves = self.execution_waves()?;
        Ok(all_waves
            .into_iter()
            .map(|wave| wave.into_iter().filter(|id| wanted.contains(id)).collect::<Vec<_>>())
            .filter(|wave: &Vec<ResourceId>| !wave.is_empty())
            .collect())
    }

    /// Standard edge shape for a cluster: every Node depends on exactly one
    /// Network and, transitively, on the Bastion when enabled; VpnMesh
    /// depends on all Nodes and the Bastion; K8sInstall depends on VpnMesh
    /// and all Nodes (spec.md §3 "ResourceGraph" invariants).
    pub fn wire_standard_topology(&mut self, network: &ResourceId, bastion: Option<&ResourceId>) {
        let node_ids: Vec<ResourceId> = self.nodes_of_kind(ResourceKind::Node).iter().map(|n| n.id.clone()).collect();
        for node_id in &node_ids {
            self.add_edge(network.clone(), node_id.clone());
            if let Some(b) = bastion {
                self.add_edge(b.clone(), node_id.clone());
            }
        }
        for mesh in self.nodes_of_kind(ResourceKind::VpnMesh).iter().map(|n| n.id.clone()).collect::<Vec<_>>() {
            for node_id in &node_ids {
                self.add_edge(node_id.clone(), mesh.clone());
            }
            if let Some(b) = bastion {
                self.add_edge(b.clone(), mesh.clone());
            }
        }
        for install in self.nodes_of_kind(ResourceKind::K8sInstall).iter().map(|n| n.id.clone()).collect::<Vec<_>>() {
            for mesh in self.nodes_of_kind(ResourceKind::VpnMesh).iter().map(|n| n.id.clone()).collect::<Vec<_>>() {
                self.add_edge(mesh.clone(), install.clone());
            }
            for node_id in &node_ids {
                self.add_edge(node_id.clone(), install.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: ResourceKind, key: &str) -> ResourceNode {
        ResourceNode { id: ResourceId::new(kind, key), fingerprint: "fp".to_string() }
    }

    #[test]
    fn toposort_respects_dependency_edges() {
        let mut g = ResourceGraph::new();
        g.add_node(node(ResourceKind::Network, "net"));
        g.add_node(node(ResourceKind::Node, "m1"));
        g.add_edge(ResourceId::new(ResourceKind::Network, "net"), ResourceId::new(ResourceKind::Node, "m1"));
        let order = g.toposort().unwrap();
        let net_pos = order.iter().position(|r| r.key == "net").unwrap();
        let node_pos = order.iter().position(|r| r.key == "m1").unwrap();
        assert!(net_pos < node_pos);
    }

    #[test]
    fn destroy_order_is_reversed() {
        let mut g = ResourceGraph::new();
        g.add_node(node(ResourceKind::Network, "net"));
        g.add_node(node(ResourceKind::Node, "m1"));
        g.add_edge(ResourceId::new(ResourceKind::Network, "net"), ResourceId::new(ResourceKind::Node, "m1"));
        let destroy = g.destroy_order().unwrap();
        assert_eq!(destroy[0].key, "m1");
        assert_eq!(destroy[1].key, "net");
    }

    #[test]
    fn independent_subtrees_land_in_the_same_wave() {
        let mut g = ResourceGraph::new();
        g.add_node(node(ResourceKind::Network, "net"));
        g.add_node(node(ResourceKind::Node, "m1"));
        g.add_node(node(ResourceKind::Node, "m2"));
        g.add_edge(ResourceId::new(ResourceKind::Network, "net"), ResourceId::new(ResourceKind::Node, "m1"));
        g.add_edge(ResourceId::new(ResourceKind::Network, "net"), ResourceId::new(ResourceKind::Node, "m2"));
        let waves = g.execution_waves().unwrap();
        assert_eq!(waves[0].len(), 1);
        assert_eq!(waves[1].len(), 2);
    }

    #[test]
    fn wire_standard_topology_connects_mesh_and_install() {
        let mut g = ResourceGraph::new();
        g.add_node(node(ResourceKind::Network, "net"));
        g.add_node(node(ResourceKind::Node, "m1"));
        g.add_node(node(ResourceKind::VpnMesh, "mesh"));
        g.add_node(node(ResourceKind::K8sInstall, "install"));
        g.wire_standard_topology(&ResourceId::new(ResourceKind::Network, "net"), None);
        let order = g.toposort().unwrap();
        let node_pos = order.iter().position(|r| r.key == "m1").unwrap();
        let mesh_pos = order.iter().position(|r| r.key == "mesh").unwrap();
        let install_pos = order.iter().position(|r| r.key == "install").unwrap();
        assert!(node_pos < mesh_pos);
        assert!(mesh_pos < install_pos);
    }
}
