//! Builds the desired `ResourceGraph` from a `ClusterDescription` (spec.md
//! §4.6 step 3). Each node's fingerprint is a hash of its own desired
//! configuration, the same "fingerprint, don't deep-diff" approach
//! `PeerTable::fingerprint` uses for the mesh layer.

use nimbus_types::description::ClusterDescription;
use nimbus_types::graph::{ResourceId, ResourceKind};
use sha2::{Digest, Sha256};

use crate::graph::{ResourceGraph, ResourceNode};

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}

/// Builds the full desired graph for a cluster: one `SshKey`, one `Network`
/// per enabled provider, one `Firewall`, an optional `Bastion`, one `Node`
/// per pool member, one `VpnMesh` when `network.mesh` is set, and one
/// `K8sInstall` (spec.md §3 "ResourceGraph" invariants).
pub fn build_desired_graph(description: &ClusterDescription) -> ResourceGraph {
    let mut graph = ResourceGraph::new();

    let ssh_key_id = ResourceId::new(ResourceKind::SshKey, "cluster");
    graph.add_node(ResourceNode {
        id: ssh_key_id.clone(),
        fingerprint: fingerprint(&[description.security.ssh_public_key.as_deref().unwrap_or("")]),
    });

    let network_id = ResourceId::new(ResourceKind::Network, "overlay");
    graph.add_node(ResourceNode {
        id: network_id.clone(),
        fingerprint: fingerprint(&[
            &description.network.overlay_cidr,
            &description.network.pod_cidr,
            &description.network.service_cidr,
        ]),
    });

    let firewall_id = ResourceId::new(ResourceKind::Firewall, "cluster");
    graph.add_node(ResourceNode {
        id: firewall_id.clone(),
        fingerprint: fingerprint(&[&description.network.vpn_port.to_string(), &description.network.allowed_source_cidrs.join(",")]),
    });

    let bastion_id = if description.security.bastion.enabled {
        let id = ResourceId::new(ResourceKind::Bastion, "bastion");
        graph.add_node(ResourceNode {
            id: id.clone(),
            fingerprint: fingerprint(&[
                description.security.bastion.size.as_deref().unwrap_or(""),
                &description.security.bastion.ssh_port.to_string(),
            ]),
        });
        Some(id)
    } else {
        None
    };

    for (pool_name, pool) in description.master_pools().into_iter().chain(description.worker_pools()) {
        for i in 0..pool.count {
            let node_name = format!("{}-{}", pool_name, i);
            graph.add_node(ResourceNode {
                id: ResourceId::new(ResourceKind::Node, node_name),
                fingerprint: fingerprint(&[pool_name, &pool.size, &pool.image, pool.provider.name()]),
            });
        }
    }

    if description.network.mesh {
        graph.add_node(ResourceNode {
            id: ResourceId::new(ResourceKind::VpnMesh, "mesh"),
            fingerprint: fingerprint(&[&description.network.overlay_cidr, &description.network.vpn_port.to_string()]),
        });
    }

    graph.add_node(ResourceNode {
        id: ResourceId::new(ResourceKind::K8sInstall, "cluster"),
        fingerprint: fingerprint(&[&description.kubernetes.distribution, &description.kubernetes.version, &description.kubernetes.cni]),
    });

    for addon in &description.addons {
        graph.add_node(ResourceNode {
            id: ResourceId::new(ResourceKind::Addon, addon.clone()),
            fingerprint: fingerprint(&[addon]),
        });
    }

    graph.wire_standard_topology(&network_id, bastion_id.as_ref());
    let _ = &firewall_id; // wired at the provider layer, not a graph dependency edge
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::description::{BastionSpec, KubernetesSpec, LifecyclePolicies, Metadata, NetworkSpec, NodePool, Role, SecuritySpec};
    use nimbus_types::ProviderKind;
    use std::collections::{BTreeMap, BTreeSet};

    fn description() -> ClusterDescription {
        let mut node_pools = BTreeMap::new();
        node_pools.insert(
            "masters".to_string(),
            NodePool {
                count: 3,
                roles: BTreeSet::from([Role::Master]),
                size: "small".into(),
                image: "ubuntu-22.04".into(),
                provider: ProviderKind::Hetzner,
                region: None,
                labels: BTreeMap::new(),
                taints: Vec::new(),
                spot: false,
                az_distribution: Vec::new(),
            },
        );
        node_pools.insert(
            "workers".to_string(),
            NodePool {
                count: 2,
                roles: BTreeSet::from([Role::Worker]),
                size: "medium".into(),
                image: "ubuntu-22.04".into(),
                provider: ProviderKind::Hetzner,
                region: None,
                labels: BTreeMap::new(),
                taints: Vec::new(),
                spot: false,
                az_distribution: Vec::new(),
            },
        );
        ClusterDescription {
            metadata: Metadata { name: "demo".into(), environment: "dev".into(), owner: None },
            providers: BTreeSet::from([ProviderKind::Hetzner]),
            network: NetworkSpec::default(),
            security: SecuritySpec { bastion: BastionSpec { enabled: true, ..Default::default() }, ..Default::default() },
            node_pools,
            kubernetes: KubernetesSpec {
                distribution: "rke2".into(),
                version: "v1.29.0".into(),
                token: None,
                cni: "canal".into(),
                snapshot_schedule: None,
                high_availability: false,
            },
            addons: Vec::new(),
            lifecycle: LifecyclePolicies::default(),
        }
    }

    #[test]
    fn every_pool_member_becomes_a_node() {
        let graph = build_desired_graph(&description());
        assert_eq!(graph.nodes_of_kind(nimbus_types::ResourceKind::Node).len(), 5);
    }

    #[test]
    fn enabled_bastion_produces_a_bastion_node_and_wires_it_to_every_node() {
        let graph = build_desired_graph(&description());
        assert_eq!(graph.nodes_of_kind(nimbus_types::ResourceKind::Bastion).len(), 1);
        let order = graph.toposort().unwrap();
        let bastion_pos = order.iter().position(|r| r.kind == nimbus_types::ResourceKind::Bastion).unwrap();
        let install_pos = order.iter().position(|r| r.kind == nimbus_types::ResourceKind::K8sInstall).unwrap();
        assert!(bastion_pos < install_pos);
    }

    #[test]
    fn fingerprints_are_deterministic_across_rebuilds() {
        let g1 = build_desired_graph(&description());
        let g2 = build_desired_graph(&description());
        for n1 in g1.nodes() {
            let n2 = g2.get(&n1.id).unwrap();
            assert_eq!(n1.fingerprint, n2.fingerprint);
        }
    }
}
