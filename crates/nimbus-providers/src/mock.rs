//! In-memory mock `CloudProvider`, in the spirit of `Vault::mocked` — used
//! by `nimbus-orchestrator`'s idempotence and happy-path tests so they never
//! touch the network.

use std::collections::BTreeMap;
use std::sync::Mutex;

use nimbus_types::description::ClusterDescription;
use nimbus_types::ProviderKind;

use crate::{
    CloudProvider, FirewallHandle, FirewallSpecReq, LoadBalancerHandle, LoadBalancerSpecReq,
    NetworkHandle, NetworkSpecReq, NodeHandle, NodeSpecReq, Result, SshKeyHandle, Subnet,
};

pub struct MockProvider {
    kind: ProviderKind,
    nodes: Mutex<BTreeMap<String, NodeHandle>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        MockProvider { kind, nodes: Mutex::new(BTreeMap::new()), calls: Mutex::new(Vec::new()) }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl CloudProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn initialize(&mut self, _description: &ClusterDescription) -> Result<()> {
        self.record("initialize");
        Ok(())
    }

    fn create_network(&self, spec: &NetworkSpecReq) -> Result<NetworkHandle> {
        self.record("create_network");
        Ok(NetworkHandle {
            id: format!("mock-net-{}", spec.name),
            cidr: spec.cidr.clone(),
            subnets: vec![
                Subnet { id: "a".into(), cidr: spec.cidr.clone(), zone: "zone-a".into() },
                Subnet { id: "b".into(), cidr: spec.cidr.clone(), zone: "zone-b".into() },
            ],
        })
    }

    fn create_firewall(&self, spec: &FirewallSpecReq, _network: &NetworkHandle) -> Result<FirewallHandle> {
        self.record("create_firewall");
        Ok(FirewallHandle { id: format!("mock-fw-{}", spec.name) })
    }

    fn create_ssh_key(&self, _public_key_material: &str) -> Result<SshKeyHandle> {
        self.record("create_ssh_key");
        Ok(SshKeyHandle { id: "mock-sshkey".into(), fingerprint: "aa:bb:cc".into() })
    }

    fn create_node(&self, spec: &NodeSpecReq) -> Result<NodeHandle> {
        self.record("create_node");
        let handle = NodeHandle {
            provider_id: format!("mock-{}", spec.name),
            public_ipv4: if spec.assign_public_ip { Some("198.51.100.1".to_string()) } else { None },
            private_ipv4: "10.0.0.5".to_string(),
        };
        self.nodes.lock().unwrap().insert(spec.name.clone(), handle.clone());
        Ok(handle)
    }

    fn create_load_balancer(&self, spec: &LoadBalancerSpecReq) -> Result<LoadBalancerHandle> {
        self.record("create_load_balancer");
        Ok(LoadBalancerHandle { id: format!("mock-lb-{}", spec.name), ip: "198.51.100.9".into() })
    }

    fn delete_node(&self, provider_id: &str) -> Result<()> {
        self.record("delete_node");
        self.nodes.lock().unwrap().retain(|_, v| v.provider_id != provider_id);
        Ok(())
    }

    fn get_name(&self) -> &'static str {
        "mock"
    }

    fn get_regions(&self) -> Vec<String> {
        vec!["mock-region".into()]
    }

    fn get_sizes(&self) -> Vec<String> {
        vec!["mock-small".into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_node_is_tracked() {
        let provider = MockProvider::new(ProviderKind::Hetzner);
        provider.create_node(&NodeSpecReq {
            name: "m1".into(),
            size: "small".into(),
            image: "ubuntu".into(),
            region: "mock-region".into(),
            network_id: "net".into(),
            ssh_key_id: "key".into(),
            user_data: String::new(),
            labels: BTreeMap::new(),
            assign_public_ip: true,
        }).unwrap();
        assert_eq!(provider.nodes.lock().unwrap().len(), 1);
        assert!(provider.calls.lock().unwrap().contains(&"create_node".to_string()));
    }
}
