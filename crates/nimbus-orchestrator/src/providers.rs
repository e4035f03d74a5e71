//! Per-stack, per-provider singleton registry (spec.md §9 "Global mutable
//! provider state" redesign note): one `CloudProvider` handle per
//! `(stack_key, ProviderKind)`, initialized lazily behind a guard, never a
//! true process-wide global, so two concurrently-running stacks never share
//! a VPC/keypair handle meant for one cluster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nimbus_providers::{provider_for, CloudProvider, ProviderError};
use nimbus_types::description::ClusterDescription;
use nimbus_types::ProviderKind;

#[derive(Default)]
pub struct ProviderRegistry {
    handles: Mutex<HashMap<(String, ProviderKind), Arc<Mutex<Box<dyn CloudProvider>>>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    /// Returns the shared handle for `(stack_key, kind)`, creating and
    /// `initialize`-ing it on first use only.
    pub fn get_or_init(
        &self,
        stack_key: &str,
        kind: ProviderKind,
        description: &ClusterDescription,
    ) -> Result<Arc<Mutex<Box<dyn CloudProvider>>>, ProviderError> {
        let key = (stack_key.to_string(), kind);
        {
            let handles = self.handles.lock().unwrap();
            if let Some(existing) = handles.get(&key) {
                return Ok(Arc::clone(existing));
            }
        }
        let mut provider = provider_for(kind);
        provider.initialize(description)?;
        let handle = Arc::new(Mutex::new(provider));
        self.handles.lock().unwrap().insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::description::{KubernetesSpec, LifecyclePolicies, Metadata, NetworkSpec, SecuritySpec};
    use std::collections::{BTreeMap, BTreeSet};

    fn description() -> ClusterDescription {
        ClusterDescription {
            metadata: Metadata { name: "demo".into(), environment: "dev".into(), owner: None },
            providers: BTreeSet::from([ProviderKind::Hetzner]),
            network: NetworkSpec::default(),
            security: SecuritySpec::default(),
            node_pools: BTreeMap::new(),
            kubernetes: KubernetesSpec { distribution: "rke2".into(), version: "v1.29.0".into(), token: None, cni: "canal".into(), snapshot_schedule: None, high_availability: false },
            addons: Vec::new(),
            lifecycle: LifecyclePolicies::default(),
        }
    }

    #[test]
    fn repeated_lookups_for_same_stack_and_provider_share_one_handle() {
        let registry = ProviderRegistry::new();
        let a = registry.get_or_init("stack-a", ProviderKind::Hetzner, &description()).unwrap();
        let b = registry.get_or_init("stack-a", ProviderKind::Hetzner, &description()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_stacks_get_distinct_handles() {
        let registry = ProviderRegistry::new();
        let a = registry.get_or_init("stack-a", ProviderKind::Hetzner, &description()).unwrap();
        let b = registry.get_or_init("stack-b", ProviderKind::Hetzner, &description()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }
}
