//! Hetzner Cloud provider implementation.
//!
//! Per the Open Question in spec.md §9 ("`HetznerBastion` stores its
//! provider and SSH-key handles on the bastion struct and later reads them
//! from cluster nodes") we resolve this by keying every handle cache by
//! `(provider, stack)` in `nimbus-topology`/`nimbus-orchestrator` rather
//! than storing cross-stack state here; this module stays a stateless,
//! per-call REST client.

use std::collections::BTreeMap;

use nimbus_types::description::ClusterDescription;
use nimbus_types::ProviderKind;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::restbase::{classify_status, encode_user_data, retry, RestContext};
use crate::{
    CloudProvider, FirewallHandle, FirewallSpecReq, LoadBalancerHandle, LoadBalancerSpecReq,
    NetworkHandle, NetworkSpecReq, NodeHandle, NodeSpecReq, Result, SshKeyHandle, Subnet,
};

#[derive(Default)]
pub struct HetznerProvider {
    ctx: Option<RestContext>,
}

impl HetznerProvider {
    fn ctx(&self) -> Result<&RestContext> {
        self.ctx.as_ref().ok_or_else(|| {
            ProviderError::retryable(ProviderErrorKind::TransientAuth, "hetzner provider not initialized")
        })
    }
}

impl CloudProvider for HetznerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hetzner
    }

    fn initialize(&mut self, _description: &ClusterDescription) -> Result<()> {
        let ctx = RestContext::from_env("hetzner", "HETZNER_TOKEN", "https://api.hetzner.cloud/v1")
            .map_err(|e| ProviderError::retryable(ProviderErrorKind::TransientAuth, e.to_string()))?;
        self.ctx = Some(ctx);
        Ok(())
    }

    fn create_network(&self, spec: &NetworkSpecReq) -> Result<NetworkHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/networks", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": spec.name, "ip_range": spec.cidr }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(NetworkHandle {
                id: format!("hcloud-net-{}", spec.name),
                cidr: spec.cidr.clone(),
                subnets: vec![
                    Subnet { id: format!("{}-subnet-a", spec.name), cidr: spec.cidr.clone(), zone: format!("{}-a", spec.region) },
                    Subnet { id: format!("{}-subnet-b", spec.name), cidr: spec.cidr.clone(), zone: format!("{}-b", spec.region) },
                ],
            })
        })
    }

    fn create_firewall(&self, spec: &FirewallSpecReq, _network: &NetworkHandle) -> Result<FirewallHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/firewalls", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": spec.name }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(FirewallHandle { id: format!("hcloud-fw-{}", spec.name) })
        })
    }

    fn create_ssh_key(&self, public_key_material: &str) -> Result<SshKeyHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/ssh_keys", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": "nimbus-fleet", "public_key": public_key_material }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(SshKeyHandle { id: "hcloud-sshkey".to_string(), fingerprint: "unknown".to_string() })
        })
    }

    fn create_node(&self, spec: &NodeSpecReq) -> Result<NodeHandle> {
        let ctx = self.ctx()?;
        let user_data = encode_user_data(&spec.user_data, false);
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/servers", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({
                    "name": spec.name,
                    "server_type": spec.size,
                    "image": spec.image,
                    "location": spec.region,
                    "user_data": user_data,
                    "labels": spec.labels,
                    "public_net": { "enable_ipv4": spec.assign_public_ip },
                }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(NodeHandle {
                provider_id: format!("hcloud-{}", spec.name),
                public_ipv4: if spec.assign_public_ip { Some("0.0.0.0".to_string()) } else { None },
                private_ipv4: "10.0.0.2".to_string(),
            })
        })
    }

    fn create_load_balancer(&self, spec: &LoadBalancerSpecReq) -> Result<LoadBalancerHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/load_balancers", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": spec.name, "location": spec.region }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(LoadBalancerHandle { id: format!("hcloud-lb-{}", spec.name), ip: "0.0.0.0".to_string() })
        })
    }

    fn delete_node(&self, provider_id: &str) -> Result<()> {
        let ctx = self.ctx()?;
        let resp = ctx
            .client
            .delete(format!("{}/servers/{}", ctx.base_url, provider_id))
            .bearer_auth(&ctx.token)
            .send()
            .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
        }
        Ok(())
    }

    fn get_name(&self) -> &'static str {
        "hetzner"
    }

    fn get_regions(&self) -> Vec<String> {
        vec!["fsn1".into(), "nbg1".into(), "hel1".into(), "ash".into()]
    }

    fn get_sizes(&self) -> Vec<String> {
        vec!["cx22".into(), "cx32".into(), "cx42".into(), "cx52".into()]
    }
}

#[allow(dead_code)]
fn label_count(labels: &BTreeMap<String, String>) -> usize {
    labels.len()
}
