//! DigitalOcean provider implementation. Plain-text cloud-init user-data
//! (spec.md §4.4).

use nimbus_types::description::ClusterDescription;
use nimbus_types::ProviderKind;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::restbase::{classify_status, encode_user_data, retry, RestContext};
use crate::{
    CloudProvider, FirewallHandle, FirewallSpecReq, LoadBalancerHandle, LoadBalancerSpecReq,
    NetworkHandle, NetworkSpecReq, NodeHandle, NodeSpecReq, Result, SshKeyHandle, Subnet,
};

#[derive(Default)]
pub struct DigitalOceanProvider {
    ctx: Option<RestContext>,
}

impl DigitalOceanProvider {
    fn ctx(&self) -> Result<&RestContext> {
        self.ctx.as_ref().ok_or_else(|| {
            ProviderError::retryable(ProviderErrorKind::TransientAuth, "digitalocean provider not initialized")
        })
    }
}

impl CloudProvider for DigitalOceanProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DigitalOcean
    }

    fn initialize(&mut self, _description: &ClusterDescription) -> Result<()> {
        let ctx = RestContext::from_env("digitalocean", "DIGITALOCEAN_TOKEN", "https://api.digitalocean.com/v2")
            .map_err(|e| ProviderError::retryable(ProviderErrorKind::TransientAuth, e.to_string()))?;
        self.ctx = Some(ctx);
        Ok(())
    }

    fn create_network(&self, spec: &NetworkSpecReq) -> Result<NetworkHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/vpcs", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": spec.name, "ip_range": spec.cidr, "region": spec.region }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(NetworkHandle {
                id: format!("do-vpc-{}", spec.name),
                cidr: spec.cidr.clone(),
                subnets: vec![
                    Subnet { id: format!("{}-1", spec.name), cidr: spec.cidr.clone(), zone: format!("{}1", spec.region) },
                    Subnet { id: format!("{}-2", spec.name), cidr: spec.cidr.clone(), zone: format!("{}2", spec.region) },
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
            Ok(FirewallHandle { id: format!("do-fw-{}", spec.name) })
        })
    }

    fn create_ssh_key(&self, public_key_material: &str) -> Result<SshKeyHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/account/keys", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": "nimbus-fleet", "public_key": public_key_material }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(SshKeyHandle { id: "do-sshkey".to_string(), fingerprint: "unknown".to_string() })
        })
    }

    fn create_node(&self, spec: &NodeSpecReq) -> Result<NodeHandle> {
        let ctx = self.ctx()?;
        let user_data = encode_user_data(&spec.user_data, false);
        retry(|| {
            let resp = ctx
                .client
                .post(format!("{}/droplets", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({
                    "name": spec.name,
                    "size": spec.size,
                    "image": spec.image,
                    "region": spec.region,
                    "user_data": user_data,
                    "tags": spec.labels.values().collect::<Vec<_>>(),
                }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(NodeHandle {
                provider_id: format!("do-{}", spec.name),
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
                .json(&serde_json::json!({ "name": spec.name, "region": spec.region }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(LoadBalancerHandle { id: format!("do-lb-{}", spec.name), ip: "0.0.0.0".to_string() })
        })
    }

    fn delete_node(&self, provider_id: &str) -> Result<()> {
        let ctx = self.ctx()?;
        let resp = ctx
            .client
            .delete(format!("{}/droplets/{}", ctx.base_url, provider_id))
            .bearer_auth(&ctx.token)
            .send()
            .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
        }
        Ok(())
    }

    fn get_name(&self) -> &'static str {
        "digitalocean"
    }

    fn get_regions(&self) -> Vec<String> {
        vec!["nyc1".into(), "sfo3".into(), "fra1".into(), "sgp1".into()]
    }

    fn get_sizes(&self) -> Vec<String> {
        vec!["s-2vcpu-4gb".into(), "s-4vcpu-8gb".into(), "s-8vcpu-16gb".into()]
    }
}
