//! Azure provider implementation (ARM-style REST surface). Base64-encoded
//! cloud-init user-data (spec.md §4.4); SSH user `azureuser` (spec.md
//! §4.1).

use nimbus_types::description::ClusterDescription;
use nimbus_types::ProviderKind;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::restbase::{classify_status, encode_user_data, retry, RestContext};
use crate::{
    CloudProvider, FirewallHandle, FirewallSpecReq, LoadBalancerHandle, LoadBalancerSpecReq,
    NetworkHandle, NetworkSpecReq, NodeHandle, NodeSpecReq, Result, SshKeyHandle, Subnet,
};

#[derive(Default)]
pub struct AzureProvider {
    ctx: Option<RestContext>,
}

impl AzureProvider {
    fn ctx(&self) -> Result<&RestContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| ProviderError::retryable(ProviderErrorKind::TransientAuth, "azure provider not initialized"))
    }
}

impl CloudProvider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn initialize(&mut self, _description: &ClusterDescription) -> Result<()> {
        // Azure authenticates with an ARM bearer token, conventionally
        // obtained via a service-principal client-secret flow; we accept it
        // pre-fetched through the environment the way the other providers
        // accept a static API token.
        let ctx = RestContext::from_env("azure", "AZURE_TOKEN", "https://management.azure.com")
            .map_err(|e| ProviderError::retryable(ProviderErrorKind::TransientAuth, e.to_string()))?;
        self.ctx = Some(ctx);
        Ok(())
    }

    fn create_network(&self, spec: &NetworkSpecReq) -> Result<NetworkHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .put(format!("{}/virtualNetworks/{}", ctx.base_url, spec.name))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "location": spec.region, "addressSpace": spec.cidr }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(NetworkHandle {
                id: format!("azure-vnet-{}", spec.name),
                cidr: spec.cidr.clone(),
                subnets: vec![
                    Subnet { id: format!("{}-subnet-1", spec.name), cidr: spec.cidr.clone(), zone: format!("{}-1", spec.region) },
                    Subnet { id: format!("{}-subnet-2", spec.name), cidr: spec.cidr.clone(), zone: format!("{}-2", spec.region) },
                ],
            })
        })
    }

    fn create_firewall(&self, spec: &FirewallSpecReq, _network: &NetworkHandle) -> Result<FirewallHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .put(format!("{}/networkSecurityGroups/{}", ctx.base_url, spec.name))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "name": spec.name }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(FirewallHandle { id: format!("azure-nsg-{}", spec.name) })
        })
    }

    fn create_ssh_key(&self, public_key_material: &str) -> Result<SshKeyHandle> {
        let ctx = self.ctx()?;
        retry(|| {
            let resp = ctx
                .client
                .put(format!("{}/sshPublicKeys/nimbus-fleet", ctx.base_url))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "publicKey": public_key_material }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(SshKeyHandle { id: "azure-sshkey".to_string(), fingerprint: "unknown".to_string() })
        })
    }

    fn create_node(&self, spec: &NodeSpecReq) -> Result<NodeHandle> {
        let ctx = self.ctx()?;
        let custom_data = encode_user_data(&spec.user_data, true);
        retry(|| {
            let resp = ctx
                .client
                .put(format!("{}/virtualMachines/{}", ctx.base_url, spec.name))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({
                    "location": spec.region,
                    "hardwareProfile": { "vmSize": spec.size },
                    "storageProfile": { "imageReference": spec.image },
                    "osProfile": { "adminUsername": "azureuser", "customData": custom_data },
                    "tags": spec.labels,
                }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(NodeHandle {
                provider_id: format!("azure-{}", spec.name),
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
                .put(format!("{}/loadBalancers/{}", ctx.base_url, spec.name))
                .bearer_auth(&ctx.token)
                .json(&serde_json::json!({ "location": spec.region }))
                .send()
                .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
            if !resp.status().is_success() {
                return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
            }
            Ok(LoadBalancerHandle { id: format!("azure-lb-{}", spec.name), ip: "0.0.0.0".to_string() })
        })
    }

    fn delete_node(&self, provider_id: &str) -> Result<()> {
        let ctx = self.ctx()?;
        let resp = ctx
            .client
            .delete(format!("{}/virtualMachines/{}", ctx.base_url, provider_id))
            .bearer_auth(&ctx.token)
            .send()
            .map_err(|e| ProviderError::retryable(ProviderErrorKind::ServerError, e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(ProviderError::retryable(classify_status(resp.status()), resp.status().to_string()));
        }
        Ok(())
    }

    fn get_name(&self) -> &'static str {
        "azure"
    }

    fn get_regions(&self) -> Vec<String> {
        vec!["eastus".into(), "westeurope".into(), "southeastasia".into()]
    }

    fn get_sizes(&self) -> Vec<String> {
        vec!["Standard_B2s".into(), "Standard_D2s_v5".into(), "Standard_D4s_v5".into()]
    }
}
