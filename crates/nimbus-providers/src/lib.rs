//! `CloudProvider` capability (spec.md §4.1) — one implementation per cloud.
//! The concrete per-provider REST call surface is explicitly out of scope
//! (spec.md §1); what matters here is the shared contract every
//! implementation honours and the retry/failure semantics around it.

pub mod aws;
pub mod azure;
pub mod digitalocean;
pub mod error;
pub mod hetzner;
pub mod linode;
pub mod mock;
pub mod retry;
mod restbase;

pub use error::{CredentialError, ProviderError, ProviderErrorKind};

use nimbus_types::description::ClusterDescription;
use nimbus_types::ProviderKind;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub cidr: String,
    pub zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpecReq {
    pub name: String,
    pub cidr: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub cidr: String,
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub protocol: String,
    pub port: u16,
    pub cidrs: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallSpecReq {
    pub name: String,
    pub ingress: Vec<FirewallRule>,
    pub egress: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallHandle {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyHandle {
    pub id: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpecReq {
    pub name: String,
    pub size: String,
    pub image: String,
    pub region: String,
    pub network_id: String,
    pub ssh_key_id: String,
    pub user_data: String,
    pub labels: std::collections::BTreeMap<String, String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHandle {
    pub provider_id: String,
    pub public_ipv4: Option<String>,
    pub private_ipv4: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerSpecReq {
    pub name: String,
    pub region: String,
    pub network_id: String,
    pub target_port: u16,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerHandle {
    pub id: String,
    pub ip: String,
}

/// One implementation per cloud (spec.md §4.1).
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Prepares provider-level context (credentials, default region).
    fn initialize(&mut self, description: &ClusterDescription) -> Result<()>;

    /// Idempotent on re-invocation with identical inputs. At least two
    /// subnets across distinct zones when the region supports it.
    fn create_network(&self, spec: &NetworkSpecReq) -> Result<NetworkHandle>;

    fn create_firewall(&self, spec: &FirewallSpecReq, network: &NetworkHandle) -> Result<FirewallHandle>;

    /// Must be shared across all instances in that provider+stack to avoid
    /// duplicate-registration errors.
    fn create_ssh_key(&self, public_key_material: &str) -> Result<SshKeyHandle>;

    fn create_node(&self, spec: &NodeSpecReq) -> Result<NodeHandle>;

    fn create_node_pool(&self, specs: &[NodeSpecReq]) -> Result<Vec<NodeHandle>> {
        specs.iter().map(|s| self.create_node(s)).collect()
    }

    /// Optional; used only when `kubernetes.high-availability` is set.
    fn create_load_balancer(&self, spec: &LoadBalancerSpecReq) -> Result<LoadBalancerHandle>;

    fn delete_node(&self, provider_id: &str) -> Result<()>;

    fn get_name(&self) -> &'static str;
    fn get_regions(&self) -> Vec<String>;
    fn get_sizes(&self) -> Vec<String>;
}

/// Resolves the `CloudProvider` implementation for a given kind.
pub fn provider_for(kind: ProviderKind) -> Box<dyn CloudProvider> {
    match kind {
        ProviderKind::Aws => Box::new(aws::AwsProvider::default()),
        ProviderKind::Azure => Box::new(azure::AzureProvider::default()),
        ProviderKind::DigitalOcean => Box::new(digitalocean::DigitalOceanProvider::default()),
        ProviderKind::Linode => Box::new(linode::LinodeProvider::default()),
        ProviderKind::Hetzner => Box::new(hetzner::HetznerProvider::default()),
    }
}
