//! `ClusterDescription` — the immutable input data model (spec.md §3).
//!
//! This is produced by an external configuration DSL (out of scope, per
//! spec.md §1) and handed to us as already-parsed, well-formed data; our
//! only job is to deserialize it and enforce the invariants of §3 before any
//! side effect runs, with `#[serde(deny_unknown_fields)]` discipline
//! throughout so a typo in a config file fails loudly instead of silently.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// `metadata {name, environment, owner}`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
    pub environment: String,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Azure,
    DigitalOcean,
    Linode,
    Hetzner,
}

impl ProviderKind {
    /// SSH login user convention (spec.md §4.1): pure function of provider.
    pub fn ssh_user(self) -> &'static str {
        match self {
            ProviderKind::Aws => "ubuntu",
            ProviderKind::Azure => "azureuser",
            ProviderKind::DigitalOcean | ProviderKind::Linode | ProviderKind::Hetzner => "root",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
            ProviderKind::DigitalOcean => "digitalocean",
            ProviderKind::Linode => "linode",
            ProviderKind::Hetzner => "hetzner",
        }
    }
}

/// Per-provider credentials/region/VPC intent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub vpc_cidr: Option<String>,
    /// Name of the environment variable holding the provider token/secret.
    /// We never store the literal secret value in the description.
    #[serde(default)]
    pub credentials_env: Option<String>,
}

/// `network {overlay CIDR, pod CIDR, service CIDR, VPN port, mesh flag, allowed source CIDRs}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    #[serde(default = "NetworkSpec::default_overlay_cidr")]
    pub overlay_cidr: String,
    #[serde(default = "NetworkSpec::default_pod_cidr")]
    pub pod_cidr: String,
    #[serde(default = "NetworkSpec::default_service_cidr")]
    pub service_cidr: String,
    #[serde(default = "NetworkSpec::default_vpn_port")]
    pub vpn_port: u16,
    #[serde(default = "NetworkSpec::default_mesh")]
    pub mesh: bool,
    #[serde(default)]
    pub allowed_source_cidrs: Vec<String>,
}

impl NetworkSpec {
    fn default_overlay_cidr() -> String {
        "10.8.0.0/24".to_string()
    }
    fn default_pod_cidr() -> String {
        "10.42.0.0/16".to_string()
    }
    fn default_service_cidr() -> String {
        "10.43.0.0/16".to_string()
    }
    fn default_vpn_port() -> u16 {
        51820
    }
    fn default_mesh() -> bool {
        true
    }
}

impl Default for NetworkSpec {
    fn default() -> Self {
        NetworkSpec {
            overlay_cidr: Self::default_overlay_cidr(),
            pod_cidr: Self::default_pod_cidr(),
            service_cidr: Self::default_service_cidr(),
            vpn_port: Self::default_vpn_port(),
            mesh: Self::default_mesh(),
            allowed_source_cidrs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BastionSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub audit_logging: bool,
}

fn default_true() -> bool {
    true
}
fn default_ssh_port() -> u16 {
    22
}

/// `security {SSH key material or path, bastion spec, firewall spec}`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SecuritySpec {
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    #[serde(default)]
    pub ssh_public_key_path: Option<String>,
    #[serde(default)]
    pub bastion: BastionSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Etcd,
    ControlPlane,
    Worker,
}

/// One entry of the node pools map, keyed by pool name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodePool {
    #[serde(default = "default_pool_count")]
    pub count: u32,
    pub roles: BTreeSet<Role>,
    pub size: String,
    pub image: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<String>,
    #[serde(default)]
    pub spot: bool,
    #[serde(default)]
    pub az_distribution: Vec<String>,
}

fn default_pool_count() -> u32 {
    1
}

impl NodePool {
    pub fn is_master_pool(&self) -> bool {
        self.roles.contains(&Role::Master)
    }
}

/// `Kubernetes spec {distribution, version, token, CNI, snapshot schedule}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesSpec {
    pub distribution: String,
    pub version: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_cni")]
    pub cni: String,
    #[serde(default)]
    pub snapshot_schedule: Option<String>,
    #[serde(default)]
    pub high_availability: bool,
}

fn default_cni() -> String {
    "canal".to_string()
}

impl KubernetesSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.distribution.as_str() {
            "rke2" | "k3s" => Ok(()),
            other => Err(ConfigError::UnknownDistribution(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UpgradePolicy {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: u32,
    #[serde(default)]
    pub max_surge: u32,
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_strategy() -> String {
    "rolling".to_string()
}
fn default_max_unavailable() -> u32 {
    1
}
fn default_drain_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AutoscalingPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: u32,
    #[serde(default)]
    pub target_cpu_percent: Option<f64>,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_scale_down_delay")]
    pub scale_down_delay_secs: u64,
}

fn default_cooldown() -> u64 {
    300
}
fn default_scale_down_delay() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BackupPolicy {
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub retention_days: u32,
    #[serde(default)]
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CostLimits {
    #[serde(default)]
    pub monthly_budget_usd: Option<f64>,
}

/// One registered lifecycle hook. `event`/`kind` are kept as plain strings
/// here rather than `nimbus_lifecycle`'s enums since this crate has no
/// dependency on that one; `nimbus-cli` parses them when it builds the
/// `nimbus_lifecycle::HookAction` list a deploy/destroy run fires.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub name: String,
    pub event: String,
    #[serde(default)]
    pub kind: Option<String>,
    pub target: String,
    #[serde(default = "default_hook_priority")]
    pub priority: i32,
    #[serde(default = "default_hook_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u32,
}

fn default_hook_priority() -> i32 {
    100
}
fn default_hook_timeout_secs() -> u64 {
    60
}

/// `lifecycle policies (upgrade strategy, autoscaling bounds, backup schedule, hooks, cost limits)`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LifecyclePolicies {
    #[serde(default)]
    pub upgrade: UpgradePolicy,
    #[serde(default)]
    pub autoscaling: AutoscalingPolicy,
    #[serde(default)]
    pub backup: BackupPolicy,
    #[serde(default)]
    pub cost: CostLimits,
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
}

/// Top-level immutable cluster description (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterDescription {
    pub metadata: Metadata,
    #[serde(default)]
    pub providers: BTreeSet<ProviderKind>,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub security: SecuritySpec,
    pub node_pools: BTreeMap<String, NodePool>,
    pub kubernetes: KubernetesSpec,
    #[serde(default)]
    pub addons: Vec<String>,
    #[serde(default)]
    pub lifecycle: LifecyclePolicies,
}

impl ClusterDescription {
    /// Enforces the invariants of spec.md §3. Fails before any side effect.
    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() && self.node_pools.is_empty() {
            return Err(ConfigError::NoProviders(self.metadata.name.clone()));
        }
        if self.node_pools.is_empty() {
            return Err(ConfigError::Other(format!(
                "cluster '{}' declares no node pools",
                self.metadata.name
            )));
        }
        let mut seen = BTreeSet::new();
        for (name, pool) in &self.node_pools {
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicatePoolName(name.clone()));
            }
            if pool.roles.is_empty() {
                return Err(ConfigError::EmptyRoleSet(name.clone()));
            }
            if pool.count == 0 {
                return Err(ConfigError::NonPositivePoolCount(name.clone()));
            }
            if !self.providers.is_empty() && !self.providers.contains(&pool.provider) {
                return Err(ConfigError::PoolProviderNotEnabled {
                    pool: name.clone(),
                    provider: pool.provider.name().to_string(),
                });
            }
        }
        self.kubernetes.validate()?;
        if !is_valid_ipv4_network(&self.network.overlay_cidr) {
            return Err(ConfigError::InvalidOverlayCidr(self.network.overlay_cidr.clone()));
        }
        Ok(())
    }

    /// Non-fatal conditions worth surfacing to the caller but that
    /// `verify()` must not reject: an empty `allowed_source_cidrs` with the
    /// bastion enabled means deny-all SSH, which is legal (it's enforced at
    /// the firewall/boot-script template layer) but almost certainly not
    /// what the author intended.
    pub fn warnings(&self) -> Vec<ConfigError> {
        let mut warnings = Vec::new();
        if self.security.bastion.enabled && self.network.allowed_source_cidrs.is_empty() {
            warnings.push(ConfigError::EmptyBastionAllowlist);
        }
        warnings
    }

    /// Masters first, deterministic order (spec.md §4.5): sorted by pool
    /// name, never map iteration order.
    pub fn master_pools(&self) -> Vec<(&String, &NodePool)> {
        let mut v: Vec<_> = self
            .node_pools
            .iter()
            .filter(|(_, p)| p.is_master_pool())
            .collect();
        v.sort_by(|a, b| a.0.cmp(b.0));
        v
    }

    pub fn worker_pools(&self) -> Vec<(&String, &NodePool)> {
        let mut v: Vec<_> = self
            .node_pools
            .iter()
            .filter(|(_, p)| !p.is_master_pool())
            .collect();
        v.sort_by(|a, b| a.0.cmp(b.0));
        v
    }
}

fn is_valid_ipv4_network(cidr: &str) -> bool {
    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return false;
    }
    let octets: Vec<&str> = parts[0].split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    if !octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return false;
    }
    matches!(parts[1].parse::<u8>(), Ok(n) if n <= 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pool(provider: ProviderKind) -> NodePool {
        NodePool {
            count: 1,
            roles: BTreeSet::from([Role::Master]),
            size: "small".into(),
            image: "ubuntu-22.04".into(),
            provider,
            region: None,
            labels: BTreeMap::new(),
            taints: Vec::new(),
            spot: false,
            az_distribution: Vec::new(),
        }
    }

    fn minimal_desc() -> ClusterDescription {
        let mut node_pools = BTreeMap::new();
        node_pools.insert("masters".to_string(), minimal_pool(ProviderKind::Hetzner));
        ClusterDescription {
            metadata: Metadata {
                name: "test".into(),
                environment: "dev".into(),
                owner: None,
            },
            providers: BTreeSet::from([ProviderKind::Hetzner]),
            network: NetworkSpec::default(),
            security: SecuritySpec::default(),
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
    fn valid_description_passes() {
        assert!(minimal_desc().verify().is_ok());
    }

    #[test]
    fn empty_role_set_rejected() {
        let mut d = minimal_desc();
        d.node_pools.get_mut("masters").unwrap().roles.clear();
        assert_eq!(
            d.verify().unwrap_err(),
            ConfigError::EmptyRoleSet("masters".into())
        );
    }

    #[test]
    fn pool_provider_must_be_enabled() {
        let mut d = minimal_desc();
        d.node_pools.get_mut("masters").unwrap().provider = ProviderKind::Aws;
        assert!(matches!(
            d.verify().unwrap_err(),
            ConfigError::PoolProviderNotEnabled { .. }
        ));
    }

    #[test]
    fn no_providers_and_no_pools_rejected() {
        let mut d = minimal_desc();
        d.providers.clear();
        d.node_pools.clear();
        assert!(matches!(d.verify().unwrap_err(), ConfigError::NoProviders(_)));
    }

    #[test]
    fn unknown_distribution_rejected() {
        let mut d = minimal_desc();
        d.kubernetes.distribution = "k8s-vanilla".into();
        assert!(matches!(
            d.verify().unwrap_err(),
            ConfigError::UnknownDistribution(_)
        ));
    }

    #[test]
    fn master_pools_sorted_deterministically() {
        let mut d = minimal_desc();
        d.node_pools.insert("aaa-workers".to_string(), {
            let mut p = minimal_pool(ProviderKind::Hetzner);
            p.roles = BTreeSet::from([Role::Worker]);
            p
        });
        let masters = d.master_pools();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].0, "masters");
    }
}
