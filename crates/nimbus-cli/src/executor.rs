//! Concrete `ResourceExecutor` (composition root, spec.md §4.6): turns a
//! `ResourceGraph` node into real calls against `CloudProvider`,
//! `RemoteExecClient` and `nimbus-provision`'s install helpers. The
//! orchestrator itself never sees any of this — it only calls `apply`,
//! `destroy`, `observe` through the trait.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use nimbus_orchestrator::{OrchestratorError, ProviderRegistry, ResourceExecutor, ResourceGraph};
use nimbus_providers::{FirewallRule, FirewallSpecReq, NetworkSpecReq, NodeSpecReq};
use nimbus_remote::{BastionJump, ConnectionSpec, RemoteExecClient, VALIDATION_TIMEOUT};
use nimbus_topology::mesh::{generate_keypair, PeerEntry, PeerTable};
use nimbus_types::description::ClusterDescription;
use nimbus_types::graph::{ResourceId, ResourceKind};
use nimbus_types::node::{Node, NodeAddresses, NodeStatus};
use nimbus_types::stack::StackOutputs;

#[derive(Debug, Clone, Default)]
struct NodeRuntime {
    provider_id: Option<String>,
    public_ipv4: Option<String>,
    private_ipv4: Option<String>,
    vpn_ipv4: Option<String>,
}

pub struct LiveResourceExecutor {
    description: ClusterDescription,
    providers: Arc<ProviderRegistry>,
    remote: Arc<dyn RemoteExecClient>,
    stack_key: String,
    ssh_private_key_path: PathBuf,
    ssh_key_handle_id: Mutex<Option<String>>,
    network_handle_id: Mutex<Option<String>>,
    node_runtime: Mutex<BTreeMap<String, NodeRuntime>>,
    vpn_addresses: BTreeMap<String, String>,
    mesh_table: Mutex<PeerTable>,
    mesh_fingerprint: Mutex<Option<String>>,
    kubeconfig: Mutex<Option<String>>,
    api_endpoint: Mutex<Option<String>>,
}

impl LiveResourceExecutor {
    pub fn new(description: ClusterDescription, stack_key: String, providers: Arc<ProviderRegistry>, remote: Arc<dyn RemoteExecClient>, ssh_private_key_path: PathBuf) -> Self {
        let masters: Vec<(&str, u32)> = description.master_pools().into_iter().map(|(n, p)| (n.as_str(), p.count)).collect();
        let workers: Vec<(&str, u32)> = description.worker_pools().into_iter().map(|(n, p)| (n.as_str(), p.count)).collect();
        let vpn_addresses = nimbus_topology::precompute_addresses(&description.network.overlay_cidr, &masters, &workers).unwrap_or_default();
        LiveResourceExecutor {
            description,
            providers,
            remote,
            stack_key,
            ssh_private_key_path,
            ssh_key_handle_id: Mutex::new(None),
            network_handle_id: Mutex::new(None),
            node_runtime: Mutex::new(BTreeMap::new()),
            vpn_addresses,
            mesh_table: Mutex::new(PeerTable::new()),
            mesh_fingerprint: Mutex::new(None),
            kubeconfig: Mutex::new(None),
            api_endpoint: Mutex::new(None),
        }
    }

    fn primary_provider_kind(&self) -> nimbus_types::ProviderKind {
        self.description.providers.iter().next().copied().unwrap_or(nimbus_types::ProviderKind::Hetzner)
    }

    fn pool_for_node_key<'a>(&'a self, node_key: &str) -> Option<(&'a str, &'a nimbus_types::description::NodePool)> {
        self.description
            .master_pools()
            .into_iter()
            .chain(self.description.worker_pools())
            .find(|(name, _)| node_key.starts_with(name.as_str()) && node_key[name.len()..].starts_with('-'))
            .map(|(name, pool)| (name.as_str(), pool))
    }

    fn conn_for(&self, runtime: &NodeRuntime, provider: nimbus_types::ProviderKind) -> ConnectionSpec {
        let bastion = if self.description.security.bastion.enabled {
            self.node_runtime.lock().unwrap().get("bastion").and_then(|b| b.public_ipv4.clone()).map(|host| BastionJump {
                host,
                port: self.description.security.bastion.ssh_port,
                ssh_user: "root".to_string(),
                private_key_path: self.ssh_private_key_path.clone(),
            })
        } else {
            None
        };
        ConnectionSpec {
            host: runtime.vpn_ipv4.clone().or_else(|| runtime.private_ipv4.clone()).unwrap_or_default(),
            port: 22,
            ssh_user: provider.ssh_user().to_string(),
            private_key_path: self.ssh_private_key_path.clone(),
            bastion,
            dial_error_limit: nimbus_remote::DEFAULT_DIAL_ERROR_LIMIT,
        }
    }

    fn apply_ssh_key(&self) -> Result<(), OrchestratorError> {
        let provider = self.providers.get_or_init(&self.stack_key, self.primary_provider_kind(), &self.description)?;
        let key_material = self.description.security.ssh_public_key.clone().unwrap_or_default();
        let handle = provider.lock().unwrap().create_ssh_key(&key_material)?;
        *self.ssh_key_handle_id.lock().unwrap() = Some(handle.id);
        Ok(())
    }

    fn apply_network(&self) -> Result<(), OrchestratorError> {
        let kind = self.primary_provider_kind();
        let provider = self.providers.get_or_init(&self.stack_key, kind, &self.description)?;
        let spec = NetworkSpecReq {
            name: format!("nimbus-{}", self.stack_key),
            cidr: self.description.network.overlay_cidr.clone(),
            region: self.description.node_pools.values().find_map(|p| p.region.clone()).unwrap_or_default(),
        };
        let handle = provider.lock().unwrap().create_network(&spec)?;
        *self.network_handle_id.lock().unwrap() = Some(handle.id);
        Ok(())
    }

    fn apply_firewall(&self) -> Result<(), OrchestratorError> {
        let kind = self.primary_provider_kind();
        let provider = self.providers.get_or_init(&self.stack_key, kind, &self.description)?;
        let network_id = self.network_handle_id.lock().unwrap().clone().unwrap_or_default();
        let network = nimbus_providers::NetworkHandle { id: network_id, cidr: self.description.network.overlay_cidr.clone(), subnets: vec![] };
        let spec = FirewallSpecReq {
            name: format!("nimbus-{}-fw", self.stack_key),
            ingress: vec![FirewallRule {
                protocol: "udp".to_string(),
                port: self.description.network.vpn_port,
                cidrs: self.description.network.allowed_source_cidrs.clone(),
                description: "overlay VPN".to_string(),
            }],
            egress: vec![],
        };
        provider.lock().unwrap().create_firewall(&spec, &network)?;
        Ok(())
    }

    fn apply_bastion(&self) -> Result<(), OrchestratorError> {
        let kind = self.description.security.bastion.provider.unwrap_or_else(|| self.primary_provider_kind());
        let provider = self.providers.get_or_init(&self.stack_key, kind, &self.description)?;
        let network_id = self.network_handle_id.lock().unwrap().clone().unwrap_or_default();
        let ssh_key_id = self.ssh_key_handle_id.lock().unwrap().clone().unwrap_or_default();
        let bastion_overlay_address = self.vpn_addresses.get("bastion").cloned().unwrap_or_else(|| nimbus_topology::bastion_address(&self.description.network.overlay_cidr).unwrap_or_default());
        let cluster_token = self.description.kubernetes.token.clone().unwrap_or_default();
        let user_data = nimbus_topology::render_boot_script(&nimbus_topology::BastionContext {
            cluster_name: &self.description.metadata.name,
            cluster_token: &cluster_token,
            bastion_overlay_address: &bastion_overlay_address,
            network: &self.description.network,
            bastion: &self.description.security.bastion,
        })
        .unwrap_or_default();
        let spec = NodeSpecReq {
            name: format!("{}-bastion", self.description.metadata.name),
            size: self.description.security.bastion.size.clone().unwrap_or_else(|| "small".to_string()),
            image: "ubuntu-22.04".to_string(),
            region: self.description.node_pools.values().find_map(|p| p.region.clone()).unwrap_or_default(),
            network_id,
            ssh_key_id,
            user_data,
            labels: BTreeMap::new(),
            assign_public_ip: true,
        };
        let handle = provider.lock().unwrap().create_node(&spec)?;
        self.node_runtime.lock().unwrap().insert(
            "bastion".to_string(),
            NodeRuntime { provider_id: Some(handle.provider_id), public_ipv4: handle.public_ipv4, private_ipv4: Some(handle.private_ipv4), vpn_ipv4: None },
        );
        Ok(())
    }

    fn apply_node(&self, node_key: &str) -> Result<(), OrchestratorError> {
        let (pool_name, pool) = self
            .pool_for_node_key(node_key)
            .ok_or_else(|| OrchestratorError::Graph(nimbus_orchestrator::GraphError::Cycle(format!("no pool owns node '{node_key}'"))))?;
        let provider = self.providers.get_or_init(&self.stack_key, pool.provider, &self.description)?;
        let network_id = self.network_handle_id.lock().unwrap().clone().unwrap_or_default();
        let ssh_key_id = self.ssh_key_handle_id.lock().unwrap().clone().unwrap_or_default();
        let vpn_ipv4_str = self.vpn_addresses.get(node_key).cloned().unwrap_or_default();
        let role = if pool.roles.contains(&nimbus_types::description::Role::Master) { "master" } else { "worker" };
        let salt_master_address = if self.description.security.bastion.enabled {
            Some(self.vpn_addresses.get("bastion").cloned().unwrap_or_else(|| nimbus_topology::bastion_address(&self.description.network.overlay_cidr).unwrap_or_default()))
        } else {
            None
        };
        let cluster_token = self.description.kubernetes.token.clone().unwrap_or_default();
        let user_data = nimbus_provision::render_cloud_init(&nimbus_provision::CloudInitInput {
            node_name: node_key,
            cluster_name: &self.description.metadata.name,
            role,
            vpn_ipv4: &vpn_ipv4_str,
            salt_master_address: salt_master_address.as_deref(),
            cluster_token: &cluster_token,
        })
        .unwrap_or_default();
        let spec = NodeSpecReq {
            name: node_key.to_string(),
            size: pool.size.clone(),
            image: pool.image.clone(),
            region: pool.region.clone().unwrap_or_default(),
            network_id,
            ssh_key_id,
            user_data,
            labels: pool.labels.clone(),
            assign_public_ip: false,
        };
        let handle = provider.lock().unwrap().create_node(&spec)?;
        let vpn_ipv4 = self.vpn_addresses.get(node_key).cloned();
        self.node_runtime.lock().unwrap().insert(
            node_key.to_string(),
            NodeRuntime { provider_id: Some(handle.provider_id), public_ipv4: handle.public_ipv4, private_ipv4: Some(handle.private_ipv4.clone()), vpn_ipv4: vpn_ipv4.clone() },
        );
        let mut table = self.mesh_table.lock().unwrap();
        let keypair = generate_keypair();
        table.insert(PeerEntry {
            node_name: node_key.to_string(),
            public_ipv4: handle.private_ipv4,
            vpn_ipv4: vpn_ipv4.unwrap_or_default(),
            public_key: keypair.public_key_base64,
        });
        let _ = pool_name;
        Ok(())
    }

    /// Pushes the rendered WireGuard peer config to every non-bastion node
    /// whose `vpn_ipv4` is known, skipping the whole sweep when the table's
    /// fingerprint matches the last push (spec.md §4.2 "the orchestrator
    /// computes a fingerprint ... and only pushes updates when it
    /// changes").
    fn apply_vpn_mesh(&self) -> Result<(), OrchestratorError> {
        let runtime = self.node_runtime.lock().unwrap();
        let table = self.mesh_table.lock().unwrap();
        let fingerprint = table.fingerprint()?;
        if self.mesh_fingerprint.lock().unwrap().as_deref() == Some(fingerprint.as_str()) {
            log::debug!("mesh table unchanged (fingerprint {fingerprint}), skipping push");
            return Ok(());
        }
        let nodes: Vec<&str> = runtime.keys().map(|k| k.as_str()).filter(|k| *k != "bastion").collect();
        for node_key in nodes {
            let Some(state) = runtime.get(node_key) else { continue };
            let Some(self_vpn) = state.vpn_ipv4.clone() else { continue };
            let conn = self.conn_for(state, self.primary_provider_kind());
            let peers = table.peers_of(node_key);
            log::debug!("pushing {} mesh peers to {node_key}", peers.len());
            let rendered = nimbus_topology::render_peer_config(&nimbus_topology::PeerConfigContext {
                node_name: node_key,
                cluster_name: &self.description.metadata.name,
                self_vpn_ipv4: &self_vpn,
                vpn_port: self.description.network.vpn_port,
                peers,
            })?;
            let script = format!(
                "mkdir -p /etc/wireguard && cat > /etc/wireguard/wg0.conf <<'NIMBUS_WG_EOF'\n{cfg}\nNIMBUS_WG_EOF\n\
                 (wg-quick down wg0 >/dev/null 2>&1 || true)\n\
                 wg-quick up wg0",
                cfg = rendered,
            );
            self.remote.run_script(&conn, &script, VALIDATION_TIMEOUT)?;
        }
        *self.mesh_fingerprint.lock().unwrap() = Some(fingerprint);
        Ok(())
    }

    fn apply_k8s_install(&self) -> Result<(), OrchestratorError> {
        let runtime = self.node_runtime.lock().unwrap();
        let token = self.description.kubernetes.token.clone().unwrap_or_default();
        let master_keys: Vec<String> = self.description.master_pools().into_iter().flat_map(|(name, p)| (0..p.count).map(move |i| format!("{name}-{i}"))).collect();
        let worker_keys: Vec<String> = self.description.worker_pools().into_iter().flat_map(|(name, p)| (0..p.count).map(move |i| format!("{name}-{i}"))).collect();

        // (node_name, vpn_address, conn, role) owned up front so `NodeTarget`'s
        // borrows have somewhere stable to point at for the rest of this call.
        let gather = |keys: &[String], role: &'static str| -> Vec<(String, String, ConnectionSpec, &'static str)> {
            keys.iter()
                .filter_map(|k| {
                    let state = runtime.get(k)?;
                    let vpn = state.vpn_ipv4.clone()?;
                    Some((k.clone(), vpn, self.conn_for(state, self.primary_provider_kind()), role))
                })
                .collect()
        };
        let master_owned = gather(&master_keys, "master");
        let worker_owned = gather(&worker_keys, "worker");

        // BootReady -> Joining -> Ready via the Salt minion handshake for
        // every node before handing the pool over to the k8s installer
        // (spec.md §4.4).
        if self.description.security.bastion.enabled {
            let salt_master_address = self.vpn_addresses.get("bastion").cloned().unwrap_or_else(|| nimbus_topology::bastion_address(&self.description.network.overlay_cidr).unwrap_or_default());
            for (name, vpn, conn, role) in master_owned.iter().chain(worker_owned.iter()) {
                nimbus_provision::wait_for_boot_ready_with_budget(self.remote.as_ref(), conn, name, nimbus_provision::BOOT_READY_BUDGET)?;
                nimbus_provision::join_minion(
                    self.remote.as_ref(),
                    conn,
                    &nimbus_provision::MinionJoinInput {
                        node_name: name,
                        role,
                        salt_master_vpn_address: &salt_master_address,
                        vpn_ipv4: vpn,
                        cluster_token: &token,
                    },
                )?;
                nimbus_provision::wait_until_ready_with_budget(self.remote.as_ref(), conn, name, "salt-call test.ping", nimbus_provision::JOIN_BUDGET)?;
            }
        }

        let master_targets: Vec<nimbus_provision::NodeTarget> = master_owned
            .iter()
            .map(|(name, vpn, conn, _)| nimbus_provision::NodeTarget { node_name: name, vpn_address: vpn, conn: conn.clone() })
            .collect();
        let worker_targets: Vec<nimbus_provision::NodeTarget> = worker_owned
            .iter()
            .map(|(name, vpn, conn, _)| nimbus_provision::NodeTarget { node_name: name, vpn_address: vpn, conn: conn.clone() })
            .collect();

        let results = nimbus_provision::run_cluster_install(
            self.remote.as_ref(),
            &master_targets,
            &worker_targets,
            &self.description.kubernetes.distribution,
            &token,
            &self.description.kubernetes.cni,
            self.description.kubernetes.snapshot_schedule.as_deref(),
            true,
            &[],
            "kubectl get nodes --no-headers | grep -v NotReady",
            Duration::from_secs(15 * 60),
        )?;
        if let Some((node, Err(e))) = results.into_iter().find(|(_, r)| r.is_err()) {
            log::error!("install failed on node '{node}'");
            return Err(e.into());
        }

        if let Some((_, vpn, conn, _)) = master_owned.first() {
            let dist = &self.description.kubernetes.distribution;
            let cmd = format!("cat /etc/rancher/{dist}/{dist}.yaml");
            if let Ok(out) = self.remote.run(conn, &cmd, VALIDATION_TIMEOUT) {
                if out.success() {
                    *self.kubeconfig.lock().unwrap() = Some(out.stdout.replace("127.0.0.1", vpn));
                    *self.api_endpoint.lock().unwrap() = Some(format!("https://{vpn}:6443"));
                }
            }
        }
        Ok(())
    }

    fn apply_addon(&self, addon_name: &str) -> Result<(), OrchestratorError> {
        let runtime = self.node_runtime.lock().unwrap();
        let Some((_, state)) = runtime.iter().find(|(k, _)| k.starts_with("masters") || k.starts_with("control")) else {
            log::warn!("no master node available to apply addon '{addon_name}'");
            return Ok(());
        };
        let conn = self.conn_for(state, self.primary_provider_kind());
        let cmd = format!("kubectl apply -f /etc/nimbus/addons/{addon_name}.yaml");
        self.remote.run_script(&conn, &cmd, VALIDATION_TIMEOUT)?;
        Ok(())
    }
}

impl ResourceExecutor for LiveResourceExecutor {
    fn apply(&self, id: &ResourceId, _graph: &ResourceGraph) -> Result<(), OrchestratorError> {
        match id.kind {
            ResourceKind::SshKey => self.apply_ssh_key(),
            ResourceKind::Network => self.apply_network(),
            ResourceKind::Firewall => self.apply_firewall(),
            ResourceKind::Bastion => self.apply_bastion(),
            ResourceKind::Node => self.apply_node(&id.key),
            ResourceKind::VpnMesh => self.apply_vpn_mesh(),
            ResourceKind::K8sInstall => self.apply_k8s_install(),
            ResourceKind::Addon => self.apply_addon(&id.key),
        }
    }

    fn destroy(&self, id: &ResourceId) -> Result<(), OrchestratorError> {
        match id.kind {
            ResourceKind::Node | ResourceKind::Bastion => {
                let runtime = self.node_runtime.lock().unwrap();
                if let Some(state) = runtime.get(&id.key) {
                    if let Some(provider_id) = &state.provider_id {
                        let kind = self.pool_for_node_key(&id.key).map(|(_, p)| p.provider).unwrap_or_else(|| self.primary_provider_kind());
                        let provider = self.providers.get_or_init(&self.stack_key, kind, &self.description)?;
                        provider.lock().unwrap().delete_node(provider_id)?;
                    }
                }
                Ok(())
            }
            _ => {
                log::debug!("no teardown action needed for {id}");
                Ok(())
            }
        }
    }

    fn observe(&self, id: &ResourceId) -> Result<(), OrchestratorError> {
        log::debug!("observing resource {id}");
        Ok(())
    }

    fn collect_nodes(&self, stack_key: &str) -> Vec<Node> {
        let runtime = self.node_runtime.lock().unwrap();
        let mut nodes: Vec<Node> = self
            .description
            .master_pools()
            .into_iter()
            .chain(self.description.worker_pools())
            .flat_map(|(name, pool)| (0..pool.count).map(move |i| (format!("{name}-{i}"), name.clone(), pool)))
            .filter_map(|(node_key, pool_name, pool)| {
                let state = runtime.get(&node_key)?;
                Some(Node {
                    stack: stack_key.to_string(),
                    name: node_key.clone(),
                    provider: pool.provider,
                    region: pool.region.clone().unwrap_or_default(),
                    size: pool.size.clone(),
                    image: pool.image.clone(),
                    roles: pool.roles.clone(),
                    labels: pool.labels.clone(),
                    taints: pool.taints.clone(),
                    addresses: NodeAddresses {
                        public_ipv4: state.public_ipv4.clone(),
                        private_ipv4: state.private_ipv4.clone(),
                        vpn_ipv4: state.vpn_ipv4.clone(),
                    },
                    status: NodeStatus::Ready,
                    owning_pool: pool_name,
                    created_at: Utc::now(),
                    fingerprint: format!("{}:{}:{}", pool.size, pool.image, pool.region.clone().unwrap_or_default()),
                })
            })
            .collect();

        if let Some(state) = runtime.get("bastion") {
            nodes.push(Node {
                stack: stack_key.to_string(),
                name: "bastion".to_string(),
                provider: self.description.security.bastion.provider.unwrap_or_else(|| self.primary_provider_kind()),
                region: self.description.node_pools.values().find_map(|p| p.region.clone()).unwrap_or_default(),
                size: self.description.security.bastion.size.clone().unwrap_or_else(|| "small".to_string()),
                image: "ubuntu-22.04".to_string(),
                roles: BTreeSet::new(),
                labels: BTreeMap::new(),
                taints: Vec::new(),
                addresses: NodeAddresses {
                    public_ipv4: state.public_ipv4.clone(),
                    private_ipv4: state.private_ipv4.clone(),
                    vpn_ipv4: state.vpn_ipv4.clone(),
                },
                status: NodeStatus::Ready,
                owning_pool: "bastion".to_string(),
                created_at: Utc::now(),
                fingerprint: "bastion".to_string(),
            });
        }

        nodes
    }

    fn collect_outputs(&self) -> StackOutputs {
        let runtime = self.node_runtime.lock().unwrap();
        let node_addresses = runtime
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    NodeAddresses { public_ipv4: v.public_ipv4.clone(), private_ipv4: v.private_ipv4.clone(), vpn_ipv4: v.vpn_ipv4.clone() },
                )
            })
            .collect();
        StackOutputs {
            cluster_name: Some(self.description.metadata.name.clone()),
            api_endpoint: self.api_endpoint.lock().unwrap().clone(),
            kube_config: self.kubeconfig.lock().unwrap().clone(),
            ssh_private_key: None,
            status: Some("deployed".to_string()),
            node_addresses,
            backup_artifacts: Vec::new(),
        }
    }
}
