//! Cluster Installer (spec.md §4.5): masters first, workers second,
//! deterministic pool-name-sorted order. Master #1 is installed with
//! `--cluster-init`, polled for API health, then later masters and workers
//! join via the join token and master #1's VPN address.

use std::time::Duration;

use tera::{Context, Tera};

use nimbus_remote::{ConnectionSpec, RemoteExecClient, PROVISIONING_TIMEOUT};

use crate::error::ProvisionError;
use crate::joining::wait_until_ready_with_budget;
pub use crate::joining::JOIN_BUDGET;

const SERVER_CONFIG_TEMPLATE: &str = include_str!("../templates/server_config.yaml.tera");

#[derive(Debug, Clone)]
pub struct ServerConfigInput<'a> {
    pub cluster_token: &'a str,
    pub cluster_init: bool,
    pub first_master_vpn_address: &'a str,
    pub node_vpn_address: &'a str,
    pub snapshot_schedule: Option<&'a str>,
    pub secrets_encryption: bool,
    pub disable_components: &'a [String],
    pub cni: &'a str,
}

pub fn render_server_config(input: &ServerConfigInput) -> Result<String, ProvisionError> {
    let mut tera = Tera::default();
    tera.add_raw_template("server_config.yaml", SERVER_CONFIG_TEMPLATE)
        .map_err(|e| ProvisionError::TemplateRender(e.to_string()))?;
    let mut ctx = Context::new();
    ctx.insert("cluster_token", input.cluster_token);
    ctx.insert("cluster_init", &input.cluster_init);
    ctx.insert("first_master_vpn_address", input.first_master_vpn_address);
    ctx.insert("node_vpn_address", input.node_vpn_address);
    ctx.insert("snapshot_schedule", &input.snapshot_schedule);
    ctx.insert("secrets_encryption", &input.secrets_encryption);
    ctx.insert("disable_components", input.disable_components);
    ctx.insert("cni", input.cni);
    tera.render("server_config.yaml", &ctx)
        .map_err(|e| ProvisionError::TemplateRender(e.to_string()))
}

fn write_config_and_install_script(distribution: &str, config_yaml: &str, role: &str) -> String {
    let config_dir = format!("/etc/rancher/{}", distribution);
    let service = if role == "master" { format!("{}-server", distribution) } else { format!("{}-agent", distribution) };
    format!(
        "mkdir -p {dir}/config.yaml.d && cat > {dir}/config.yaml <<'NIMBUS_CFG_EOF'\n{cfg}\nNIMBUS_CFG_EOF\n\
         test -x /usr/local/bin/{dist} || curl -sfL https://get.{dist}.io | sh -\n\
         systemctl enable --now {svc}",
        dir = config_dir,
        cfg = config_yaml,
        dist = distribution,
        svc = service,
    )
}

pub struct NodeTarget<'a> {
    pub node_name: &'a str,
    pub vpn_address: &'a str,
    pub conn: ConnectionSpec,
}

/// One master/worker install-and-wait step. `is_first_master` drives both
/// `--cluster-init`/`server:` selection and fatality: a failure on the
/// first master aborts the whole install; later failures are recorded on
/// the node and the rest of the install continues (spec.md §4.5).
pub fn install_master(
    client: &dyn RemoteExecClient,
    target: &NodeTarget,
    distribution: &str,
    server_input: &ServerConfigInput,
    readiness_command: &str,
    is_first_master: bool,
    join_budget: Duration,
) -> Result<(), ProvisionError> {
    let config = render_server_config(server_input)?;
    let script = write_config_and_install_script(distribution, &config, "master");
    let result = client
        .run_script(&target.conn, &script, PROVISIONING_TIMEOUT)
        .map_err(ProvisionError::from)
        .and_then(|_| {
            wait_until_ready_with_budget(client, &target.conn, target.node_name, readiness_command, join_budget)
        });
    match result {
        Ok(()) => Ok(()),
        Err(e) if is_first_master => Err(ProvisionError::FirstMasterFailed(e.to_string())),
        Err(e) => Err(e),
    }
}

pub fn install_worker(
    client: &dyn RemoteExecClient,
    target: &NodeTarget,
    distribution: &str,
    server_input: &ServerConfigInput,
    readiness_command: &str,
    join_budget: Duration,
) -> Result<(), ProvisionError> {
    let config = render_server_config(server_input)?;
    let script = write_config_and_install_script(distribution, &config, "worker");
    client.run_script(&target.conn, &script, PROVISIONING_TIMEOUT)?;
    wait_until_ready_with_budget(client, &target.conn, target.node_name, readiness_command, join_budget)
}

/// Full masters-then-workers installer sweep. Pools are expected to have
/// already been sorted by name by the caller (spec.md §4.5 "pool iteration
/// order is fixed by sorting pool names, not by map iteration").
pub fn run_cluster_install(
    client: &dyn RemoteExecClient,
    masters: &[NodeTarget],
    workers: &[NodeTarget],
    distribution: &str,
    cluster_token: &str,
    cni: &str,
    snapshot_schedule: Option<&str>,
    secrets_encryption: bool,
    disable_components: &[String],
    readiness_command: &str,
    join_budget: Duration,
) -> Result<Vec<(String, Result<(), ProvisionError>)>, ProvisionError> {
    let mut results = Vec::new();
    let first_master = masters.first().ok_or_else(|| {
        ProvisionError::FirstMasterFailed("no master pool declared".to_string())
    })?;

    let first_input = ServerConfigInput {
        cluster_token,
        cluster_init: true,
        first_master_vpn_address: first_master.vpn_address,
        node_vpn_address: first_master.vpn_address,
        snapshot_schedule,
        secrets_encryption,
        disable_components,
        cni,
    };
    install_master(client, first_master, distribution, &first_input, readiness_command, true, join_budget)?;
    results.push((first_master.node_name.to_string(), Ok(())));

    for master in masters.iter().skip(1) {
        let input = ServerConfigInput {
            cluster_token,
            cluster_init: false,
            first_master_vpn_address: first_master.vpn_address,
            node_vpn_address: master.vpn_address,
            snapshot_schedule,
            secrets_encryption,
            disable_components,
            cni,
        };
        let outcome = install_master(client, master, distribution, &input, readiness_command, false, join_budget);
        results.push((master.node_name.to_string(), outcome));
    }

    for worker in workers {
        let input = ServerConfigInput {
            cluster_token,
            cluster_init: false,
            first_master_vpn_address: first_master.vpn_address,
            node_vpn_address: worker.vpn_address,
            snapshot_schedule,
            secrets_encryption,
            disable_components,
            cni,
        };
        let outcome = install_worker(client, worker, distribution, &input, readiness_command, join_budget);
        results.push((worker.node_name.to_string(), outcome));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_remote::{CommandOutput, MockRemoteExecClient};
    use std::path::PathBuf;

    fn target(name: &'static str, addr: &'static str) -> NodeTarget<'static> {
        NodeTarget {
            node_name: name,
            vpn_address: addr,
            conn: ConnectionSpec {
                host: addr.to_string(),
                port: 22,
                ssh_user: "root".to_string(),
                private_key_path: PathBuf::from("/dev/null"),
                bastion: None,
                dial_error_limit: 30,
            },
        }
    }

    #[test]
    fn server_config_selects_cluster_init_for_first_master() {
        let input = ServerConfigInput {
            cluster_token: "tok",
            cluster_init: true,
            first_master_vpn_address: "10.8.0.10",
            node_vpn_address: "10.8.0.10",
            snapshot_schedule: Some("0 */6 * * *"),
            secrets_encryption: true,
            disable_components: &[],
            cni: "canal",
        };
        let cfg = render_server_config(&input).unwrap();
        assert!(cfg.contains("cluster-init: true"));
        assert!(cfg.contains("0 */6 * * *"));
        assert!(!cfg.contains("server: https://"));
    }

    #[test]
    fn server_config_points_later_masters_at_first() {
        let input = ServerConfigInput {
            cluster_token: "tok",
            cluster_init: false,
            first_master_vpn_address: "10.8.0.10",
            node_vpn_address: "10.8.0.11",
            snapshot_schedule: None,
            secrets_encryption: false,
            disable_components: &["servicelb".to_string()],
            cni: "canal",
        };
        let cfg = render_server_config(&input).unwrap();
        assert!(cfg.contains("server: https://10.8.0.10:9345"));
        assert!(cfg.contains("- servicelb"));
    }

    #[test]
    fn first_master_failure_is_fatal() {
        let client = MockRemoteExecClient::new();
        client.stub("check-ready", CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 1 });
        let masters = vec![target("m1", "10.8.0.10")];
        let workers: Vec<NodeTarget> = vec![];
        let err = run_cluster_install(
            &client, &masters, &workers, "rke2", "tok", "canal", None, true, &[], "check-ready",
            Duration::from_millis(20),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::FirstMasterFailed(_)));
    }

    #[test]
    fn later_master_failure_is_not_fatal_to_the_sweep() {
        let client = MockRemoteExecClient::new();
        client.stub("check-ready", CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 });
        let masters = vec![target("m1", "10.8.0.10"), target("m2", "10.8.0.11")];
        let workers: Vec<NodeTarget> = vec![];
        let results = run_cluster_install(
            &client, &masters, &workers, "rke2", "tok", "canal", None, true, &[], "check-ready",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
