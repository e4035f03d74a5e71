//! `BootReady -> Joining -> Ready` (spec.md §4.4): writes the Salt minion
//! configuration, installs and starts the minion, then polls until the
//! node is accepted by the cluster (masters: quorum/API health; workers:
//! appears `Ready` in the API).

use std::time::{Duration, Instant};

use nimbus_remote::{ConnectionSpec, RemoteExecClient, PROVISIONING_TIMEOUT, VALIDATION_TIMEOUT};

use crate::aptlock::wrap_apt_command;
use crate::error::ProvisionError;

/// Default 10 minute budget for `Joining -> Ready` (spec.md §4.4).
pub const JOIN_BUDGET: Duration = Duration::from_secs(10 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct MinionJoinInput<'a> {
    pub node_name: &'a str,
    pub role: &'a str,
    pub salt_master_vpn_address: &'a str,
    pub vpn_ipv4: &'a str,
    pub cluster_token: &'a str,
}

fn minion_config_script(input: &MinionJoinInput) -> String {
    format!(
        "mkdir -p /etc/salt/minion.d && cat > /etc/salt/minion.d/nimbus.conf <<'EOF'\n\
         master: {master}\n\
         id: {id}\n\
         grains:\n\
         \x20 role: {role}\n\
         \x20 vpn_ip: {vpn_ip}\n\
         \x20 nimbus_cluster_token: {token}\n\
         EOF\n\
         test -x /usr/bin/salt-minion || {install}\n\
         systemctl enable --now salt-minion",
        master = input.salt_master_vpn_address,
        id = input.node_name,
        role = input.role,
        vpn_ip = input.vpn_ipv4,
        token = input.cluster_token,
        install = wrap_apt_command("install -y salt-minion").replace('\n', " "),
    )
}

/// Writes and starts the minion (`BootReady -> Joining`). The master's
/// autosign policy on the receiving end only accepts grains presenting the
/// correct cluster token; a mismatched token here shows up as the node
/// never reaching `Ready`, handled by the caller's timeout.
pub fn join_minion(
    client: &dyn RemoteExecClient,
    conn: &ConnectionSpec,
    input: &MinionJoinInput,
) -> Result<(), ProvisionError> {
    let script = minion_config_script(input);
    client.run_script(conn, &script, PROVISIONING_TIMEOUT)?;
    Ok(())
}

/// Polls until the node is accepted: on masters, etcd health + API
/// response on the VPN address; on workers, appearance as `Ready` in the
/// API. Both reduce, at this layer, to a caller-supplied readiness command
/// since the actual API/etcd client is provider-agnostic kubectl/curl.
pub fn wait_until_ready(
    client: &dyn RemoteExecClient,
    conn: &ConnectionSpec,
    node_name: &str,
    readiness_command: &str,
) -> Result<(), ProvisionError> {
    wait_until_ready_with_budget(client, conn, node_name, readiness_command, JOIN_BUDGET)
}

pub fn wait_until_ready_with_budget(
    client: &dyn RemoteExecClient,
    conn: &ConnectionSpec,
    node_name: &str,
    readiness_command: &str,
    budget: Duration,
) -> Result<(), ProvisionError> {
    let deadline = Instant::now() + budget;
    loop {
        if let Ok(out) = client.run(conn, readiness_command, VALIDATION_TIMEOUT) {
            if out.success() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(ProvisionError::JoinTimeout(node_name.to_string()));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_remote::MockRemoteExecClient;
    use std::path::PathBuf;

    fn conn() -> ConnectionSpec {
        ConnectionSpec {
            host: "10.8.0.10".into(),
            port: 22,
            ssh_user: "root".into(),
            private_key_path: PathBuf::from("/dev/null"),
            bastion: None,
            dial_error_limit: 30,
        }
    }

    #[test]
    fn minion_config_includes_token_and_master() {
        let input = MinionJoinInput {
            node_name: "w1",
            role: "worker",
            salt_master_vpn_address: "10.8.0.5",
            vpn_ipv4: "10.8.0.30",
            cluster_token: "tok123",
        };
        let script = minion_config_script(&input);
        assert!(script.contains("master: 10.8.0.5"));
        assert!(script.contains("tok123"));
    }

    #[test]
    fn join_minion_runs_under_sudo_for_non_root() {
        let client = MockRemoteExecClient::new();
        let mut c = conn();
        c.ssh_user = "ubuntu".to_string();
        join_minion(&client, &c, &MinionJoinInput {
            node_name: "w1",
            role: "worker",
            salt_master_vpn_address: "10.8.0.5",
            vpn_ipv4: "10.8.0.30",
            cluster_token: "tok123",
        })
        .unwrap();
        assert!(client.last_command().unwrap().contains("sudo bash"));
    }

    #[test]
    fn readiness_poll_times_out() {
        let client = MockRemoteExecClient::new();
        client.stub("check-ready", nimbus_remote::CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 1 });
        let err = wait_until_ready_with_budget(&client, &conn(), "w1", "check-ready", Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ProvisionError::JoinTimeout(n) if n == "w1"));
    }
}
