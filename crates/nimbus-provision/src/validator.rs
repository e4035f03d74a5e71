//! `BootPending -> BootReady` validation (spec.md §4.4): confirms cloud-init
//! actually finished before we trust the node enough to join it to the
//! mesh and the cluster.

use std::time::{Duration, Instant};

use nimbus_remote::{ConnectionSpec, RemoteExecClient, VALIDATION_TIMEOUT};

use crate::error::ProvisionError;

/// 15 minute budget for `BootPending -> BootReady` (spec.md §4.4).
pub const BOOT_READY_BUDGET: Duration = Duration::from_secs(15 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// The single shell command whose success implies: package tooling present,
/// overlay VPN tool installed, hostname set, relevant `systemd` targets
/// reached, and no unattended-upgrade holding the package lock.
fn validation_command() -> &'static str {
    "command -v curl >/dev/null && \
     command -v wg >/dev/null && \
     [ -n \"$(hostname)\" ] && \
     systemctl is-system-running --wait | grep -qE 'running|degraded' && \
     ! fuser /var/lib/dpkg/lock-frontend >/dev/null 2>&1"
}

/// Polls the validation command until it succeeds or `BOOT_READY_BUDGET`
/// elapses, at which point the node is Failed (spec.md §4.4).
pub fn wait_for_boot_ready(
    client: &dyn RemoteExecClient,
    conn: &ConnectionSpec,
    node_name: &str,
) -> Result<(), ProvisionError> {
    wait_for_boot_ready_with_budget(client, conn, node_name, BOOT_READY_BUDGET)
}

pub fn wait_for_boot_ready_with_budget(
    client: &dyn RemoteExecClient,
    conn: &ConnectionSpec,
    node_name: &str,
    budget: Duration,
) -> Result<(), ProvisionError> {
    let deadline = Instant::now() + budget;
    loop {
        match client.run(conn, validation_command(), VALIDATION_TIMEOUT) {
            Ok(out) if out.success() => return Ok(()),
            _ => {}
        }
        if Instant::now() >= deadline {
            return Err(ProvisionError::BootTimeout(node_name.to_string()));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_remote::{CommandOutput, MockRemoteExecClient};
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
    fn succeeds_immediately_when_validator_passes() {
        let client = MockRemoteExecClient::new();
        client.stub(validation_command(), CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 });
        wait_for_boot_ready_with_budget(&client, &conn(), "m1", Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn times_out_when_validator_never_passes() {
        let client = MockRemoteExecClient::new();
        client.stub(validation_command(), CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 1 });
        let err = wait_for_boot_ready_with_budget(&client, &conn(), "m1", Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, ProvisionError::BootTimeout(n) if n == "m1"));
    }
}
