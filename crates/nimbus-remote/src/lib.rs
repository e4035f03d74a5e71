//! Remote execution client (spec.md §4.3): `Run(host, command, timeout)` ->
//! `{stdout, stderr, exit_code}` over SSH, with mandatory bastion ProxyJump
//! and `sudo`-heredoc script delivery for non-root users.

use std::time::Duration;

pub mod error;
pub mod mock;
pub mod ssh;

pub use error::{RemoteExecError, RemoteExecErrorKind};
pub use mock::MockRemoteExecClient;
pub use ssh::SshRemoteExecClient;

pub type Result<T> = std::result::Result<T, RemoteExecError>;

/// Default retry ceiling for connection establishment (spec.md §4.3).
pub const DEFAULT_DIAL_ERROR_LIMIT: u32 = 30;
/// Linear backoff step between dial attempts.
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Default wall-clock timeout for provisioning scripts.
pub const PROVISIONING_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Default wall-clock timeout for validation checks.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub ssh_user: String,
    pub private_key_path: std::path::PathBuf,
    /// Mandatory ProxyJump target whenever the bastion is enabled and the
    /// target is a cluster node (spec.md §4.3).
    pub bastion: Option<BastionJump>,
    pub dial_error_limit: u32,
}

#[derive(Debug, Clone)]
pub struct BastionJump {
    pub host: String,
    pub port: u16,
    pub ssh_user: String,
    pub private_key_path: std::path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The capability the rest of the engine depends on; `SshRemoteExecClient`
/// is the real implementation, `MockRemoteExecClient` the test double, in
/// the same spirit as `CloudProvider`/`MockProvider`.
pub trait RemoteExecClient: Send + Sync {
    fn run(&self, conn: &ConnectionSpec, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Delivers `script` to the remote host and executes it, using the
    /// `sudo bash <tmpfile>` heredoc-delivery convention whenever `ssh_user`
    /// is not `root` (spec.md §4.3 "Script delivery under sudo").
    fn run_script(&self, conn: &ConnectionSpec, script: &str, timeout: Duration) -> Result<CommandOutput> {
        if conn.ssh_user == "root" {
            self.run(conn, script, timeout)
        } else {
            let tmp_path = format!("/tmp/nimbus-provision-{}.sh", script_fingerprint(script));
            let heredoc = format!(
                "cat > {path} <<'NIMBUS_SCRIPT_EOF'\n{script}\nNIMBUS_SCRIPT_EOF\nsudo bash {path}; rc=$?; rm -f {path}; exit $rc",
                path = tmp_path,
                script = script,
            );
            self.run(conn, &heredoc, timeout)
        }
    }
}

fn script_fingerprint(script: &str) -> String {
    use rand::Rng;
    let mut hasher: u64 = 1469598103934665603;
    for byte in script.as_bytes() {
        hasher ^= *byte as u64;
        hasher = hasher.wrapping_mul(1099511628211);
    }
    let salt: u32 = rand::thread_rng().gen();
    format!("{:x}{:x}", hasher, salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn conn(user: &str) -> ConnectionSpec {
        ConnectionSpec {
            host: "10.8.0.10".into(),
            port: 22,
            ssh_user: user.into(),
            private_key_path: PathBuf::from("/dev/null"),
            bastion: None,
            dial_error_limit: DEFAULT_DIAL_ERROR_LIMIT,
        }
    }

    #[test]
    fn root_runs_command_directly() {
        let client = MockRemoteExecClient::new();
        client.stub("echo hi", CommandOutput { stdout: "hi\n".into(), stderr: String::new(), exit_code: 0 });
        let out = client.run_script(&conn("root"), "echo hi", VALIDATION_TIMEOUT).unwrap();
        assert_eq!(out.stdout, "hi\n");
    }

    #[test]
    fn non_root_wraps_in_sudo_heredoc() {
        let client = MockRemoteExecClient::new();
        let out = client.run_script(&conn("ubuntu"), "echo hi", VALIDATION_TIMEOUT).unwrap();
        let recorded = client.last_command().unwrap();
        assert!(recorded.contains("sudo bash"));
        assert!(recorded.contains("NIMBUS_SCRIPT_EOF"));
        assert_eq!(out.exit_code, 0);
    }
}
