//! Upgrade manager (spec.md §4.7): validates the requested version jump
//! with `semver`, then drains/cordons/swaps/uncordons nodes masters-first,
//! one master at a time, workers bounded by `max_unavailable`/`max_surge`.
//! On failure with `auto_rollback` set, reverses the plan for every node
//! already touched this run.

use std::time::Duration;

use semver::Version;

use nimbus_remote::{ConnectionSpec, RemoteExecClient, PROVISIONING_TIMEOUT};
use nimbus_types::description::UpgradePolicy;

use crate::error::UpgradeError;

pub fn parse_version(raw: &str) -> Result<Version, UpgradeError> {
    Version::parse(raw.trim_start_matches('v')).map_err(|_| UpgradeError::InvalidVersion(raw.to_string()))
}

/// same major, never a downgrade, at most two minor versions skipped.
pub fn validate_upgrade_path(from: &str, to: &str) -> Result<(), UpgradeError> {
    let from_v = parse_version(from)?;
    let to_v = parse_version(to)?;
    if to_v.major != from_v.major {
        return Err(UpgradeError::MajorVersionJump { from: from.to_string(), to: to.to_string() });
    }
    if to_v < from_v {
        return Err(UpgradeError::Downgrade { from: from.to_string(), to: to.to_string() });
    }
    if to_v.minor.saturating_sub(from_v.minor) > 2 {
        return Err(UpgradeError::TooManyMinorsSkipped { from: from.to_string(), to: to.to_string() });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RollbackInfo {
    pub previous_version: String,
    pub affected_nodes: Vec<String>,
    pub backup_locator: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeReport {
    pub upgraded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub rolled_back: bool,
}

/// One upgradable node: its connection and current cordon/ready state are
/// the caller's responsibility, this manager only drives the steps.
pub struct UpgradeTarget<'a> {
    pub name: &'a str,
    pub conn: ConnectionSpec,
    pub is_master: bool,
}

/// Abstraction over the actual kubectl/binary-swap calls so the ordering
/// and rollback logic can be unit tested without a live cluster, the same
/// split `CloudProvider`/`MockProvider` and `RemoteExecClient`/
/// `MockRemoteExecClient` use elsewhere in this workspace.
pub trait UpgradeStep: Send + Sync {
    fn cordon(&self, node_name: &str, conn: &ConnectionSpec) -> Result<(), UpgradeError>;
    fn drain(&self, node_name: &str, conn: &ConnectionSpec, timeout: Duration) -> Result<(), UpgradeError>;
    fn swap_binary(&self, node_name: &str, conn: &ConnectionSpec, to_version: &str) -> Result<(), UpgradeError>;
    fn uncordon(&self, node_name: &str, conn: &ConnectionSpec) -> Result<(), UpgradeError>;
    fn wait_ready(&self, node_name: &str, conn: &ConnectionSpec) -> Result<(), UpgradeError>;
}

/// Real implementation: everything goes over `kubectl` and the
/// distribution's installer script via `RemoteExecClient`.
pub struct RemoteUpgradeStep<'a> {
    pub client: &'a dyn RemoteExecClient,
    pub distribution: &'a str,
    pub readiness_command: &'a str,
}

fn run(client: &dyn RemoteExecClient, node_name: &str, conn: &ConnectionSpec, cmd: &str, timeout: Duration) -> Result<(), UpgradeError> {
    let out = client
        .run_script(conn, cmd, timeout)
        .map_err(|e| UpgradeError::StepFailed(node_name.to_string(), e.to_string()))?;
    if !out.success() {
        return Err(UpgradeError::StepFailed(node_name.to_string(), out.stderr));
    }
    Ok(())
}

impl<'a> UpgradeStep for RemoteUpgradeStep<'a> {
    fn cordon(&self, node_name: &str, conn: &ConnectionSpec) -> Result<(), UpgradeError> {
        run(self.client, node_name, conn, &format!("kubectl cordon {node_name}"), PROVISIONING_TIMEOUT)
    }

    fn drain(&self, node_name: &str, conn: &ConnectionSpec, timeout: Duration) -> Result<(), UpgradeError> {
        let cmd = format!("kubectl drain {node_name} --ignore-daemonsets --delete-emptydir-data --force --timeout={}s", timeout.as_secs());
        run(self.client, node_name, conn, &cmd, timeout + Duration::from_secs(30))
    }

    fn swap_binary(&self, node_name: &str, conn: &ConnectionSpec, to_version: &str) -> Result<(), UpgradeError> {
        let dist = self.distribution;
        let env_var = format!("INSTALL_{}_VERSION", dist.to_uppercase());
        let role_service = format!("{dist}-server {dist}-agent");
        let cmd = format!(
            "curl -sfL https://get.{dist}.io | {env_var}={to_version} sh -\nfor svc in {role_service}; do systemctl is-enabled $svc >/dev/null 2>&1 && systemctl restart $svc; done"
        );
        run(self.client, node_name, conn, &cmd, PROVISIONING_TIMEOUT)
    }

    fn uncordon(&self, node_name: &str, conn: &ConnectionSpec) -> Result<(), UpgradeError> {
        run(self.client, node_name, conn, &format!("kubectl uncordon {node_name}"), PROVISIONING_TIMEOUT)
    }

    fn wait_ready(&self, node_name: &str, conn: &ConnectionSpec) -> Result<(), UpgradeError> {
        run(self.client, node_name, conn, self.readiness_command, PROVISIONING_TIMEOUT)
    }
}

fn upgrade_one(step: &dyn UpgradeStep, target: &UpgradeTarget, to_version: &str, policy: &UpgradePolicy) -> Result<(), UpgradeError> {
    let timeout = Duration::from_secs(policy.drain_timeout_secs);
    step.cordon(target.name, &target.conn)?;
    step.drain(target.name, &target.conn, timeout)?;
    step.swap_binary(target.name, &target.conn, to_version)?;
    step.wait_ready(target.name, &target.conn)?;
    step.uncordon(target.name, &target.conn)?;
    Ok(())
}

fn rollback_one(step: &dyn UpgradeStep, target: &UpgradeTarget, previous_version: &str) {
    let _ = step.swap_binary(target.name, &target.conn, previous_version);
    let _ = step.wait_ready(target.name, &target.conn);
    let _ = step.uncordon(target.name, &target.conn);
}

/// Masters one at a time (never more than one unavailable at once,
/// regardless of `max_unavailable`), then workers bounded by
/// `max_unavailable`/`max_surge` in sequential batches (spec.md §4.7: the
/// orchestrator's bounded-parallel executor handles true concurrency, this
/// manager only needs to respect the batch bound).
pub fn run_upgrade(
    step: &dyn UpgradeStep,
    masters: &[UpgradeTarget],
    workers: &[UpgradeTarget],
    from_version: &str,
    to_version: &str,
    policy: &UpgradePolicy,
) -> Result<UpgradeReport, UpgradeError> {
    validate_upgrade_path(from_version, to_version)?;

    let mut report = UpgradeReport::default();
    let mut touched: Vec<&UpgradeTarget> = Vec::new();

    for master in masters {
        match upgrade_one(step, master, to_version, policy) {
            Ok(()) => {
                report.upgraded.push(master.name.to_string());
                touched.push(master);
            }
            Err(e) => {
                report.failed.push((master.name.to_string(), e.to_string()));
                if policy.auto_rollback {
                    for t in touched.iter().rev() {
                        rollback_one(step, t, from_version);
                    }
                    report.rolled_back = true;
                    return Ok(report);
                }
                return Err(UpgradeError::NodeUpgradeFailed(master.name.to_string()));
            }
        }
    }

    let batch_size = (policy.max_unavailable + policy.max_surge).max(1) as usize;
    for batch in workers.chunks(batch_size) {
        for worker in batch {
            match upgrade_one(step, worker, to_version, policy) {
                Ok(()) => {
                    report.upgraded.push(worker.name.to_string());
                    touched.push(worker);
                }
                Err(e) => {
                    report.failed.push((worker.name.to_string(), e.to_string()));
                    if policy.auto_rollback {
                        for t in touched.iter().rev() {
                            rollback_one(step, t, from_version);
                        }
                        report.rolled_back = true;
                        return Ok(report);
                    }
                    return Err(UpgradeError::NodeUpgradeFailed(worker.name.to_string()));
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

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

    fn target(name: &'static str) -> UpgradeTarget<'static> {
        UpgradeTarget { name, conn: conn(), is_master: false }
    }

    fn policy() -> UpgradePolicy {
        UpgradePolicy { strategy: "rolling".into(), max_unavailable: 1, max_surge: 0, auto_rollback: true, drain_timeout_secs: 5 }
    }

    #[test]
    fn rejects_major_version_jump() {
        let err = validate_upgrade_path("1.26.0", "2.0.0").unwrap_err();
        assert!(matches!(err, UpgradeError::MajorVersionJump { .. }));
    }

    #[test]
    fn rejects_downgrade() {
        let err = validate_upgrade_path("1.28.0", "1.27.0").unwrap_err();
        assert!(matches!(err, UpgradeError::Downgrade { .. }));
    }

    #[test]
    fn rejects_skipping_more_than_two_minors() {
        let err = validate_upgrade_path("1.24.0", "1.28.0").unwrap_err();
        assert!(matches!(err, UpgradeError::TooManyMinorsSkipped { .. }));
    }

    #[test]
    fn accepts_adjacent_minor_upgrade() {
        assert!(validate_upgrade_path("1.26.4", "1.27.1").is_ok());
    }

    struct RecordingStep {
        calls: Mutex<Vec<String>>,
        fail_node: Option<&'static str>,
    }

    impl RecordingStep {
        fn new(fail_node: Option<&'static str>) -> Self {
            RecordingStep { calls: Mutex::new(Vec::new()), fail_node }
        }
    }

    impl UpgradeStep for RecordingStep {
        fn cordon(&self, node_name: &str, _conn: &ConnectionSpec) -> Result<(), UpgradeError> {
            self.calls.lock().unwrap().push(format!("cordon:{node_name}"));
            Ok(())
        }
        fn drain(&self, node_name: &str, _conn: &ConnectionSpec, _timeout: Duration) -> Result<(), UpgradeError> {
            self.calls.lock().unwrap().push(format!("drain:{node_name}"));
            Ok(())
        }
        fn swap_binary(&self, node_name: &str, _conn: &ConnectionSpec, _to_version: &str) -> Result<(), UpgradeError> {
            self.calls.lock().unwrap().push(format!("swap:{node_name}"));
            if self.fail_node == Some(node_name) {
                return Err(UpgradeError::StepFailed(node_name.to_string(), "simulated failure".to_string()));
            }
            Ok(())
        }
        fn uncordon(&self, node_name: &str, _conn: &ConnectionSpec) -> Result<(), UpgradeError> {
            self.calls.lock().unwrap().push(format!("uncordon:{node_name}"));
            Ok(())
        }
        fn wait_ready(&self, node_name: &str, _conn: &ConnectionSpec) -> Result<(), UpgradeError> {
            self.calls.lock().unwrap().push(format!("ready:{node_name}"));
            Ok(())
        }
    }

    #[test]
    fn masters_upgrade_before_workers_one_at_a_time() {
        let step = RecordingStep::new(None);
        let masters = vec![target("m1"), target("m2")];
        let workers = vec![target("w1")];
        let report = run_upgrade(&step, &masters, &workers, "1.27.0", "1.27.1", &policy()).unwrap();
        assert_eq!(report.upgraded, vec!["m1", "m2", "w1"]);
        assert!(report.failed.is_empty());
        assert!(!report.rolled_back);
    }

    #[test]
    fn failure_triggers_rollback_of_already_touched_nodes_when_enabled() {
        let step = RecordingStep::new(Some("w2"));
        let masters = vec![target("m1")];
        let workers = vec![target("w1"), target("w2")];
        let report = run_upgrade(&step, &masters, &workers, "1.27.0", "1.27.1", &policy()).unwrap();
        assert!(report.rolled_back);
        assert_eq!(report.upgraded, vec!["m1", "w1"]);
        let calls = step.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c == "swap:m1"));
        assert!(calls.iter().rev().position(|c| c == "uncordon:w1").is_some());
    }

    #[test]
    fn failure_without_auto_rollback_surfaces_as_node_upgrade_failed() {
        let step = RecordingStep::new(Some("w1"));
        let masters: Vec<UpgradeTarget> = vec![];
        let workers = vec![target("w1")];
        let mut p = policy();
        p.auto_rollback = false;
        let err = run_upgrade(&step, &masters, &workers, "1.27.0", "1.27.1", &p).unwrap_err();
        assert!(matches!(err, UpgradeError::NodeUpgradeFailed(n) if n == "w1"));
    }
}
