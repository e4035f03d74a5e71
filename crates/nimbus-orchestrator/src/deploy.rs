//! The `deploy`/`destroy`/`refresh`/`preview` driver (spec.md §4.6).
//!
//! The orchestrator owns the graph, the lease, and the diff; it deliberately
//! does not know how to provision a cloud network or join a Kubernetes node
//! itself — that's `nimbus-providers`/`nimbus-provision`'s job. Callers
//! supply a `ResourceExecutor` that realizes one resource id at a time; the
//! composition root (`nimbus-cli`) is what wires a concrete executor out of
//! `CloudProvider` + `RemoteExecClient` + `nimbus-provision`'s install
//! helpers, keeping this crate free of the concrete HTTP/SSH call surface.

use std::sync::{Arc, Mutex};

use nimbus_types::description::ClusterDescription;
use nimbus_types::graph::ResourceId;
use nimbus_types::node::Node;
use nimbus_types::stack::{Stack, StackOutputs};
use nimbus_types::{AuditEvent, AuditEventType};
use threadpool::ThreadPool;
use uuid::Uuid;

use crate::diff::{diff, ResourcePlan};
use crate::error::OrchestratorError;
use crate::graph::ResourceGraph;
use crate::lease;
use crate::plan::build_desired_graph;
use crate::state::StateBackend;

/// Applies or tears down one resource. Implementations are expected to be
/// idempotent: re-applying an already-realized resource must succeed
/// without duplicating side effects (spec.md §4.6 "re-running deploy is
/// always the recovery path").
pub trait ResourceExecutor: Send + Sync {
    fn apply(&self, id: &ResourceId, graph: &ResourceGraph) -> Result<(), OrchestratorError>;
    fn destroy(&self, id: &ResourceId) -> Result<(), OrchestratorError>;
    /// Re-queries provider-observed state for `id` without changing the
    /// desired graph (spec.md §4.6 `refresh`).
    fn observe(&self, id: &ResourceId) -> Result<(), OrchestratorError>;

    /// Snapshot of every node this executor has realized, for `deploy` to
    /// register onto the `Stack` (spec.md §4.6 step 6). Default is empty:
    /// executors with nothing concrete to report (test doubles, `destroy`'s
    /// teardown-only callers) don't need to implement this.
    fn collect_nodes(&self, _stack_key: &str) -> Vec<Node> {
        Vec::new()
    }

    /// Declared outputs (clusterName, apiEndpoint, kubeConfig,
    /// sshPrivateKey, status, per-node IPs) this executor can report after a
    /// deploy (spec.md §4.6 step 6). Default is empty.
    fn collect_outputs(&self) -> StackOutputs {
        StackOutputs::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub succeeded: Vec<ResourceId>,
    pub failed: Vec<(ResourceId, String)>,
    pub skipped: Vec<ResourceId>,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Number of worker threads for bounded-parallel graph execution, default =
/// logical CPU count (spec.md §4.6 step 5).
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn audit(kind: AuditEventType, action: &str, correlation: Uuid, resource: &ResourceId, failure: Option<&str>) -> AuditEvent {
    let builder = AuditEvent::builder(kind, action, correlation).resource(format!("{:?}", resource.kind), &resource.key);
    match failure {
        Some(reason) => builder.failure(reason).build(),
        None => builder.build(),
    }
}

/// Executes `ids` wave by wave using up to `concurrency` worker threads.
/// A resource whose dependency failed is recorded as `skipped` rather than
/// attempted (spec.md §4.6 "stops the dependent subtree but allows
/// unrelated subtrees to continue").
fn run_waves(
    waves: Vec<Vec<ResourceId>>,
    graph: &ResourceGraph,
    executor: &Arc<dyn ResourceExecutor>,
    concurrency: usize,
    destroy_mode: bool,
    on_checkpoint: &(dyn Fn(&ResourceId) + Sync),
    audit_log: &nimbus_audit::AuditLog,
    correlation: Uuid,
) -> ExecutionReport {
    let pool = ThreadPool::new(concurrency.max(1));
    let report = Arc::new(Mutex::new(ExecutionReport::default()));
    let failed_ancestors: Arc<Mutex<std::collections::HashSet<ResourceId>>> = Arc::new(Mutex::new(std::collections::HashSet::new()));

    for wave in waves {
        let (tx, rx) = std::sync::mpsc::channel();
        let wave_len = wave.len();
        for id in wave {
            let executor = Arc::clone(executor);
            let graph = graph.clone();
            let failed_ancestors = Arc::clone(&failed_ancestors);
            let tx = tx.clone();
            pool.execute(move || {
                let blocked = {
                    let ancestors = failed_ancestors.lock().unwrap();
                    graph
                        .edges_into(&id)
                        .iter()
                        .any(|parent| ancestors.contains(parent))
                };
                if blocked {
                    let _ = tx.send((id, Err("an upstream dependency failed".to_string())));
                    return;
                }
                let result = if destroy_mode { executor.destroy(&id) } else { executor.apply(&id, &graph) };
                let _ = tx.send((id, result.map_err(|e| e.to_string())));
            });
        }
        drop(tx);
        for _ in 0..wave_len {
            let (id, result) = rx.recv().expect("worker channel closed early");
            let mut report = report.lock().unwrap();
            match result {
                Ok(()) => {
                    audit_log.append(audit(AuditEventType::Deployment, if destroy_mode { "destroy_resource" } else { "apply_resource" }, correlation, &id, None));
                    on_checkpoint(&id);
                    report.succeeded.push(id);
                }
                Err(reason) if reason == "an upstream dependency failed" => {
                    report.skipped.push(id);
                }
                Err(reason) => {
                    audit_log.append(audit(AuditEventType::Deployment, if destroy_mode { "destroy_resource" } else { "apply_resource" }, correlation, &id, Some(&reason)));
                    failed_ancestors.lock().unwrap().insert(id.clone());
                    report.failed.push((id, reason));
                }
            }
        }
    }

    Arc::try_unwrap(report).map(|m| m.into_inner().unwrap()).unwrap_or_default()
}

pub struct DeployOptions {
    pub holder: String,
    pub concurrency: usize,
}

impl DeployOptions {
    pub fn new(holder: impl Into<String>) -> Self {
        DeployOptions { holder: holder.into(), concurrency: default_concurrency() }
    }
}

/// Releases the lease unconditionally, then returns `body_result` — unless
/// the body itself succeeded and the release failed, in which case the
/// release error surfaces instead. A body error always wins over a release
/// error: whatever went wrong first is the more useful thing to report.
fn finish_with_lease_release<T>(
    backend: &dyn StateBackend,
    stack_key: &str,
    holder: &str,
    body_result: Result<T, OrchestratorError>,
) -> Result<T, OrchestratorError> {
    let release_result = lease::release(backend, stack_key, holder);
    match (body_result, release_result) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(v), Ok(())) => Ok(v),
    }
}

/// Full `deploy` cycle (spec.md §4.6 steps 1-7).
pub fn deploy(
    backend: &dyn StateBackend,
    stack_key: &str,
    description: &ClusterDescription,
    executor: Arc<dyn ResourceExecutor>,
    audit_log: &nimbus_audit::AuditLog,
    options: DeployOptions,
) -> Result<(Stack, ExecutionReport), OrchestratorError> {
    let correlation = Uuid::new_v4();
    let _lease = lease::acquire(backend, stack_key, &options.holder)?;

    let result = (|| -> Result<(Stack, ExecutionReport), OrchestratorError> {
        let mut stack = backend.read_stack(stack_key)?.ok_or_else(|| OrchestratorError::State(crate::error::StateError::Corrupt(stack_key.to_string(), "stack must be created before deploy".to_string())))?;

        let current_graph = backend.read_graph(stack_key)?;
        let desired_graph = build_desired_graph(description);
        let plan = diff(current_graph.as_ref(), &desired_graph);

        let to_execute: Vec<ResourceId> = plan.creates.iter().chain(plan.updates.iter()).cloned().collect();
        let waves = desired_graph.waves_for(&to_execute)?;

        let checkpoint_stack = Mutex::new(stack.clone());
        let report = run_waves(
            waves,
            &desired_graph,
            &executor,
            options.concurrency,
            false,
            &|_id| {
                let snapshot = checkpoint_stack.lock().unwrap();
                let _ = backend.checkpoint(stack_key, &snapshot);
            },
            audit_log,
            correlation,
        );

        for id in &plan.deletes {
            match executor.destroy(id) {
                Ok(()) => audit_log.append(audit(AuditEventType::Deployment, "delete_resource", correlation, id, None)),
                Err(e) => audit_log.append(audit(AuditEventType::Deployment, "delete_resource", correlation, id, Some(&e.to_string()))),
            }
        }

        backend.write_graph(stack_key, &desired_graph)?;
        if report.is_clean() {
            let collected_nodes = executor.collect_nodes(stack_key);
            if !collected_nodes.is_empty() {
                stack.nodes = collected_nodes;
            }
            let mut outputs = executor.collect_outputs();
            if outputs.cluster_name.is_some() {
                outputs.backup_artifacts = stack.outputs.backup_artifacts.clone();
                stack.outputs = outputs;
            }
        }
        stack.last_reconciled_at = Some(chrono::Utc::now());
        backend.write_stack(stack_key, &stack)?;
        Ok((stack, report))
    })();

    finish_with_lease_release(backend, stack_key, &options.holder, result)
}

/// `preview`: steps 1-4 only, no execution (spec.md §4.6).
pub fn preview(backend: &dyn StateBackend, stack_key: &str, description: &ClusterDescription) -> Result<ResourcePlan, OrchestratorError> {
    let current_graph = backend.read_graph(stack_key)?;
    let desired_graph = build_desired_graph(description);
    Ok(diff(current_graph.as_ref(), &desired_graph))
}

/// `refresh`: re-queries provider-observed state, doesn't change desired
/// state (spec.md §4.6).
pub fn refresh(backend: &dyn StateBackend, stack_key: &str, executor: Arc<dyn ResourceExecutor>, options: DeployOptions) -> Result<ExecutionReport, OrchestratorError> {
    let _lease = lease::acquire(backend, stack_key, &options.holder)?;
    let result = (|| -> Result<ExecutionReport, OrchestratorError> {
        backend.read_stack(stack_key)?.ok_or_else(|| {
            OrchestratorError::State(crate::error::StateError::Corrupt(stack_key.to_string(), "no reconciled stack to refresh".to_string()))
        })?;
        let graph = backend.read_graph(stack_key)?.unwrap_or_default();
        let mut report = ExecutionReport::default();
        for node in graph.nodes() {
            match executor.observe(&node.id) {
                Ok(()) => report.succeeded.push(node.id.clone()),
                Err(e) => report.failed.push((node.id.clone(), e.to_string())),
            }
        }
        Ok(report)
    })();
    finish_with_lease_release(backend, stack_key, &options.holder, result)
}

/// `destroy`: executes in reverse topological order (spec.md §4.6).
pub fn destroy(backend: &dyn StateBackend, stack_key: &str, executor: Arc<dyn ResourceExecutor>, audit_log: &nimbus_audit::AuditLog, options: DeployOptions) -> Result<(Stack, ExecutionReport), OrchestratorError> {
    let correlation = Uuid::new_v4();
    let _lease = lease::acquire(backend, stack_key, &options.holder)?;

    let result = (|| -> Result<(Stack, ExecutionReport), OrchestratorError> {
        let mut stack = backend.read_stack(stack_key)?.ok_or_else(|| {
            OrchestratorError::State(crate::error::StateError::Corrupt(stack_key.to_string(), "no reconciled stack to destroy".to_string()))
        })?;
        let graph = backend.read_graph(stack_key)?.unwrap_or_default();
        let destroy_order = graph.destroy_order()?;
        let waves = graph.waves_for(&destroy_order)?;

        let report = run_waves(waves, &graph, &executor, options.concurrency, true, &|_id| {}, audit_log, correlation);

        if report.is_clean() {
            backend.write_graph(stack_key, &ResourceGraph::default())?;
            stack.nodes.clear();
            let backup_artifacts = stack.outputs.backup_artifacts.clone();
            stack.outputs = StackOutputs { backup_artifacts, ..StackOutputs::default() };
        }
        stack.last_reconciled_at = Some(chrono::Utc::now());
        backend.write_stack(stack_key, &stack)?;
        Ok((stack, report))
    })();

    finish_with_lease_release(backend, stack_key, &options.holder, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateBackend;
    use nimbus_types::description::{BastionSpec, KubernetesSpec, LifecyclePolicies, Metadata, NetworkSpec, NodePool, Role, SecuritySpec};
    use nimbus_types::secrets::SecretsEnvelope;
    use nimbus_types::stack::StackId;
    use nimbus_types::ProviderKind;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingExecutor {
        applied: Mutex<Vec<ResourceId>>,
        fail: Option<ResourceId>,
        observations: AtomicUsize,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            RecordingExecutor { applied: Mutex::new(Vec::new()), fail: None, observations: AtomicUsize::new(0) }
        }

        fn failing(id: ResourceId) -> Self {
            RecordingExecutor { applied: Mutex::new(Vec::new()), fail: Some(id), observations: AtomicUsize::new(0) }
        }
    }

    impl ResourceExecutor for RecordingExecutor {
        fn apply(&self, id: &ResourceId, _graph: &ResourceGraph) -> Result<(), OrchestratorError> {
            if self.fail.as_ref() == Some(id) {
                return Err(OrchestratorError::State(crate::error::StateError::Backend(id.key.clone(), "simulated failure".to_string())));
            }
            self.applied.lock().unwrap().push(id.clone());
            Ok(())
        }

        fn destroy(&self, id: &ResourceId) -> Result<(), OrchestratorError> {
            self.applied.lock().unwrap().retain(|existing| existing != id);
            Ok(())
        }

        fn observe(&self, _id: &ResourceId) -> Result<(), OrchestratorError> {
            self.observations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn description() -> ClusterDescription {
        let mut node_pools = BTreeMap::new();
        node_pools.insert(
            "masters".to_string(),
            NodePool {
                count: 1,
                roles: BTreeSet::from([Role::Master]),
                size: "small".into(),
                image: "ubuntu-22.04".into(),
                provider: ProviderKind::Hetzner,
                region: None,
                labels: BTreeMap::new(),
                taints: Vec::new(),
                spot: false,
                az_distribution: Vec::new(),
            },
        );
        ClusterDescription {
            metadata: Metadata { name: "demo".into(), environment: "dev".into(), owner: None },
            providers: BTreeSet::from([ProviderKind::Hetzner]),
            network: NetworkSpec::default(),
            security: SecuritySpec { bastion: BastionSpec { enabled: false, ..Default::default() }, ..Default::default() },
            node_pools,
            kubernetes: KubernetesSpec { distribution: "rke2".into(), version: "v1.29.0".into(), token: None, cni: "canal".into(), snapshot_schedule: None, high_availability: false },
            addons: Vec::new(),
            lifecycle: LifecyclePolicies::default(),
        }
    }

    fn seed_stack(backend: &InMemoryStateBackend, stack_key: &str) {
        backend.write_stack(stack_key, &Stack::new(StackId::new("acme", "infra", "demo"), SecretsEnvelope::default())).unwrap();
    }

    #[test]
    fn first_deploy_creates_every_resource() {
        let backend = InMemoryStateBackend::new();
        seed_stack(&backend, "acme/infra/demo");
        let audit_log = nimbus_audit::AuditLog::new(100);
        let executor = Arc::new(RecordingExecutor::new());
        let (_, report) = deploy(&backend, "acme/infra/demo", &description(), executor.clone(), &audit_log, DeployOptions::new("op1")).unwrap();
        assert!(report.is_clean());
        assert!(!executor.applied.lock().unwrap().is_empty());
        assert!(backend.read_graph("acme/infra/demo").unwrap().is_some());
    }

    #[test]
    fn second_deploy_with_no_changes_applies_nothing() {
        let backend = InMemoryStateBackend::new();
        seed_stack(&backend, "acme/infra/demo");
        let audit_log = nimbus_audit::AuditLog::new(100);
        let executor = Arc::new(RecordingExecutor::new());
        deploy(&backend, "acme/infra/demo", &description(), executor.clone(), &audit_log, DeployOptions::new("op1")).unwrap();
        let first_count = executor.applied.lock().unwrap().len();
        let (_, report) = deploy(&backend, "acme/infra/demo", &description(), executor.clone(), &audit_log, DeployOptions::new("op1")).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.succeeded.len(), 0);
        assert_eq!(executor.applied.lock().unwrap().len(), first_count);
    }

    #[test]
    fn failed_resource_blocks_its_dependents_but_not_siblings() {
        let backend = InMemoryStateBackend::new();
        seed_stack(&backend, "acme/infra/demo");
        let audit_log = nimbus_audit::AuditLog::new(100);
        let network_id = ResourceId::new(nimbus_types::ResourceKind::Network, "overlay");
        let executor = Arc::new(RecordingExecutor::failing(network_id));
        let (_, report) = deploy(&backend, "acme/infra/demo", &description(), executor, &audit_log, DeployOptions::new("op1")).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(!report.skipped.is_empty());
    }

    #[test]
    fn preview_reports_the_plan_without_touching_state() {
        let backend = InMemoryStateBackend::new();
        seed_stack(&backend, "acme/infra/demo");
        let plan = preview(&backend, "acme/infra/demo", &description()).unwrap();
        assert!(!plan.is_empty());
        assert!(backend.read_graph("acme/infra/demo").unwrap().is_none());
    }

    #[test]
    fn destroy_clears_the_reconciled_graph_on_success() {
        let backend = InMemoryStateBackend::new();
        seed_stack(&backend, "acme/infra/demo");
        let audit_log = nimbus_audit::AuditLog::new(100);
        let executor = Arc::new(RecordingExecutor::new());
        deploy(&backend, "acme/infra/demo", &description(), executor.clone(), &audit_log, DeployOptions::new("op1")).unwrap();
        let (_, report) = destroy(&backend, "acme/infra/demo", executor, &audit_log, DeployOptions::new("op1")).unwrap();
        assert!(report.is_clean());
        assert!(backend.read_graph("acme/infra/demo").unwrap().unwrap().is_empty());
    }

    #[test]
    fn refresh_observes_every_reconciled_node_without_changing_the_graph() {
        let backend = InMemoryStateBackend::new();
        seed_stack(&backend, "acme/infra/demo");
        let audit_log = nimbus_audit::AuditLog::new(100);
        let executor = Arc::new(RecordingExecutor::new());
        deploy(&backend, "acme/infra/demo", &description(), executor.clone(), &audit_log, DeployOptions::new("op1")).unwrap();
        let before = backend.read_graph("acme/infra/demo").unwrap();
        let report = refresh(&backend, "acme/infra/demo", executor.clone(), DeployOptions::new("op1")).unwrap();
        assert!(report.is_clean());
        assert_eq!(executor.observations.load(Ordering::SeqCst), before.unwrap().nodes().len());
    }
}
