//! `nimbus` binary: clap-derived stack-first CLI (spec.md §6). Thin
//! dispatch layer over `nimbus_orchestrator`/`nimbus_lifecycle`/
//! `nimbus_providers`; the composition of a concrete `ResourceExecutor`
//! lives in `executor.rs`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use nimbus_audit::AuditLog;
use nimbus_cli::backup::{ClusterConfigComponent, EtcdSnapshotComponent, SecretsEnvelopeComponent};
use nimbus_cli::config::{self, provider_token_env};
use nimbus_cli::error::EngineError;
use nimbus_cli::executor::LiveResourceExecutor;
use nimbus_cli::hooks::{resolve_hooks, RemoteHookRunner};
use nimbus_cli::notify::{self, Notification};
use nimbus_lifecycle::{
    estimate_cluster_cost, evaluate_autoscaling, run_upgrade, trigger_hooks, trigger_hooks_strict, AutoscalerState, BackupComponent, HookEvent, PoolMetrics, PriceTable,
    RemoteUpgradeStep, ScaleDirection, UpgradeTarget,
};
use nimbus_orchestrator::{deploy, destroy, lease, preview, refresh, DeployOptions, HttpStateBackend, ProviderRegistry, StateBackend};
use nimbus_remote::{BastionJump, ConnectionSpec, RemoteExecClient};
use nimbus_types::node::Node;
use nimbus_types::secrets::SecretsEnvelope;
use nimbus_types::stack::{Stack, StackId};

#[derive(Parser)]
#[command(name = "nimbus", about = "Declarative multi-cloud Kubernetes cluster lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stack lifecycle: create, list, inspect, select.
    Stacks {
        #[command(subcommand)]
        action: StacksCommand,
    },
    /// Full reconciliation: creates/updates the declared resources.
    Deploy {
        stack: Option<String>,
        #[arg(long)]
        config: PathBuf,
    },
    /// Tears down every resource in reverse topological order.
    Destroy {
        stack: Option<String>,
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        force: bool,
        /// Original config, so `pre_cluster_destroy` hooks declared in it
        /// still fire; omit to destroy a stack whose config is gone.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Dry-run: reports the plan without executing it.
    Preview {
        stack: Option<String>,
        #[arg(long)]
        config: PathBuf,
    },
    /// Re-observes provider state without changing the desired graph.
    Refresh {
        stack: Option<String>,
        #[arg(long)]
        yes: bool,
    },
    /// Reports the last-reconciled stack state.
    Status {
        stack: Option<String>,
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Writes the cluster's kubeconfig to stdout.
    Kubeconfig { stack: Option<String> },
    /// Runs `kubectl` against the cluster's recorded API endpoint.
    Kubectl {
        stack: Option<String>,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Runs `salt` against the bastion's Salt master.
    Salt {
        stack: Option<String>,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Node-level views of the last-reconciled stack.
    Nodes {
        #[command(subcommand)]
        action: NodesCommand,
    },
    /// Rolling Kubernetes version upgrade.
    Upgrade {
        stack: Option<String>,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "rolling")]
        strategy: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarizes lease state and the audit log's recent failure rate.
    Health { stack: Option<String> },
    /// Estimates the monthly/yearly cost of a cluster description.
    Cost {
        #[arg(long)]
        config: PathBuf,
    },
    /// Reports what each autoscaling-enabled pool would do against a
    /// read utilization, without changing the deployed node count.
    Autoscale {
        stack: Option<String>,
        #[arg(long)]
        config: PathBuf,
    },
    /// Snapshot/restore of etcd, the cluster config, and sealed secrets.
    Backup {
        #[command(subcommand)]
        action: BackupCommand,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    Create {
        stack: Option<String>,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        bucket: String,
        #[arg(long, default_value = "nimbus")]
        prefix: String,
    },
    Prune {
        stack: Option<String>,
        #[arg(long)]
        bucket: String,
    },
}

#[derive(Subcommand)]
enum StacksCommand {
    Create {
        name: String,
        #[arg(long, default_value = "default")]
        organization: String,
        #[arg(long, default_value = "default")]
        project: String,
    },
    List,
    Info { stack: String },
    Output { stack: String },
    Delete { stack: String },
    Rename { stack: String, to: String },
    Cancel { stack: String },
    Export { stack: String },
    Select { stack: String },
    Current,
}

#[derive(Subcommand)]
enum NodesCommand {
    List { stack: Option<String> },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("nimbus: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(command: Command) -> Result<(), EngineError> {
    match command {
        Command::Stacks { action } => run_stacks(action),
        Command::Deploy { stack, config } => cmd_deploy(stack, config),
        Command::Destroy { stack, yes, force, config } => cmd_destroy(stack, yes, force, config),
        Command::Preview { stack, config } => cmd_preview(stack, config),
        Command::Refresh { stack, yes } => cmd_refresh(stack, yes),
        Command::Status { stack, format } => cmd_status(stack, format),
        Command::Kubeconfig { stack } => cmd_kubeconfig(stack),
        Command::Kubectl { stack, args } => cmd_kubectl(stack, args),
        Command::Salt { stack, args } => cmd_salt(stack, args),
        Command::Nodes { action } => run_nodes(action),
        Command::Upgrade { stack, config, to, strategy, dry_run } => cmd_upgrade(stack, config, to, strategy, dry_run),
        Command::Health { stack } => cmd_health(stack),
        Command::Cost { config } => cmd_cost(config),
        Command::Autoscale { stack, config } => cmd_autoscale(stack, config),
        Command::Backup { action } => run_backup(action),
    }
}

fn backend() -> Result<HttpStateBackend, EngineError> {
    Ok(HttpStateBackend::new(config::state_backend_url()?))
}

fn holder() -> String {
    std::env::var("USER").unwrap_or_else(|_| "nimbus".to_string())
}

fn resolve(stack: Option<String>) -> Result<String, EngineError> {
    config::resolve_stack_key(stack.as_deref())
}

fn run_stacks(action: StacksCommand) -> Result<(), EngineError> {
    let backend = backend()?;
    match action {
        StacksCommand::Create { name, organization, project } => {
            let id = StackId::new(organization, project, name);
            let stack_key = id.path_prefix();
            // Real secret sealing (SecretsEnvelope::seal against the cluster
            // token/SSH key/cloud tokens) happens once those exist at deploy
            // time; a freshly created stack starts with an empty envelope.
            backend.write_stack(&stack_key, &Stack::new(id, SecretsEnvelope::default()))?;
            config::write_current_stack(&stack_key)?;
            println!("created stack '{stack_key}'");
            Ok(())
        }
        StacksCommand::List => {
            println!("stack listing requires an index the backend does not expose standalone; use `stacks info <stack>` with a known key");
            Ok(())
        }
        StacksCommand::Info { stack } => {
            let stack = backend.read_stack(&stack)?.ok_or(EngineError::NoStackSelected)?;
            println!("{stack:#?}");
            Ok(())
        }
        StacksCommand::Output { stack } => {
            let stack = backend.read_stack(&stack)?.ok_or(EngineError::NoStackSelected)?;
            println!("{}", serde_json::to_string_pretty(&stack.outputs).unwrap_or_default());
            Ok(())
        }
        StacksCommand::Delete { stack } => {
            lease::force_cancel(&backend, &stack)?;
            println!("stack '{stack}' lease cleared; remove its backend blob out of band to fully delete");
            Ok(())
        }
        StacksCommand::Rename { stack, to } => {
            let mut current = backend.read_stack(&stack)?.ok_or(EngineError::NoStackSelected)?;
            current.id.stack = to.clone();
            let new_key = current.id.path_prefix();
            backend.write_stack(&new_key, &current)?;
            println!("stack '{stack}' renamed to '{new_key}'; old key retains its last blob");
            Ok(())
        }
        StacksCommand::Cancel { stack } => {
            lease::force_cancel(&backend, &stack)?;
            println!("lease on '{stack}' forcibly cleared");
            Ok(())
        }
        StacksCommand::Export { stack } => {
            let stack = backend.read_stack(&stack)?.ok_or(EngineError::NoStackSelected)?;
            println!("{}", serde_json::to_string_pretty(&stack).unwrap_or_default());
            Ok(())
        }
        StacksCommand::Select { stack } => {
            config::write_current_stack(&stack)?;
            println!("selected stack '{stack}'");
            Ok(())
        }
        StacksCommand::Current => {
            match config::read_current_stack() {
                Some(s) => println!("{s}"),
                None => println!("no stack selected"),
            }
            Ok(())
        }
    }
}

fn live_executor(stack_key: &str, description: &nimbus_types::description::ClusterDescription) -> Result<Arc<LiveResourceExecutor>, EngineError> {
    for provider in &description.providers {
        let _ = config::require_env(provider_token_env(*provider));
    }
    let providers = Arc::new(ProviderRegistry::new());
    let remote: Arc<dyn nimbus_remote::RemoteExecClient> = Arc::new(nimbus_remote::SshRemoteExecClient::new());
    Ok(Arc::new(LiveResourceExecutor::new(description.clone(), stack_key.to_string(), providers, remote, ssh_key_path(stack_key))))
}

fn ssh_key_path(stack_key: &str) -> PathBuf {
    config::nimbus_home().join(format!("{}.pem", stack_key.replace('/', "_")))
}

/// Builds a `ConnectionSpec` to `node`, proxy-jumping through the stack's
/// bastion the same way `LiveResourceExecutor::conn_for` does, for callers
/// (hooks, upgrade) that run outside the orchestrator's own executor.
fn node_conn(node: &Node, stack: &Stack, description: &nimbus_types::description::ClusterDescription, key_path: &Path) -> Option<ConnectionSpec> {
    let host = node.addresses.vpn_ipv4.clone().or_else(|| node.addresses.private_ipv4.clone())?;
    let bastion = if description.security.bastion.enabled {
        stack.nodes.iter().find(|n| n.name.ends_with("bastion")).and_then(|b| b.addresses.public_ipv4.clone()).map(|host| BastionJump {
            host,
            port: description.security.bastion.ssh_port,
            ssh_user: "root".to_string(),
            private_key_path: key_path.to_path_buf(),
        })
    } else {
        None
    };
    Some(ConnectionSpec {
        host,
        port: 22,
        ssh_user: node.provider.ssh_user().to_string(),
        private_key_path: key_path.to_path_buf(),
        bastion,
        dial_error_limit: nimbus_remote::DEFAULT_DIAL_ERROR_LIMIT,
    })
}

fn control_plane_conn(stack: &Stack, description: &nimbus_types::description::ClusterDescription, key_path: &Path) -> Option<ConnectionSpec> {
    node_conn(stack.nodes.iter().find(|n| n.is_master())?, stack, description, key_path)
}

/// Fires every hook matching `event`, logging each outcome; one hook
/// failing never stops the others, matching `trigger_hooks`' own contract.
fn run_hooks_best_effort(stack: &Stack, description: &nimbus_types::description::ClusterDescription, event: HookEvent, stack_key: &str) {
    let actions = resolve_hooks(&description.lifecycle.hooks);
    if actions.is_empty() {
        return;
    }
    let remote: Arc<dyn RemoteExecClient> = Arc::new(nimbus_remote::SshRemoteExecClient::new());
    let runner = RemoteHookRunner { client: remote.as_ref(), control_plane_conn: control_plane_conn(stack, description, &ssh_key_path(stack_key)) };
    let mut context = std::collections::BTreeMap::new();
    context.insert("stack".to_string(), stack_key.to_string());
    context.insert("cluster_name".to_string(), description.metadata.name.clone());
    for outcome in trigger_hooks(&runner, &actions, event, &context) {
        if outcome.succeeded {
            log::info!("hook '{}' succeeded after {} attempt(s)", outcome.name, outcome.attempts);
        } else {
            log::warn!("hook '{}' failed after {} attempt(s): {}", outcome.name, outcome.attempts, outcome.error.unwrap_or_default());
        }
    }
}

fn cmd_deploy(stack: Option<String>, config_path: PathBuf) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let description = config::load_description(&config_path)?;
    let backend = backend()?;
    let executor = live_executor(&stack_key, &description)?;
    let audit_log = AuditLog::default();
    let result = deploy(&backend, &stack_key, &description, executor, &audit_log, DeployOptions::new(holder()));
    match &result {
        Ok((_, report)) if report.is_clean() => notify::notify_best_effort(Notification::success(&stack_key, "deploy")),
        Ok((_, report)) => notify::notify_best_effort(Notification::failure(&stack_key, "deploy", &format!("{} resources failed", report.failed.len()))),
        Err(e) => notify::notify_best_effort(Notification::failure(&stack_key, "deploy", &e.to_string())),
    }
    let (stack, report) = result?;
    println!("deploy complete: {} succeeded, {} failed, {} skipped", report.succeeded.len(), report.failed.len(), report.skipped.len());
    if !report.is_clean() {
        return Err(nimbus_orchestrator::OrchestratorError::Graph(nimbus_orchestrator::GraphError::Cycle(format!("{} resources failed to apply", report.failed.len()))).into());
    }
    run_hooks_best_effort(&stack, &description, HookEvent::PostClusterReady, &stack_key);
    Ok(())
}

fn cmd_destroy(stack: Option<String>, yes: bool, force: bool, config_path: Option<PathBuf>) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    if !yes {
        return Err(EngineError::MissingEnv("--yes (destroy requires explicit confirmation)".to_string()));
    }
    let backend = backend()?;
    if force {
        lease::force_cancel(&backend, &stack_key)?;
    }
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let description = match &config_path {
        Some(p) => config::load_description(p)?,
        None => minimal_description_for(&stack),
    };
    if !description.lifecycle.hooks.is_empty() {
        let actions = resolve_hooks(&description.lifecycle.hooks);
        let remote: Arc<dyn RemoteExecClient> = Arc::new(nimbus_remote::SshRemoteExecClient::new());
        let runner = RemoteHookRunner { client: remote.as_ref(), control_plane_conn: control_plane_conn(&stack, &description, &ssh_key_path(&stack_key)) };
        let mut context = std::collections::BTreeMap::new();
        context.insert("stack".to_string(), stack_key.clone());
        context.insert("cluster_name".to_string(), description.metadata.name.clone());
        trigger_hooks_strict(&runner, &actions, HookEvent::PreClusterDestroy, &context)?;
    }
    let executor = live_executor(&stack_key, &description)?;
    let audit_log = AuditLog::default();
    let (_, report) = destroy(&backend, &stack_key, executor, &audit_log, DeployOptions::new(holder()))?;
    println!("destroy complete: {} succeeded, {} failed", report.succeeded.len(), report.failed.len());
    notify::notify_best_effort(if report.is_clean() { Notification::success(&stack_key, "destroy") } else { Notification::failure(&stack_key, "destroy", "some resources failed to tear down") });
    Ok(())
}

fn cmd_preview(stack: Option<String>, config_path: PathBuf) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let description = config::load_description(&config_path)?;
    let backend = backend()?;
    let plan = preview(&backend, &stack_key, &description)?;
    println!("{} creates, {} updates, {} deletes, {} unchanged", plan.creates.len(), plan.updates.len(), plan.deletes.len(), plan.unchanged.len());
    for id in plan.creates.iter().chain(plan.updates.iter()) {
        println!("  + {id}");
    }
    for id in &plan.deletes {
        println!("  - {id}");
    }
    Ok(())
}

fn cmd_refresh(stack: Option<String>, yes: bool) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    if !yes {
        return Err(EngineError::MissingEnv("--yes (refresh re-queries every provider)".to_string()));
    }
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let graph = backend.read_graph(&stack_key)?.unwrap_or_default();
    let _ = &graph;
    let description = minimal_description_for(&stack);
    let executor = live_executor(&stack_key, &description)?;
    let report = refresh(&backend, &stack_key, executor, DeployOptions::new(holder()))?;
    println!("refresh complete: {} observed, {} failed", report.succeeded.len(), report.failed.len());
    Ok(())
}

fn minimal_description_for(stack: &Stack) -> nimbus_types::description::ClusterDescription {
    nimbus_types::description::ClusterDescription {
        metadata: nimbus_types::description::Metadata { name: stack.id.stack.clone(), environment: "unknown".to_string(), owner: None },
        providers: Default::default(),
        network: Default::default(),
        security: Default::default(),
        node_pools: Default::default(),
        kubernetes: nimbus_types::description::KubernetesSpec { distribution: "rke2".to_string(), version: "v0.0.0".to_string(), token: None, cni: "canal".to_string(), snapshot_schedule: None, high_availability: false },
        addons: Default::default(),
        lifecycle: Default::default(),
    }
}

fn cmd_status(stack: Option<String>, format: Format) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&stack).unwrap_or_default()),
        Format::Yaml => println!("{}", serde_yaml::to_string(&stack).unwrap_or_default()),
        Format::Table => print_status_table(&stack),
    }
    Ok(())
}

fn print_status_table(stack: &Stack) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct Row {
        node: String,
        status: String,
        vpn_ip: String,
    }
    let rows: Vec<Row> = stack
        .nodes
        .iter()
        .map(|n| Row { node: n.name.clone(), status: format!("{:?}", n.status), vpn_ip: n.addresses.vpn_ipv4.clone().unwrap_or_default() })
        .collect();
    if rows.is_empty() {
        println!("stack '{}': no reconciled nodes", stack.id);
    } else {
        println!("{}", Table::new(rows));
    }
    println!("locked: {}", stack.is_locked());
}

fn cmd_kubeconfig(stack: Option<String>) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    match stack.outputs.kube_config {
        Some(kubeconfig) => {
            println!("{kubeconfig}");
            Ok(())
        }
        None => Err(EngineError::ReadDescription(stack_key, "stack has not been deployed; no kubeconfig recorded".to_string())),
    }
}

fn cmd_kubectl(stack: Option<String>, args: Vec<String>) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let kubeconfig = stack.outputs.kube_config.ok_or_else(|| EngineError::ReadDescription(stack_key.clone(), "no kubeconfig recorded for this stack".to_string()))?;
    let path = config::nimbus_home().join(format!("{}.kubeconfig", stack_key.replace('/', "_")));
    std::fs::create_dir_all(config::nimbus_home())?;
    std::fs::write(&path, kubeconfig)?;
    run_passthrough("kubectl", &["--kubeconfig".to_string(), path.display().to_string()], &args)
}

fn cmd_salt(stack: Option<String>, args: Vec<String>) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let bastion_ip = stack
        .nodes
        .iter()
        .find(|n| n.name.ends_with("bastion"))
        .and_then(|n| n.addresses.public_ipv4.clone())
        .ok_or_else(|| EngineError::ReadDescription(stack_key, "no bastion recorded for this stack".to_string()))?;
    run_passthrough("ssh", &[bastion_ip, "salt".to_string()], &args)
}

/// Forwards to a real local binary (spec.md §6 "remote commands produce a
/// single terminal string"); callers get the subprocess's own exit code
/// mapped onto this crate's scheme rather than us re-interpreting stdout.
fn run_passthrough(program: &str, fixed_args: &[String], trailing: &[String]) -> Result<(), EngineError> {
    let status = std::process::Command::new(program).args(fixed_args).args(trailing).status().map_err(EngineError::Io)?;
    if status.success() {
        Ok(())
    } else {
        Err(EngineError::ReadDescription(program.to_string(), format!("exited with status {status}")))
    }
}

fn run_nodes(action: NodesCommand) -> Result<(), EngineError> {
    match action {
        NodesCommand::List { stack } => {
            let stack_key = resolve(stack)?;
            let backend = backend()?;
            let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
            for node in &stack.nodes {
                println!("{:<20} {:<10?} {}", node.name, node.status, node.addresses.vpn_ipv4.clone().unwrap_or_default());
            }
            Ok(())
        }
    }
}

fn cmd_upgrade(stack: Option<String>, config_path: PathBuf, to: String, strategy: String, dry_run: bool) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let description = config::load_description(&config_path)?;
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let current_version = description.kubernetes.version.clone();
    nimbus_lifecycle::validate_upgrade_path(&current_version, &to)?;
    println!("upgrade path {current_version} -> {to} ({strategy}) is valid");
    if dry_run {
        println!("dry run: no nodes touched");
        return Ok(());
    }

    let key_path = ssh_key_path(&stack_key);
    let masters: Vec<UpgradeTarget> = stack
        .nodes
        .iter()
        .filter(|n| n.is_master())
        .filter_map(|n| Some(UpgradeTarget { name: &n.name, conn: node_conn(n, &stack, &description, &key_path)?, is_master: true }))
        .collect();
    let workers: Vec<UpgradeTarget> = stack
        .nodes
        .iter()
        .filter(|n| !n.is_master() && n.name != "bastion")
        .filter_map(|n| Some(UpgradeTarget { name: &n.name, conn: node_conn(n, &stack, &description, &key_path)?, is_master: false }))
        .collect();
    if masters.is_empty() {
        return Err(EngineError::ReadDescription(stack_key, "no master node has a known address to upgrade".to_string()));
    }

    let remote: Arc<dyn RemoteExecClient> = Arc::new(nimbus_remote::SshRemoteExecClient::new());
    let step = RemoteUpgradeStep {
        client: remote.as_ref(),
        distribution: &description.kubernetes.distribution,
        readiness_command: "kubectl get nodes --no-headers | grep -v NotReady",
    };
    let mut policy = description.lifecycle.upgrade.clone();
    policy.strategy = strategy;

    let report = run_upgrade(&step, &masters, &workers, &current_version, &to, &policy)?;
    println!("upgrade complete: {} upgraded, {} failed, rolled_back={}", report.upgraded.len(), report.failed.len(), report.rolled_back);
    for (node, err) in &report.failed {
        println!("  ! {node}: {err}");
    }
    if !report.failed.is_empty() && !report.rolled_back {
        return Err(nimbus_lifecycle::UpgradeError::NodeUpgradeFailed(report.failed[0].0.clone()).into());
    }
    run_hooks_best_effort(&stack, &description, HookEvent::PostUpgrade, &stack_key);
    Ok(())
}

fn cmd_health(stack: Option<String>) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let ready = stack.nodes.iter().filter(|n| matches!(n.status, nimbus_types::node::NodeStatus::Ready)).count();
    println!("stack '{}': {}/{} nodes ready, locked={}", stack.id, ready, stack.nodes.len(), stack.is_locked());
    if let Some(at) = stack.last_reconciled_at {
        println!("last reconciled at {at}");
    }
    Ok(())
}

fn cmd_cost(config_path: PathBuf) -> Result<(), EngineError> {
    let description = config::load_description(&config_path)?;
    let table = PriceTable::default_price_table();
    let estimate = estimate_cluster_cost(&description, &table);
    for node in &estimate.nodes {
        println!(
            "{:<20} x{:<3} ${:>10.2}/mo  (${:>12.2}/yr){}",
            node.pool,
            node.count,
            node.monthly_usd,
            node.yearly_usd,
            if node.priced { "" } else { "  [unpriced]" }
        );
    }
    println!("load balancer:       ${:>10.2}/mo", estimate.load_balancer_monthly_usd);
    println!("total:                ${:>10.2}/mo  (${:>12.2}/yr)", estimate.total_monthly_usd, estimate.total_yearly_usd);
    for recommendation in &estimate.recommendations {
        println!("  * {recommendation}");
    }
    Ok(())
}

/// Reads `kubectl top nodes` through the bastion/control plane and averages
/// the CPU% column across every node whose name is owned by `pool`.
fn read_pool_utilization(remote: &dyn RemoteExecClient, conn: &ConnectionSpec, pool: &str) -> Option<f64> {
    let cmd = format!(
        "kubectl top nodes --no-headers | awk '$1 ~ /^{pool}-/ {{gsub(\"%\", \"\", $3); sum += $3; n++}} END {{if (n > 0) print sum / n; else print -1}}'"
    );
    let out = remote.run(conn, &cmd, nimbus_remote::VALIDATION_TIMEOUT).ok()?;
    if !out.success() {
        return None;
    }
    let value: f64 = out.stdout.trim().parse().ok()?;
    if value < 0.0 {
        None
    } else {
        Some(value)
    }
}

fn cmd_autoscale(stack: Option<String>, config_path: PathBuf) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let description = config::load_description(&config_path)?;
    if !description.lifecycle.autoscaling.enabled {
        println!("autoscaling is not enabled in this cluster description");
        return Ok(());
    }
    let backend = backend()?;
    let stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let key_path = ssh_key_path(&stack_key);
    let conn = control_plane_conn(&stack, &description, &key_path)
        .ok_or_else(|| EngineError::ReadDescription(stack_key.clone(), "no reachable master to read pool metrics from".to_string()))?;
    let remote: Arc<dyn RemoteExecClient> = Arc::new(nimbus_remote::SshRemoteExecClient::new());
    let mut state = AutoscalerState::new();
    let now = Instant::now();
    for (pool_name, pool) in description.worker_pools() {
        let current_count = stack.nodes.iter().filter(|n| &n.owning_pool == pool_name).count() as u32;
        let current_count = if current_count > 0 { current_count } else { pool.count };
        let utilization_percent = read_pool_utilization(remote.as_ref(), &conn, pool_name).unwrap_or(0.0);
        let metrics = PoolMetrics { current_count, utilization_percent };
        let decision = evaluate_autoscaling(pool_name, &description.lifecycle.autoscaling, metrics, &mut state, now);
        match decision.direction {
            ScaleDirection::Hold => println!("pool '{pool_name}': hold at {} (utilization {:.1}%)", decision.from_count, utilization_percent),
            _ => println!(
                "pool '{pool_name}': {:?} {} -> {} (utilization {:.1}%); update node_pools.{pool_name}.count and redeploy to apply",
                decision.direction, decision.from_count, decision.to_count, utilization_percent
            ),
        }
    }
    Ok(())
}

fn run_backup(action: BackupCommand) -> Result<(), EngineError> {
    match action {
        BackupCommand::Create { stack, config, bucket, prefix } => cmd_backup_create(stack, config, bucket, prefix),
        BackupCommand::Prune { stack, bucket } => cmd_backup_prune(stack, bucket),
    }
}

fn cmd_backup_create(stack: Option<String>, config_path: PathBuf, bucket: String, prefix: String) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let description = config::load_description(&config_path)?;
    let backend = backend()?;
    let mut stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let key_path = ssh_key_path(&stack_key);
    let conn = control_plane_conn(&stack, &description, &key_path)
        .ok_or_else(|| EngineError::ReadDescription(stack_key.clone(), "no reachable master to snapshot etcd from".to_string()))?;
    let remote: Arc<dyn RemoteExecClient> = Arc::new(nimbus_remote::SshRemoteExecClient::new());

    let etcd = EtcdSnapshotComponent { client: remote.as_ref(), conn, distribution: description.kubernetes.distribution.clone() };
    let config_component = ClusterConfigComponent::new(&description);
    let secrets_component = SecretsEnvelopeComponent::new(&stack.secrets);
    let components: Vec<&dyn BackupComponent> = vec![&etcd, &config_component, &secrets_component];

    let storage = nimbus_lifecycle::HttpBackupStorage::new(config::backup_storage_url()?);
    let artifact = nimbus_lifecycle::create_backup(&components, &storage, &description.lifecycle.backup, &bucket, &prefix)?;
    println!("backup '{}' created at '{}' ({} bytes, retained until {})", artifact.id, artifact.storage_locator, artifact.size_bytes, artifact.retention_deadline);

    stack.outputs.backup_artifacts.push(artifact);
    backend.write_stack(&stack_key, &stack)?;
    Ok(())
}

fn cmd_backup_prune(stack: Option<String>, bucket: String) -> Result<(), EngineError> {
    let stack_key = resolve(stack)?;
    let backend = backend()?;
    let mut stack = backend.read_stack(&stack_key)?.ok_or(EngineError::NoStackSelected)?;
    let storage = nimbus_lifecycle::HttpBackupStorage::new(config::backup_storage_url()?);
    let bucket_prefix = format!("{}/", bucket.trim_matches('/'));
    let candidates: Vec<_> = stack.outputs.backup_artifacts.iter().filter(|a| a.storage_locator.starts_with(&bucket_prefix)).cloned().collect();
    let removed = nimbus_lifecycle::prune_expired(&candidates, &storage)?;
    stack.outputs.backup_artifacts.retain(|a| !removed.contains(&a.storage_locator));
    backend.write_stack(&stack_key, &stack)?;
    println!("pruned {} expired backup artifact(s)", removed.len());
    for locator in &removed {
        println!("  - {locator}");
    }
    Ok(())
}
