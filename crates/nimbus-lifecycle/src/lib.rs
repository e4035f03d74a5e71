//! Lifecycle managers (spec.md §4.7): upgrade, autoscaling, backup, cost
//! estimation and hooks. Each manager is independent of the others and of
//! the declarative orchestrator; they read the `Stack`/`Node` state the
//! orchestrator produces but never mutate the `ResourceGraph` directly.

pub mod autoscaling;
pub mod backup;
pub mod cost;
pub mod error;
pub mod hooks;
pub mod upgrade;

pub use autoscaling::{evaluate as evaluate_autoscaling, AutoscalerState, AutoscalingStrategy, MetricsSource, PoolMetrics, ScaleDirection, ScalingDecision};
pub use backup::{create_backup, prune_expired, restore_backup, BackupComponent, BackupStorage, HttpBackupStorage, InMemoryBackupStorage};
pub use cost::{estimate_cluster_cost, estimate_node_cost, ClusterCostEstimate, NodeCostEstimate, PriceTable, SizePrice};
pub use error::{BackupError, HookError, LifecycleError, UpgradeError};
pub use hooks::{context_env_key, trigger_hooks, trigger_hooks_strict, HookAction, HookEvent, HookKind, HookOutcome, HookRunner};
pub use upgrade::{run_upgrade, validate_upgrade_path, RemoteUpgradeStep, RollbackInfo, UpgradeReport, UpgradeStep, UpgradeTarget};
