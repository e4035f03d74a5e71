//! The declarative orchestrator (spec.md §4.6): owns the `ResourceGraph`,
//! the stack lease, and the `deploy`/`destroy`/`refresh`/`preview` cycle.
//! Delegates the actual cloud/SSH/install call surface to a
//! caller-supplied `ResourceExecutor` so this crate stays a pure
//! scheduling-and-bookkeeping layer.

pub mod deploy;
pub mod diff;
pub mod error;
pub mod graph;
pub mod lease;
pub mod plan;
pub mod providers;
pub mod state;

pub use deploy::{default_concurrency, deploy, destroy, preview, refresh, DeployOptions, ExecutionReport, ResourceExecutor};
pub use diff::{diff as diff_graphs, ResourcePlan};
pub use error::{GraphError, LeaseError, OrchestratorError, StateError};
pub use graph::{ResourceGraph, ResourceNode};
pub use plan::build_desired_graph;
pub use providers::ProviderRegistry;
pub use state::{HttpStateBackend, InMemoryStateBackend, StateBackend};
