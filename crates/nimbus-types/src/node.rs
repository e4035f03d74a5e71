//! `Node` — runtime entity (spec.md §3). Exclusively owned by the
//! Declarative Orchestrator until `Ready`, then co-read by Lifecycle
//! Managers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::description::{ProviderKind, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Planned,
    Created,
    BootPending,
    BootReady,
    Joining,
    Ready,
    Draining,
    Cordoned,
    Upgrading,
    Failed,
    Deleted,
}

impl NodeStatus {
    /// Whether `self -> next` is a legal post-boot state-machine edge
    /// (spec.md §4.4). `Failed` is reachable from any pre-`Ready` state.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        if next == Failed {
            return !matches!(self, Ready | Deleted);
        }
        matches!(
            (self, next),
            (Planned, Created)
                | (Created, BootPending)
                | (BootPending, BootReady)
                | (BootReady, Joining)
                | (Joining, Ready)
                | (Ready, Draining)
                | (Draining, Cordoned)
                | (Cordoned, Upgrading)
                | (Upgrading, Ready)
                | (Failed, Created) // re-tried
                | (_, Deleted)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeAddresses {
    pub public_ipv4: Option<String>,
    pub private_ipv4: Option<String>,
    pub vpn_ipv4: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub stack: String,
    pub name: String,
    pub provider: ProviderKind,
    pub region: String,
    pub size: String,
    pub image: String,
    pub roles: BTreeSet<Role>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<String>,
    #[serde(default)]
    pub addresses: NodeAddresses,
    pub status: NodeStatus,
    pub owning_pool: String,
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the desired config, used for idempotent re-deploys.
    pub fingerprint: String,
}

impl Node {
    pub fn identity(&self) -> (String, String) {
        (self.stack.clone(), self.name.clone())
    }

    pub fn is_master(&self) -> bool {
        self.roles.contains(&Role::Master)
    }

    pub fn transition(&mut self, next: NodeStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "illegal node transition {:?} -> {:?} for node '{}'",
                self.status, next, self.name
            ));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_allowed() {
        assert!(NodeStatus::Planned.can_transition_to(NodeStatus::Created));
        assert!(NodeStatus::Created.can_transition_to(NodeStatus::BootPending));
        assert!(NodeStatus::Joining.can_transition_to(NodeStatus::Ready));
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(!NodeStatus::Planned.can_transition_to(NodeStatus::Ready));
        assert!(!NodeStatus::Ready.can_transition_to(NodeStatus::Created));
    }

    #[test]
    fn failed_reachable_from_any_pre_ready_state() {
        assert!(NodeStatus::BootPending.can_transition_to(NodeStatus::Failed));
        assert!(NodeStatus::Joining.can_transition_to(NodeStatus::Failed));
        assert!(!NodeStatus::Ready.can_transition_to(NodeStatus::Failed));
    }
}
