//! Hook engine (spec.md §4.7): user-registered actions fired on lifecycle
//! events, sorted by priority, each bounded by its own timeout and retried
//! up to its own limit. One hook failing never stops the rest from running.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PostNodeCreate,
    PreNodeDelete,
    PostClusterReady,
    PreClusterDestroy,
    PostUpgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Script,
    Kubectl,
    Http,
}

fn infer_kind(target: &str) -> HookKind {
    if target.starts_with("http://") || target.starts_with("https://") {
        HookKind::Http
    } else if target.trim_start().starts_with("kubectl ") {
        HookKind::Kubectl
    } else {
        HookKind::Script
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookAction {
    pub name: String,
    pub event: HookEvent,
    #[serde(default)]
    pub kind: Option<HookKind>,
    pub target: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u32,
}

fn default_priority() -> i32 {
    100
}
fn default_timeout_secs() -> u64 {
    60
}

impl HookAction {
    pub fn resolved_kind(&self) -> HookKind {
        self.kind.unwrap_or_else(|| infer_kind(&self.target))
    }
}

#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub name: String,
    pub succeeded: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

/// One call-through per `HookKind`; production wiring runs `Script` via
/// `RemoteExecClient`, `Kubectl` the same way against a control-plane node,
/// and `Http` via a plain `reqwest` POST, the same split used for
/// `BackupComponent`/`CloudProvider` elsewhere in this workspace.
pub trait HookRunner: Send + Sync {
    fn run(&self, action: &HookAction, context: &BTreeMap<String, String>, timeout: Duration) -> Result<(), String>;
}

fn run_with_retries(runner: &dyn HookRunner, action: &HookAction, context: &BTreeMap<String, String>) -> HookOutcome {
    let timeout = Duration::from_secs(action.timeout_secs);
    let max_attempts = action.retries + 1;
    let mut last_error = None;
    for attempt in 1..=max_attempts {
        match runner.run(action, context, timeout) {
            Ok(()) => return HookOutcome { name: action.name.clone(), succeeded: true, attempts: attempt, error: None },
            Err(e) => last_error = Some(e),
        }
    }
    HookOutcome {
        name: action.name.clone(),
        succeeded: false,
        attempts: max_attempts,
        error: last_error,
    }
}

/// Fires every hook registered for `event`, lowest `priority` first,
/// sequentially. `context` becomes `HOOK_<KEY>` environment-style entries
/// for script/kubectl hooks at the call site that actually shells out.
pub fn trigger_hooks(
    runner: &dyn HookRunner,
    hooks: &[HookAction],
    event: HookEvent,
    context: &BTreeMap<String, String>,
) -> Vec<HookOutcome> {
    let mut matching: Vec<&HookAction> = hooks.iter().filter(|h| h.event == event).collect();
    matching.sort_by_key(|h| h.priority);
    matching.into_iter().map(|action| run_with_retries(runner, action, context)).collect()
}

/// Convenience wrapper matching the `HookError` surface for callers who
/// want a hard failure on the first unsuccessful hook rather than a report
/// (e.g. `PreClusterDestroy` gating an actual destroy).
pub fn trigger_hooks_strict(
    runner: &dyn HookRunner,
    hooks: &[HookAction],
    event: HookEvent,
    context: &BTreeMap<String, String>,
) -> Result<Vec<HookOutcome>, HookError> {
    let outcomes = trigger_hooks(runner, hooks, event, context);
    if let Some(failed) = outcomes.iter().find(|o| !o.succeeded) {
        return Err(HookError::Failed(failed.name.clone(), failed.attempts, failed.error.clone().unwrap_or_default()));
    }
    Ok(outcomes)
}

pub fn context_env_key(key: &str) -> String {
    format!("HOOK_{}", key.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn kind_is_inferred_from_target_when_omitted() {
        assert_eq!(infer_kind("https://example.com/hook"), HookKind::Http);
        assert_eq!(infer_kind("kubectl annotate node foo ready=true"), HookKind::Kubectl);
        assert_eq!(infer_kind("/opt/hooks/notify.sh"), HookKind::Script);
    }

    struct RecordingRunner {
        order: Mutex<Vec<String>>,
        fail_names: Vec<&'static str>,
        attempts: Mutex<BTreeMap<String, u32>>,
    }

    impl HookRunner for RecordingRunner {
        fn run(&self, action: &HookAction, _context: &BTreeMap<String, String>, _timeout: Duration) -> Result<(), String> {
            self.order.lock().unwrap().push(action.name.clone());
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(action.name.clone()).or_insert(0);
            *count += 1;
            if self.fail_names.contains(&action.name.as_str()) {
                Err("simulated failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn action(name: &str, priority: i32, retries: u32) -> HookAction {
        HookAction { name: name.to_string(), event: HookEvent::PostNodeCreate, kind: Some(HookKind::Script), target: "noop".to_string(), priority, timeout_secs: 5, retries }
    }

    #[test]
    fn hooks_run_in_priority_order() {
        let runner = RecordingRunner { order: Mutex::new(Vec::new()), fail_names: vec![], attempts: Mutex::new(BTreeMap::new()) };
        let hooks = vec![action("slow-notify", 200, 0), action("fast-label", 10, 0)];
        let context = BTreeMap::new();
        trigger_hooks(&runner, &hooks, HookEvent::PostNodeCreate, &context);
        assert_eq!(*runner.order.lock().unwrap(), vec!["fast-label".to_string(), "slow-notify".to_string()]);
    }

    #[test]
    fn one_hook_failing_does_not_stop_the_rest() {
        let runner = RecordingRunner { order: Mutex::new(Vec::new()), fail_names: vec!["broken"], attempts: Mutex::new(BTreeMap::new()) };
        let hooks = vec![action("broken", 1, 0), action("healthy", 2, 0)];
        let context = BTreeMap::new();
        let outcomes = trigger_hooks(&runner, &hooks, HookEvent::PostNodeCreate, &context);
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].succeeded);
        assert!(outcomes[1].succeeded);
    }

    #[test]
    fn retries_are_exhausted_before_reporting_failure() {
        let runner = RecordingRunner { order: Mutex::new(Vec::new()), fail_names: vec!["flaky"], attempts: Mutex::new(BTreeMap::new()) };
        let hooks = vec![action("flaky", 1, 2)];
        let context = BTreeMap::new();
        let outcomes = trigger_hooks(&runner, &hooks, HookEvent::PostNodeCreate, &context);
        assert_eq!(outcomes[0].attempts, 3);
        assert!(!outcomes[0].succeeded);
    }

    #[test]
    fn strict_variant_surfaces_the_first_failure_as_an_error() {
        let runner = RecordingRunner { order: Mutex::new(Vec::new()), fail_names: vec!["broken"], attempts: Mutex::new(BTreeMap::new()) };
        let hooks = vec![action("broken", 1, 0)];
        let context = BTreeMap::new();
        let err = trigger_hooks_strict(&runner, &hooks, HookEvent::PreClusterDestroy, &context);
        assert!(err.is_ok(), "event filter should exclude non-matching hooks");

        let hooks = vec![action("broken", 1, 0)];
        let err = trigger_hooks_strict(&runner, &hooks, HookEvent::PostNodeCreate, &context).unwrap_err();
        assert!(matches!(err, HookError::Failed(name, attempts, _) if name == "broken" && attempts == 1));
    }
}
