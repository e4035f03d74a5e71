//! Wires `nimbus_lifecycle::hooks` to the rest of the engine: `Script`/
//! `Kubectl` hooks run over `RemoteExecClient` against the first master,
//! `Http` hooks POST through `reqwest`, same split `notify.rs` uses for
//! Slack versus everything else that goes over SSH.

use std::collections::BTreeMap;
use std::time::Duration;

use nimbus_lifecycle::{HookAction, HookEvent, HookKind, HookRunner};
use nimbus_remote::{ConnectionSpec, RemoteExecClient};
use nimbus_types::description::HookSpec;

fn parse_event(raw: &str) -> Option<HookEvent> {
    match raw {
        "post_node_create" => Some(HookEvent::PostNodeCreate),
        "pre_node_delete" => Some(HookEvent::PreNodeDelete),
        "post_cluster_ready" => Some(HookEvent::PostClusterReady),
        "pre_cluster_destroy" => Some(HookEvent::PreClusterDestroy),
        "post_upgrade" => Some(HookEvent::PostUpgrade),
        _ => None,
    }
}

fn parse_kind(raw: &str) -> Option<HookKind> {
    match raw {
        "script" => Some(HookKind::Script),
        "kubectl" => Some(HookKind::Kubectl),
        "http" => Some(HookKind::Http),
        _ => None,
    }
}

/// Converts the config's plain-string `HookSpec`s into runnable
/// `HookAction`s, skipping (and logging) any entry whose `event` doesn't
/// match a known variant.
pub fn resolve_hooks(specs: &[HookSpec]) -> Vec<HookAction> {
    specs
        .iter()
        .filter_map(|s| match parse_event(&s.event) {
            Some(event) => Some(HookAction {
                name: s.name.clone(),
                event,
                kind: s.kind.as_deref().and_then(parse_kind),
                target: s.target.clone(),
                priority: s.priority,
                timeout_secs: s.timeout_secs,
                retries: s.retries,
            }),
            None => {
                log::warn!("hook '{}' has unknown event '{}', skipping", s.name, s.event);
                None
            }
        })
        .collect()
}

/// Dispatches `Script`/`Kubectl` hooks over SSH against a fixed
/// control-plane connection, `Http` hooks as a plain POST of the context
/// map. Hooks with no reachable control-plane connection fail rather than
/// silently no-op, consistent with `trigger_hooks_strict` gating a destroy.
pub struct RemoteHookRunner<'a> {
    pub client: &'a dyn RemoteExecClient,
    pub control_plane_conn: Option<ConnectionSpec>,
}

impl<'a> HookRunner for RemoteHookRunner<'a> {
    fn run(&self, action: &HookAction, context: &BTreeMap<String, String>, timeout: Duration) -> Result<(), String> {
        match action.resolved_kind() {
            HookKind::Http => {
                let client = reqwest::blocking::Client::builder().timeout(timeout).build().map_err(|e| e.to_string())?;
                let resp = client.post(&action.target).json(context).send().map_err(|e| e.to_string())?;
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("hook '{}' http status {}", action.name, resp.status()))
                }
            }
            HookKind::Script | HookKind::Kubectl => {
                let conn = self
                    .control_plane_conn
                    .as_ref()
                    .ok_or_else(|| format!("hook '{}' needs a reachable control-plane node", action.name))?;
                let mut script = String::new();
                for (key, value) in context {
                    script.push_str(&format!("export {}={}\n", nimbus_lifecycle::context_env_key(key), shell_quote(value)));
                }
                script.push_str(&action.target);
                let out = self.client.run_script(conn, &script, timeout).map_err(|e| e.to_string())?;
                if out.success() {
                    Ok(())
                } else {
                    Err(out.stderr)
                }
            }
        }
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
