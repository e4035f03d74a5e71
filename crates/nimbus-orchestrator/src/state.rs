//! `StateBackend`: persists the encrypted stack blob, the lease file, and
//! history checkpoints (spec.md §6 "Persisted state layout"). `memory` is
//! for tests; the `http` backend fronts an S3-compatible object store's
//! presigned-URL or REST gateway via a reused `reqwest::blocking::Client`,
//! in the same spirit as `Vault`'s single cached HTTP client.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use nimbus_types::stack::{Lease, Stack};

use crate::error::StateError;
use crate::graph::ResourceGraph;

pub trait StateBackend: Send + Sync {
    fn read_stack(&self, stack_key: &str) -> Result<Option<Stack>, StateError>;
    fn write_stack(&self, stack_key: &str, stack: &Stack) -> Result<(), StateError>;
    fn read_lease(&self, stack_key: &str) -> Result<Option<Lease>, StateError>;
    fn write_lease(&self, stack_key: &str, lease: &Lease) -> Result<(), StateError>;
    fn clear_lease(&self, stack_key: &str) -> Result<(), StateError>;
    /// Writes one entry under `<prefix>/history/<timestamp>` (spec.md §6).
    fn checkpoint(&self, stack_key: &str, stack: &Stack) -> Result<(), StateError>;
    fn history(&self, stack_key: &str) -> Result<Vec<Stack>, StateError>;
    /// Last-reconciled `ResourceGraph`, stored alongside the stack blob but
    /// kept as its own artifact since `ResourceGraph` lives in this crate
    /// (it depends on `petgraph`) while `Stack` lives in `nimbus-types`.
    fn read_graph(&self, stack_key: &str) -> Result<Option<ResourceGraph>, StateError>;
    fn write_graph(&self, stack_key: &str, graph: &ResourceGraph) -> Result<(), StateError>;
}

#[derive(Default)]
pub struct InMemoryStateBackend {
    stacks: Mutex<BTreeMap<String, Stack>>,
    leases: Mutex<BTreeMap<String, Lease>>,
    history: Mutex<BTreeMap<String, Vec<Stack>>>,
    graphs: Mutex<BTreeMap<String, ResourceGraph>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        InMemoryStateBackend::default()
    }
}

impl StateBackend for InMemoryStateBackend {
    fn read_stack(&self, stack_key: &str) -> Result<Option<Stack>, StateError> {
        Ok(self.stacks.lock().unwrap().get(stack_key).cloned())
    }

    fn write_stack(&self, stack_key: &str, stack: &Stack) -> Result<(), StateError> {
        if let Some(existing) = self.stacks.lock().unwrap().get(stack_key) {
            if existing.schema_version > stack.schema_version {
                return Err(StateError::VersionMismatch {
                    stack: stack_key.to_string(),
                    found: existing.schema_version,
                    supported: stack.schema_version,
                });
            }
        }
        self.stacks.lock().unwrap().insert(stack_key.to_string(), stack.clone());
        Ok(())
    }

    fn read_lease(&self, stack_key: &str) -> Result<Option<Lease>, StateError> {
        Ok(self.leases.lock().unwrap().get(stack_key).cloned())
    }

    fn write_lease(&self, stack_key: &str, lease: &Lease) -> Result<(), StateError> {
        self.leases.lock().unwrap().insert(stack_key.to_string(), lease.clone());
        Ok(())
    }

    fn clear_lease(&self, stack_key: &str) -> Result<(), StateError> {
        self.leases.lock().unwrap().remove(stack_key);
        Ok(())
    }

    fn checkpoint(&self, stack_key: &str, stack: &Stack) -> Result<(), StateError> {
        self.history
            .lock()
            .unwrap()
            .entry(stack_key.to_string())
            .or_default()
            .push(stack.clone());
        Ok(())
    }

    fn history(&self, stack_key: &str) -> Result<Vec<Stack>, StateError> {
        Ok(self.history.lock().unwrap().get(stack_key).cloned().unwrap_or_default())
    }

    fn read_graph(&self, stack_key: &str) -> Result<Option<ResourceGraph>, StateError> {
        Ok(self.graphs.lock().unwrap().get(stack_key).cloned())
    }

    fn write_graph(&self, stack_key: &str, graph: &ResourceGraph) -> Result<(), StateError> {
        self.graphs.lock().unwrap().insert(stack_key.to_string(), graph.clone());
        Ok(())
    }
}

/// Fronts an S3-compatible object store reachable at `STATE_BACKEND_URL`
/// (spec.md §6) through a REST gateway; every call is a plain GET/PUT of a
/// JSON blob at `<base_url>/<stack_key>/state|lease|history/<timestamp>`.
pub struct HttpStateBackend {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpStateBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpStateBackend { client: reqwest::blocking::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, stack_key: &str, artifact: &str) -> String {
        format!("{}/{}/{}", self.base_url, stack_key, artifact)
    }
}

impl StateBackend for HttpStateBackend {
    fn read_stack(&self, stack_key: &str) -> Result<Option<Stack>, StateError> {
        let resp = self
            .client
            .get(self.url(stack_key, "state"))
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        let stack: Stack = resp
            .json()
            .map_err(|e| StateError::Corrupt(stack_key.to_string(), e.to_string()))?;
        Ok(Some(stack))
    }

    fn write_stack(&self, stack_key: &str, stack: &Stack) -> Result<(), StateError> {
        let resp = self
            .client
            .put(self.url(stack_key, "state"))
            .json(stack)
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        Ok(())
    }

    fn read_lease(&self, stack_key: &str) -> Result<Option<Lease>, StateError> {
        let resp = self
            .client
            .get(self.url(stack_key, "lease"))
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        let lease: Lease = resp
            .json()
            .map_err(|e| StateError::Corrupt(stack_key.to_string(), e.to_string()))?;
        Ok(Some(lease))
    }

    fn write_lease(&self, stack_key: &str, lease: &Lease) -> Result<(), StateError> {
        let resp = self
            .client
            .put(self.url(stack_key, "lease"))
            .json(lease)
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        Ok(())
    }

    fn clear_lease(&self, stack_key: &str) -> Result<(), StateError> {
        let resp = self
            .client
            .delete(self.url(stack_key, "lease"))
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        Ok(())
    }

    fn checkpoint(&self, stack_key: &str, stack: &Stack) -> Result<(), StateError> {
        let artifact = format!("history/{}", Utc::now().timestamp_millis());
        let resp = self
            .client
            .put(self.url(stack_key, &artifact))
            .json(stack)
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        Ok(())
    }

    fn history(&self, stack_key: &str) -> Result<Vec<Stack>, StateError> {
        let resp = self
            .client
            .get(self.url(stack_key, "history"))
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        resp.json()
            .map_err(|e| StateError::Corrupt(stack_key.to_string(), e.to_string()))
    }

    fn read_graph(&self, stack_key: &str) -> Result<Option<ResourceGraph>, StateError> {
        let resp = self
            .client
            .get(self.url(stack_key, "graph"))
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        let graph: ResourceGraph = resp
            .json()
            .map_err(|e| StateError::Corrupt(stack_key.to_string(), e.to_string()))?;
        Ok(Some(graph))
    }

    fn write_graph(&self, stack_key: &str, graph: &ResourceGraph) -> Result<(), StateError> {
        let resp = self
            .client
            .put(self.url(stack_key, "graph"))
            .json(graph)
            .send()
            .map_err(|e| StateError::Backend(stack_key.to_string(), e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StateError::Backend(stack_key.to_string(), resp.status().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::secrets::SecretsEnvelope;
    use nimbus_types::stack::StackId;

    fn stack() -> Stack {
        Stack::new(StackId::new("acme", "infra", "prod"), SecretsEnvelope::default())
    }

    #[test]
    fn read_after_write_round_trips() {
        let backend = InMemoryStateBackend::new();
        backend.write_stack("acme/infra/prod", &stack()).unwrap();
        let read = backend.read_stack("acme/infra/prod").unwrap().unwrap();
        assert_eq!(read.id.stack, "prod");
    }

    #[test]
    fn checkpoint_accumulates_history() {
        let backend = InMemoryStateBackend::new();
        backend.checkpoint("acme/infra/prod", &stack()).unwrap();
        backend.checkpoint("acme/infra/prod", &stack()).unwrap();
        assert_eq!(backend.history("acme/infra/prod").unwrap().len(), 2);
    }

    #[test]
    fn graph_round_trips() {
        let backend = InMemoryStateBackend::new();
        assert!(backend.read_graph("acme/infra/prod").unwrap().is_none());
        backend.write_graph("acme/infra/prod", &ResourceGraph::new()).unwrap();
        assert!(backend.read_graph("acme/infra/prod").unwrap().is_some());
    }
}
