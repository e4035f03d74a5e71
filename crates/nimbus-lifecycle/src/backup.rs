//! Backup manager (spec.md §4.7): snapshots etcd, the cluster config, and
//! secrets through pluggable `BackupComponent`s, stores the concatenated
//! artifact under a `bucket/prefix/id` locator, and prunes anything past
//! its retention deadline.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use nimbus_types::backup::{BackupArtifact, BackupStatus};
use nimbus_types::description::BackupPolicy;

use crate::error::BackupError;

/// One thing worth snapshotting. `name()` must match an entry in
/// `BackupPolicy::components` for it to be included in a run.
pub trait BackupComponent: Send + Sync {
    fn name(&self) -> &str;
    fn backup(&self) -> Result<Vec<u8>, BackupError>;
    fn restore(&self, data: &[u8]) -> Result<(), BackupError>;
}

pub trait BackupStorage: Send + Sync {
    fn put(&self, locator: &str, data: &[u8]) -> Result<(), BackupError>;
    fn get(&self, locator: &str) -> Result<Vec<u8>, BackupError>;
    fn delete(&self, locator: &str) -> Result<(), BackupError>;
}

/// In-memory storage for tests and for stacks that haven't configured a
/// bucket; `HttpBackupStorage` below is the production S3-compatible path.
#[derive(Default)]
pub struct InMemoryBackupStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackupStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupStorage for InMemoryBackupStorage {
    fn put(&self, locator: &str, data: &[u8]) -> Result<(), BackupError> {
        self.objects.lock().unwrap().insert(locator.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, locator: &str) -> Result<Vec<u8>, BackupError> {
        self.objects
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(locator.to_string()))
    }

    fn delete(&self, locator: &str) -> Result<(), BackupError> {
        self.objects.lock().unwrap().remove(locator);
        Ok(())
    }
}

/// S3-style REST backend, same shape as `nimbus_orchestrator::HttpStateBackend`:
/// PUT/GET/DELETE against `<base_url>/<bucket>/<prefix>/<id>`.
pub struct HttpBackupStorage {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpBackupStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpBackupStorage { client: reqwest::blocking::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, locator: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), locator)
    }
}

impl BackupStorage for HttpBackupStorage {
    fn put(&self, locator: &str, data: &[u8]) -> Result<(), BackupError> {
        self.client
            .put(self.url(locator))
            .body(data.to_vec())
            .send()
            .map_err(|e| BackupError::Storage(e.to_string()))?
            .error_for_status()
            .map_err(|e| BackupError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get(&self, locator: &str) -> Result<Vec<u8>, BackupError> {
        let resp = self.client.get(self.url(locator)).send().map_err(|e| BackupError::Storage(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BackupError::NotFound(locator.to_string()));
        }
        resp.bytes().map(|b| b.to_vec()).map_err(|e| BackupError::Storage(e.to_string()))
    }

    fn delete(&self, locator: &str) -> Result<(), BackupError> {
        self.client.delete(self.url(locator)).send().map_err(|e| BackupError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn locator_for(bucket: &str, prefix: &str, id: Uuid) -> String {
    format!("{}/{}/{}", bucket.trim_matches('/'), prefix.trim_matches('/'), id)
}

/// Frame boundaries between concatenated components: `len` as an 8-byte
/// big-endian prefix followed by the raw bytes, repeated per component in
/// `policy.components` order.
fn encode_components(parts: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in parts {
        let name_bytes = name.as_bytes();
        out.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(name_bytes);
        out.extend_from_slice(&(data.len() as u64).to_be_bytes());
        out.extend_from_slice(data);
    }
    out
}

fn decode_components(mut bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, BackupError> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return Err(BackupError::Storage("truncated backup artifact".to_string()));
        }
        let (name_len_bytes, rest) = bytes.split_at(4);
        let name_len = u32::from_be_bytes(name_len_bytes.try_into().unwrap()) as usize;
        if rest.len() < name_len + 8 {
            return Err(BackupError::Storage("truncated backup artifact".to_string()));
        }
        let (name_bytes, rest) = rest.split_at(name_len);
        let name = String::from_utf8_lossy(name_bytes).to_string();
        let (data_len_bytes, rest) = rest.split_at(8);
        let data_len = u64::from_be_bytes(data_len_bytes.try_into().unwrap()) as usize;
        if rest.len() < data_len {
            return Err(BackupError::Storage("truncated backup artifact".to_string()));
        }
        let (data, rest) = rest.split_at(data_len);
        out.push((name, data.to_vec()));
        bytes = rest;
    }
    Ok(out)
}

/// Runs every component named in `policy.components` (skipping unknown
/// names rather than failing the whole backup) and stores the concatenated
/// result under `bucket/prefix/<new id>`.
pub fn create_backup(
    components: &[&dyn BackupComponent],
    storage: &dyn BackupStorage,
    policy: &BackupPolicy,
    bucket: &str,
    prefix: &str,
) -> Result<BackupArtifact, BackupError> {
    let mut parts = Vec::new();
    for wanted in &policy.components {
        let component = components
            .iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| BackupError::ComponentFailed(wanted.clone(), "no such component registered".to_string()))?;
        let data = component.backup().map_err(|e| BackupError::ComponentFailed(wanted.clone(), e.to_string()))?;
        parts.push((wanted.clone(), data));
    }

    let encoded = encode_components(&parts);
    let id = Uuid::new_v4();
    let locator = locator_for(bucket, prefix, id);
    storage.put(&locator, &encoded)?;

    let retention_days = if policy.retention_days == 0 { 30 } else { policy.retention_days };
    Ok(BackupArtifact {
        id,
        created_at: Utc::now(),
        components: policy.components.clone(),
        status: BackupStatus::Completed,
        size_bytes: encoded.len() as u64,
        storage_locator: locator,
        retention_deadline: Utc::now() + ChronoDuration::days(retention_days as i64),
    })
}

/// Restores every component found in the artifact, in storage order.
/// Unknown component names in the blob (from a backup taken by a newer
/// build) are skipped rather than failing the restore.
pub fn restore_backup(
    artifact: &BackupArtifact,
    components: &[&dyn BackupComponent],
    storage: &dyn BackupStorage,
) -> Result<(), BackupError> {
    let encoded = storage.get(&artifact.storage_locator)?;
    let parts = decode_components(&encoded)?;
    for (name, data) in parts {
        if let Some(component) = components.iter().find(|c| c.name() == name) {
            component.restore(&data).map_err(|e| BackupError::ComponentFailed(name.clone(), e.to_string()))?;
        }
    }
    Ok(())
}

/// Deletes every artifact whose `retention_deadline` has passed, returning
/// the locators removed.
pub fn prune_expired(artifacts: &[BackupArtifact], storage: &dyn BackupStorage) -> Result<Vec<String>, BackupError> {
    let now = Utc::now();
    let mut removed = Vec::new();
    for artifact in artifacts.iter().filter(|a| a.retention_deadline < now) {
        storage.delete(&artifact.storage_locator)?;
        removed.push(artifact.storage_locator.clone());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeComponent {
        name: &'static str,
        payload: Vec<u8>,
        restored: StdMutex<Option<Vec<u8>>>,
    }

    impl BackupComponent for FakeComponent {
        fn name(&self) -> &str {
            self.name
        }
        fn backup(&self) -> Result<Vec<u8>, BackupError> {
            Ok(self.payload.clone())
        }
        fn restore(&self, data: &[u8]) -> Result<(), BackupError> {
            *self.restored.lock().unwrap() = Some(data.to_vec());
            Ok(())
        }
    }

    fn policy(components: &[&str]) -> BackupPolicy {
        BackupPolicy { schedule: None, retention_days: 7, components: components.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn backup_then_restore_round_trips_every_component() {
        let etcd = FakeComponent { name: "etcd", payload: b"etcd-snapshot".to_vec(), restored: StdMutex::new(None) };
        let secrets = FakeComponent { name: "secrets", payload: b"secret-blob".to_vec(), restored: StdMutex::new(None) };
        let storage = InMemoryBackupStorage::new();
        let components: Vec<&dyn BackupComponent> = vec![&etcd, &secrets];

        let artifact = create_backup(&components, &storage, &policy(&["etcd", "secrets"]), "nimbus-backups", "prod").unwrap();
        assert_eq!(artifact.status, BackupStatus::Completed);
        assert!(artifact.storage_locator.starts_with("nimbus-backups/prod/"));

        restore_backup(&artifact, &components, &storage).unwrap();
        assert_eq!(*etcd.restored.lock().unwrap(), Some(b"etcd-snapshot".to_vec()));
        assert_eq!(*secrets.restored.lock().unwrap(), Some(b"secret-blob".to_vec()));
    }

    #[test]
    fn missing_component_fails_the_backup() {
        let storage = InMemoryBackupStorage::new();
        let components: Vec<&dyn BackupComponent> = vec![];
        let err = create_backup(&components, &storage, &policy(&["etcd"]), "bucket", "prefix").unwrap_err();
        assert!(matches!(err, BackupError::ComponentFailed(_, _)));
    }

    #[test]
    fn prune_removes_only_expired_artifacts() {
        let storage = InMemoryBackupStorage::new();
        storage.put("b/p/old", b"x").unwrap();
        storage.put("b/p/new", b"y").unwrap();
        let old = BackupArtifact {
            id: Uuid::new_v4(),
            created_at: Utc::now() - ChronoDuration::days(40),
            components: vec![],
            status: BackupStatus::Completed,
            size_bytes: 1,
            storage_locator: "b/p/old".to_string(),
            retention_deadline: Utc::now() - ChronoDuration::days(10),
        };
        let fresh = BackupArtifact {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            components: vec![],
            status: BackupStatus::Completed,
            size_bytes: 1,
            storage_locator: "b/p/new".to_string(),
            retention_deadline: Utc::now() + ChronoDuration::days(20),
        };
        let removed = prune_expired(&[old, fresh], &storage).unwrap();
        assert_eq!(removed, vec!["b/p/old".to_string()]);
        assert!(storage.get("b/p/new").is_ok());
        assert!(storage.get("b/p/old").is_err());
    }
}
