//! `BackupComponent` implementations registered with `nimbus-lifecycle`'s
//! `create_backup`/`restore_backup` (spec.md §4.7): etcd over SSH, the
//! cluster description, and the stack's sealed secrets envelope.

use std::sync::Mutex;

use nimbus_lifecycle::BackupError;
use nimbus_remote::{ConnectionSpec, RemoteExecClient, PROVISIONING_TIMEOUT};
use nimbus_types::description::ClusterDescription;
use nimbus_types::secrets::SecretsEnvelope;

/// Snapshots etcd through the distribution's own `etcd-snapshot save` and
/// reads the resulting file back base64-encoded so it survives the
/// heredoc/script-delivery round trip untouched.
pub struct EtcdSnapshotComponent<'a> {
    pub client: &'a dyn RemoteExecClient,
    pub conn: ConnectionSpec,
    pub distribution: String,
}

impl<'a> nimbus_lifecycle::BackupComponent for EtcdSnapshotComponent<'a> {
    fn name(&self) -> &str {
        "etcd"
    }

    fn backup(&self) -> Result<Vec<u8>, BackupError> {
        let dist = &self.distribution;
        let snapshot_dir = format!("/var/lib/rancher/{dist}/server/db/snapshots");
        let cmd = format!(
            "{dist} etcd-snapshot save --name nimbus-manual --dir {snapshot_dir} >/dev/null && base64 -w0 {snapshot_dir}/nimbus-manual"
        );
        let out = self
            .client
            .run_script(&self.conn, &cmd, PROVISIONING_TIMEOUT)
            .map_err(|e| BackupError::ComponentFailed("etcd".to_string(), e.to_string()))?;
        if !out.success() {
            return Err(BackupError::ComponentFailed("etcd".to_string(), out.stderr));
        }
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, out.stdout.trim())
            .map_err(|e| BackupError::ComponentFailed("etcd".to_string(), e.to_string()))
    }

    fn restore(&self, data: &[u8]) -> Result<(), BackupError> {
        let dist = &self.distribution;
        let snapshot_dir = format!("/var/lib/rancher/{dist}/server/db/snapshots");
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, data);
        let cmd = format!(
            "mkdir -p {snapshot_dir} && echo '{encoded}' | base64 -d > {snapshot_dir}/nimbus-restore && \
             systemctl stop {dist}-server && {dist} server --cluster-reset --cluster-reset-restore-path={snapshot_dir}/nimbus-restore && \
             systemctl start {dist}-server"
        );
        let out = self
            .client
            .run_script(&self.conn, &cmd, PROVISIONING_TIMEOUT)
            .map_err(|e| BackupError::ComponentFailed("etcd".to_string(), e.to_string()))?;
        if !out.success() {
            return Err(BackupError::ComponentFailed("etcd".to_string(), out.stderr));
        }
        Ok(())
    }
}

/// Backs up the cluster description as the YAML a `deploy --config` would
/// take; restore writes it into the captured slot rather than applying it
/// directly, since applying a config is always a `deploy` the operator
/// reviews first.
pub struct ClusterConfigComponent<'a> {
    pub description: &'a ClusterDescription,
    pub restored: Mutex<Option<ClusterDescription>>,
}

impl<'a> ClusterConfigComponent<'a> {
    pub fn new(description: &'a ClusterDescription) -> Self {
        ClusterConfigComponent { description, restored: Mutex::new(None) }
    }
}

impl<'a> nimbus_lifecycle::BackupComponent for ClusterConfigComponent<'a> {
    fn name(&self) -> &str {
        "config"
    }

    fn backup(&self) -> Result<Vec<u8>, BackupError> {
        serde_yaml::to_vec(self.description).map_err(|e| BackupError::ComponentFailed("config".to_string(), e.to_string()))
    }

    fn restore(&self, data: &[u8]) -> Result<(), BackupError> {
        let description: ClusterDescription = serde_yaml::from_slice(data).map_err(|e| BackupError::ComponentFailed("config".to_string(), e.to_string()))?;
        *self.restored.lock().unwrap() = Some(description);
        Ok(())
    }
}

/// Backs up the stack's already-sealed `SecretsEnvelope` verbatim; the
/// ciphertext only ever decrypts with the operator's passphrase, so a
/// restore just hands the envelope back for the caller to write into the
/// stack blob.
pub struct SecretsEnvelopeComponent<'a> {
    pub envelope: &'a SecretsEnvelope,
    pub restored: Mutex<Option<SecretsEnvelope>>,
}

impl<'a> SecretsEnvelopeComponent<'a> {
    pub fn new(envelope: &'a SecretsEnvelope) -> Self {
        SecretsEnvelopeComponent { envelope, restored: Mutex::new(None) }
    }
}

impl<'a> nimbus_lifecycle::BackupComponent for SecretsEnvelopeComponent<'a> {
    fn name(&self) -> &str {
        "secrets"
    }

    fn backup(&self) -> Result<Vec<u8>, BackupError> {
        serde_json::to_vec(self.envelope).map_err(|e| BackupError::ComponentFailed("secrets".to_string(), e.to_string()))
    }

    fn restore(&self, data: &[u8]) -> Result<(), BackupError> {
        let envelope: SecretsEnvelope = serde_json::from_slice(data).map_err(|e| BackupError::ComponentFailed("secrets".to_string(), e.to_string()))?;
        *self.restored.lock().unwrap() = Some(envelope);
        Ok(())
    }
}
