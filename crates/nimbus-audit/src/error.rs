use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize audit export: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unsupported audit export schema version '{0}'")]
    UnsupportedVersion(String),
}
