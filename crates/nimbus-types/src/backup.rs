//! `BackupArtifact` (spec.md §3, §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub components: Vec<String>,
    pub status: BackupStatus,
    pub size_bytes: u64,
    /// `bucket/prefix/id`-shaped storage locator (spec.md §4.7).
    pub storage_locator: String,
    pub retention_deadline: DateTime<Utc>,
}
