//! Append-only audit ring buffer (spec.md §4.8). Every lifecycle manager and
//! the orchestrator append `AuditEvent`s here, sharing a correlation id per
//! operation. Guarded by a `parking_lot::RwLock` the way the richer example
//! repos in the retrieval pack guard their shared in-memory state.

use std::collections::VecDeque;

use chrono::Utc;
use nimbus_types::audit::AuditEvent;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod query;
pub mod summary;

pub use error::AuditError;
pub use query::AuditQuery;
pub use summary::{summarize, AuditSummary};

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const EXPORT_SCHEMA_VERSION: &str = "1.0";

pub struct AuditLog {
    capacity: usize,
    events: RwLock<VecDeque<AuditEvent>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        AuditLog { capacity, events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))) }
    }

    pub fn append(&self, event: AuditEvent) {
        let mut events = self.events.write();
        if events.len() >= self.capacity {
            let prune = (self.capacity / 10).max(1);
            for _ in 0..prune {
                events.pop_front();
            }
        }
        events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Applies `query`'s filters, sorts newest-first, then paginates.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let events = self.events.read();
        let mut matched: Vec<AuditEvent> = events
            .iter()
            .filter(|e| query.event_type.map_or(true, |t| e.event_type == t))
            .filter(|e| query.action.as_deref().map_or(true, |a| e.action == a))
            .filter(|e| query.severity.map_or(true, |s| e.severity == s))
            .filter(|e| query.resource_id.as_deref().map_or(true, |r| e.resource_id == r))
            .filter(|e| query.actor.as_deref().map_or(true, |a| e.actor == a))
            .filter(|e| query.since.map_or(true, |s| e.timestamp >= s))
            .filter(|e| query.until.map_or(true, |u| e.timestamp <= u))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let start = query.offset.min(matched.len());
        match query.limit {
            Some(limit) => matched.into_iter().skip(start).take(limit).collect(),
            None => matched.into_iter().skip(start).collect(),
        }
    }

    pub fn summary(&self, top_n: usize) -> AuditSummary {
        let events: Vec<AuditEvent> = self.events.read().iter().cloned().collect();
        summarize(&events, top_n)
    }

    pub fn all(&self) -> Vec<AuditEvent> {
        self.events.read().iter().cloned().collect()
    }

    pub fn export(&self) -> Result<AuditExport, AuditError> {
        let events = self.all();
        let summary = summarize(&events, 10);
        Ok(AuditExport { version: EXPORT_SCHEMA_VERSION.to_string(), exported_at: Utc::now(), events, summary })
    }

    pub fn export_json(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string_pretty(&self.export()?)?)
    }

    /// Replaces the current contents with `export`'s events (spec.md §4.8
    /// "import replaces the current contents").
    pub fn import(&self, export: &AuditExport) -> Result<(), AuditError> {
        if export.version != EXPORT_SCHEMA_VERSION {
            return Err(AuditError::UnsupportedVersion(export.version.clone()));
        }
        let mut events = self.events.write();
        events.clear();
        for event in &export.events {
            events.push_back(event.clone());
        }
        Ok(())
    }

    pub fn import_json(&self, json: &str) -> Result<(), AuditError> {
        let export: AuditExport = serde_json::from_str(json)?;
        self.import(&export)
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        AuditLog::new(DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditExport {
    pub version: String,
    pub exported_at: chrono::DateTime<Utc>,
    pub events: Vec<AuditEvent>,
    pub summary: AuditSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_types::audit::{AuditEventType, Severity};
    use uuid::Uuid;

    fn event(action: &str, success: bool) -> AuditEvent {
        let builder = AuditEvent::builder(AuditEventType::Deployment, action, Uuid::new_v4())
            .resource("node", "m1")
            .actor("operator");
        if success {
            builder.build()
        } else {
            builder.failure("simulated failure").build()
        }
    }

    #[test]
    fn prunes_oldest_ten_percent_when_full() {
        let log = AuditLog::new(10);
        for i in 0..10 {
            log.append(event(&format!("a{i}"), true));
        }
        assert_eq!(log.len(), 10);
        log.append(event("overflow", true));
        assert_eq!(log.len(), 10);
    }

    #[test]
    fn query_filters_and_sorts_newest_first() {
        let log = AuditLog::new(100);
        log.append(event("first", true));
        log.append(event("second", false));
        let results = log.query(&AuditQuery::new());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].action, "second");
    }

    #[test]
    fn export_import_round_trip_is_identity_on_event_sets() {
        let log = AuditLog::new(100);
        log.append(event("one", true));
        log.append(event("two", false));
        let json = log.export_json().unwrap();

        let restored = AuditLog::new(100);
        restored.import_json(&json).unwrap();
        let mut original_ids: Vec<_> = log.all().iter().map(|e| e.id).collect();
        let mut restored_ids: Vec<_> = restored.all().iter().map(|e| e.id).collect();
        original_ids.sort();
        restored_ids.sort();
        assert_eq!(original_ids, restored_ids);
    }

    #[test]
    fn summary_counts_successes_and_failures() {
        let log = AuditLog::new(100);
        log.append(event("ok", true));
        log.append(event("bad", false));
        let summary = log.summary(5);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failure_count, 1);
    }
}
