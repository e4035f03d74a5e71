//! Query filter + pagination (spec.md §4.8): filter by type/action/severity/
//! resource/actor/time range, sort newest-first, paginate with offset/limit.

use chrono::{DateTime, Utc};
use nimbus_types::audit::{AuditEventType, Severity};

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub action: Option<String>,
    pub severity: Option<Severity>,
    pub resource_id: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        AuditQuery::default()
    }

    pub fn event_type(mut self, t: AuditEventType) -> Self {
        self.event_type = Some(t);
        self
    }
    pub fn action(mut self, a: impl Into<String>) -> Self {
        self.action = Some(a.into());
        self
    }
    pub fn severity(mut self, s: Severity) -> Self {
        self.severity = Some(s);
        self
    }
    pub fn resource_id(mut self, r: impl Into<String>) -> Self {
        self.resource_id = Some(r.into());
        self
    }
    pub fn actor(mut self, a: impl Into<String>) -> Self {
        self.actor = Some(a.into());
        self
    }
    pub fn time_range(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}
