//! `AuditEvent` (spec.md §3, §4.8). The ring-buffer engine that stores and
//! queries these lives in `nimbus-audit`; this module only defines the
//! record shape so every crate can emit events without depending on the
//! audit engine itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Deployment,
    Configuration,
    Manifest,
    Rollback,
    State,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub action: String,
    pub severity: Severity,
    pub resource_id: String,
    pub resource_type: String,
    pub actor: String,
    pub description: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub correlation_id: Uuid,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
}

pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEvent {
    pub fn builder(
        event_type: AuditEventType,
        action: impl Into<String>,
        correlation_id: Uuid,
    ) -> AuditEventBuilder {
        AuditEventBuilder {
            event: AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                event_type,
                action: action.into(),
                severity: Severity::Info,
                resource_id: String::new(),
                resource_type: String::new(),
                actor: String::new(),
                description: String::new(),
                old_value: None,
                new_value: None,
                correlation_id,
                duration_ms: None,
                success: true,
                error_message: None,
            },
        }
    }
}

impl AuditEventBuilder {
    pub fn severity(mut self, s: Severity) -> Self {
        self.event.severity = s;
        self
    }
    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.event.resource_type = resource_type.into();
        self.event.resource_id = resource_id.into();
        self
    }
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.event.actor = actor.into();
        self
    }
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.event.description = description.into();
        self
    }
    pub fn values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.event.old_value = old;
        self.event.new_value = new;
        self
    }
    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.event.duration_ms = Some(ms);
        self
    }
    pub fn failure(mut self, error_message: impl Into<String>) -> Self {
        self.event.success = false;
        self.event.severity = Severity::Error;
        self.event.error_message = Some(error_message.into());
        self
    }
    pub fn build(self) -> AuditEvent {
        self.event
    }
}
