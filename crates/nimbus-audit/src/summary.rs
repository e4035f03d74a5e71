//! Summary statistics over a set of events (spec.md §4.8): totals,
//! success/failure counts, first/last timestamp, average duration, top-N
//! actors/resources.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nimbus_types::audit::AuditEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub average_duration_ms: Option<f64>,
    pub top_actors: Vec<(String, usize)>,
    pub top_resources: Vec<(String, usize)>,
}

fn top_n(counts: BTreeMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut v: Vec<(String, usize)> = counts.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v.truncate(n);
    v
}

pub fn summarize(events: &[AuditEvent], top_n_count: usize) -> AuditSummary {
    if events.is_empty() {
        return AuditSummary {
            total: 0,
            success_count: 0,
            failure_count: 0,
            first_timestamp: None,
            last_timestamp: None,
            average_duration_ms: None,
            top_actors: Vec::new(),
            top_resources: Vec::new(),
        };
    }

    let mut success_count = 0usize;
    let mut failure_count = 0usize;
    let mut first = events[0].timestamp;
    let mut last = events[0].timestamp;
    let mut duration_sum = 0u64;
    let mut duration_count = 0u64;
    let mut actor_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut resource_counts: BTreeMap<String, usize> = BTreeMap::new();

    for event in events {
        if event.success {
            success_count += 1;
        } else {
            failure_count += 1;
        }
        if event.timestamp < first {
            first = event.timestamp;
        }
        if event.timestamp > last {
            last = event.timestamp;
        }
        if let Some(ms) = event.duration_ms {
            duration_sum += ms;
            duration_count += 1;
        }
        if !event.actor.is_empty() {
            *actor_counts.entry(event.actor.clone()).or_insert(0) += 1;
        }
        if !event.resource_id.is_empty() {
            *resource_counts.entry(event.resource_id.clone()).or_insert(0) += 1;
        }
    }

    AuditSummary {
        total: events.len(),
        success_count,
        failure_count,
        first_timestamp: Some(first),
        last_timestamp: Some(last),
        average_duration_ms: if duration_count > 0 { Some(duration_sum as f64 / duration_count as f64) } else { None },
        top_actors: top_n(actor_counts, top_n_count),
        top_resources: top_n(resource_counts, top_n_count),
    }
}
