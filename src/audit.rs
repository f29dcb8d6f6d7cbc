//! Audit trail: per-transition events and the end-of-run summary record.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{JsonMap, WorkflowState};

/// One audit entry, emitted after every completed phase transition.
///
/// `context_before` is the accumulated context as the handler saw it, before
/// its output was merged in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub task_id: String,
    pub state: String,
    pub seq: u64,
    pub context_before: JsonMap,
    pub handler_output: JsonMap,
    pub recorded_at: DateTime<Utc>,
}

/// External observability sink, invoked once per transition.
///
/// The core makes no assumption about how a sink persists or displays events;
/// a sink that fails does so on its own time and must not raise into the
/// workflow loop.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent);
}

/// Collects events in memory. Used by tests and the demo command.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Structured summary produced when a workflow reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub task_id: String,
    pub final_state: String,
    pub state_transitions: Vec<String>,
    pub phases_executed: usize,
    pub retry_count: u32,
    pub invariant_violations: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    /// Generate a summary record from a finished workflow.
    pub fn from_workflow<S: fmt::Display>(workflow: &WorkflowState<S>) -> Self {
        let now = Utc::now();
        let duration = now - workflow.created_at;
        let mut transitions: Vec<String> = workflow
            .state_history
            .iter()
            .map(|s| s.to_string())
            .collect();
        let final_state = workflow.current_state.to_string();
        if transitions.last() != Some(&final_state) {
            // Terminal-on-entry states (no handler ran) close the transition list.
            transitions.push(final_state.clone());
        }

        Self {
            task_id: workflow.task_id.clone(),
            final_state,
            state_transitions: transitions,
            phases_executed: workflow.state_history.len(),
            retry_count: workflow.retry_count,
            invariant_violations: workflow.invariant_violations.clone(),
            started_at: workflow.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}
