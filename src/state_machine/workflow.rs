use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::AuditEvent;
use crate::error::ResolvaError;

/// JSON object threaded through phases as context and returned as handler output.
pub type JsonMap = Map<String, Value>;

/// A validated unit of work submitted to the orchestrator.
///
/// The caller hands in an arbitrary JSON mapping; the only required key is a
/// non-empty string `task_id`. Everything else is opaque domain payload passed
/// through to phase handlers unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(flatten)]
    pub payload: JsonMap,
}

impl Task {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            payload: JsonMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: JsonMap) -> Self {
        self.payload = payload;
        self
    }

    /// Validate a raw JSON mapping into a task.
    ///
    /// Checks run before any handler is touched; failures are fatal. The
    /// `task_id` is also used in checkpoint file names, so path separators are
    /// rejected here rather than at write time.
    pub fn from_value(input: &Value) -> Result<Self, ResolvaError> {
        let Some(object) = input.as_object() else {
            return Err(ResolvaError::Validation(
                "task must be a JSON object".to_string(),
            ));
        };
        let Some(id_value) = object.get("task_id") else {
            return Err(ResolvaError::Validation(
                "task_id is required".to_string(),
            ));
        };
        let Some(task_id) = id_value.as_str() else {
            return Err(ResolvaError::Validation(
                "task_id must be a string".to_string(),
            ));
        };
        if task_id.trim().is_empty() {
            return Err(ResolvaError::Validation(
                "task_id must not be empty".to_string(),
            ));
        }
        if task_id.contains('/') || task_id.contains('\\') || task_id.contains("..") {
            return Err(ResolvaError::Validation(format!(
                "task_id must not contain path separators: {task_id}"
            )));
        }

        let mut payload = object.clone();
        payload.remove("task_id");
        Ok(Self {
            task_id: task_id.to_string(),
            payload,
        })
    }
}

/// The view of a task a phase handler receives: the original payload plus the
/// context accumulated by every phase that ran before it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub payload: JsonMap,
    pub accumulated: JsonMap,
}

/// Mutable execution record for one task.
///
/// `state_history` is strictly append-only, one entry per completed phase, in
/// execution order. `accumulated_data` only grows or overwrites by
/// later-write-wins merge, never shrinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState<S> {
    pub task_id: String,
    pub current_state: S,
    pub state_history: Vec<S>,
    pub accumulated_data: JsonMap,
    pub audit_trail: Vec<AuditEvent>,
    pub invariant_violations: Vec<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<S> WorkflowState<S>
where
    S: Copy + Eq + fmt::Display + Serialize + DeserializeOwned,
{
    pub fn new(task_id: impl Into<String>, initial_state: S) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            current_state: initial_state,
            state_history: Vec::new(),
            accumulated_data: JsonMap::new(),
            audit_trail: Vec::new(),
            invariant_violations: Vec::new(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a handler's output into the accumulated context.
    /// New keys add, overlapping keys overwrite; nothing is ever removed.
    pub fn merge_output(&mut self, output: &JsonMap) {
        for (key, value) in output {
            self.accumulated_data.insert(key.clone(), value.clone());
        }
        self.updated_at = Utc::now();
    }

    /// Record a completed phase: append it to the history and make it current.
    ///
    /// For an acyclic flow a state must not complete twice; a duplicate is
    /// recorded as an invariant violation rather than silently accepted.
    pub fn record_phase(&mut self, state: S) {
        if self.state_history.contains(&state) {
            self.invariant_violations
                .push(format!("state {state} completed more than once"));
        }
        self.state_history.push(state);
        self.current_state = state;
        self.updated_at = Utc::now();
    }

    /// Snapshot handed to the handler of the next phase.
    pub fn snapshot(&self, task: &Task) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            payload: task.payload.clone(),
            accumulated: self.accumulated_data.clone(),
        }
    }
}
