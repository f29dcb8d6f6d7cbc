//! Orchestrator base: step logging, result aggregation, and the template
//! entry point every concrete orchestrator exposes.
//!
//! The reliability wrappers themselves live in [`crate::retry`] and
//! [`crate::breaker`] as independent combinators; how they compose is decided
//! where a flow invokes its handlers, not here.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::ResolvaError;
use crate::state_machine::{Task, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Retrying,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failure => write!(f, "failure"),
            StepStatus::Retrying => write!(f, "retrying"),
        }
    }
}

/// One timestamped entry in the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory execution log shared by everything one orchestrator runs.
#[derive(Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<StepRecord>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. The step name must be non-empty.
    pub fn log_step(
        &self,
        step: &str,
        status: StepStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), ResolvaError> {
        if step.trim().is_empty() {
            return Err(ResolvaError::Validation(
                "step name must not be empty".to_string(),
            ));
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StepRecord {
                step: step.to_string(),
                status,
                output,
                error,
                recorded_at: Utc::now(),
            });
        Ok(())
    }

    pub fn entries(&self) -> Vec<StepRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Every completed transition lands in the log as a successful step, which
/// lets one log tell the whole story of a run alongside explicit
/// `log_step` calls.
#[async_trait]
impl AuditSink for ExecutionLog {
    async fn record(&self, event: &AuditEvent) {
        self.log_step(
            &event.state,
            StepStatus::Success,
            Some(Value::Object(event.handler_output.clone())),
            None,
        )
        .ok();
    }
}

/// Aggregated outcome of a sequence of step records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// Compute success/failure counts and the success rate. Empty input is a
/// caller error.
pub fn aggregate_results(records: &[StepRecord]) -> Result<RunSummary, ResolvaError> {
    if records.is_empty() {
        return Err(ResolvaError::Validation(
            "cannot aggregate an empty result sequence".to_string(),
        ));
    }
    let succeeded = records
        .iter()
        .filter(|r| r.status == StepStatus::Success)
        .count();
    let failed = records
        .iter()
        .filter(|r| r.status == StepStatus::Failure)
        .count();
    Ok(RunSummary {
        total: records.len(),
        succeeded,
        failed,
        success_rate: succeeded as f64 / records.len() as f64,
    })
}

/// Template entry point for concrete orchestrators.
///
/// Callers only ever invoke [`execute`](Orchestrate::execute): it validates
/// the raw task mapping before any collaborator is touched, then delegates to
/// the implementation's workflow run. Implementations provide `run_workflow`
/// and never override `execute`.
#[async_trait]
pub trait Orchestrate {
    type State: Copy
        + Eq
        + std::hash::Hash
        + fmt::Display
        + Serialize
        + serde::de::DeserializeOwned
        + Send
        + Sync;

    async fn run_workflow(&self, task: &Task)
    -> Result<WorkflowState<Self::State>, ResolvaError>;

    async fn execute(&self, input: &Value) -> Result<WorkflowState<Self::State>, ResolvaError> {
        let task = Task::from_value(input)?;
        self.run_workflow(&task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Phase;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn log_step_rejects_empty_step() {
        let log = ExecutionLog::new();
        let err = log
            .log_step("", StepStatus::Success, None, None)
            .unwrap_err();
        assert!(matches!(err, ResolvaError::Validation(_)));
        assert!(log.entries().is_empty());
    }

    #[test]
    fn log_step_appends_in_order() {
        let log = ExecutionLog::new();
        log.log_step("CLASSIFY", StepStatus::Success, Some(json!({"ok": true})), None)
            .unwrap();
        log.log_step(
            "SUBMIT",
            StepStatus::Failure,
            None,
            Some("endpoint down".into()),
        )
        .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].step, "CLASSIFY");
        assert_eq!(entries[1].status, StepStatus::Failure);
        assert_eq!(entries[1].error.as_deref(), Some("endpoint down"));
    }

    #[test]
    fn aggregate_rejects_empty_input() {
        let err = aggregate_results(&[]).unwrap_err();
        assert!(matches!(err, ResolvaError::Validation(_)));
    }

    #[test]
    fn aggregate_counts_and_rate() {
        let log = ExecutionLog::new();
        log.log_step("a", StepStatus::Success, None, None).unwrap();
        log.log_step("b", StepStatus::Success, None, None).unwrap();
        log.log_step("c", StepStatus::Failure, None, Some("x".into()))
            .unwrap();
        log.log_step("d", StepStatus::Retrying, None, None).unwrap();

        let summary = aggregate_results(&log.entries()).unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
    }

    struct ProbeOrchestrator {
        runs: AtomicU32,
    }

    #[async_trait]
    impl Orchestrate for ProbeOrchestrator {
        type State = Phase;

        async fn run_workflow(
            &self,
            task: &Task,
        ) -> Result<WorkflowState<Phase>, ResolvaError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(WorkflowState::new(task.task_id.clone(), Phase::Classify))
        }
    }

    #[tokio::test]
    async fn execute_validates_before_delegating() {
        let orch = ProbeOrchestrator {
            runs: AtomicU32::new(0),
        };

        let err = orch.execute(&json!({"no_task_id": true})).await.unwrap_err();
        assert!(matches!(err, ResolvaError::Validation(_)));
        assert_eq!(orch.runs.load(Ordering::SeqCst), 0);

        orch.execute(&json!({"task_id": "t1"})).await.unwrap();
        assert_eq!(orch.runs.load(Ordering::SeqCst), 1);
    }
}
