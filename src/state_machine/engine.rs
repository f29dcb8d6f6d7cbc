use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::audit::{AuditEvent, AuditSink};
use crate::breaker::{BreakerError, CircuitBreaker};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::ResolvaError;
use crate::retry::{RetryError, RetryPolicy, retry_with_backoff};

use super::workflow::{JsonMap, Task, TaskSnapshot, WorkflowState};

/// External collaborator invoked for one FSM state.
///
/// Handlers must return `Err` on fatal conditions so the retry and escalation
/// logic can react; recoverable issues are surfaced through fields in the
/// returned mapping (e.g. `validation_passed: false`) instead of errors.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn handle(&self, snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap>;
}

/// A finite-state-machine definition: the closed set of states, their
/// handlers, the transition rules, and the per-state reliability policies.
pub trait FlowDefinition: Send + Sync {
    type State: Copy + Eq + Hash + fmt::Display + Serialize + DeserializeOwned + Send + Sync;

    fn initial_state(&self) -> Self::State;

    /// Handler bound to a state. A resolved successor without a handler marks
    /// a terminal state.
    fn handler(&self, state: Self::State) -> Option<Arc<dyn PhaseHandler>>;

    /// Next state after `state` completed, consulting the accumulated context
    /// for conditional branches. `None` means `state` has no successor.
    fn resolve_transition(&self, state: Self::State, data: &JsonMap) -> Option<Self::State>;

    /// Retry policy for states designated retry-eligible.
    fn retry_policy(&self, _state: Self::State) -> Option<RetryPolicy> {
        None
    }

    /// Breaker guarding a state's call type, if any.
    fn breaker(&self, _state: Self::State) -> Option<Arc<CircuitBreaker>> {
        None
    }
}

/// Drives a [`FlowDefinition`] through its states for one task at a time.
///
/// Each task runs as one sequential future: phase *N+1* never begins before
/// phase *N*'s handler has returned and its checkpoint write has completed.
/// That ordering is what makes recovery correct.
pub struct WorkflowEngine {
    store: Arc<dyn CheckpointStore>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        self.store.clone()
    }

    /// Restore the most recent checkpointed workflow for `task_id`, or `None`
    /// if no checkpoint exists. The store decides "most recent".
    pub async fn recover<S>(&self, task_id: &str) -> Result<Option<WorkflowState<S>>, ResolvaError>
    where
        S: DeserializeOwned,
    {
        let Some(checkpoint) = self.store.load_latest(task_id).await? else {
            return Ok(None);
        };
        let workflow = serde_json::from_value(checkpoint.workflow)?;
        Ok(Some(workflow))
    }

    /// Execute `task` through `flow` until a terminal state is reached.
    ///
    /// A task with an existing checkpoint resumes after the checkpointed
    /// state and only advances forward: states already in `state_history`
    /// are never re-invoked.
    pub async fn run<F>(
        &self,
        flow: &F,
        task: &Task,
    ) -> Result<WorkflowState<F::State>, ResolvaError>
    where
        F: FlowDefinition,
    {
        let (mut workflow, mut next) = match self.recover::<F::State>(&task.task_id).await? {
            Some(workflow) => {
                let next =
                    flow.resolve_transition(workflow.current_state, &workflow.accumulated_data);
                (workflow, next)
            }
            None => {
                let initial = flow.initial_state();
                if flow.handler(initial).is_none() {
                    // Nothing registered for the entry state is a
                    // configuration defect, not a terminal condition.
                    return Err(ResolvaError::MissingHandler(initial.to_string()));
                }
                let workflow = WorkflowState::new(task.task_id.clone(), initial);
                (workflow, Some(initial))
            }
        };

        loop {
            let Some(state) = next else {
                // No successor: the current state is final.
                return Ok(workflow);
            };
            let Some(handler) = flow.handler(state) else {
                // Terminal on entry (e.g. ESCALATE): record the final state
                // and checkpoint it, but no handler ran, so it does not join
                // the history.
                workflow.current_state = state;
                workflow.updated_at = Utc::now();
                let seq = workflow.state_history.len() as u64 + 1;
                let checkpoint = Checkpoint::for_workflow(&workflow, seq)?;
                self.store.save(&checkpoint).await?;
                return Ok(workflow);
            };

            let snapshot = workflow.snapshot(task);
            let (result, attempt_count) = self
                .invoke_phase(flow, state, handler.as_ref(), &snapshot)
                .await;
            let output = result?;

            workflow.merge_output(&output);
            workflow.record_phase(state);
            workflow.retry_count += attempt_count.saturating_sub(1);

            let seq = workflow.state_history.len() as u64;
            let event = AuditEvent {
                task_id: workflow.task_id.clone(),
                state: state.to_string(),
                seq,
                context_before: snapshot.accumulated,
                handler_output: output,
                recorded_at: Utc::now(),
            };
            workflow.audit_trail.push(event.clone());
            for sink in &self.sinks {
                sink.record(&event).await;
            }

            // The checkpoint write must complete before advancing: a stored
            // checkpoint for this state implies the state fully finished.
            let checkpoint = Checkpoint::for_workflow(&workflow, seq)?;
            self.store.save(&checkpoint).await?;

            next = flow.resolve_transition(state, &workflow.accumulated_data);
        }
    }

    /// Invoke one phase handler with the state's reliability wrappers.
    ///
    /// Composition order is decided here, once: the breaker wraps the whole
    /// retry sequence, so an exhausted sequence counts as a single breaker
    /// failure. Returns the outcome and the number of handler invocations.
    async fn invoke_phase<F>(
        &self,
        flow: &F,
        state: F::State,
        handler: &dyn PhaseHandler,
        snapshot: &TaskSnapshot,
    ) -> (Result<JsonMap, ResolvaError>, u32)
    where
        F: FlowDefinition,
    {
        let state_name = state.to_string();
        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let mut invoke = move || {
            attempts_ref.fetch_add(1, Ordering::SeqCst);
            handler.handle(snapshot)
        };

        let result = match (flow.retry_policy(state), flow.breaker(state)) {
            (Some(policy), Some(breaker)) => {
                match breaker.call(|| retry_with_backoff(&policy, invoke)).await {
                    Ok(output) => Ok(output),
                    Err(BreakerError::Open { remaining }) => Err(ResolvaError::CircuitOpen {
                        remaining_ms: remaining.as_millis() as u64,
                    }),
                    Err(BreakerError::Operation(err)) => Err(retry_failure(&state_name, err)),
                }
            }
            (Some(policy), None) => retry_with_backoff(&policy, invoke)
                .await
                .map_err(|err| retry_failure(&state_name, err)),
            (None, Some(breaker)) => match breaker.call(invoke).await {
                Ok(output) => Ok(output),
                Err(BreakerError::Open { remaining }) => Err(ResolvaError::CircuitOpen {
                    remaining_ms: remaining.as_millis() as u64,
                }),
                Err(BreakerError::Operation(err)) => Err(direct_failure(&state_name, err)),
            },
            (None, None) => invoke()
                .await
                .map_err(|err| direct_failure(&state_name, err)),
        };

        (result, attempts.load(Ordering::SeqCst))
    }
}

fn retry_failure(phase: &str, err: RetryError<anyhow::Error>) -> ResolvaError {
    match err {
        RetryError::InvalidPolicy(msg) => {
            ResolvaError::Config(format!("retry policy for {phase}: {msg}"))
        }
        RetryError::Exhausted { attempts, source } => ResolvaError::PhaseFailed {
            phase: phase.to_string(),
            attempts,
            message: format!("{source:#}"),
        },
    }
}

fn direct_failure(phase: &str, err: anyhow::Error) -> ResolvaError {
    ResolvaError::PhaseFailed {
        phase: phase.to_string(),
        attempts: 1,
        message: format!("{err:#}"),
    }
}
