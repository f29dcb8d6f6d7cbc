//! The dispute-resolution pipeline: a fixed six-state flow and the
//! orchestrator that drives it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheCheckpointStore, KvCacheClient};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, TieredCheckpointStore};
use crate::config::ResolvaConfig;
use crate::error::ResolvaError;
use crate::handlers::{
    ClassifyHandler, EvidenceHandler, MonitorHandler, SubmissionHandler, ValidationHandler,
};
use crate::orchestrator::{ExecutionLog, Orchestrate, StepStatus};
use crate::retry::RetryPolicy;
use crate::state_machine::{
    FlowDefinition, JsonMap, Phase, PhaseHandler, Task, WorkflowEngine, WorkflowState,
};

/// The dispute state machine definition.
///
/// `CLASSIFY`, `GATHER_EVIDENCE` and `SUBMIT` are network-bound and
/// retry-wrapped; `VALIDATE` and `MONITOR` are invoked directly. The shared
/// breaker guards the `SUBMIT` call type only.
pub struct DisputeFlow {
    handlers: HashMap<Phase, Arc<dyn PhaseHandler>>,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl DisputeFlow {
    pub fn new(retry_policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            handlers: HashMap::new(),
            retry_policy,
            breaker,
        }
    }

    /// Bind a handler to a phase. Each phase takes exactly one handler.
    pub fn register_handler(
        &mut self,
        phase: Phase,
        handler: Arc<dyn PhaseHandler>,
    ) -> Result<(), ResolvaError> {
        if self.handlers.contains_key(&phase) {
            return Err(ResolvaError::HandlerAlreadyRegistered(phase.to_string()));
        }
        self.handlers.insert(phase, handler);
        Ok(())
    }
}

impl FlowDefinition for DisputeFlow {
    type State = Phase;

    fn initial_state(&self) -> Phase {
        Phase::Classify
    }

    fn handler(&self, state: Phase) -> Option<Arc<dyn PhaseHandler>> {
        self.handlers.get(&state).cloned()
    }

    fn resolve_transition(&self, state: Phase, data: &JsonMap) -> Option<Phase> {
        match state {
            Phase::Validate => {
                let passed = data
                    .get("validation_passed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Some(if passed { Phase::Submit } else { Phase::Escalate })
            }
            Phase::Submit => {
                let submitted =
                    data.get("submission_status").and_then(Value::as_str) == Some("success");
                Some(if submitted { Phase::Monitor } else { Phase::Escalate })
            }
            other => other.successor(),
        }
    }

    fn retry_policy(&self, state: Phase) -> Option<RetryPolicy> {
        matches!(state, Phase::Classify | Phase::GatherEvidence | Phase::Submit)
            .then(|| self.retry_policy.clone())
    }

    fn breaker(&self, state: Phase) -> Option<Arc<CircuitBreaker>> {
        (state == Phase::Submit).then(|| self.breaker.clone())
    }
}

/// Drives disputes through the full pipeline with checkpointing, retry and
/// circuit breaking wired in.
pub struct DisputeOrchestrator {
    flow: DisputeFlow,
    engine: WorkflowEngine,
    log: Arc<ExecutionLog>,
}

impl DisputeOrchestrator {
    /// Orchestrator over the given checkpoint store with default policies.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self::with_policies(
            store,
            RetryPolicy::default(),
            Arc::new(CircuitBreaker::new(5, Duration::from_secs(30))),
        )
    }

    pub fn with_policies(
        store: Arc<dyn CheckpointStore>,
        retry_policy: RetryPolicy,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let log = Arc::new(ExecutionLog::new());
        let engine = WorkflowEngine::new(store).with_sink(log.clone());
        Self {
            flow: DisputeFlow::new(retry_policy, breaker),
            engine,
            log,
        }
    }

    /// Build the orchestrator from configuration: networked cache as the
    /// first persistence tier when a cache URL is configured, local
    /// checkpoint files otherwise (and always as the fallback).
    pub fn from_config(config: &ResolvaConfig) -> Self {
        let files = FileCheckpointStore::new(&config.checkpoint_dir);
        let store: Arc<dyn CheckpointStore> = if config.cache_url.is_empty() {
            Arc::new(files)
        } else {
            let cache = CacheCheckpointStore::with_ttl(
                KvCacheClient::new(config.cache_url.clone()),
                Duration::from_secs(config.cache_ttl_secs),
            );
            Arc::new(TieredCheckpointStore::new(cache, files))
        };

        Self::with_policies(
            store,
            config.retry_policy(),
            Arc::new(CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_timeout_secs),
            )),
        )
    }

    pub fn register_handler(
        &mut self,
        phase: Phase,
        handler: Arc<dyn PhaseHandler>,
    ) -> Result<(), ResolvaError> {
        self.flow.register_handler(phase, handler)
    }

    /// Wire in the built-in offline handlers for the five working phases.
    pub fn register_default_handlers(&mut self) -> Result<(), ResolvaError> {
        self.register_handler(Phase::Classify, Arc::new(ClassifyHandler))?;
        self.register_handler(Phase::GatherEvidence, Arc::new(EvidenceHandler))?;
        self.register_handler(Phase::Validate, Arc::new(ValidationHandler::new()))?;
        self.register_handler(Phase::Submit, Arc::new(SubmissionHandler))?;
        self.register_handler(Phase::Monitor, Arc::new(MonitorHandler))?;
        Ok(())
    }

    pub fn execution_log(&self) -> Arc<ExecutionLog> {
        self.log.clone()
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        self.engine.store()
    }

    /// Restore the latest checkpointed workflow for a task, if any.
    pub async fn recover_workflow_from_checkpoint(
        &self,
        task_id: &str,
    ) -> Result<Option<WorkflowState<Phase>>, ResolvaError> {
        self.engine.recover(task_id).await
    }
}

#[async_trait]
impl Orchestrate for DisputeOrchestrator {
    type State = Phase;

    async fn run_workflow(&self, task: &Task) -> Result<WorkflowState<Phase>, ResolvaError> {
        match self.engine.run(&self.flow, task).await {
            Ok(workflow) => Ok(workflow),
            Err(err) => {
                self.log
                    .log_step("EXECUTE", StepStatus::Failure, None, Some(err.to_string()))
                    .ok();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, MemoryCheckpointStore};
    use crate::state_machine::TaskSnapshot;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    fn orchestrator(store: Arc<dyn CheckpointStore>) -> DisputeOrchestrator {
        DisputeOrchestrator::with_policies(
            store,
            fast_policy(3),
            Arc::new(CircuitBreaker::new(5, Duration::from_secs(30))),
        )
    }

    fn strong_case() -> Value {
        json!({
            "task_id": "t1",
            "description": "I was charged twice for the same order",
            "transaction_id": "tx-1",
            "order_id": "o-1",
        })
    }

    /// Wraps another handler, counting invocations.
    struct Probe<H> {
        inner: H,
        calls: AtomicU32,
    }

    impl<H> Probe<H> {
        fn new(inner: H) -> Arc<Self> {
            Arc::new(Self {
                inner,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<H: PhaseHandler> PhaseHandler for Probe<H> {
        async fn handle(&self, snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.handle(snapshot).await
        }
    }

    /// Fails the first `failures` calls, then delegates.
    struct Flaky<H> {
        inner: H,
        failures: u32,
        calls: AtomicU32,
    }

    impl<H> Flaky<H> {
        fn new(inner: H, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                inner,
                failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<H: PhaseHandler> PhaseHandler for Flaky<H> {
        async fn handle(&self, snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                anyhow::bail!("upstream timeout on call {call}");
            }
            self.inner.handle(snapshot).await
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_monitor_with_all_phase_keys() {
        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        orch.register_default_handlers().unwrap();

        let workflow = orch.execute(&strong_case()).await.unwrap();

        assert_eq!(workflow.current_state, Phase::Monitor);
        assert_eq!(
            workflow.state_history,
            vec![
                Phase::Classify,
                Phase::GatherEvidence,
                Phase::Validate,
                Phase::Submit,
                Phase::Monitor,
            ]
        );
        // Every phase contributed keys to the accumulated context.
        for key in [
            "dispute_category",
            "evidence_count",
            "validation_passed",
            "submission_status",
            "monitor_status",
        ] {
            assert!(workflow.accumulated_data.contains_key(key), "missing {key}");
        }
        assert!(workflow.invariant_violations.is_empty());
    }

    #[tokio::test]
    async fn failed_validation_escalates_and_skips_submit() {
        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        let submit_probe = Probe::new(SubmissionHandler);
        orch.register_handler(Phase::Classify, Arc::new(ClassifyHandler))
            .unwrap();
        orch.register_handler(Phase::GatherEvidence, Arc::new(EvidenceHandler))
            .unwrap();
        // Demands more evidence than the case can produce.
        orch.register_handler(Phase::Validate, Arc::new(ValidationHandler::with_min_evidence(10)))
            .unwrap();
        orch.register_handler(Phase::Submit, submit_probe.clone())
            .unwrap();
        orch.register_handler(Phase::Monitor, Arc::new(MonitorHandler))
            .unwrap();

        let workflow = orch.execute(&strong_case()).await.unwrap();

        assert_eq!(workflow.current_state, Phase::Escalate);
        assert_eq!(
            workflow.state_history,
            vec![Phase::Classify, Phase::GatherEvidence, Phase::Validate]
        );
        assert_eq!(submit_probe.calls(), 0);
        assert_eq!(workflow.accumulated_data["validation_passed"], json!(false));
    }

    #[tokio::test]
    async fn failed_submission_escalates() {
        struct RejectedSubmission;

        #[async_trait]
        impl PhaseHandler for RejectedSubmission {
            async fn handle(&self, _snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
                let mut output = JsonMap::new();
                output.insert("submission_status".into(), json!("rejected"));
                Ok(output)
            }
        }

        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        orch.register_handler(Phase::Classify, Arc::new(ClassifyHandler))
            .unwrap();
        orch.register_handler(Phase::GatherEvidence, Arc::new(EvidenceHandler))
            .unwrap();
        orch.register_handler(Phase::Validate, Arc::new(ValidationHandler::new()))
            .unwrap();
        orch.register_handler(Phase::Submit, Arc::new(RejectedSubmission))
            .unwrap();
        orch.register_handler(Phase::Monitor, Arc::new(MonitorHandler))
            .unwrap();

        let workflow = orch.execute(&strong_case()).await.unwrap();
        assert_eq!(workflow.current_state, Phase::Escalate);
        assert_eq!(workflow.state_history.last(), Some(&Phase::Submit));
    }

    #[tokio::test]
    async fn transient_classify_failures_are_retried() {
        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        let classify = Flaky::new(ClassifyHandler, 2);
        orch.register_handler(Phase::Classify, classify.clone()).unwrap();
        orch.register_handler(Phase::GatherEvidence, Arc::new(EvidenceHandler))
            .unwrap();
        orch.register_handler(Phase::Validate, Arc::new(ValidationHandler::new()))
            .unwrap();
        orch.register_handler(Phase::Submit, Arc::new(SubmissionHandler))
            .unwrap();
        orch.register_handler(Phase::Monitor, Arc::new(MonitorHandler))
            .unwrap();

        let workflow = orch.execute(&strong_case()).await.unwrap();

        assert_eq!(classify.calls(), 3);
        assert_eq!(workflow.current_state, Phase::Monitor);
        assert_eq!(workflow.retry_count, 2);
    }

    #[tokio::test]
    async fn resume_from_gather_evidence_checkpoint() {
        let store = Arc::new(MemoryCheckpointStore::new());

        // Seed the checkpoint a crashed run would have left behind: CLASSIFY
        // and GATHER_EVIDENCE completed, VALIDATE never started.
        let mut crashed = WorkflowState::new("t2", Phase::Classify);
        let mut output = JsonMap::new();
        output.insert("dispute_category".into(), json!("duplicate_charge"));
        output.insert("priority".into(), json!("normal"));
        crashed.merge_output(&output);
        crashed.record_phase(Phase::Classify);
        let mut output = JsonMap::new();
        output.insert("evidence_count".into(), json!(3));
        output.insert("evidence".into(), json!(["customer_statement"]));
        crashed.merge_output(&output);
        crashed.record_phase(Phase::GatherEvidence);
        store
            .save(&Checkpoint::for_workflow(&crashed, 2).unwrap())
            .await
            .unwrap();

        let mut orch = orchestrator(store);
        let classify_probe = Probe::new(ClassifyHandler);
        let evidence_probe = Probe::new(EvidenceHandler);
        orch.register_handler(Phase::Classify, classify_probe.clone())
            .unwrap();
        orch.register_handler(Phase::GatherEvidence, evidence_probe.clone())
            .unwrap();
        orch.register_handler(Phase::Validate, Arc::new(ValidationHandler::new()))
            .unwrap();
        orch.register_handler(Phase::Submit, Arc::new(SubmissionHandler))
            .unwrap();
        orch.register_handler(Phase::Monitor, Arc::new(MonitorHandler))
            .unwrap();

        let workflow = orch.execute(&json!({"task_id": "t2"})).await.unwrap();

        assert_eq!(classify_probe.calls(), 0);
        assert_eq!(evidence_probe.calls(), 0);
        assert_eq!(workflow.current_state, Phase::Monitor);
        assert_eq!(
            workflow.state_history,
            vec![
                Phase::Classify,
                Phase::GatherEvidence,
                Phase::Validate,
                Phase::Submit,
                Phase::Monitor,
            ]
        );
        // Context from the pre-crash phases survived the resume.
        assert_eq!(
            workflow.accumulated_data["dispute_category"],
            json!("duplicate_charge")
        );
    }

    #[tokio::test]
    async fn exhausted_submit_retries_count_as_one_breaker_failure() {
        struct AlwaysDown;

        #[async_trait]
        impl PhaseHandler for AlwaysDown {
            async fn handle(&self, _snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
                anyhow::bail!("processor endpoint down")
            }
        }

        let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_secs(60)));
        let mut orch = DisputeOrchestrator::with_policies(
            Arc::new(MemoryCheckpointStore::new()),
            fast_policy(2),
            breaker.clone(),
        );
        orch.register_handler(Phase::Classify, Arc::new(ClassifyHandler))
            .unwrap();
        orch.register_handler(Phase::GatherEvidence, Arc::new(EvidenceHandler))
            .unwrap();
        orch.register_handler(Phase::Validate, Arc::new(ValidationHandler::new()))
            .unwrap();
        orch.register_handler(Phase::Submit, Arc::new(AlwaysDown)).unwrap();
        orch.register_handler(Phase::Monitor, Arc::new(MonitorHandler))
            .unwrap();

        let err = orch.execute(&strong_case()).await.unwrap_err();
        assert!(matches!(err, ResolvaError::PhaseFailed { ref phase, attempts: 3, .. } if phase == "SUBMIT"));

        // Three handler attempts, one breaker failure: threshold 2 not reached.
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.status(), crate::breaker::BreakerStatus::Closed);
    }

    #[tokio::test]
    async fn open_breaker_rejects_submit_without_invoking_handler() {
        struct AlwaysDown;

        #[async_trait]
        impl PhaseHandler for AlwaysDown {
            async fn handle(&self, _snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
                anyhow::bail!("processor endpoint down")
            }
        }

        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        let mut orch = DisputeOrchestrator::with_policies(
            Arc::new(MemoryCheckpointStore::new()),
            fast_policy(1),
            breaker.clone(),
        );
        let submit = Probe::new(AlwaysDown);
        orch.register_handler(Phase::Classify, Arc::new(ClassifyHandler))
            .unwrap();
        orch.register_handler(Phase::GatherEvidence, Arc::new(EvidenceHandler))
            .unwrap();
        orch.register_handler(Phase::Validate, Arc::new(ValidationHandler::new()))
            .unwrap();
        orch.register_handler(Phase::Submit, submit.clone()).unwrap();
        orch.register_handler(Phase::Monitor, Arc::new(MonitorHandler))
            .unwrap();

        // First dispute trips the breaker (threshold 1).
        let first = json!({
            "task_id": "d1",
            "description": "fraudulent charge",
            "transaction_id": "tx-1",
        });
        assert!(orch.execute(&first).await.is_err());
        let calls_after_first = submit.calls();
        assert_eq!(breaker.status(), crate::breaker::BreakerStatus::Open);

        // Second dispute is rejected at SUBMIT without touching the handler;
        // the breaker shields the shared downstream across tasks.
        let second = json!({
            "task_id": "d2",
            "description": "fraudulent charge",
            "transaction_id": "tx-2",
        });
        let err = orch.execute(&second).await.unwrap_err();
        assert!(matches!(err, ResolvaError::CircuitOpen { .. }));
        assert_eq!(submit.calls(), calls_after_first);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        orch.register_handler(Phase::Classify, Arc::new(ClassifyHandler))
            .unwrap();
        let err = orch
            .register_handler(Phase::Classify, Arc::new(ClassifyHandler))
            .unwrap_err();
        assert!(matches!(err, ResolvaError::HandlerAlreadyRegistered(ref s) if s == "CLASSIFY"));
    }

    #[tokio::test]
    async fn execution_log_tracks_completed_phases() {
        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        orch.register_default_handlers().unwrap();

        orch.execute(&strong_case()).await.unwrap();

        let entries = orch.execution_log().entries();
        let steps: Vec<&str> = entries.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(
            steps,
            vec!["CLASSIFY", "GATHER_EVIDENCE", "VALIDATE", "SUBMIT", "MONITOR"]
        );
        assert!(entries.iter().all(|e| e.status == StepStatus::Success));

        let summary = crate::orchestrator::aggregate_results(&entries).unwrap();
        assert_eq!(summary.succeeded, 5);
        assert!((summary.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn validation_error_precedes_any_handler() {
        let mut orch = orchestrator(Arc::new(MemoryCheckpointStore::new()));
        let classify_probe = Probe::new(ClassifyHandler);
        orch.register_handler(Phase::Classify, classify_probe.clone())
            .unwrap();

        let err = orch.execute(&json!({"task_id": ""})).await.unwrap_err();
        assert!(matches!(err, ResolvaError::Validation(_)));
        assert_eq!(classify_probe.calls(), 0);
    }
}
