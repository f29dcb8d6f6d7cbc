//! Built-in phase handlers used by the demo command and as defaults when no
//! external collaborator is wired in.
//!
//! Real deployments register their own [`PhaseHandler`] implementations (LLM
//! classifiers, evidence-lookup adapters, processor submission clients);
//! these built-ins keep the full pipeline runnable offline.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::router::{DisputeRouter, PrioritySelector};
use crate::state_machine::{JsonMap, PhaseHandler, TaskSnapshot};

fn output(pairs: Vec<(&str, Value)>) -> JsonMap {
    let mut map = JsonMap::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value);
    }
    map
}

/// CLASSIFY: keyword-based categorization of the dispute description.
pub struct ClassifyHandler;

#[async_trait]
impl PhaseHandler for ClassifyHandler {
    async fn handle(&self, snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
        let description = snapshot
            .payload
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let category = DisputeRouter::route(description);
        let priority = PrioritySelector::select(description);

        Ok(output(vec![
            ("dispute_category", json!(category)),
            ("priority", json!(priority.to_string())),
            ("classified_at", json!(Utc::now().to_rfc3339())),
        ]))
    }
}

/// GATHER_EVIDENCE: collect the records available for the disputed charge.
pub struct EvidenceHandler;

#[async_trait]
impl PhaseHandler for EvidenceHandler {
    async fn handle(&self, snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
        let mut evidence = vec![json!("customer_statement")];
        if snapshot.payload.contains_key("transaction_id") {
            evidence.push(json!("transaction_record"));
        }
        if snapshot.payload.contains_key("order_id") {
            evidence.push(json!("order_receipt"));
        }

        Ok(output(vec![
            ("evidence_count", json!(evidence.len())),
            ("evidence", Value::Array(evidence)),
        ]))
    }
}

/// VALIDATE: decide whether the gathered case is strong enough to submit.
///
/// Weak cases are a recoverable condition, so the verdict travels in the
/// output (`validation_passed`), never as an error.
pub struct ValidationHandler {
    min_evidence: u64,
}

impl ValidationHandler {
    pub fn new() -> Self {
        Self { min_evidence: 2 }
    }

    pub fn with_min_evidence(min_evidence: u64) -> Self {
        Self { min_evidence }
    }
}

impl Default for ValidationHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhaseHandler for ValidationHandler {
    async fn handle(&self, snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
        let evidence_count = snapshot
            .accumulated
            .get("evidence_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let category = snapshot
            .accumulated
            .get("dispute_category")
            .and_then(Value::as_str)
            .unwrap_or("general_inquiry");

        let enough_evidence = evidence_count >= self.min_evidence;
        let known_category = category != "general_inquiry";
        let passed = enough_evidence && known_category;

        let notes = if passed {
            "case complete".to_string()
        } else if !known_category {
            format!("category {category} needs manual review")
        } else {
            format!(
                "insufficient evidence: {evidence_count} of {} required",
                self.min_evidence
            )
        };

        Ok(output(vec![
            ("validation_passed", json!(passed)),
            ("validation_notes", json!(notes)),
        ]))
    }
}

/// SUBMIT: file the dispute with the payment processor.
pub struct SubmissionHandler;

#[async_trait]
impl PhaseHandler for SubmissionHandler {
    async fn handle(&self, _snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
        Ok(output(vec![
            ("submission_status", json!("success")),
            ("submission_id", json!(Uuid::new_v4().to_string())),
            ("submitted_at", json!(Utc::now().to_rfc3339())),
        ]))
    }
}

/// MONITOR: set up the follow-up schedule for the filed dispute.
pub struct MonitorHandler;

#[async_trait]
impl PhaseHandler for MonitorHandler {
    async fn handle(&self, _snapshot: &TaskSnapshot) -> anyhow::Result<JsonMap> {
        Ok(output(vec![
            ("monitor_status", json!("watching")),
            ("next_check_hours", json!(24)),
        ]))
    }
}
