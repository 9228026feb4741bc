//! Deployment audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of deployment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployEventType {
    // ===== Planning =====
    /// A plan was computed and validated.
    PlanComputed,

    // ===== Steps =====
    /// A node was created by the backend.
    StepApplied,
    /// A node was already applied in a previous run.
    StepSkipped,
    /// A node was validated but left for an operator.
    StepDeferred,
    /// A provisioning call failed.
    StepFailed,
    /// A grant was issued.
    GrantIssued,
    /// An output binding was reported.
    OutputReported,

    // ===== Run =====
    /// Every planned node is applied.
    ApplyCompleted,
    /// The run stopped early (failure or abort).
    ApplyHalted,
}

impl std::fmt::Display for DeployEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlanComputed => write!(f, "PLAN_COMPUTED"),
            Self::StepApplied => write!(f, "STEP_APPLIED"),
            Self::StepSkipped => write!(f, "STEP_SKIPPED"),
            Self::StepDeferred => write!(f, "STEP_DEFERRED"),
            Self::StepFailed => write!(f, "STEP_FAILED"),
            Self::GrantIssued => write!(f, "GRANT_ISSUED"),
            Self::OutputReported => write!(f, "OUTPUT_REPORTED"),
            Self::ApplyCompleted => write!(f, "APPLY_COMPLETED"),
            Self::ApplyHalted => write!(f, "APPLY_HALTED"),
        }
    }
}

/// A deployment audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    pub event_type: DeployEventType,

    /// Topology (stack) the event belongs to.
    pub topology: String,

    /// Apply run the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    /// Node reference, e.g. `function:google-ads`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// 1-based plan step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl DeployEvent {
    pub fn new(event_type: DeployEventType, topology: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type,
            topology: topology.into(),
            run_id: None,
            node: None,
            step: None,
            detail: None,
            duration_ms: None,
            error: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn builder(event_type: DeployEventType, topology: impl Into<String>) -> DeployEventBuilder {
        DeployEventBuilder::new(event_type, topology)
    }

    /// Format the event as a human-readable log line.
    ///
    /// Format: `[timestamp] EVENT_TYPE topology=... [node=...] [step=...]`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} topology={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event_type,
            self.topology,
        );

        if let Some(ref node) = self.node {
            line.push_str(&format!(" node={}", node));
        }
        if let Some(step) = self.step {
            line.push_str(&format!(" step={}", step));
        }
        if let Some(ref detail) = self.detail {
            line.push_str(&format!(" detail=\"{}\"", detail.replace('"', "'")));
        }
        if let Some(duration) = self.duration_ms {
            line.push_str(&format!(" duration_ms={}", duration));
        }
        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        line
    }
}

/// Builder for deployment events.
#[derive(Debug)]
pub struct DeployEventBuilder {
    event: DeployEvent,
}

impl DeployEventBuilder {
    pub fn new(event_type: DeployEventType, topology: impl Into<String>) -> Self {
        Self {
            event: DeployEvent::new(event_type, topology),
        }
    }

    pub fn run_id(mut self, run_id: Uuid) -> Self {
        self.event.run_id = Some(run_id);
        self
    }

    pub fn node(mut self, node: impl ToString) -> Self {
        self.event.node = Some(node.to_string());
        self
    }

    pub fn step(mut self, step: usize) -> Self {
        self.event.step = Some(step);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.event.detail = Some(detail.into());
        self
    }

    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.event.duration_ms = Some(duration);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.event.error = Some(error.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.event.meta = meta;
        self
    }

    pub fn build(self) -> DeployEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_line_includes_set_fields_only() {
        let event = DeployEvent::builder(DeployEventType::StepFailed, "ads")
            .node("function:storage")
            .step(3)
            .error("throttled \"try again\"")
            .build();
        let line = event.to_log_line();

        assert!(line.contains("STEP_FAILED topology=ads"));
        assert!(line.contains("node=function:storage"));
        assert!(line.contains("step=3"));
        assert!(line.contains("error=\"throttled 'try again'\""));
        assert!(!line.contains("duration_ms"));
    }

    #[test]
    fn test_event_serializes_snake_case_type() {
        let event = DeployEvent::new(DeployEventType::GrantIssued, "ads");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "grant_issued");
        assert!(json.get("node").is_none());
        assert!(json.get("meta").is_none());
    }
}
