//! Audit logger.
//!
//! Provides the `AuditLogger` type with one helper per deployment event.

use std::sync::Arc;
use uuid::Uuid;

use stackwire_core::AuditConfig;

use crate::error::AuditError;
use crate::event::{DeployEvent, DeployEventType};
use crate::storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};

/// Records deployment events to a storage backend.
pub struct AuditLogger {
    enabled: bool,
    run_id: Uuid,
    storage: Arc<dyn AuditStorage>,
}

impl AuditLogger {
    /// Create a logger from configuration.
    ///
    /// `file` selects JSON Lines output, `stdout` echoes to the console; with
    /// neither the logger is enabled but discards events.
    pub fn new(config: &AuditConfig) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = if !config.enabled {
            Arc::new(NullStorage::new())
        } else {
            match (&config.file, config.stdout) {
                (Some(path), true) => Arc::new(DualStorage::new(path)?),
                (Some(path), false) => Arc::new(FileStorage::new(path)?),
                (None, true) => Arc::new(ConsoleStorage::new()),
                (None, false) => Arc::new(NullStorage::new()),
            }
        };

        Ok(Self {
            enabled: config.enabled,
            run_id: Uuid::new_v4(),
            storage,
        })
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(storage: Arc<dyn AuditStorage>) -> Self {
        Self {
            enabled: true,
            run_id: Uuid::new_v4(),
            storage,
        }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            run_id: Uuid::new_v4(),
            storage: Arc::new(NullStorage::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Identifier shared by every event this logger records.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Log an audit event.
    pub async fn log(&self, mut event: DeployEvent) -> Result<(), AuditError> {
        if !self.enabled {
            return Ok(());
        }
        event.run_id.get_or_insert(self.run_id);

        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            topology = %event.topology,
            node = event.node.as_deref().unwrap_or("-"),
            "Audit event"
        );

        self.storage.store(event).await
    }

    pub async fn log_plan_computed(&self, topology: &str, nodes: usize) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::PlanComputed, topology)
            .detail(format!("{} nodes planned", nodes))
            .build();
        self.log(event).await
    }

    pub async fn log_step_applied(
        &self,
        topology: &str,
        node: &str,
        step: usize,
        identifier: &str,
        duration_ms: u64,
    ) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::StepApplied, topology)
            .node(node)
            .step(step)
            .detail(identifier)
            .duration_ms(duration_ms)
            .build();
        self.log(event).await
    }

    pub async fn log_step_skipped(&self, topology: &str, node: &str, step: usize) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::StepSkipped, topology)
            .node(node)
            .step(step)
            .detail("already applied")
            .build();
        self.log(event).await
    }

    pub async fn log_step_deferred(
        &self,
        topology: &str,
        node: &str,
        step: usize,
        reason: &str,
    ) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::StepDeferred, topology)
            .node(node)
            .step(step)
            .detail(reason)
            .build();
        self.log(event).await
    }

    pub async fn log_step_failed(
        &self,
        topology: &str,
        node: &str,
        step: usize,
        error: &str,
    ) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::StepFailed, topology)
            .node(node)
            .step(step)
            .error(error)
            .build();
        self.log(event).await
    }

    pub async fn log_grant_issued(&self, topology: &str, grant: &str) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::GrantIssued, topology)
            .detail(grant)
            .build();
        self.log(event).await
    }

    pub async fn log_output_reported(&self, topology: &str, name: &str, value: &str) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::OutputReported, topology)
            .detail(format!("{}={}", name, value))
            .build();
        self.log(event).await
    }

    pub async fn log_apply_completed(
        &self,
        topology: &str,
        applied: usize,
        skipped: usize,
    ) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::ApplyCompleted, topology)
            .detail(format!("{} applied, {} skipped", applied, skipped))
            .build();
        self.log(event).await
    }

    pub async fn log_apply_halted(&self, topology: &str, reason: &str) -> Result<(), AuditError> {
        let event = DeployEvent::builder(DeployEventType::ApplyHalted, topology)
            .error(reason)
            .build();
        self.log(event).await
    }

    /// Query recorded events.
    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<DeployEvent>, AuditError> {
        self.storage.query(filter).await
    }
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub topology: Option<String>,
    pub event_type: Option<DeployEventType>,
    pub node: Option<String>,
    pub run_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, event: &DeployEvent) -> bool {
        if let Some(ref topology) = self.topology
            && &event.topology != topology
        {
            return false;
        }
        if let Some(event_type) = self.event_type
            && event.event_type != event_type
        {
            return false;
        }
        if let Some(ref node) = self.node
            && event.node.as_ref() != Some(node)
        {
            return false;
        }
        if let Some(run_id) = self.run_id
            && event.run_id != Some(run_id)
        {
            return false;
        }
        true
    }

    /// Matching events, honoring `limit`.
    pub fn apply<'a>(&self, events: impl Iterator<Item = &'a DeployEvent>) -> Vec<DeployEvent> {
        events
            .filter(|e| self.matches(e))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
