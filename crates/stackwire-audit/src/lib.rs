//! # stackwire-audit
//!
//! Audit trail for deployment runs.
//!
//! Every apply run records what it planned, which steps it applied, skipped,
//! deferred or failed, which grants it issued and how the run ended.
//!
//! | Event Type | Description |
//! |------------|-------------|
//! | `PlanComputed` | Plan validated |
//! | `StepApplied` | Node created by the backend |
//! | `StepSkipped` | Node already applied by an earlier run |
//! | `StepDeferred` | Node left for an operator (manual attach) |
//! | `StepFailed` | Provisioning call failed |
//! | `GrantIssued` | Grant applied |
//! | `OutputReported` | Output binding reported |
//! | `ApplyCompleted` | Every node applied |
//! | `ApplyHalted` | Run stopped on failure or abort |
//!
//! Events go to a JSON Lines file, the console, both, or nowhere, as selected
//! by the stack's `deployment.audit` section.

pub mod error;
pub mod event;
pub mod logger;
pub mod storage;

pub use error::AuditError;
pub use event::{DeployEvent, DeployEventBuilder, DeployEventType};
pub use logger::{AuditFilter, AuditLogger};
pub use storage::{
    AuditStorage, ConsoleStorage, DualStorage, FileStorage, MemoryStorage, NullStorage,
};
