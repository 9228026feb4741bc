//! Apply errors.

use stackwire_core::{NodeId, Topology, ValidationError};

use crate::lock::LockError;
use crate::provisioner::ProvisionError;
use crate::state::StateError;

/// Why an apply stopped.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A provisioning call failed. Carries the plan position and what the
    /// failing node depends on, so a reader knows what did succeed.
    #[error(
        "step {step} ({node}) failed during {action}{}: {source}",
        describe_dependencies(.depends_on)
    )]
    Provisioning {
        step: usize,
        node: NodeId,
        action: String,
        depends_on: Vec<NodeId>,
        #[source]
        source: ProvisionError,
    },

    #[error("reporting output '{name}' failed: {source}")]
    Output {
        name: String,
        #[source]
        source: ProvisionError,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("apply aborted before step {next_step}")]
    Aborted { next_step: usize },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("no handle recorded for {0}")]
    MissingHandle(NodeId),

    #[error("{node} has no attribute '{attr}'")]
    MissingAttribute { node: NodeId, attr: String },
}

impl ApplyError {
    /// Plan step the error is attached to, if any.
    pub fn step(&self) -> Option<usize> {
        match self {
            ApplyError::Provisioning { step, .. } => Some(*step),
            ApplyError::Aborted { next_step } => Some(*next_step),
            _ => None,
        }
    }
}

fn describe_dependencies(depends_on: &[NodeId]) -> String {
    if depends_on.is_empty() {
        return String::new();
    }
    let names: Vec<String> = depends_on.iter().map(ToString::to_string).collect();
    format!(" (depends on {})", names.join(", "))
}

/// A failed apply and the topology it left behind.
///
/// Every step before the failure is recorded in `topology`; re-applying the
/// same plan resumes from the first unapplied node.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ApplyFailure {
    #[source]
    pub error: ApplyError,
    pub topology: Topology,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisioning_message_names_step_and_dependencies() {
        let err = ApplyError::Provisioning {
            step: 3,
            node: NodeId::function("F1"),
            action: "create_function".into(),
            depends_on: vec![NodeId::resource("R1"), NodeId::resource("R2")],
            source: ProvisionError::Unavailable("throttled".into()),
        };
        let message = err.to_string();
        assert!(message.starts_with("step 3 (function:F1) failed during create_function"));
        assert!(message.contains("depends on resource:R1, resource:R2"));
        assert!(message.ends_with("unavailable: throttled"));
        assert_eq!(err.step(), Some(3));
    }

    #[test]
    fn test_aborted_message() {
        let err = ApplyError::Aborted { next_step: 4 };
        assert_eq!(err.to_string(), "apply aborted before step 4");
    }
}
