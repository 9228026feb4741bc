//! # stackwire-runtime
//!
//! Applies execution orders against a provisioning backend.
//!
//! - [`Deployer`] walks the plan tier by tier with bounded concurrency,
//!   persisting a [`Topology`](stackwire_core::Topology) after every tier.
//! - [`Provisioner`] is the seam to the cloud control plane;
//!   [`LocalProvisioner`] is an in-process simulation with failure injection.
//! - [`StateStore`] and [`DeploymentLock`] make re-applies resume safely and
//!   keep two applies off the same topology.
//! - [`HandlerSet`] routes agent invocations to in-process function handlers.

pub mod abort;
pub mod error;
pub mod handler;
pub mod local;
pub mod lock;
pub mod orchestrator;
pub mod provisioner;
pub mod state;

pub use abort::AbortSignal;
pub use error::{ApplyError, ApplyFailure};
pub use handler::{Handler, HandlerResponse, HandlerSet, envelope};
pub use local::{CallKind, LocalProvisioner, ProvisionCall};
pub use lock::{DeploymentLock, FileLock, LockError, LockGuard, MemoryLock};
pub use orchestrator::{Deployer, NEXT_STEPS_OUTPUT, RunSummary, resolve_outputs};
pub use provisioner::{AGENT_SERVICE, FUNCTION_SERVICE, PrincipalSpec, ProvisionError, Provisioner};
pub use state::{FileStateStore, MemoryStateStore, StateError, StateStore};
