//! Stackwire permission wiring.
//!
//! - [`binder`]: least-privilege grant derivation from declared needs
//! - [`contract`]: action group validation and attachment rules
//! - [`openapi`]: OpenAPI documents handed to the agent runtime
//! - [`invocation`]: resolving agent calls to functions and operations

pub mod binder;
pub mod contract;
pub mod invocation;
pub mod openapi;

pub use binder::{PermissionBinder, PrincipalDirectory, pending_grants};
pub use contract::{ActionGroupContract, AttachOutcome, check_schema, validate_agent, validate_group};
pub use invocation::{
    ActionInvocation, InvocationError, InvocationParameter, InvocationRouter, ResolvedInvocation,
};
pub use openapi::render_openapi;
