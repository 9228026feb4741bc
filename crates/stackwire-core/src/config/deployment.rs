//! Deployment run settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for an apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Maximum number of nodes of one tier applied at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// State file. Defaults to `<lock_dir>/<stack>.state.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Directory holding lock files (and the default state file).
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    /// Deployment audit trail.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            state_file: None,
            lock_dir: default_lock_dir(),
            audit: AuditConfig::default(),
        }
    }
}

impl DeploymentConfig {
    /// Concurrency limit, never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Resolved state file path for a stack.
    pub fn state_path(&self, stack_name: &str) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.lock_dir.join(format!("{}.state.json", stack_name)))
    }
}

/// Audit trail configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit events are recorded at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also print events to stdout.
    #[serde(default)]
    pub stdout: bool,

    /// JSON Lines file the events are appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stdout: false,
            file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from(".stackwire")
}
