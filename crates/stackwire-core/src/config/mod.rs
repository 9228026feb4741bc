//! Stack configuration.
//!
//! A stack is described by a single `stack.yaml` plus optional per-file
//! definitions that are merged in by [`StackConfig::load_with_context`]:
//!
//! - **stack.yaml**: resources, inline functions, agents, outputs and deployment settings
//! - **functions/*.yaml**: one function definition per file (`functions_dir`)
//! - **action_groups/*.yaml**: one action group per file (per agent `action_groups_dir`)
//!
//! `.json` and `.toml` files are accepted wherever YAML is.

pub mod agent;
pub mod deployment;
pub mod function;
pub mod resource;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use agent::{
    ActionGroupDef, AgentDef, AttachMode, HttpVerb, OperationDef, ParameterDef, ParameterLocation,
};
pub use deployment::{AuditConfig, DeploymentConfig};
pub use function::{AccessLevel, EnvValue, FunctionDef, GrantRequirement};
pub use resource::{ResourceDef, ResourceKind};

/// Complete stack declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stack name; also the topology identifier.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Target account, expanded into physical names.
    #[serde(default = "default_account")]
    pub account: String,

    /// Target region.
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub resources: Vec<ResourceDef>,

    /// Inline function definitions.
    #[serde(default)]
    pub functions: Vec<FunctionDef>,

    /// Directory containing function definition files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions_dir: Option<PathBuf>,

    /// Individual function definition files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_files: Vec<PathBuf>,

    #[serde(default)]
    pub agents: Vec<AgentDef>,

    /// Named output bindings in addition to the per-node defaults.
    #[serde(default)]
    pub outputs: Vec<OutputDef>,

    #[serde(default)]
    pub deployment: DeploymentConfig,
}

impl StackConfig {
    /// Empty stack with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
            account: default_account(),
            region: default_region(),
            resources: Vec::new(),
            functions: Vec::new(),
            functions_dir: None,
            function_files: Vec::new(),
            agents: Vec::new(),
            outputs: Vec::new(),
            deployment: DeploymentConfig::default(),
        }
    }

    /// Load a stack file without resolving external references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        parse_by_extension(path, &content)
    }

    /// Parse a stack from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load a stack file and merge in function and action group files.
    ///
    /// Relative paths (including `deployment.state_file`, `deployment.lock_dir`
    /// and `deployment.audit.file`) resolve against the stack file's directory.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(functions_dir) = &config.functions_dir {
            let dir = resolve(&base_dir, functions_dir);
            if !dir.is_dir() {
                return Err(ConfigError::Config(format!(
                    "functions_dir '{}' is not a directory",
                    dir.display()
                )));
            }
            for file in definition_files(&dir)? {
                config.functions.push(FunctionDef::from_file(&file)?);
            }
        }

        for function_file in &config.function_files.clone() {
            config
                .functions
                .push(FunctionDef::from_file(resolve(&base_dir, function_file))?);
        }

        for agent in &mut config.agents {
            if let Some(groups_dir) = &agent.action_groups_dir {
                let dir = resolve(&base_dir, groups_dir);
                if !dir.is_dir() {
                    return Err(ConfigError::Config(format!(
                        "action_groups_dir '{}' of agent '{}' is not a directory",
                        dir.display(),
                        agent.id
                    )));
                }
                for file in definition_files(&dir)? {
                    agent.action_groups.push(ActionGroupDef::from_file(&file)?);
                }
            }
            for group_file in &agent.action_group_files.clone() {
                agent
                    .action_groups
                    .push(ActionGroupDef::from_file(resolve(&base_dir, group_file))?);
            }
        }

        let deployment = &mut config.deployment;
        deployment.lock_dir = resolve(&base_dir, &deployment.lock_dir);
        if let Some(state_file) = &deployment.state_file {
            deployment.state_file = Some(resolve(&base_dir, state_file));
        }
        if let Some(audit_file) = &deployment.audit.file {
            deployment.audit.file = Some(resolve(&base_dir, audit_file));
        }

        Ok(config)
    }

    /// Get a resource by id.
    pub fn resource(&self, id: &str) -> Option<&ResourceDef> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Get a function by id.
    pub fn function(&self, id: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.id == id)
    }

    /// Get an agent by id.
    pub fn agent(&self, id: &str) -> Option<&AgentDef> {
        self.agents.iter().find(|a| a.id == id)
    }
}

/// A named output binding: `attr` of the handle produced for `node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDef {
    pub name: String,

    /// Node reference, e.g. `agent:ad-optimizer` or `resource:api-keys`.
    pub node: String,

    #[serde(default = "default_output_attr")]
    pub attr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Parse `content` using the format implied by `path`'s extension (YAML by default).
pub(crate) fn parse_by_extension<T: DeserializeOwned>(
    path: &Path,
    content: &str,
) -> Result<T, ConfigError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(ConfigError::from),
        Some("toml") => toml::from_str(content).map_err(ConfigError::from),
        _ => serde_yaml::from_str(content).map_err(ConfigError::from),
    }
}

/// Definition files in `dir`, sorted by file name so load order is stable.
fn definition_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_definition = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e, "yaml" | "yml" | "json" | "toml"))
            .unwrap_or(false);
        if is_definition {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn default_account() -> String {
    "000000000000".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_output_attr() -> String {
    "arn".to_string()
}
