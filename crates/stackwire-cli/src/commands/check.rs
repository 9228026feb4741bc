//! `stackwire check` command implementation.
//!
//! Validates a stack file:
//! - Loading (YAML syntax, function and action group files)
//! - Plan validation (ids, references, operation contracts, schemas)
//! - Warnings for declarations that plan but are likely mistakes

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use stackwire_core::{AttachMode, NodeId, StackConfig, ValidationError};
use stackwire_planner::{Planner, TierPlanner};

// ============================================================================
// Check Result Types
// ============================================================================

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational message.
    Info,
    /// Warning - the stack applies but probably not as intended.
    Warning,
    /// Error - the stack cannot be planned.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    pub message: String,
    /// File the finding was raised for.
    pub file: Option<PathBuf>,
    /// Location within the stack (e.g., "functions.analytics.env.BUCKET_NAME").
    pub location: Option<String>,
}

impl CheckFinding {
    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.into(),
            message: message.into(),
            file: None,
            location: None,
        }
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category: category.into(),
            message: message.into(),
            file: None,
            location: None,
        }
    }

    fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            category: category.into(),
            message: message.into(),
            file: None,
            location: None,
        }
    }

    fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    fn extend(&mut self, findings: impl IntoIterator<Item = CheckFinding>) {
        self.findings.extend(findings);
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Print human-readable summary.
    pub fn print_summary(&self) {
        let mut errors: Vec<_> = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        let mut warnings: Vec<_> = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect();
        let mut infos: Vec<_> = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Info)
            .collect();

        errors.sort_by(|a, b| a.category.cmp(&b.category));
        warnings.sort_by(|a, b| a.category.cmp(&b.category));
        infos.sort_by(|a, b| a.category.cmp(&b.category));

        if !errors.is_empty() {
            println!("\n❌ Errors ({}):", errors.len());
            println!("{}", "─".repeat(60));
            for finding in &errors {
                print_finding(finding);
            }
        }

        if !warnings.is_empty() {
            println!("\n⚠️  Warnings ({}):", warnings.len());
            println!("{}", "─".repeat(60));
            for finding in &warnings {
                print_finding(finding);
            }
        }

        // Info only when nothing more pressing is reported
        if !infos.is_empty() && errors.is_empty() && warnings.is_empty() {
            println!("\nℹ️  Info ({}):", infos.len());
            println!("{}", "─".repeat(60));
            for finding in &infos {
                print_finding(finding);
            }
        }

        println!();
        println!("{}", "═".repeat(60));
        if errors.is_empty() && warnings.is_empty() {
            println!("✅ All checks passed!");
        } else {
            println!(
                "Summary: {} error(s), {} warning(s)",
                errors.len(),
                warnings.len()
            );
            if !errors.is_empty() {
                println!("\n❌ Stack has errors that must be fixed.");
            }
        }
    }
}

fn print_finding(finding: &CheckFinding) {
    let icon = match finding.severity {
        Severity::Error => "✗",
        Severity::Warning => "⚠",
        Severity::Info => "ℹ",
    };

    let location = match (&finding.file, &finding.location) {
        (Some(f), Some(l)) => format!(" [{}:{}]", f.display(), l),
        (Some(f), None) => format!(" [{}]", f.display()),
        (None, Some(l)) => format!(" [{}]", l),
        (None, None) => String::new(),
    };

    println!(
        "  {} [{}]{}: {}",
        icon, finding.category, location, finding.message
    );
}

// ============================================================================
// Main Check Runner
// ============================================================================

/// Run all checks without printing.
pub fn run_quiet(stack_path: &Path) -> Result<CheckResults> {
    let mut results = CheckResults::new();

    // 1. Load the stack and its split-out files
    let config = match StackConfig::load_with_context(stack_path) {
        Ok(config) => config,
        Err(e) => {
            results.add(CheckFinding::error("load", e.to_string()).with_file(stack_path));
            return Ok(results);
        }
    };

    // 2. Plan validation. Output bindings are left to step 8 so their
    // findings point at `outputs.<name>`.
    let mut graph = config.clone();
    graph.outputs.clear();
    if let Err(e) = TierPlanner::new().plan(&graph) {
        results.add(validation_finding(&e).with_file(stack_path));
    }

    // 3. Environment references without a matching grant
    results.extend(check_env_grants(&config));

    // 4. Resources no function asks for
    results.extend(check_unused_resources(&config));

    // 5. Functions no agent can reach
    results.extend(check_unexposed_functions(&config));

    // 6. Manual attachment
    results.extend(check_attach_modes(&config));

    // 7. Operations the agent cannot tell apart
    results.extend(check_operation_docs(&config));

    // 8. Output bindings
    results.extend(check_outputs(&config));

    Ok(results)
}

/// Run `stackwire check`: print findings and fail on errors.
pub fn run(stack_path: &Path) -> Result<()> {
    println!("🔍 Checking stack {}...", stack_path.display());

    let results = run_quiet(stack_path)?;
    results.print_summary();

    if results.has_errors() {
        anyhow::bail!(
            "stack check failed with {} error(s) and {} warning(s)",
            results.error_count(),
            results.warning_count()
        );
    }
    Ok(())
}

fn validation_finding(error: &ValidationError) -> CheckFinding {
    let finding = CheckFinding::error(error.kind.as_str(), error.message.clone());
    match &error.node {
        Some(node) => finding.with_location(node.to_string()),
        None => finding,
    }
}

// ============================================================================
// Individual Checks
// ============================================================================

fn check_env_grants(config: &StackConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    for function in &config.functions {
        let granted: BTreeSet<&str> = function
            .required_grants
            .iter()
            .map(|g| g.resource.as_str())
            .collect();
        for (name, value) in &function.env {
            if let Some(resource) = value.resource_ref()
                && !granted.contains(resource)
            {
                findings.push(
                    CheckFinding::warning(
                        "env",
                        format!(
                            "function '{}' is told about resource '{}' but requests no access to it",
                            function.id, resource
                        ),
                    )
                    .with_location(format!("functions.{}.env.{}", function.id, name)),
                );
            }
        }
    }
    findings
}

fn check_unused_resources(config: &StackConfig) -> Vec<CheckFinding> {
    let used: BTreeSet<&str> = config
        .functions
        .iter()
        .flat_map(|f| {
            f.required_grants
                .iter()
                .map(|g| g.resource.as_str())
                .chain(f.resource_references())
        })
        .collect();

    config
        .resources
        .iter()
        .filter(|r| !used.contains(r.id.as_str()))
        .map(|r| {
            CheckFinding::warning(
                "resources",
                format!("resource '{}' is not used by any function", r.id),
            )
            .with_location(format!("resources.{}", r.id))
        })
        .collect()
}

fn check_unexposed_functions(config: &StackConfig) -> Vec<CheckFinding> {
    let targets: BTreeSet<&str> = config
        .agents
        .iter()
        .flat_map(|a| a.target_functions())
        .collect();

    config
        .functions
        .iter()
        .filter(|f| !targets.contains(f.id.as_str()))
        .map(|f| {
            CheckFinding::info(
                "functions",
                format!("function '{}' is not exposed through any action group", f.id),
            )
            .with_location(format!("functions.{}", f.id))
        })
        .collect()
}

fn check_attach_modes(config: &StackConfig) -> Vec<CheckFinding> {
    config
        .agents
        .iter()
        .filter(|a| a.attach_mode == AttachMode::Manual && !a.action_groups.is_empty())
        .map(|a| {
            CheckFinding::warning(
                "agents",
                format!(
                    "agent '{}' uses manual attachment; {} action group(s) must be attached by hand after apply",
                    a.id,
                    a.action_groups.len()
                ),
            )
            .with_location(format!("agents.{}.attach_mode", a.id))
        })
        .collect()
}

fn check_operation_docs(config: &StackConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    for agent in &config.agents {
        if agent.instruction.trim().is_empty() {
            findings.push(
                CheckFinding::warning("agents", format!("agent '{}' has no instruction", agent.id))
                    .with_location(format!("agents.{}.instruction", agent.id)),
            );
        }
        for group in &agent.action_groups {
            for operation in &group.operations {
                if operation.summary.is_none() && operation.description.is_none() {
                    findings.push(
                        CheckFinding::info(
                            "operations",
                            format!(
                                "operation '{}' has neither summary nor description",
                                operation.operation_id
                            ),
                        )
                        .with_location(format!(
                            "agents.{}.{}.{}",
                            agent.id, group.name, operation.operation_id
                        )),
                    );
                }
            }
        }
    }
    findings
}

/// Every node the stack declares, whether or not it plans.
fn declared_nodes(config: &StackConfig) -> BTreeSet<NodeId> {
    let mut nodes = BTreeSet::new();
    nodes.extend(config.resources.iter().map(|r| NodeId::resource(r.id.clone())));
    nodes.extend(config.functions.iter().map(|f| NodeId::function(f.id.clone())));
    for agent in &config.agents {
        nodes.insert(NodeId::agent(agent.id.clone()));
        nodes.extend(
            agent
                .action_groups
                .iter()
                .map(|group| NodeId::action_group(agent.id.clone(), group.name.clone())),
        );
    }
    nodes
}

fn check_outputs(config: &StackConfig) -> Vec<CheckFinding> {
    let declared = declared_nodes(config);
    let mut findings = Vec::new();
    let mut names = BTreeSet::new();
    for output in &config.outputs {
        let location = format!("outputs.{}", output.name);
        if output.name.trim().is_empty() {
            findings.push(
                CheckFinding::error("outputs", "output name must not be empty")
                    .with_location(location.clone()),
            );
        } else if !names.insert(output.name.as_str()) {
            findings.push(
                CheckFinding::error("outputs", format!("output '{}' is declared twice", output.name))
                    .with_location(location.clone()),
            );
        }
        match output.node.parse::<NodeId>() {
            Ok(node) if declared.contains(&node) => {}
            Ok(node) => findings.push(
                CheckFinding::error(
                    "outputs",
                    format!("output '{}' refers to undeclared node {}", output.name, node),
                )
                .with_location(location),
            ),
            Err(reason) => findings.push(
                CheckFinding::error("outputs", format!("output '{}': {}", output.name, reason))
                    .with_location(location),
            ),
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_stack(dir: &Path, yaml: &str) -> PathBuf {
        let path = dir.join("stack.yaml");
        fs::write(&path, yaml).unwrap();
        path
    }

    fn categories(results: &CheckResults, severity: Severity) -> Vec<&str> {
        results
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .map(|f| f.category.as_str())
            .collect()
    }

    #[test]
    fn test_sample_stack_passes() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../stacks/ad-optimizer/stack.yaml");
        let results = run_quiet(&path).unwrap();
        assert!(!results.has_errors(), "{:?}", results.findings);
        assert_eq!(results.warning_count(), 0, "{:?}", results.findings);
    }

    #[test]
    fn test_unknown_resource_reported_as_error() {
        let dir = tempdir().unwrap();
        let path = write_stack(
            dir.path(),
            r#"
name: broken
account: "111111111111"
region: eu-west-1
resources:
  - { id: R1, kind: table }
functions:
  - id: F1
    handler: index.handler
    required_grants:
      - { resource: R9, access: read_only }
"#,
        );

        let results = run_quiet(&path).unwrap();
        assert!(results.has_errors());
        assert!(categories(&results, Severity::Error).contains(&"unknown_resource_reference"));
        // R1 is also unused
        assert!(categories(&results, Severity::Warning).contains(&"resources"));
    }

    #[test]
    fn test_env_reference_without_grant_warns() {
        let dir = tempdir().unwrap();
        let path = write_stack(
            dir.path(),
            r#"
name: envs
account: "111111111111"
region: eu-west-1
resources:
  - { id: R1, kind: object_store }
  - { id: R2, kind: secret }
functions:
  - id: F1
    handler: index.handler
    env:
      DATA: { ref: R1 }
      KEYS: { ref: R2, attr: arn }
    required_grants:
      - { resource: R1, access: read_write }
"#,
        );

        let results = run_quiet(&path).unwrap();
        assert!(!results.has_errors(), "{:?}", results.findings);
        let env: Vec<_> = results
            .findings
            .iter()
            .filter(|f| f.category == "env")
            .collect();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].location.as_deref(), Some("functions.F1.env.KEYS"));
    }

    #[test]
    fn test_bad_output_node_is_error() {
        let dir = tempdir().unwrap();
        let path = write_stack(
            dir.path(),
            r#"
name: outputs
account: "111111111111"
region: eu-west-1
resources:
  - { id: R1, kind: table }
outputs:
  - { name: Table, node: "resource:R1" }
  - { name: Missing, node: "agent:nobody", attr: id }
"#,
        );

        let results = run_quiet(&path).unwrap();
        assert_eq!(results.error_count(), 1);
        assert_eq!(
            results.findings.iter().find(|f| f.severity == Severity::Error).unwrap().location.as_deref(),
            Some("outputs.Missing")
        );
    }

    #[test]
    fn test_output_findings_survive_failed_plan() {
        let dir = tempdir().unwrap();
        let path = write_stack(
            dir.path(),
            r#"
name: broken
account: "111111111111"
region: eu-west-1
functions:
  - id: F1
    handler: index.handler
    required_grants:
      - { resource: R9, access: read_only }
outputs:
  - { name: F1Arn, node: "function:F1", attr: arn }
  - { name: Ghost, node: "function:ghost", attr: arn }
"#,
        );

        let results = run_quiet(&path).unwrap();
        assert_eq!(
            categories(&results, Severity::Error),
            vec!["unknown_resource_reference", "outputs"]
        );
        let locations: Vec<_> = results
            .findings
            .iter()
            .filter(|f| f.category == "outputs")
            .map(|f| f.location.as_deref())
            .collect();
        assert_eq!(locations, vec![Some("outputs.Ghost")]);
    }

    #[test]
    fn test_unreadable_stack_is_load_error() {
        let dir = tempdir().unwrap();
        let results = run_quiet(&dir.path().join("missing.yaml")).unwrap();
        assert_eq!(categories(&results, Severity::Error), vec!["load"]);
        assert!(run(&dir.path().join("missing.yaml")).is_err());
    }
}
