//! Core types for declarative resource reconciliation

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute mapping of a resource.
///
/// Values are plain JSON; strings may embed `${...}` reference expressions.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Fully-qualified identity of a resource.
///
/// Rendered as `module.a.module.b.type.name`; the module path is empty for
/// root resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAddress {
    /// Names of the enclosing module instances, outermost first
    pub module_path: Vec<String>,
    /// Resource type (e.g. "aws_lambda_function")
    pub resource_type: String,
    /// Local name, unique per type within a module
    pub name: String,
}

impl ResourceAddress {
    /// Create a root-level address
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_path: Vec::new(),
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Create an address inside a module path
    pub fn in_module(
        module_path: &[String],
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module_path: module_path.to_vec(),
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Parse `module.a.type.name` style addresses
    pub fn parse(address: &str) -> Option<Self> {
        let parts: Vec<&str> = address.split('.').collect();
        let mut module_path = Vec::new();
        let mut i = 0;
        while i + 1 < parts.len() && parts[i] == "module" {
            module_path.push(parts[i + 1].to_string());
            i += 2;
        }
        match &parts[i..] {
            [resource_type, name] if !resource_type.is_empty() && !name.is_empty() => Some(Self {
                module_path,
                resource_type: (*resource_type).to_string(),
                name: (*name).to_string(),
            }),
            _ => None,
        }
    }

    /// Whether this address lives inside (or below) the given module path
    pub fn is_within(&self, module_path: &[String]) -> bool {
        self.module_path.starts_with(module_path)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}.{}",
            module_prefix(&self.module_path),
            self.resource_type,
            self.name
        )
    }
}

/// Render a module path as `module.a.module.b.` (empty for the root)
pub fn module_prefix(module_path: &[String]) -> String {
    module_path
        .iter()
        .map(|m| format!("module.{m}."))
        .collect()
}

/// Lifecycle of a resource through a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Loaded from configuration
    Declared,
    /// An action has been planned
    Planned,
    /// Handler is running
    Applying,
    /// Reached desired state
    Applied,
    /// Handler failed
    Failed,
    /// Never attempted (failed dependency or cancellation)
    Skipped,
    /// Exists but is known to be broken; will be replaced
    Tainted,
}

impl Lifecycle {
    /// Whether this is a terminal state for an apply run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Tainted => "tainted",
        };
        f.write_str(s)
    }
}

/// Planned action for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Resource is not in prior state
    Create,
    /// Mutable attributes changed
    Update,
    /// An immutable attribute changed, or the resource is tainted
    Replace,
    /// Resource is no longer declared
    Delete,
    /// Nothing to do
    NoOp,
}

impl ActionKind {
    /// Whether the action invokes a handler
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Short plan symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of parallel jobs
    pub jobs: usize,
    /// Verbose handler output
    pub verbose: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            verbose: false,
        }
    }
}

/// Terminal outcome of one planned action
#[derive(Debug)]
pub struct ResourceOutcome {
    /// Resource address
    pub address: String,
    /// Action that was planned
    pub action: ActionKind,
    /// Terminal lifecycle state
    pub status: Lifecycle,
    /// Why the action was skipped, if it was
    pub reason: Option<String>,
    /// Originating error, for failures
    pub error: Option<Error>,
}

/// Result of an apply run
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// One entry per planned action, in plan order
    pub outcomes: Vec<ResourceOutcome>,
    /// Root outputs evaluated against the final state
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Whether scheduling was stopped by cancellation
    pub cancelled: bool,
    /// Whether the confirmation was declined, so nothing was attempted
    pub declined: bool,
}

impl ExecutionReport {
    /// Whether every resource reached `applied`
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == Lifecycle::Applied)
    }

    /// Outcomes that failed
    pub fn failures(&self) -> impl Iterator<Item = &ResourceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == Lifecycle::Failed)
    }

    /// Look up the outcome of an address
    pub fn outcome(&self, address: &str) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.address == address)
    }

    /// Counts per outcome kind
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for outcome in &self.outcomes {
            summary.add_outcome(outcome);
        }
        summary
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.skipped + self.failed
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &ResourceOutcome) {
        match outcome.status {
            Lifecycle::Failed => self.failed += 1,
            Lifecycle::Skipped => self.skipped += 1,
            _ => match outcome.action {
                ActionKind::Create => self.created += 1,
                ActionKind::Update => self.updated += 1,
                ActionKind::Replace => self.replaced += 1,
                ActionKind::Delete => self.deleted += 1,
                ActionKind::NoOp => self.unchanged += 1,
            },
        }
    }
}
