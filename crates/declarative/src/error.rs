//! Error types for graph construction, planning and execution.
//!
//! Errors are categorized so callers can tell apart configuration
//! mistakes (nothing was touched), contained execution failures (only a
//! subtree was affected) and state failures (the whole run is suspect).

use std::path::PathBuf;
use thiserror::Error;

/// Categories of reconciler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration is invalid; raised before any side effect
    Validation,
    /// A single resource or artifact failed; dependents are skipped
    Execution,
    /// State could not be read, written or locked
    State,
}

impl ErrorCategory {
    /// Whether an error of this category aborts the whole run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, Self::Validation | Self::State)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid configuration",
            Self::Execution => "Resource operation failed",
            Self::State => "State store failure",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Fix the configuration and run plan again",
            Self::Execution => "Inspect the cause, fix it and re-run apply; applied resources are kept",
            Self::State => "Check the state file and its lock before running again",
        }
    }
}

/// Errors raised by the reconciler.
#[derive(Debug, Error)]
pub enum Error {
    /// A reference points at nothing in the module tree
    #[error("{resource}: unresolved reference '{reference}'")]
    UnresolvedReference {
        /// Address of the resource (or module) holding the reference
        resource: String,
        /// The reference expression as written
        reference: String,
    },

    /// A reference expression could not be parsed
    #[error("{resource}: invalid reference '{expression}': {message}")]
    InvalidReference {
        /// Address of the resource holding the expression
        resource: String,
        /// The offending expression
        expression: String,
        /// What is wrong with it
        message: String,
    },

    /// The dependency edges form a cycle
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Cycle members in order of detection, first member repeated at the end
        cycle: Vec<String>,
    },

    /// A module call names a source that cannot be found
    #[error("module '{module}': unknown module source '{source_ref}'")]
    UnknownModuleSource {
        /// Address of the module instance
        module: String,
        /// The source reference as written
        source_ref: String,
    },

    /// Two declarations share an address
    #[error("duplicate resource address: {address}")]
    DuplicateResource {
        /// The repeated address
        address: String,
    },

    /// The external artifact builder failed
    #[error("artifact '{artifact}' from {}: {message}", source_dir.display())]
    ArtifactBuild {
        /// Artifact name
        artifact: String,
        /// Source directory that was being packaged
        source_dir: PathBuf,
        /// Cause chain
        message: String,
    },

    /// A provider handler failed
    #[error("{resource}: {operation} failed: {message}")]
    Handler {
        /// Resource address
        resource: String,
        /// Operation that failed (create, update, delete)
        operation: &'static str,
        /// Cause chain
        message: String,
    },

    /// No handler registered for a resource type
    #[error("{resource}: no handler registered for resource type '{resource_type}'")]
    NoHandler {
        /// Resource address
        resource: String,
        /// The unsupported type
        resource_type: String,
    },

    /// State file could not be read or written
    #[error("state store {}: {message}", path.display())]
    StateStore {
        /// State file path
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Another run holds the state lock
    #[error("state is locked by another run ({}): {holder}", path.display())]
    StateLocked {
        /// Lock file path
        path: PathBuf,
        /// Contents of the lock file
        holder: String,
    },

    /// State changed between plan and apply
    #[error("state changed since the plan was computed (plan serial {planned}, current serial {current})")]
    StaleState {
        /// Serial the plan was computed against
        planned: u64,
        /// Serial found under the lock
        current: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnresolvedReference { .. }
            | Self::InvalidReference { .. }
            | Self::CyclicDependency { .. }
            | Self::UnknownModuleSource { .. }
            | Self::DuplicateResource { .. } => ErrorCategory::Validation,
            Self::ArtifactBuild { .. } | Self::Handler { .. } | Self::NoHandler { .. } => {
                ErrorCategory::Execution
            }
            Self::StateStore { .. }
            | Self::StateLocked { .. }
            | Self::StaleState { .. }
            | Self::Io(_)
            | Self::Json(_) => ErrorCategory::State,
        }
    }

    /// Create a state store error from any displayable cause.
    pub fn state_store(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::StateStore {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a handler error keeping the full anyhow cause chain.
    pub fn handler(resource: impl Into<String>, operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Handler {
            resource: resource.into(),
            operation,
            message: format!("{err:#}"),
        }
    }
}

/// Planning failure wrapping the first validation error.
///
/// Planning is all-or-nothing: when this is returned no actions were
/// produced and nothing was touched.
#[derive(Debug, Error)]
#[error("plan failed: {source}")]
pub struct PlanError {
    /// The validation error that stopped planning
    #[from]
    pub source: Error,
}

impl PlanError {
    /// Borrow the wrapped error.
    pub fn inner(&self) -> &Error {
        &self.source
    }
}

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;
