//! # Declarative
//!
//! A reconciler for declarative resource graphs.
//!
//! This crate turns a configuration of resources, modules and artifacts into
//! a dependency graph, diffs it against the last-applied state, and applies
//! the resulting plan through pluggable provider handlers.
//!
//! ## Core Concepts
//!
//! - **ResourceGraph**: declared resources and the edges between them
//! - **GraphBuilder**: expands nested modules into one flat graph
//! - **ExecutionPlan**: ordered create/update/replace/delete/no-op actions
//! - **Executor**: applies a plan with bounded parallelism
//! - **StateStore**: persists last-applied attributes between runs
//! - **ArtifactBuilder**: packages sources before dependent resources apply
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyEnv, CancellationToken, Configuration, ExecuteOptions, GraphBuilder,
//!     HandlerRegistry, MemoryStateStore, NoModuleSources, PlanOptions, StateStore,
//!     execute_simple, plan,
//! };
//!
//! let config: Configuration = toml::from_str(&std::fs::read_to_string("stack.toml")?)?;
//! let graph = GraphBuilder::build(&config, &NoModuleSources)?;
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register(MyBucketHandler);
//!
//! let store = MemoryStateStore::default();
//! let plan = plan(&graph, &store.load()?, &handlers, &PlanOptions::default())?;
//!
//! let env = ApplyEnv {
//!     handlers: &handlers,
//!     builder: &MyBuilder,
//!     store: &store,
//!     cancel: CancellationToken::new(),
//! };
//! let report = execute_simple(&plan, &env, &ExecuteOptions::default())?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Handler`]: create/update/delete for one resource type
//! - [`ArtifactBuilder`]: produces archives from source directories
//! - [`StateStore`]: loads, saves and locks state
//! - [`ModuleSources`]: resolves module source references
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific providers, UI frameworks or storage backends.

pub mod artifact;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod interpolate;
pub mod module;
pub mod planner;
pub mod reference;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use artifact::{ArtifactBuilder, ArtifactCache, ArtifactSpec, Fingerprint};
pub use config::{
    Configuration, ModuleCall, ModuleDefinition, ModuleSources, NoModuleSources, ResourceDecl,
    VariableDecl,
};
pub use context::{
    ApplyContext, AutoConfirm, AutoDecline, CancellationToken, ConfirmCallback, Handler,
    HandlerRegistry, NoProgress, ProgressCallback,
};
pub use diff::{AttributeChange, DiffSummary, diff_attributes, group_by_type};
pub use error::{Error, ErrorCategory, PlanError, Result};
pub use executor::{ApplyEnv, execute, execute_simple};
pub use graph::{ModuleInstance, ResourceGraph, ResourceNode};
pub use interpolate::Interpolator;
pub use module::GraphBuilder;
pub use planner::{ExecutionPlan, NoSchema, PlanOptions, PlannedAction, ResourceSchema, plan};
pub use reference::Reference;
pub use state::{FileStateStore, MemoryStateStore, ResourceSnapshot, StateLock, StateSnapshot, StateStore};
pub use types::{
    ActionKind, Attributes, ExecuteOptions, ExecuteSummary, ExecutionReport, Lifecycle,
    ResourceAddress, ResourceOutcome,
};
