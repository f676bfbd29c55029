//! Engine integration for stackform
//!
//! The engine orchestrates:
//! 1. Loading - stack file to resource graph
//! 2. Planning - diff the graph against recorded state
//! 3. Executing - apply changes with parallelism, then report

pub mod differ;
pub mod executor;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    ApplyEnv, ArtifactBuilder, CancellationToken, ExecutionPlan, FileStateStore, GraphBuilder,
    HandlerRegistry, PlanOptions, ResourceGraph, StateStore, plan,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::builder::{CommandArtifactBuilder, ZipArtifactBuilder};
use crate::config::LoadedStack;
use crate::resource::{self, Sandbox};

pub use executor::{ApplyOptions, run};

/// Everything a command needs to plan and apply one stack
pub struct Workspace {
    pub stack: LoadedStack,
    pub graph: ResourceGraph,
    pub store: FileStateStore,
    pub handlers: HandlerRegistry,
    builder: Box<dyn ArtifactBuilder>,
}

impl Workspace {
    /// Load the stack file and build its graph
    pub fn open(config_path: &Path, state_override: Option<&Path>) -> Result<Self> {
        let stack = LoadedStack::load(config_path)?;
        let configuration = stack.configuration()?;
        let mut graph = GraphBuilder::build(&configuration, &stack.module_sources())
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
        resource::lambda::fingerprint_source_paths(&mut graph)?;

        let state_path = crate::paths::state_file(state_override, config_path);
        let store = FileStateStore::new(state_path);

        let provider = &stack.file.provider;
        let sandbox = Arc::new(Sandbox::new(
            stack.provider_root(),
            &provider.region,
            &provider.account_id,
        ));
        let handlers = resource::registry(&sandbox);

        let builder: Box<dyn ArtifactBuilder> = match &stack.file.artifact_builder {
            Some(config) => Box::new(CommandArtifactBuilder::new(config, &stack.dir)),
            None => Box::new(ZipArtifactBuilder),
        };

        Ok(Self {
            stack,
            graph,
            store,
            handlers,
            builder,
        })
    }

    /// Plan against the current state
    pub fn plan(&self, options: &PlanOptions) -> Result<ExecutionPlan> {
        let prior = self.store.load()?;
        let plan = plan(&self.graph, &prior, &self.handlers, options)?;
        Ok(plan)
    }

    /// Collaborators for an apply run
    pub fn env(&self, cancel: CancellationToken) -> ApplyEnv<'_> {
        ApplyEnv {
            handlers: &self.handlers,
            builder: self.builder.as_ref(),
            store: &self.store,
            cancel,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }
}

/// Token cancelled on Ctrl-C
///
/// The first interrupt stops scheduling; in-flight resources finish and
/// state is still saved.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if !handle.is_cancelled() {
            eprintln!("\nInterrupted: waiting for running resources to finish...");
        }
        handle.cancel();
    }) {
        log::debug!("Could not install interrupt handler: {e}");
    }
    token
}
