//! Handler registry, apply context and callback traits
//!
//! These traits allow the engine to be used without depending on a
//! specific provider, progress display or prompt implementation.

use crate::planner::ResourceSchema;
use crate::types::{ActionKind, Attributes, ResourceOutcome};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Provider-side operations for one resource type
///
/// Handlers receive fully-resolved attributes. `create` and `update` return
/// provider-computed attributes (ids, ARNs, checksums) which are merged over
/// the resolved ones and recorded in state.
pub trait Handler: Send + Sync {
    /// Resource type this handler manages
    fn resource_type(&self) -> &'static str;

    /// Attributes that cannot change in place
    fn immutable_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Create the resource
    fn create(&self, ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes>;

    /// Update the resource in place
    ///
    /// The default re-creates it.
    fn update(
        &self,
        ctx: &ApplyContext,
        prior: &Attributes,
        desired: &Attributes,
    ) -> Result<Attributes> {
        self.delete(ctx, prior)?;
        self.create(ctx, desired)
    }

    /// Delete the resource described by its recorded attributes
    fn delete(&self, ctx: &ApplyContext, prior: &Attributes) -> Result<()>;
}

/// Handlers keyed by resource type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.handlers.insert(handler.resource_type(), Arc::new(handler));
    }

    /// Look up the handler for a type
    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(resource_type)
    }

    /// Registered types, sorted
    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl ResourceSchema for HandlerRegistry {
    fn immutable_attributes(&self, resource_type: &str) -> &[&'static str] {
        match self.get(resource_type) {
            Some(handler) => handler.immutable_attributes(),
            None => &[],
        }
    }
}

/// Context passed to handler operations
#[derive(Debug, Clone)]
pub struct ApplyContext {
    /// Address of the resource being applied
    pub address: String,
    /// Whether to output verbose information
    pub verbose: bool,
}

impl ApplyContext {
    /// Create a new apply context
    pub fn new(address: impl Into<String>, verbose: bool) -> Self {
        Self {
            address: address.into(),
            verbose,
        }
    }
}

/// Progress callback for apply runs
///
/// Events are delivered from the scheduling thread only, never from
/// worker threads.
pub trait ProgressCallback: Send {
    /// Called once before scheduling starts
    fn on_run_start(&mut self, total: usize);

    /// Called when an action is handed to a worker
    fn on_resource_start(&mut self, address: &str, action: ActionKind);

    /// Called when an action reaches a terminal state
    fn on_resource_complete(&mut self, outcome: &ResourceOutcome);

    /// Called once after every action is terminal
    fn on_run_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _address: &str, _action: ActionKind) {}
    fn on_resource_complete(&mut self, _outcome: &ResourceOutcome) {}
    fn on_run_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Cooperative cancellation flag shared with an apply run
///
/// Cancelling stops scheduling of actions that have not started yet.
/// Actions already running are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
