//! Execution engine - applies planned actions with bounded parallelism
//!
//! The calling thread owns scheduling: it hands ready actions to a rayon
//! pool, blocks on a channel for results and emits progress events.
//! Workers only build artifacts, resolve references and call handlers.

use crate::artifact::{ArtifactBuilder, ArtifactCache};
use crate::context::{
    ApplyContext, AutoConfirm, CancellationToken, ConfirmCallback, HandlerRegistry, NoProgress,
    ProgressCallback,
};
use crate::error::Error;
use crate::interpolate::Interpolator;
use crate::planner::{ExecutionPlan, PlannedAction};
use crate::state::{ResourceSnapshot, StateSnapshot, StateStore};
use crate::types::{
    ActionKind, Attributes, ExecuteOptions, ExecutionReport, Lifecycle, ResourceOutcome,
};
use anyhow::Result;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};

/// Collaborators of an apply run
pub struct ApplyEnv<'a> {
    /// Handlers per resource type
    pub handlers: &'a HandlerRegistry,
    /// Builds artifacts before dependent actions run
    pub builder: &'a dyn ArtifactBuilder,
    /// Where state is loaded from and saved to
    pub store: &'a dyn StateStore,
    /// Stops scheduling when cancelled
    pub cancel: CancellationToken,
}

/// Execute a plan with the given options and callbacks
///
/// Errors returned here abort the whole run (state store failures, a
/// stale plan, a failed prompt). Per-resource failures are reported in the
/// [`ExecutionReport`] instead.
pub fn execute<P, C>(
    plan: &ExecutionPlan,
    env: &ApplyEnv<'_>,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ExecutionReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    if !plan.has_changes() {
        let state = env.store.load()?;
        return Ok(ExecutionReport {
            outcomes: plan
                .actions
                .iter()
                .map(|a| outcome(a, Lifecycle::Applied, None, None))
                .collect(),
            outputs: Interpolator::new(&state, &plan.outputs, &plan.artifacts).root_outputs(),
            ..Default::default()
        });
    }

    if !confirm.confirm("Apply changes?")? {
        return Ok(ExecutionReport {
            outcomes: plan
                .actions
                .iter()
                .map(|a| {
                    let status = if a.kind.is_change() {
                        Lifecycle::Skipped
                    } else {
                        Lifecycle::Applied
                    };
                    outcome(a, status, Some("apply declined".to_string()), None)
                })
                .collect(),
            declined: true,
            ..Default::default()
        });
    }

    // Held until this function returns, on every path
    let _lock = env.store.lock()?;
    let current = env.store.load()?;
    if current.serial != plan.state_serial {
        return Err(Error::StaleState {
            planned: plan.state_serial,
            current: current.serial,
        }
        .into());
    }

    let working = Mutex::new(current);
    let cache = ArtifactCache::new();
    let jobs = opts.jobs.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create thread pool: {}", e))?;

    let mut scheduler = Scheduler::new(plan, progress);
    scheduler.progress.on_run_start(plan.changes().count());

    let (tx, rx) =
        mpsc::channel::<(usize, std::thread::Result<std::result::Result<ActionKind, Error>>)>();
    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;
        loop {
            while in_flight < jobs
                && let Some(idx) = scheduler.ready.pop_first()
            {
                let action = &plan.actions[idx];
                if !action.kind.is_change() {
                    scheduler.finish(idx, outcome(action, Lifecycle::Applied, None, None));
                    continue;
                }
                if env.cancel.is_cancelled() {
                    scheduler.cancelled = true;
                    let reason = Some("run cancelled".to_string());
                    scheduler.finish(idx, outcome(action, Lifecycle::Skipped, reason, None));
                    continue;
                }

                scheduler.progress.on_resource_start(&action.id(), action.kind);
                in_flight += 1;
                let tx = tx.clone();
                let (working, cache) = (&working, &cache);
                scope.spawn(move |_| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_action(action, plan, env, opts, working, cache)
                    }));
                    // The receiver outlives every worker
                    let _ = tx.send((idx, result));
                });
            }

            if in_flight == 0 {
                break;
            }
            let Ok((idx, result)) = rx.recv() else {
                break;
            };
            in_flight -= 1;

            let action = &plan.actions[idx];
            let finished = match result {
                Ok(Ok(performed)) => {
                    log::info!("{} {}: done", performed, action.id());
                    let mut done = outcome(action, Lifecycle::Applied, None, None);
                    if performed != action.kind {
                        done.action = performed;
                        done.reason = Some("resolved attributes unchanged".to_string());
                    }
                    done
                }
                Ok(Err(e)) => {
                    log::warn!("{} {}: {}", action.kind, action.id(), e);
                    outcome(action, Lifecycle::Failed, None, Some(e))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("{} {}: handler panicked: {}", action.kind, action.id(), message);
                    let error = Error::Handler {
                        resource: action.id(),
                        operation: operation_name(action.kind),
                        message: format!("handler panicked: {message}"),
                    };
                    outcome(action, Lifecycle::Failed, None, Some(error))
                }
            };
            scheduler.finish(idx, finished);
        }
    });
    scheduler.progress.on_run_complete();

    let mut state = lock_state(&working).clone();
    state.serial += 1;
    state.last_updated = Some(chrono::Utc::now());
    env.store.save(&state)?;

    let cancelled = scheduler.cancelled;
    let outcomes = scheduler.outcomes.into_iter().flatten().collect();
    Ok(ExecutionReport {
        outcomes,
        outputs: Interpolator::new(&state, &plan.outputs, &plan.artifacts).root_outputs(),
        cancelled,
        declined: false,
    })
}

/// Simple execution without callbacks
///
/// For basic use cases where you don't need progress or confirmation.
pub fn execute_simple(
    plan: &ExecutionPlan,
    env: &ApplyEnv<'_>,
    opts: &ExecuteOptions,
) -> Result<ExecutionReport> {
    execute(plan, env, opts, &mut NoProgress, &mut AutoConfirm)
}

/// Dependency bookkeeping owned by the scheduling thread
struct Scheduler<'a, P: ProgressCallback> {
    plan: &'a ExecutionPlan,
    progress: &'a mut P,
    remaining: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    outcomes: Vec<Option<ResourceOutcome>>,
    ready: BTreeSet<usize>,
    cancelled: bool,
}

impl<'a, P: ProgressCallback> Scheduler<'a, P> {
    fn new(plan: &'a ExecutionPlan, progress: &'a mut P) -> Self {
        let count = plan.actions.len();
        let mut remaining = vec![0; count];
        let mut dependents = vec![Vec::new(); count];
        for (idx, action) in plan.actions.iter().enumerate() {
            let deps: BTreeSet<usize> = action.depends_on.iter().copied().collect();
            remaining[idx] = deps.len();
            for dep in deps {
                dependents[dep].push(idx);
            }
        }
        let ready = (0..count).filter(|&i| remaining[i] == 0).collect();

        Self {
            plan,
            progress,
            remaining,
            dependents,
            outcomes: (0..count).map(|_| None).collect(),
            ready,
            cancelled: false,
        }
    }

    /// Record a terminal outcome and release or skip its dependents
    fn finish(&mut self, idx: usize, done: ResourceOutcome) {
        let plan = self.plan;
        let mut work = vec![(idx, done)];
        while let Some((idx, done)) = work.pop() {
            self.progress.on_resource_complete(&done);
            self.outcomes[idx] = Some(done);

            for position in 0..self.dependents[idx].len() {
                let dependent = self.dependents[idx][position];
                self.remaining[dependent] -= 1;
                if self.remaining[dependent] > 0 {
                    continue;
                }

                let action = &plan.actions[dependent];
                let blocked = action.depends_on.iter().find_map(|&dep| {
                    self.outcomes[dep]
                        .as_ref()
                        .filter(|o| o.status != Lifecycle::Applied)
                });
                match blocked {
                    Some(blocker) => {
                        let reason = format!("dependency {} {}", blocker.address, blocker.status);
                        work.push((
                            dependent,
                            outcome(action, Lifecycle::Skipped, Some(reason), None),
                        ));
                    }
                    None => {
                        self.ready.insert(dependent);
                    }
                }
            }
        }
    }
}

fn outcome(
    action: &PlannedAction,
    status: Lifecycle,
    reason: Option<String>,
    error: Option<Error>,
) -> ResourceOutcome {
    ResourceOutcome {
        address: action.id(),
        action: action.kind,
        status,
        reason,
        error,
    }
}

fn operation_name(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create | ActionKind::Replace => "create",
        ActionKind::Update => "update",
        ActionKind::Delete => "delete",
        ActionKind::NoOp => "read",
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn lock_state(working: &Mutex<StateSnapshot>) -> MutexGuard<'_, StateSnapshot> {
    match working.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Apply a single action on a worker thread
fn run_action(
    action: &PlannedAction,
    plan: &ExecutionPlan,
    env: &ApplyEnv<'_>,
    opts: &ExecuteOptions,
    working: &Mutex<StateSnapshot>,
    cache: &ArtifactCache,
) -> std::result::Result<ActionKind, Error> {
    let address = action.id();

    for name in &action.artifacts {
        if let Some(spec) = plan.artifacts.get(name) {
            cache.get_or_build(spec, env.builder)?;
        }
    }

    let handler = env
        .handlers
        .get(&action.resource_type)
        .ok_or_else(|| Error::NoHandler {
            resource: address.clone(),
            resource_type: action.resource_type.clone(),
        })?;
    let ctx = ApplyContext::new(&address, opts.verbose);
    let prior = action.prior.as_ref().map(|p| &p.attributes);

    match action.kind {
        ActionKind::NoOp => Ok(ActionKind::NoOp),
        ActionKind::Delete => {
            let empty = Attributes::new();
            handler
                .delete(&ctx, prior.unwrap_or(&empty))
                .map_err(|e| Error::handler(&address, "delete", &e))?;
            lock_state(working).remove(&address);
            Ok(ActionKind::Delete)
        }
        ActionKind::Create => {
            let desired = resolve(action, plan, working)?;
            let computed = handler
                .create(&ctx, &desired)
                .map_err(|e| Error::handler(&address, "create", &e))?;
            record(action, plan, working, desired, computed);
            Ok(ActionKind::Create)
        }
        ActionKind::Replace => {
            if let Some(prior) = prior {
                handler
                    .delete(&ctx, prior)
                    .map_err(|e| Error::handler(&address, "delete", &e))?;
                lock_state(working).remove(&address);
            }
            let desired = resolve(action, plan, working)?;
            let computed = handler
                .create(&ctx, &desired)
                .map_err(|e| Error::handler(&address, "create", &e))?;
            record(action, plan, working, desired, computed);
            Ok(ActionKind::Replace)
        }
        ActionKind::Update => {
            let desired = resolve(action, plan, working)?;
            if action.refresh && prior.is_some_and(|p| recorded_as(p, &desired)) {
                log::debug!("{address}: dependency change left its attributes as recorded");
                return Ok(ActionKind::NoOp);
            }
            let empty = Attributes::new();
            match handler.update(&ctx, prior.unwrap_or(&empty), &desired) {
                Ok(returned) => {
                    // Computed values the handler did not return stay as recorded
                    let mut computed: Attributes = prior
                        .into_iter()
                        .flatten()
                        .filter(|(name, _)| !action.config.contains_key(*name))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect();
                    computed.extend(returned);
                    record(action, plan, working, desired, computed);
                    Ok(ActionKind::Update)
                }
                Err(e) => {
                    // The resource may be half-updated; force replacement next time
                    lock_state(working).taint(&address);
                    Err(Error::handler(&address, "update", &e))
                }
            }
        }
    }
}

/// Whether every resolved attribute already has its recorded value
fn recorded_as(prior: &Attributes, desired: &Attributes) -> bool {
    desired.iter().all(|(name, value)| prior.get(name) == Some(value))
}

fn resolve(
    action: &PlannedAction,
    plan: &ExecutionPlan,
    working: &Mutex<StateSnapshot>,
) -> std::result::Result<Attributes, Error> {
    let state = lock_state(working);
    Interpolator::new(&state, &plan.outputs, &plan.artifacts).attributes(&action.id(), &action.config)
}

fn record(
    action: &PlannedAction,
    plan: &ExecutionPlan,
    working: &Mutex<StateSnapshot>,
    desired: Attributes,
    computed: Attributes,
) {
    let mut attributes = desired;
    attributes.extend(computed);

    let snapshot = ResourceSnapshot {
        resource_type: action.resource_type.clone(),
        config: action.config.clone(),
        attributes,
        dependencies: action.dependencies.clone(),
        artifact_fingerprints: action
            .artifacts
            .iter()
            .filter_map(|name| {
                plan.artifacts
                    .get(name)
                    .map(|spec| (name.clone(), spec.fingerprint.recorded()))
            })
            .collect(),
        tainted: false,
    };
    lock_state(working).insert(action.id(), snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactSpec, Fingerprint};
    use crate::config::{Configuration, ModuleDefinition, NoModuleSources, ResourceDecl};
    use crate::context::{AutoDecline, Handler};
    use crate::module::GraphBuilder;
    use crate::planner::{PlanOptions, plan};
    use crate::state::{FileStateStore, MemoryStateStore};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every call; fails creates for names in `fail`
    #[derive(Clone, Default)]
    struct Recorder {
        kind: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        fail: Vec<String>,
        panic_on: Vec<String>,
    }

    impl Recorder {
        fn new(kind: &'static str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                kind,
                calls: Arc::clone(calls),
                ..Default::default()
            }
        }
    }

    impl Handler for Recorder {
        fn resource_type(&self) -> &'static str {
            self.kind
        }

        fn immutable_attributes(&self) -> &'static [&'static str] {
            &["runtime"]
        }

        fn create(&self, ctx: &ApplyContext, desired: &Attributes) -> anyhow::Result<Attributes> {
            self.calls.lock().unwrap().push(format!("create {}", ctx.address));
            let name = desired.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            if self.panic_on.iter().any(|p| p == name) {
                panic!("boom");
            }
            if self.fail.iter().any(|f| f == name) {
                anyhow::bail!("provider rejected {name}");
            }
            Ok([
                ("id".to_string(), json!(name)),
                ("arn".to_string(), json!(format!("arn:{}:{name}", self.kind))),
            ]
            .into())
        }

        fn update(
            &self,
            ctx: &ApplyContext,
            _prior: &Attributes,
            desired: &Attributes,
        ) -> anyhow::Result<Attributes> {
            self.calls.lock().unwrap().push(format!("update {}", ctx.address));
            let name = desired.get("name").and_then(|v| v.as_str()).unwrap_or_default();
            if self.fail.iter().any(|f| f == name) {
                anyhow::bail!("update rejected");
            }
            Ok(Attributes::new())
        }

        fn delete(&self, ctx: &ApplyContext, _prior: &Attributes) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", ctx.address));
            Ok(())
        }
    }

    struct CountingBuilder(AtomicUsize);

    impl ArtifactBuilder for CountingBuilder {
        fn build(&self, spec: &ArtifactSpec) -> anyhow::Result<PathBuf> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::fs::create_dir_all(&spec.output_dir)?;
            std::fs::write(spec.output_path(), b"PK")?;
            Ok(spec.output_path())
        }
    }

    struct FailingBuilder;

    impl ArtifactBuilder for FailingBuilder {
        fn build(&self, _spec: &ArtifactSpec) -> anyhow::Result<PathBuf> {
            anyhow::bail!("package.sh exited with status 1")
        }
    }

    fn registry(calls: &Arc<Mutex<Vec<String>>>, fail: &[&str]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for kind in ["t", "aws_s3_bucket", "aws_s3_object", "aws_lambda_function"] {
            let mut handler = Recorder::new(kind, calls);
            handler.fail = fail.iter().map(|s| (*s).to_string()).collect();
            registry.register(handler);
        }
        registry
    }

    fn config(resources: Vec<ResourceDecl>) -> Configuration {
        Configuration {
            root: ModuleDefinition {
                resources,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn chain() -> Configuration {
        config(vec![
            ResourceDecl::new("t", "a").with("name", "a"),
            ResourceDecl::new("t", "b").with("name", "b").with("upstream", "${t.a.id}"),
            ResourceDecl::new("t", "c").with("name", "c").with("upstream", "${t.b.id}"),
            ResourceDecl::new("t", "independent").with("name", "independent"),
        ])
    }

    fn run(
        config: &Configuration,
        registry: &HandlerRegistry,
        store: &dyn StateStore,
        builder: &dyn ArtifactBuilder,
        jobs: usize,
    ) -> ExecutionReport {
        let graph = GraphBuilder::build(config, &NoModuleSources).unwrap();
        let plan = plan(&graph, &store.load().unwrap(), registry, &PlanOptions::default()).unwrap();
        let env = ApplyEnv {
            handlers: registry,
            builder,
            store,
            cancel: CancellationToken::new(),
        };
        let opts = ExecuteOptions {
            jobs,
            verbose: false,
        };
        execute_simple(&plan, &env, &opts).unwrap()
    }

    fn status(report: &ExecutionReport, address: &str) -> Lifecycle {
        report.outcome(address).unwrap().status
    }

    #[test]
    fn test_apply_then_idempotent() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let report = run(&chain(), &registry, &store, &builder, 4);
        assert!(report.is_success());
        assert_eq!(report.summary().created, 4);

        let state = store.load().unwrap();
        assert_eq!(state.serial, 1);
        assert!(state.last_updated.is_some());
        assert_eq!(state.get("t.b").unwrap().attributes["upstream"], json!("a"));
        assert_eq!(state.get("t.c").unwrap().dependencies, vec!["t.b"]);

        calls.lock().unwrap().clear();
        let report = run(&chain(), &registry, &store, &builder, 4);
        assert_eq!(report.summary().unchanged, 4);
        assert!(calls.lock().unwrap().is_empty());
        // Nothing changed, so nothing was saved
        assert_eq!(store.load().unwrap().serial, 1);
        assert!(!store.is_locked());
    }

    /// Object-like handler whose `etag` follows its `content`
    struct Tagged;

    impl Tagged {
        fn etag(desired: &Attributes) -> Attributes {
            let content = desired.get("content").and_then(|v| v.as_str()).unwrap_or_default();
            [("etag".to_string(), json!(format!("etag-{content}")))].into()
        }
    }

    impl Handler for Tagged {
        fn resource_type(&self) -> &'static str {
            "tagged"
        }

        fn create(&self, _ctx: &ApplyContext, desired: &Attributes) -> anyhow::Result<Attributes> {
            Ok(Self::etag(desired))
        }

        fn update(
            &self,
            _ctx: &ApplyContext,
            _prior: &Attributes,
            desired: &Attributes,
        ) -> anyhow::Result<Attributes> {
            Ok(Self::etag(desired))
        }

        fn delete(&self, _ctx: &ApplyContext, _prior: &Attributes) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn tagged_chain(content: &str) -> Configuration {
        config(vec![
            ResourceDecl::new("tagged", "obj").with("content", content),
            ResourceDecl::new("t", "consumer")
                .with("name", "consumer")
                .with("etag", "${tagged.obj.etag}"),
            ResourceDecl::new("t", "tail")
                .with("name", "tail")
                .with("upstream", "${t.consumer.id}"),
        ])
    }

    #[test]
    fn test_update_propagates_computed_values_to_dependents() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry(&calls, &[]);
        registry.register(Tagged);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        assert!(run(&tagged_chain("one"), &registry, &store, &builder, 4).is_success());
        calls.lock().unwrap().clear();

        let report = run(&tagged_chain("two"), &registry, &store, &builder, 4);
        assert!(report.is_success(), "{:?}", report.outcomes);
        assert_eq!(report.outcome("tagged.obj").unwrap().action, ActionKind::Update);
        assert_eq!(report.outcome("t.consumer").unwrap().action, ActionKind::Update);
        // The consumer's id did not change, so the tail only re-checked
        let tail = report.outcome("t.tail").unwrap();
        assert_eq!(tail.action, ActionKind::NoOp);
        assert_eq!(tail.reason.as_deref(), Some("resolved attributes unchanged"));
        assert_eq!(*calls.lock().unwrap(), vec!["update t.consumer".to_string()]);

        let state = store.load().unwrap();
        let consumer = &state.get("t.consumer").unwrap().attributes;
        assert_eq!(consumer["etag"], json!("etag-two"));
        assert_eq!(consumer["id"], json!("consumer"));

        // Converged: the next plan changes nothing
        let graph = GraphBuilder::build(&tagged_chain("two"), &NoModuleSources).unwrap();
        let again = plan(&graph, &state, &registry, &PlanOptions::default()).unwrap();
        assert!(!again.has_changes());
    }

    #[test]
    fn test_partial_failure_skips_dependents_only() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &["b"]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let report = run(&chain(), &registry, &store, &builder, 2);
        assert_eq!(status(&report, "t.a"), Lifecycle::Applied);
        assert_eq!(status(&report, "t.b"), Lifecycle::Failed);
        assert_eq!(status(&report, "t.c"), Lifecycle::Skipped);
        assert_eq!(status(&report, "t.independent"), Lifecycle::Applied);
        assert_eq!(
            report.outcome("t.c").unwrap().reason.as_deref(),
            Some("dependency t.b failed")
        );
        let failure = report.failures().next().unwrap();
        assert!(
            failure
                .error
                .as_ref()
                .unwrap()
                .to_string()
                .contains("provider rejected b")
        );

        let recorded = calls.lock().unwrap().clone();
        assert!(!recorded.iter().any(|c| c == "create t.c"));

        // Applied resources are kept in state; the failed one is not
        let state = store.load().unwrap();
        assert!(state.get("t.a").is_some());
        assert!(state.get("t.b").is_none());
        assert!(!store.is_locked());
    }

    #[test]
    fn test_single_job_runs_in_plan_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let config = config(vec![
            ResourceDecl::new("aws_lambda_function", "lambda_from_s3")
                .with("name", "fn")
                .with("s3_bucket", "${aws_s3_bucket.lambda_code_bucket.id}")
                .with("s3_key", "${aws_s3_object.s3_lambda_code.key}"),
            ResourceDecl::new("aws_s3_object", "s3_lambda_code")
                .with("name", "code")
                .with("key", "lambda.zip")
                .with("bucket", "${aws_s3_bucket.lambda_code_bucket.id}"),
            ResourceDecl::new("aws_s3_bucket", "lambda_code_bucket").with("name", "bucket"),
        ]);
        let report = run(&config, &registry, &store, &builder, 1);
        assert!(report.is_success());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "create aws_s3_bucket.lambda_code_bucket",
                "create aws_s3_object.s3_lambda_code",
                "create aws_lambda_function.lambda_from_s3",
            ]
        );
        let state = store.load().unwrap();
        let function = state.get("aws_lambda_function.lambda_from_s3").unwrap();
        assert_eq!(function.attributes["s3_bucket"], json!("bucket"));
        assert_eq!(function.attributes["s3_key"], json!("lambda.zip"));
    }

    #[test]
    fn test_artifact_built_once_and_failure_skips_dependents() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let dir = tempfile::tempdir().unwrap();

        let mut config = config(vec![
            ResourceDecl::new("aws_lambda_function", "one")
                .with("name", "one")
                .with("filename", "${artifact.lambda_zip.path}"),
            ResourceDecl::new("aws_lambda_function", "two")
                .with("name", "two")
                .with("filename", "${artifact.lambda_zip.path}"),
            ResourceDecl::new("t", "unrelated").with("name", "unrelated"),
        ]);
        config.artifacts.insert(
            "lambda_zip".into(),
            ArtifactSpec {
                name: "lambda_zip".into(),
                source_dir: dir.path().join("src"),
                output_dir: dir.path().join("build"),
                filename: "lambda.zip".into(),
                fingerprint: Fingerprint::Value("v1".into()),
            },
        );

        let builder = CountingBuilder(AtomicUsize::new(0));
        let store = MemoryStateStore::default();
        let report = run(&config, &registry, &store, &builder, 4);
        assert!(report.is_success());
        assert_eq!(builder.0.load(Ordering::SeqCst), 1);
        let state = store.load().unwrap();
        let one = state.get("aws_lambda_function.one").unwrap();
        assert_eq!(one.artifact_fingerprints["lambda_zip"], "v1");
        assert_eq!(
            one.attributes["filename"],
            json!(dir.path().join("build").join("lambda.zip").to_string_lossy())
        );

        let store = MemoryStateStore::default();
        let report = run(&config, &registry, &store, &FailingBuilder, 4);
        assert_eq!(status(&report, "aws_lambda_function.one"), Lifecycle::Failed);
        assert_eq!(status(&report, "aws_lambda_function.two"), Lifecycle::Failed);
        assert_eq!(status(&report, "t.unrelated"), Lifecycle::Applied);
        assert!(
            report
                .outcome("aws_lambda_function.one")
                .and_then(|o| o.error.as_ref())
                .is_some_and(|e| matches!(e, Error::ArtifactBuild { .. }))
        );
    }

    #[test]
    fn test_replace_deletes_then_creates() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let v1 = config(vec![ResourceDecl::new("t", "fn").with("name", "fn").with("runtime", "python3.11")]);
        run(&v1, &registry, &store, &builder, 1);
        calls.lock().unwrap().clear();

        let v2 = config(vec![ResourceDecl::new("t", "fn").with("name", "fn").with("runtime", "python3.12")]);
        let report = run(&v2, &registry, &store, &builder, 1);
        assert_eq!(report.summary().replaced, 1);
        assert_eq!(*calls.lock().unwrap(), vec!["delete t.fn", "create t.fn"]);
        assert_eq!(
            store.load().unwrap().get("t.fn").unwrap().config["runtime"],
            json!("python3.12")
        );
    }

    #[test]
    fn test_failed_update_taints() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let v1 = config(vec![ResourceDecl::new("t", "x").with("name", "x").with("memory", 128)]);
        run(&v1, &registry(&calls, &[]), &store, &builder, 1);

        let v2 = config(vec![ResourceDecl::new("t", "x").with("name", "x").with("memory", 256)]);
        let failing = registry(&calls, &["x"]);
        let report = run(&v2, &failing, &store, &builder, 1);
        assert_eq!(status(&report, "t.x"), Lifecycle::Failed);

        let state = store.load().unwrap();
        assert!(state.get("t.x").unwrap().tainted);

        let graph = GraphBuilder::build(&v2, &NoModuleSources).unwrap();
        let next = plan(&graph, &state, &failing, &PlanOptions::default()).unwrap();
        assert_eq!(next.action("t.x").unwrap().kind, ActionKind::Replace);
    }

    #[test]
    fn test_orphan_is_deleted() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        run(&chain(), &registry, &store, &builder, 2);
        calls.lock().unwrap().clear();

        let shrunk = config(vec![ResourceDecl::new("t", "a").with("name", "a")]);
        let report = run(&shrunk, &registry, &store, &builder, 1);
        assert_eq!(report.summary().deleted, 3);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["delete t.c", "delete t.b", "delete t.independent"]
        );
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let config = config(vec![
            ResourceDecl::new("aws_unknown", "x"),
            ResourceDecl::new("t", "after").with("name", "after").depends_on("aws_unknown.x"),
        ]);
        let report = run(&config, &registry, &store, &builder, 1);
        assert!(matches!(
            report.outcome("aws_unknown.x").unwrap().error,
            Some(Error::NoHandler { .. })
        ));
        assert_eq!(status(&report, "t.after"), Lifecycle::Skipped);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        let mut handler = Recorder::new("t", &calls);
        handler.panic_on = vec!["a".to_string()];
        registry.register(handler);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let report = run(&chain(), &registry, &store, &builder, 2);
        assert_eq!(status(&report, "t.a"), Lifecycle::Failed);
        assert_eq!(status(&report, "t.b"), Lifecycle::Skipped);
        assert_eq!(status(&report, "t.independent"), Lifecycle::Applied);
        assert!(!store.is_locked());
    }

    #[test]
    fn test_cancelled_run_schedules_nothing() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let graph = GraphBuilder::build(&chain(), &NoModuleSources).unwrap();
        let plan = plan(&graph, &StateSnapshot::default(), &registry, &PlanOptions::default())
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let env = ApplyEnv {
            handlers: &registry,
            builder: &builder,
            store: &store,
            cancel,
        };
        let report = execute_simple(&plan, &env, &ExecuteOptions::default()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.summary().skipped, 4);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_declined_apply_touches_nothing() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let graph = GraphBuilder::build(&chain(), &NoModuleSources).unwrap();
        let plan = plan(&graph, &StateSnapshot::default(), &registry, &PlanOptions::default())
            .unwrap();
        let env = ApplyEnv {
            handlers: &registry,
            builder: &builder,
            store: &store,
            cancel: CancellationToken::new(),
        };
        let report = execute(
            &plan,
            &env,
            &ExecuteOptions::default(),
            &mut NoProgress,
            &mut AutoDecline,
        )
        .unwrap();
        assert!(report.declined);
        assert!(!report.cancelled);
        assert_eq!(report.summary().skipped, 4);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(store.load().unwrap().serial, 0);
    }

    #[test]
    fn test_stale_plan_and_lock_release() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state.json"));
        let builder = CountingBuilder(AtomicUsize::new(0));

        let graph = GraphBuilder::build(&chain(), &NoModuleSources).unwrap();
        let stale = plan(&graph, &StateSnapshot::default(), &registry, &PlanOptions::default())
            .unwrap();

        // Another run applies first
        run(&chain(), &registry, &store, &builder, 2);
        assert!(!store.lock_path().exists());

        let env = ApplyEnv {
            handlers: &registry,
            builder: &builder,
            store: &store,
            cancel: CancellationToken::new(),
        };
        let err = execute_simple(&stale, &env, &ExecuteOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StaleState { planned: 0, current: 1 })
        ));
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn test_outputs_in_report() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&calls, &[]);
        let store = MemoryStateStore::default();
        let builder = CountingBuilder(AtomicUsize::new(0));

        let mut config = chain();
        config
            .root
            .outputs
            .insert("c_arn".into(), json!("${t.c.arn}"));
        let report = run(&config, &registry, &store, &builder, 4);
        assert_eq!(report.outputs["c_arn"], json!("arn:t:c"));
    }
}
