//! Execution planner - diffs the graph against prior state
//!
//! Planning is side-effect-free and all-or-nothing: it either returns a
//! complete [`ExecutionPlan`] or a [`PlanError`].

use crate::artifact::ArtifactSpec;
use crate::diff::{AttributeChange, DiffSummary, diff_attributes, requires_replacement};
use crate::error::{Error, PlanError};
use crate::graph::ResourceGraph;
use crate::reference::{self, Reference};
use crate::state::{ResourceSnapshot, StateSnapshot};
use crate::types::{ActionKind, Attributes, ResourceAddress};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-type attribute rules used while diffing
pub trait ResourceSchema {
    /// Attributes whose change forces replacement
    fn immutable_attributes(&self, resource_type: &str) -> &[&'static str];
}

/// Schema where every attribute can change in place
pub struct NoSchema;

impl ResourceSchema for NoSchema {
    fn immutable_attributes(&self, _resource_type: &str) -> &[&'static str] {
        &[]
    }
}

/// Options for planning
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Restrict the plan to these resources (and what they depend on).
    ///
    /// Target format: "type", "type.name", "module.a" or a full address
    pub targets: Vec<String>,
    /// Plan deletion of every resource in state
    pub destroy: bool,
}

/// One planned action
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Resource address
    pub address: ResourceAddress,
    /// Resource type
    pub resource_type: String,
    /// What will happen
    pub kind: ActionKind,
    /// Attribute-level changes (empty for create and delete)
    pub changes: Vec<AttributeChange>,
    /// Why the action was chosen, when not obvious from `changes`
    pub reasons: Vec<String>,
    /// Desired attributes with artifact references resolved
    pub config: Attributes,
    /// Recorded snapshot, if any
    pub prior: Option<ResourceSnapshot>,
    /// Addresses this resource depends on
    pub dependencies: Vec<String>,
    /// Artifacts that must be built before this action
    pub artifacts: Vec<String>,
    /// Indices of actions that must be terminal before this one starts
    pub depends_on: Vec<usize>,
    /// Planned only because a dependency changes. The handler runs only if
    /// the attributes resolved at apply time differ from the recorded ones.
    pub refresh: bool,
}

impl PlannedAction {
    /// Address rendered as a string
    pub fn id(&self) -> String {
        self.address.to_string()
    }
}

/// An ordered set of actions
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Actions in execution order
    pub actions: Vec<PlannedAction>,
    /// Artifacts referenced by planned actions
    pub artifacts: BTreeMap<String, ArtifactSpec>,
    /// Every output (module outputs included) for interpolation
    pub outputs: BTreeMap<String, Value>,
    /// Serial of the state the plan was computed against
    pub state_serial: u64,
    /// Whether this is a destroy plan
    pub destroy: bool,
}

impl ExecutionPlan {
    /// Whether any action invokes a handler
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.kind.is_change())
    }

    /// Counts per action kind
    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_actions(self.actions.iter().map(|a| &a.kind))
    }

    /// Actions that change something
    pub fn changes(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.kind.is_change())
    }

    /// Look up the action for an address
    pub fn action(&self, address: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.id() == address)
    }

    /// Root outputs (module outputs excluded)
    pub fn root_outputs(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.outputs.iter().filter(|(k, _)| !k.starts_with("module."))
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Compute the actions that converge `prior` to the graph
pub fn plan(
    graph: &ResourceGraph,
    prior: &StateSnapshot,
    schema: &dyn ResourceSchema,
    options: &PlanOptions,
) -> Result<ExecutionPlan, PlanError> {
    let graph = if graph.is_resolved() {
        Cow::Borrowed(graph)
    } else {
        let mut resolved = graph.clone();
        resolved.resolve_references()?;
        Cow::Owned(resolved)
    };

    let mut plan = ExecutionPlan {
        outputs: graph.outputs().clone(),
        state_serial: prior.serial,
        destroy: options.destroy,
        ..Default::default()
    };

    let live: BTreeSet<String> = if options.destroy {
        BTreeSet::new()
    } else {
        graph.nodes().iter().map(|n| n.address.to_string()).collect()
    };
    plan_deletes(&mut plan, prior, &live, &options.targets)?;

    if !options.destroy {
        plan_graph(&mut plan, &graph, prior, schema, &options.targets)?;
    }

    let summary = plan.summary();
    log::info!(
        "Plan: {} to add, {} to change, {} to replace, {} to destroy",
        summary.additions,
        summary.modifications,
        summary.replacements,
        summary.removals
    );
    Ok(plan)
}

fn plan_graph(
    plan: &mut ExecutionPlan,
    graph: &ResourceGraph,
    prior: &StateSnapshot,
    schema: &dyn ResourceSchema,
    targets: &[String],
) -> Result<(), PlanError> {
    let selected = select_targets(graph, targets)?;
    let mut action_index: HashMap<usize, usize> = HashMap::new();

    for idx in graph.topological_order() {
        if !selected.contains(&idx) {
            continue;
        }
        let node = &graph.nodes()[idx];
        let address = node.address.to_string();
        let config = resolve_artifacts(&node.attributes, graph.artifacts());
        let artifacts: Vec<String> = graph.artifact_dependencies(idx).iter().cloned().collect();
        let snapshot = prior.get(&address);

        let mut reasons = Vec::new();
        let mut changes = Vec::new();
        let mut kind = match snapshot {
            None => ActionKind::Create,
            Some(snapshot) if snapshot.tainted => {
                reasons.push("resource is tainted".to_string());
                ActionKind::Replace
            }
            Some(snapshot) => {
                changes = diff_attributes(
                    &snapshot.config,
                    &config,
                    schema.immutable_attributes(&node.address.resource_type),
                );
                if changes.is_empty() {
                    ActionKind::NoOp
                } else if requires_replacement(&changes) {
                    ActionKind::Replace
                } else {
                    ActionKind::Update
                }
            }
        };

        if let Some(snapshot) = snapshot
            && kind == ActionKind::NoOp
        {
            for name in &artifacts {
                let Some(spec) = graph.artifacts().get(name) else {
                    continue;
                };
                let recorded = snapshot.artifact_fingerprints.get(name).map(String::as_str);
                if !spec.fingerprint.matches(recorded) {
                    reasons.push(format!("artifact '{name}' fingerprint changed"));
                    kind = ActionKind::Update;
                }
            }
        }

        let mut depends_on = Vec::new();
        let mut dependencies = Vec::new();
        let mut refresh = false;
        for &dep in graph.dependencies(idx) {
            let dep_address = graph.nodes()[dep].address.to_string();
            if let Some(&action) = action_index.get(&dep) {
                depends_on.push(action);
                let dep_kind = plan.actions[action].kind;
                // Computed attributes of a changing dependency may feed this one
                if (kind == ActionKind::NoOp || refresh) && dep_kind.is_change() {
                    reasons.push(format!("dependency {dep_address} will be {dep_kind}d"));
                    kind = ActionKind::Update;
                    refresh = true;
                }
            }
            dependencies.push(dep_address);
        }

        for name in &artifacts {
            if let Some(spec) = graph.artifacts().get(name) {
                plan.artifacts.insert(name.clone(), spec.clone());
            }
        }

        action_index.insert(idx, plan.actions.len());
        plan.actions.push(PlannedAction {
            address: node.address.clone(),
            resource_type: node.address.resource_type.clone(),
            kind,
            changes,
            reasons,
            config,
            prior: snapshot.cloned(),
            dependencies,
            artifacts,
            depends_on,
            refresh,
        });
    }
    Ok(())
}

/// Plan deletes for recorded resources not in `live`, dependents first
fn plan_deletes(
    plan: &mut ExecutionPlan,
    prior: &StateSnapshot,
    live: &BTreeSet<String>,
    targets: &[String],
) -> Result<(), PlanError> {
    let mut orphans: BTreeSet<&String> = prior
        .resources
        .keys()
        .filter(|address| !live.contains(*address))
        .collect();

    if !targets.is_empty() {
        let mut chosen: BTreeSet<&String> = orphans
            .iter()
            .copied()
            .filter(|address| {
                targets
                    .iter()
                    .any(|t| matches_target(&parse_address(address, prior), t))
            })
            .collect();
        // Anything recorded as depending on a chosen resource goes too
        loop {
            let before = chosen.len();
            for address in &orphans {
                let snapshot = &prior.resources[*address];
                if snapshot.dependencies.iter().any(|d| chosen.contains(d)) {
                    chosen.insert(*address);
                }
            }
            if chosen.len() == before {
                break;
            }
        }
        orphans = chosen;
    }

    // dependents[x] = orphans that recorded x as a dependency
    let mut dependents: BTreeMap<&String, BTreeSet<&String>> = BTreeMap::new();
    for &address in &orphans {
        for dep in &prior.resources[address].dependencies {
            if let Some(&dep) = orphans.get(dep) {
                dependents.entry(dep).or_default().insert(address);
            }
        }
    }

    let mut remaining: BTreeMap<&String, usize> = orphans
        .iter()
        .map(|&a| (a, dependents.get(a).map_or(0, BTreeSet::len)))
        .collect();
    let mut ready: BTreeSet<&String> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(a, _)| *a)
        .collect();
    let mut action_index: HashMap<&String, usize> = HashMap::new();

    while let Some(address) = ready.pop_first() {
        let snapshot = &prior.resources[address];
        let depends_on: Vec<usize> = dependents
            .get(address)
            .map(|ds| ds.iter().filter_map(|d| action_index.get(d).copied()).collect())
            .unwrap_or_default();

        action_index.insert(address, plan.actions.len());
        plan.actions.push(PlannedAction {
            address: parse_address(address, prior),
            resource_type: snapshot.resource_type.clone(),
            kind: ActionKind::Delete,
            changes: Vec::new(),
            reasons: Vec::new(),
            config: snapshot.config.clone(),
            prior: Some(snapshot.clone()),
            dependencies: snapshot.dependencies.clone(),
            artifacts: Vec::new(),
            depends_on,
            refresh: false,
        });

        let recorded: BTreeSet<&String> = snapshot.dependencies.iter().collect();
        for dep in recorded {
            if let Some(count) = remaining.get_mut(dep) {
                *count -= 1;
                if *count == 0
                    && let Some(&dep) = orphans.get(dep)
                {
                    ready.insert(dep);
                }
            }
        }
    }

    if action_index.len() != orphans.len() {
        let stuck = orphans
            .iter()
            .filter(|a| !action_index.contains_key(**a))
            .map(|a| (*a).clone())
            .collect();
        return Err(Error::CyclicDependency { cycle: stuck }.into());
    }
    Ok(())
}

fn parse_address(address: &str, prior: &StateSnapshot) -> ResourceAddress {
    ResourceAddress::parse(address).unwrap_or_else(|| {
        let resource_type = prior
            .get(address)
            .map(|s| s.resource_type.clone())
            .unwrap_or_default();
        ResourceAddress::new(resource_type, address)
    })
}

/// Resolve `${artifact.*}` references; everything else is left as written
fn resolve_artifacts(attributes: &Attributes, artifacts: &BTreeMap<String, ArtifactSpec>) -> Attributes {
    attributes
        .iter()
        .map(|(key, value)| {
            let resolved: Result<Value, std::convert::Infallible> =
                reference::substitute(value, &mut |expression: &str| {
                    let artifact_value = match Reference::parse(expression) {
                        Ok(Reference::Artifact { name, attribute }) => artifacts
                            .get(&name)
                            .and_then(|spec| spec.attribute(&attribute)),
                        _ => None,
                    };
                    Ok(artifact_value.unwrap_or_else(|| Value::String(format!("${{{expression}}}"))))
                });
            let resolved = match resolved {
                Ok(v) => v,
                Err(never) => match never {},
            };
            (key.clone(), resolved)
        })
        .collect()
}

/// Select targeted resources plus everything they depend on
fn select_targets(graph: &ResourceGraph, targets: &[String]) -> Result<BTreeSet<usize>, PlanError> {
    if targets.is_empty() {
        return Ok((0..graph.len()).collect());
    }

    let mut selected = BTreeSet::new();
    for target in targets {
        let matched: Vec<usize> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| matches_target(&n.address, target))
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            return Err(Error::UnresolvedReference {
                resource: "target".to_string(),
                reference: target.clone(),
            }
            .into());
        }
        selected.extend(matched);
    }

    let mut stack: Vec<usize> = selected.iter().copied().collect();
    while let Some(idx) = stack.pop() {
        for &dep in graph.dependencies(idx) {
            if selected.insert(dep) {
                stack.push(dep);
            }
        }
    }
    Ok(selected)
}

/// Parse a target string like "type.name" into (type, name)
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = target.split('.').collect();
    match parts.len() {
        1 => (Some(parts[0].to_string()), None),
        2 => (Some(parts[0].to_string()), Some(parts[1].to_string())),
        _ => (None, Some(target.to_string())),
    }
}

/// Check if an address matches a target
///
/// Module targets select everything inside the module. A bare type or
/// `type.name` matches at any module depth.
fn matches_target(address: &ResourceAddress, target: &str) -> bool {
    let rendered = address.to_string();
    if rendered == target {
        return true;
    }
    if target.starts_with("module.") {
        return rendered.starts_with(&format!("{target}."));
    }

    match parse_target(target) {
        (Some(resource_type), None) => address.resource_type == resource_type,
        (Some(resource_type), Some(name)) => {
            address.resource_type == resource_type && address.name == name
        }
        _ => false,
    }
}
