//! Resource graph - declared resources and the edges between them
//!
//! Edges point from a dependent to its dependency. They come from three
//! places: explicit `depends_on` entries, manual [`ResourceGraph::add_edge`]
//! calls, and reference expressions found in attribute values (including
//! references that pass through module outputs).

use crate::artifact::ArtifactSpec;
use crate::error::{Error, Result};
use crate::reference::{self, Reference};
use crate::types::{Attributes, ResourceAddress, module_prefix};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A declared resource after module expansion
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Fully-qualified address
    pub address: ResourceAddress,
    /// Desired attributes; references are absolute
    pub attributes: Attributes,
    /// Explicit dependencies as absolute resource addresses or module paths
    pub depends_on: Vec<String>,
}

/// An instantiated module
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInstance {
    /// Instance path, outermost first
    pub path: Vec<String>,
    /// Source reference it was expanded from
    pub source: String,
    /// Argument values after caller-scope rewriting
    pub args: BTreeMap<String, Value>,
}

impl ModuleInstance {
    /// Address of the instance (`module.a.module.b`)
    pub fn address(&self) -> String {
        module_address(&self.path)
    }
}

/// Render a module path as `module.a.module.b`
pub fn module_address(path: &[String]) -> String {
    module_prefix(path).trim_end_matches('.').to_string()
}

/// Key of an output in [`ResourceGraph::outputs`]
pub fn output_key(module_path: &[String], name: &str) -> String {
    format!("{}{name}", module_prefix(module_path))
}

/// The resource graph
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    modules: Vec<ModuleInstance>,
    outputs: BTreeMap<String, Value>,
    artifacts: BTreeMap<String, ArtifactSpec>,
    manual_edges: Vec<BTreeSet<usize>>,
    deps: Vec<BTreeSet<usize>>,
    artifact_deps: Vec<BTreeSet<String>>,
    resolved: bool,
}

impl ResourceGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; declaration order is preserved
    pub fn add_resource(
        &mut self,
        address: ResourceAddress,
        attributes: Attributes,
        depends_on: Vec<String>,
    ) -> Result<usize> {
        let key = address.to_string();
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateResource { address: key });
        }

        let idx = self.nodes.len();
        self.index.insert(key, idx);
        self.nodes.push(ResourceNode {
            address,
            attributes,
            depends_on,
        });
        self.manual_edges.push(BTreeSet::new());
        self.deps.push(BTreeSet::new());
        self.artifact_deps.push(BTreeSet::new());
        self.resolved = false;
        Ok(idx)
    }

    /// Record a module instance
    pub fn add_module(&mut self, path: Vec<String>, source: impl Into<String>, args: BTreeMap<String, Value>) {
        self.modules.push(ModuleInstance {
            path,
            source: source.into(),
            args,
        });
    }

    /// Record a module output (root outputs use an empty path)
    pub fn add_output(&mut self, module_path: &[String], name: &str, value: Value) {
        self.outputs.insert(output_key(module_path, name), value);
        self.resolved = false;
    }

    /// Declare a build artifact
    pub fn add_artifact(&mut self, spec: ArtifactSpec) {
        self.artifacts.insert(spec.name.clone(), spec);
        self.resolved = false;
    }

    /// Add an edge: `dependent` is applied after `dependency`
    pub fn add_edge(&mut self, dependent: &ResourceAddress, dependency: &ResourceAddress) -> Result<()> {
        let from = self.require(dependent, &dependent.to_string())?;
        let to = self.require(dependency, &dependent.to_string())?;
        self.manual_edges[from].insert(to);
        self.resolved = false;
        Ok(())
    }

    fn require(&self, address: &ResourceAddress, holder: &str) -> Result<usize> {
        self.index_of(&address.to_string())
            .ok_or_else(|| Error::UnresolvedReference {
                resource: holder.to_string(),
                reference: address.to_string(),
            })
    }

    /// Turn explicit dependencies and reference expressions into edges,
    /// then reject cycles.
    pub fn resolve_references(&mut self) -> Result<()> {
        let mut deps = self.manual_edges.clone();
        let mut artifact_deps = vec![BTreeSet::new(); self.nodes.len()];

        for (idx, node) in self.nodes.iter().enumerate() {
            let holder = node.address.to_string();

            for target in &node.depends_on {
                for dep in self.explicit_targets(target, &holder)? {
                    deps[idx].insert(dep);
                }
            }

            let mut visiting = HashSet::new();
            for value in node.attributes.values() {
                self.collect_value(
                    value,
                    &holder,
                    &mut deps[idx],
                    &mut artifact_deps[idx],
                    &mut visiting,
                )?;
            }
        }

        // Outputs must resolve even if nothing references them
        for (key, value) in &self.outputs {
            let holder = format!("output.{key}");
            let mut visiting = HashSet::new();
            self.collect_value(
                value,
                &holder,
                &mut BTreeSet::new(),
                &mut BTreeSet::new(),
                &mut visiting,
            )?;
        }

        self.deps = deps;
        self.artifact_deps = artifact_deps;
        self.detect_cycles()?;
        self.resolved = true;

        log::debug!(
            "Resolved graph: {} resources, {} edges, {} modules",
            self.nodes.len(),
            self.deps.iter().map(BTreeSet::len).sum::<usize>(),
            self.modules.len()
        );
        Ok(())
    }

    fn explicit_targets(&self, target: &str, holder: &str) -> Result<Vec<usize>> {
        if let Some(idx) = self.index_of(target) {
            return Ok(vec![idx]);
        }

        // A whole module: depend on every resource inside it
        let module_path = parse_module_path(target);
        if let Some(path) = module_path
            && self.modules.iter().any(|m| m.path == path)
        {
            return Ok(self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.address.is_within(&path))
                .map(|(i, _)| i)
                .collect());
        }

        Err(Error::UnresolvedReference {
            resource: holder.to_string(),
            reference: target.to_string(),
        })
    }

    fn collect_value(
        &self,
        value: &Value,
        holder: &str,
        deps: &mut BTreeSet<usize>,
        artifacts: &mut BTreeSet<String>,
        visiting: &mut HashSet<String>,
    ) -> Result<()> {
        for expression in reference::expressions(value) {
            let parsed = Reference::parse(&expression).map_err(|message| Error::InvalidReference {
                resource: holder.to_string(),
                expression: expression.clone(),
                message,
            })?;
            let unresolved = || Error::UnresolvedReference {
                resource: holder.to_string(),
                reference: expression.clone(),
            };

            match parsed {
                Reference::Resource { address, .. } => {
                    let idx = self.index_of(&address.to_string()).ok_or_else(unresolved)?;
                    deps.insert(idx);
                }
                Reference::ModuleOutput { module_path, name } => {
                    let key = output_key(&module_path, &name);
                    let output = self.outputs.get(&key).ok_or_else(unresolved)?;
                    if visiting.insert(key) {
                        self.collect_value(output, holder, deps, artifacts, visiting)?;
                    }
                }
                Reference::Artifact { name, attribute } => {
                    let spec = self.artifacts.get(&name).ok_or_else(unresolved)?;
                    if spec.attribute(&attribute).is_none() {
                        return Err(Error::InvalidReference {
                            resource: holder.to_string(),
                            expression: expression.clone(),
                            message: format!("unknown artifact attribute '{attribute}'"),
                        });
                    }
                    artifacts.insert(name);
                }
                Reference::Variable { .. } => return Err(unresolved()),
            }
        }
        Ok(())
    }

    /// Fail with [`Error::CyclicDependency`] if the edges contain a cycle.
    ///
    /// Traversal starts from resources in declaration order, so the reported
    /// cycle is the first one reachable from the earliest declaration.
    pub fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }

        fn visit(
            graph: &ResourceGraph,
            idx: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            marks[idx] = Mark::OnStack;
            stack.push(idx);
            for &dep in &graph.deps[idx] {
                match marks[dep] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&i| i == dep).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(graph, dep, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[idx] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for idx in 0..self.nodes.len() {
            if marks[idx] != Mark::New {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) = visit(self, idx, &mut marks, &mut stack) {
                return Err(Error::CyclicDependency {
                    cycle: cycle
                        .into_iter()
                        .map(|i| self.nodes[i].address.to_string())
                        .collect(),
                });
            }
        }
        Ok(())
    }

    /// Dependency-respecting order; ties broken by declaration order
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (idx, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(idx);
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.nodes.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }
        order
    }

    /// Whether [`Self::resolve_references`] ran after the last mutation
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Resources in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Look up a resource by address
    pub fn node(&self, address: &str) -> Option<&ResourceNode> {
        self.index_of(address).map(|i| &self.nodes[i])
    }

    /// Set a literal attribute on a resource after the graph is built.
    ///
    /// `value` must not contain references: no edges are derived from it.
    /// Returns `false` if the address is unknown.
    pub fn set_attribute(&mut self, address: &str, name: impl Into<String>, value: Value) -> bool {
        debug_assert!(reference::expressions(&value).is_empty());
        let Some(idx) = self.index_of(address) else {
            return false;
        };
        self.nodes[idx].attributes.insert(name.into(), value);
        true
    }

    /// Declaration index of an address
    pub fn index_of(&self, address: &str) -> Option<usize> {
        self.index.get(address).copied()
    }

    /// Direct dependencies of a resource
    pub fn dependencies(&self, idx: usize) -> &BTreeSet<usize> {
        &self.deps[idx]
    }

    /// Artifacts a resource references
    pub fn artifact_dependencies(&self, idx: usize) -> &BTreeSet<String> {
        &self.artifact_deps[idx]
    }

    /// Module instances in expansion order
    pub fn modules(&self) -> &[ModuleInstance] {
        &self.modules
    }

    /// All outputs keyed by `module.a.name` (or `name` at the root)
    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    /// Declared artifacts
    pub fn artifacts(&self) -> &BTreeMap<String, ArtifactSpec> {
        &self.artifacts
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no resources
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Parse `module.a.module.b` into `["a", "b"]`
fn parse_module_path(target: &str) -> Option<Vec<String>> {
    let parts: Vec<&str> = target.split('.').collect();
    if parts.len() % 2 != 0 {
        return None;
    }
    parts
        .chunks(2)
        .map(|pair| match pair {
            ["module", name] if !name.is_empty() => Some((*name).to_string()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Fingerprint;
    use serde_json::json;
    use std::path::PathBuf;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    fn addr(s: &str) -> ResourceAddress {
        ResourceAddress::parse(s).unwrap()
    }

    fn names(graph: &ResourceGraph, order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|&i| graph.nodes()[i].address.to_string())
            .collect()
    }

    #[test]
    fn test_duplicate_resource() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(addr("aws_s3_bucket.b"), Attributes::new(), vec![]).unwrap();
        let err = graph
            .add_resource(addr("aws_s3_bucket.b"), Attributes::new(), vec![])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateResource { .. }));
    }

    #[test]
    fn test_reference_edges_and_order() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(
                addr("aws_lambda_function.lambda_from_s3"),
                attrs(json!({
                    "s3_bucket": "${aws_s3_bucket.lambda_code_bucket.id}",
                    "s3_key": "${aws_s3_object.s3_lambda_code.key}"
                })),
                vec![],
            )
            .unwrap();
        graph
            .add_resource(
                addr("aws_s3_object.s3_lambda_code"),
                attrs(json!({ "bucket": "${aws_s3_bucket.lambda_code_bucket.id}" })),
                vec![],
            )
            .unwrap();
        graph
            .add_resource(addr("aws_s3_bucket.lambda_code_bucket"), attrs(json!({})), vec![])
            .unwrap();

        graph.resolve_references().unwrap();
        let order = graph.topological_order();
        assert_eq!(
            names(&graph, &order),
            vec![
                "aws_s3_bucket.lambda_code_bucket",
                "aws_s3_object.s3_lambda_code",
                "aws_lambda_function.lambda_from_s3",
            ]
        );
    }

    #[test]
    fn test_siblings_keep_declaration_order() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(addr("aws_iam_role.exec"), Attributes::new(), vec![]).unwrap();
        for name in ["b", "a"] {
            graph
                .add_resource(
                    ResourceAddress::new("aws_lambda_function", name),
                    attrs(json!({ "role": "${aws_iam_role.exec.arn}" })),
                    vec![],
                )
                .unwrap();
        }
        graph.resolve_references().unwrap();
        assert_eq!(
            names(&graph, &graph.topological_order()),
            vec!["aws_iam_role.exec", "aws_lambda_function.b", "aws_lambda_function.a"]
        );
    }

    #[test]
    fn test_unresolved_reference() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(
                addr("aws_lambda_function.f"),
                attrs(json!({ "role": "${aws_iam_role.missing.arn}" })),
                vec![],
            )
            .unwrap();
        let err = graph.resolve_references().unwrap_err();
        assert_eq!(
            err.to_string(),
            "aws_lambda_function.f: unresolved reference 'aws_iam_role.missing.arn'"
        );
        assert!(!graph.is_resolved());
    }

    #[test]
    fn test_leftover_variable_is_unresolved() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(addr("a.x"), attrs(json!({ "v": "${var.name}" })), vec![])
            .unwrap();
        assert!(matches!(
            graph.resolve_references().unwrap_err(),
            Error::UnresolvedReference { .. }
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(addr("t.a"), attrs(json!({ "x": "${t.b.id}" })), vec![]).unwrap();
        graph.add_resource(addr("t.b"), attrs(json!({ "x": "${t.c.id}" })), vec![]).unwrap();
        graph.add_resource(addr("t.c"), Attributes::new(), vec!["t.a".into()]).unwrap();

        match graph.resolve_references().unwrap_err() {
            Error::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["t.a", "t.b", "t.c", "t.a"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(addr("t.a"), attrs(json!({ "x": "${t.a.id}" })), vec![]).unwrap();
        assert!(matches!(
            graph.resolve_references().unwrap_err(),
            Error::CyclicDependency { .. }
        ));
    }

    #[test]
    fn test_manual_edge() {
        let mut graph = ResourceGraph::new();
        graph.add_resource(addr("t.a"), Attributes::new(), vec![]).unwrap();
        graph.add_resource(addr("t.b"), Attributes::new(), vec![]).unwrap();
        graph.add_edge(&addr("t.a"), &addr("t.b")).unwrap();
        assert!(graph.add_edge(&addr("t.a"), &addr("t.zzz")).is_err());

        graph.resolve_references().unwrap();
        assert_eq!(names(&graph, &graph.topological_order()), vec!["t.b", "t.a"]);
        // Re-resolving keeps manual edges
        graph.resolve_references().unwrap();
        assert!(graph.dependencies(0).contains(&1));
    }

    #[test]
    fn test_module_output_and_depends_on_module() {
        let mut graph = ResourceGraph::new();
        let path = vec!["lambda".to_string()];
        graph.add_module(path.clone(), "./modules/lambda", BTreeMap::new());
        graph
            .add_resource(ResourceAddress::in_module(&path, "aws_lambda_function", "this"), Attributes::new(), vec![])
            .unwrap();
        graph.add_output(&path, "arn", json!("${module.lambda.aws_lambda_function.this.arn}"));
        graph
            .add_resource(
                addr("t.uses_output"),
                attrs(json!({ "target": "${module.lambda.arn}" })),
                vec![],
            )
            .unwrap();
        graph
            .add_resource(addr("t.after_module"), Attributes::new(), vec!["module.lambda".into()])
            .unwrap();

        graph.resolve_references().unwrap();
        assert!(graph.dependencies(1).contains(&0));
        assert!(graph.dependencies(2).contains(&0));
    }

    #[test]
    fn test_unknown_output_and_module() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(addr("t.a"), attrs(json!({ "x": "${module.nope.arn}" })), vec![])
            .unwrap();
        assert!(graph.resolve_references().is_err());

        let mut graph = ResourceGraph::new();
        graph.add_resource(addr("t.a"), Attributes::new(), vec!["module.nope".into()]).unwrap();
        assert!(graph.resolve_references().is_err());
    }

    #[test]
    fn test_artifact_dependencies() {
        let mut graph = ResourceGraph::new();
        graph.add_artifact(ArtifactSpec {
            name: "lambda_zip".into(),
            source_dir: PathBuf::from("src"),
            output_dir: PathBuf::from("build"),
            filename: "lambda.zip".into(),
            fingerprint: Fingerprint::Value("abc".into()),
        });
        graph
            .add_resource(
                addr("aws_lambda_function.f"),
                attrs(json!({ "filename": "${artifact.lambda_zip.path}" })),
                vec![],
            )
            .unwrap();
        graph.resolve_references().unwrap();
        assert!(graph.artifact_dependencies(0).contains("lambda_zip"));

        graph
            .add_resource(
                addr("aws_lambda_function.g"),
                attrs(json!({ "filename": "${artifact.lambda_zip.size}" })),
                vec![],
            )
            .unwrap();
        assert!(matches!(
            graph.resolve_references().unwrap_err(),
            Error::InvalidReference { .. }
        ));
    }

    #[test]
    fn test_parse_module_path() {
        assert_eq!(
            parse_module_path("module.a.module.b"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(parse_module_path("module.a.b"), None);
        assert_eq!(parse_module_path("t.a"), None);
    }

    #[test]
    fn test_set_attribute() {
        let mut graph = ResourceGraph::new();
        graph
            .add_resource(ResourceAddress::new("t", "a"), Attributes::new(), vec![])
            .unwrap();
        graph.resolve_references().unwrap();

        assert!(graph.set_attribute("t.a", "source_code_hash", json!("abc")));
        assert_eq!(graph.node("t.a").unwrap().attributes["source_code_hash"], json!("abc"));
        assert!(!graph.set_attribute("t.missing", "x", json!(1)));
    }
}
